//! Domain layer for Module Guardian
//!
//! Architecture: Domain Model - Pure data and behaviour for module compliance
//! - Facts, results, graphs and findings are value objects
//! - ValidationReport is the aggregate root for one module
//! - Independent of the filesystem, the scheduler and the command surface

pub mod errors;
pub mod facts;
pub mod graph;
pub mod results;
pub mod security;

// Re-export main domain types for convenience
pub use errors::*;
pub use facts::*;
pub use graph::*;
pub use results::*;
pub use security::*;
