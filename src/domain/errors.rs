//! Error taxonomy for module validation
//!
//! Architecture: Failure Containment - every error names the scope it is fatal to
//! - Rule, file and module failures are recovered locally and encoded as data
//! - Only errors that make the whole operation meaningless reach the caller

use std::path::PathBuf;

/// Error types that can occur during validation
#[derive(Debug, thiserror::Error)]
pub enum GuardianError {
    /// Configuration file could not be loaded or parsed
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// File could not be read or accessed
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// The module directory itself does not exist
    #[error("Module path not found: {}", path.display())]
    PathNotFound { path: PathBuf },

    /// A rule definition is invalid and cannot be loaded into the catalog
    #[error("Rule '{rule_id}' failed to load: {message}")]
    RuleLoad { rule_id: String, message: String },

    /// A rule with the same id is already registered
    #[error("Rule '{rule_id}' is already registered")]
    RuleConflict { rule_id: String },

    /// Evaluating a single rule failed
    #[error("Rule '{rule_id}' evaluation failed: {message}")]
    RuleEvaluation { rule_id: String, message: String },

    /// A module manifest is not valid JSON
    #[error("Manifest parse error in {}: {message}", path.display())]
    ManifestParse { path: PathBuf, message: String },

    /// A required dependency could not be resolved to a module
    #[error("Dependency '{dependency}' of '{module}' could not be resolved: {message}")]
    GraphConstruction {
        module: String,
        dependency: String,
        message: String,
    },

    /// A module pipeline exceeded its time budget
    #[error("Validation of {} timed out after {timeout_ms}ms", path.display())]
    Timeout { path: PathBuf, timeout_ms: u64 },

    /// An auto-fix failed; `rolled_back` reports whether the backup was restored
    #[error("Auto-fix for rule '{rule_id}' failed: {message} (rolled back: {rolled_back})")]
    AutoFixApply {
        rule_id: String,
        message: String,
        rolled_back: bool,
    },

    /// Pattern compilation failed
    #[error("Pattern error: {message}")]
    Pattern { message: String },

    /// Validation operation failed
    #[error("Validation error: {message}")]
    Validation { message: String },
}

impl GuardianError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a pattern error
    pub fn pattern(message: impl Into<String>) -> Self {
        Self::Pattern {
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a path-not-found error
    pub fn path_not_found(path: impl Into<PathBuf>) -> Self {
        Self::PathNotFound { path: path.into() }
    }

    /// Create a rule load error
    pub fn rule_load(rule_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RuleLoad {
            rule_id: rule_id.into(),
            message: message.into(),
        }
    }

    /// Create a rule evaluation error
    pub fn rule_evaluation(rule_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RuleEvaluation {
            rule_id: rule_id.into(),
            message: message.into(),
        }
    }

    /// Create an auto-fix error
    pub fn auto_fix(
        rule_id: impl Into<String>,
        message: impl Into<String>,
        rolled_back: bool,
    ) -> Self {
        Self::AutoFixApply {
            rule_id: rule_id.into(),
            message: message.into(),
            rolled_back,
        }
    }

    /// Short machine-readable kind, used when errors are encoded as data
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::Io { .. } => "io",
            Self::PathNotFound { .. } => "path_not_found",
            Self::RuleLoad { .. } => "rule_load",
            Self::RuleConflict { .. } => "rule_conflict",
            Self::RuleEvaluation { .. } => "rule_evaluation",
            Self::ManifestParse { .. } => "manifest_parse",
            Self::GraphConstruction { .. } => "graph_construction",
            Self::Timeout { .. } => "timeout",
            Self::AutoFixApply { .. } => "auto_fix_apply",
            Self::Pattern { .. } => "pattern",
            Self::Validation { .. } => "validation",
        }
    }
}

/// Result type for Guardian operations
pub type GuardianResult<T> = Result<T, GuardianError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_their_scope() {
        let err = GuardianError::path_not_found("/tmp/missing-module");
        assert_eq!(err.kind(), "path_not_found");
        assert!(err.to_string().contains("/tmp/missing-module"));

        let err = GuardianError::auto_fix("docs.readme", "disk full", true);
        assert!(err.to_string().contains("rolled back: true"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let err: GuardianError = io.into();
        assert_eq!(err.kind(), "io");
    }
}
