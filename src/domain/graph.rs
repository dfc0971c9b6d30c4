//! Dependency graph data model
//!
//! Built once per analysis call and read-only afterwards.

use crate::domain::facts::DependencyKind;
use crate::domain::results::Severity;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Whether a node is one of the analysed modules or something reached beyond them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Module,
    External,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub module_path: PathBuf,
    /// Declared layer name
    pub layer: Option<String>,
    /// Position of `layer` in the configured layer order
    pub layer_ordinal: Option<usize>,
    pub node_type: NodeType,
    /// Distance from the analysed set; 0 for in-scope modules
    pub depth: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub kind: DependencyKind,
    pub weight: u32,
}

/// A dependency that could not be turned into an edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedDependency {
    pub from: String,
    pub name: String,
    pub version_req: String,
    pub kind: DependencyKind,
    /// Runtime dependencies are required; missing ones are construction errors
    pub required: bool,
    pub reason: String,
    /// External expansion stopped at `max_depth` before reaching it
    #[serde(default)]
    pub truncated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependencyGraph {
    /// Sorted by module path
    pub nodes: Vec<GraphNode>,
    /// Sorted by (from path, to path)
    pub edges: Vec<GraphEdge>,
}

impl DependencyGraph {
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a GraphEdge> + 'a {
        self.edges.iter().filter(move |e| e.from == id)
    }

    pub fn incoming<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a GraphEdge> + 'a {
        self.edges.iter().filter(move |e| e.to == id)
    }
}

/// A dependency cycle: node sequence from the back-edge target round to the source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyCycle {
    pub nodes: Vec<String>,
    /// The edge that closed the cycle, as (source, gray target)
    pub back_edge: (String, String),
    pub severity: Severity,
    pub involves_core: bool,
}

impl DependencyCycle {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.iter().any(|n| n == id)
    }

    /// `a -> b -> a`
    pub fn describe(&self) -> String {
        let mut path = self.nodes.join(" -> ");
        if let Some(first) = self.nodes.first() {
            path.push_str(" -> ");
            path.push_str(first);
        }
        path
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerViolationKind {
    /// A strict layer depends on a layer above it
    UpwardDependency,
    /// Two modules of the same layer depend on each other
    PeerDependency,
    /// A dependency jumps over an intermediate layer
    SkipLayer,
}

impl LayerViolationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UpwardDependency => "upward_dependency",
            Self::PeerDependency => "peer_dependency",
            Self::SkipLayer => "skip_layer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerViolation {
    pub kind: LayerViolationKind,
    pub from: String,
    pub to: String,
    pub from_layer: String,
    pub to_layer: String,
    pub severity: Severity,
}

/// Summary numbers for a graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphMetrics {
    pub node_count: usize,
    pub edge_count: usize,
    pub external_count: usize,
    pub max_fan_in: usize,
    pub max_fan_out: usize,
    pub cycle_count: usize,
    pub violation_count: usize,
}

/// Everything one analysis call produces
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphAnalysis {
    pub graph: DependencyGraph,
    pub cycles: Vec<DependencyCycle>,
    pub layer_violations: Vec<LayerViolation>,
    pub unresolved: Vec<UnresolvedDependency>,
    /// Dependency-first order; absent when the graph has cycles
    pub topological_order: Option<Vec<String>>,
    /// Whether external expansion stopped at the depth bound
    pub truncated: bool,
    pub metrics: GraphMetrics,
}

impl GraphAnalysis {
    /// The slice of this analysis that concerns one module
    pub fn view_for(&self, module_id: &str) -> ModuleDependencyView {
        ModuleDependencyView {
            module_id: module_id.to_string(),
            dependencies: self.graph.outgoing(module_id).map(|e| e.to.clone()).collect(),
            dependents: self.graph.incoming(module_id).map(|e| e.from.clone()).collect(),
            cycles: self.cycles.iter().filter(|c| c.contains(module_id)).cloned().collect(),
            layer_violations: self
                .layer_violations
                .iter()
                .filter(|v| v.from == module_id)
                .cloned()
                .collect(),
            unresolved: self.unresolved.iter().filter(|u| u.from == module_id).cloned().collect(),
            truncated: self.truncated,
        }
    }
}

/// Module-scoped slice of a graph analysis, embedded in reports
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleDependencyView {
    pub module_id: String,
    pub dependencies: Vec<String>,
    pub dependents: Vec<String>,
    pub cycles: Vec<DependencyCycle>,
    pub layer_violations: Vec<LayerViolation>,
    pub unresolved: Vec<UnresolvedDependency>,
    pub truncated: bool,
}
