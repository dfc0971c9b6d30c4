//! Dependency graph analysis across modules
//!
//! Architecture: Domain Service - builds a read-only graph from module facts
//! - One node per module, one edge per dependency that resolves to a module
//! - Everything that does not resolve is recorded, never turned into an edge
//! - Nodes, edges and traversal order are sorted by module path so results are stable

use crate::config::{ArchitectureConfig, LayerDefinition};
use crate::domain::facts::{declared_dependencies, DeclaredDependency, DependencyKind, ModuleFacts};
use crate::domain::graph::{
    DependencyCycle, DependencyGraph, GraphAnalysis, GraphEdge, GraphMetrics, GraphNode,
    LayerViolation, LayerViolationKind, NodeType, UnresolvedDependency,
};
use crate::domain::errors::GuardianError;
use crate::domain::results::Severity;
use crate::probe::fs::FileSystem;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Weight of an edge by dependency kind
pub fn edge_weight(kind: DependencyKind) -> u32 {
    match kind {
        DependencyKind::Runtime => 3,
        DependencyKind::Peer => 2,
        DependencyKind::Dev => 1,
    }
}

/// Builds dependency graphs and finds cycles and layer violations
pub struct DependencyGraphAnalyzer {
    config: ArchitectureConfig,
    filesystem: Arc<dyn FileSystem>,
}

struct PendingNode {
    node: GraphNode,
    dependencies: Vec<DeclaredDependency>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

impl DependencyGraphAnalyzer {
    pub fn new(config: ArchitectureConfig, filesystem: Arc<dyn FileSystem>) -> Self {
        Self { config, filesystem }
    }

    fn layer(&self, name: &str) -> Option<(usize, &LayerDefinition)> {
        self.config.layers.iter().enumerate().find(|(_, l)| l.name == name)
    }

    fn is_core(&self, node: &GraphNode) -> bool {
        let Some(layer) = node.layer.as_deref() else {
            return false;
        };
        match self.layer(layer) {
            Some((_, definition)) => definition.core || layer.eq_ignore_ascii_case("core"),
            None => layer.eq_ignore_ascii_case("core"),
        }
    }

    fn tracked(&self, kind: DependencyKind) -> bool {
        kind != DependencyKind::Dev || self.config.include_dev_dependencies
    }

    /// Analyse the modules as one graph
    pub fn analyze(&self, modules: &[ModuleFacts]) -> GraphAnalysis {
        let mut pending: BTreeMap<String, PendingNode> = BTreeMap::new();

        for facts in modules {
            if pending.contains_key(&facts.module_id) {
                tracing::warn!(
                    "Duplicate module id '{}' at {}; keeping the first occurrence",
                    facts.module_id,
                    facts.module_path.display()
                );
                continue;
            }
            let layer = facts.layer().map(str::to_string);
            let layer_ordinal = layer.as_deref().and_then(|l| self.layer(l)).map(|(i, _)| i);
            pending.insert(
                facts.module_id.clone(),
                PendingNode {
                    node: GraphNode {
                        id: facts.module_id.clone(),
                        module_path: facts.module_path.clone(),
                        layer,
                        layer_ordinal,
                        node_type: NodeType::Module,
                        depth: 0,
                    },
                    dependencies: facts.dependencies(),
                },
            );
        }

        let mut edges: BTreeMap<(String, String), GraphEdge> = BTreeMap::new();
        let mut unresolved = Vec::new();
        let mut truncated = false;

        // Breadth-first so external nodes get their shortest depth
        let mut frontier: Vec<String> = pending.keys().cloned().collect();
        while !frontier.is_empty() {
            let mut next = Vec::new();
            for id in frontier {
                let Some(source) = pending.get(&id) else { continue };
                let source_node = source.node.clone();
                let dependencies = source.dependencies.clone();

                for dependency in dependencies.into_iter().filter(|d| self.tracked(d.kind)) {
                    if !pending.contains_key(&dependency.name) && self.config.include_external {
                        if source_node.depth + 1 > self.config.max_depth {
                            truncated = true;
                            if source_node.node_type == NodeType::Module {
                                unresolved.push(self.unresolved(&source_node, dependency, true));
                            }
                            continue;
                        }
                        if let Some(external) = self.resolve_external(&source_node, &dependency) {
                            next.push(external.node.id.clone());
                            pending.insert(external.node.id.clone(), external);
                        }
                    }

                    if pending.contains_key(&dependency.name) {
                        let edge = GraphEdge {
                            from: source_node.id.clone(),
                            to: dependency.name.clone(),
                            kind: dependency.kind,
                            weight: edge_weight(dependency.kind),
                        };
                        let key = (edge.from.clone(), edge.to.clone());
                        match edges.get(&key) {
                            Some(existing) if existing.weight >= edge.weight => {}
                            _ => {
                                edges.insert(key, edge);
                            }
                        }
                    } else if source_node.node_type == NodeType::Module {
                        unresolved.push(self.unresolved(&source_node, dependency, false));
                    }
                }
            }
            frontier = next;
        }

        let mut nodes: Vec<GraphNode> = pending.into_values().map(|p| p.node).collect();
        nodes.sort_by(|a, b| a.module_path.cmp(&b.module_path).then_with(|| a.id.cmp(&b.id)));

        let path_of: HashMap<&str, &Path> =
            nodes.iter().map(|n| (n.id.as_str(), n.module_path.as_path())).collect();
        let mut edges: Vec<GraphEdge> = edges.into_values().collect();
        edges.sort_by(|a, b| {
            (path_of.get(a.from.as_str()), path_of.get(a.to.as_str()))
                .cmp(&(path_of.get(b.from.as_str()), path_of.get(b.to.as_str())))
        });

        let graph = DependencyGraph { nodes, edges };
        let cycles = self.detect_cycles(&graph);
        let layer_violations = self.layer_violations(&graph);
        let topological_order = topological_order(&graph);
        let metrics = metrics(&graph, cycles.len(), layer_violations.len());

        tracing::debug!(
            "Dependency graph: {} nodes, {} edges, {} cycles, {} layer violations",
            metrics.node_count,
            metrics.edge_count,
            metrics.cycle_count,
            metrics.violation_count
        );

        GraphAnalysis {
            graph,
            cycles,
            layer_violations,
            unresolved,
            topological_order,
            truncated,
            metrics,
        }
    }

    fn unresolved(
        &self,
        source: &GraphNode,
        dependency: DeclaredDependency,
        truncated: bool,
    ) -> UnresolvedDependency {
        let required = dependency.kind == DependencyKind::Runtime;
        let reason = if truncated {
            "not an analysed module; not expanded past max_depth"
        } else if self.config.include_external {
            "not an analysed module and not installed"
        } else {
            "not an analysed module"
        };
        if required {
            let error = GuardianError::GraphConstruction {
                module: source.id.clone(),
                dependency: dependency.name.clone(),
                message: reason.to_string(),
            };
            tracing::debug!("{}", error);
        }
        UnresolvedDependency {
            from: source.id.clone(),
            name: dependency.name,
            version_req: dependency.version_req,
            kind: dependency.kind,
            required,
            reason: reason.to_string(),
            truncated,
        }
    }

    /// Look for an installed package under `node_modules`, nearest first
    fn resolve_external(&self, source: &GraphNode, dependency: &DeclaredDependency) -> Option<PendingNode> {
        let mut search: Option<&Path> = Some(source.module_path.as_path());
        while let Some(dir) = search {
            let package_dir = dir.join("node_modules").join(&dependency.name);
            let manifest = package_dir.join("package.json");
            if self.filesystem.exists(&manifest) {
                return Some(self.external_node(package_dir, &manifest, dependency, source.depth + 1));
            }
            // Stop at the first directory that is not inside node_modules
            if !dir.components().any(|c| c.as_os_str() == "node_modules") {
                break;
            }
            search = dir.parent();
        }
        None
    }

    fn external_node(
        &self,
        package_dir: PathBuf,
        manifest: &Path,
        dependency: &DeclaredDependency,
        depth: usize,
    ) -> PendingNode {
        let parsed = self
            .filesystem
            .read_to_string(manifest)
            .ok()
            .and_then(|s| serde_json::from_str::<JsonValue>(&s).ok())
            .unwrap_or(JsonValue::Null);
        PendingNode {
            node: GraphNode {
                id: dependency.name.clone(),
                module_path: package_dir,
                layer: None,
                layer_ordinal: None,
                node_type: NodeType::External,
                depth,
            },
            dependencies: declared_dependencies(&parsed)
                .into_iter()
                .filter(|d| d.kind == DependencyKind::Runtime)
                .collect(),
        }
    }

    /// White/gray/black DFS; every back edge to a gray node yields one cycle
    pub fn detect_cycles(&self, graph: &DependencyGraph) -> Vec<DependencyCycle> {
        let index: HashMap<&str, usize> =
            graph.nodes.iter().enumerate().map(|(i, n)| (n.id.as_str(), i)).collect();
        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); graph.nodes.len()];
        for edge in &graph.edges {
            if let (Some(&from), Some(&to)) = (index.get(edge.from.as_str()), index.get(edge.to.as_str())) {
                adjacency[from].push(to);
            }
        }

        let mut colors = vec![Color::White; graph.nodes.len()];
        let mut stack = Vec::new();
        let mut found = Vec::new();

        for start in 0..graph.nodes.len() {
            if colors[start] == Color::White {
                visit(start, &adjacency, &mut colors, &mut stack, &mut found);
            }
        }

        found
            .into_iter()
            .map(|(members, (from, to)): (Vec<usize>, (usize, usize))| {
                let nodes: Vec<&GraphNode> = members.iter().map(|&i| &graph.nodes[i]).collect();
                let involves_core = nodes.iter().any(|n| self.is_core(n));
                let long = nodes.len() > self.config.long_cycle_threshold;
                // Core cycles stay critical at any length
                let severity = match (involves_core, long) {
                    (true, _) => Severity::Critical,
                    (false, false) => Severity::Warning,
                    (false, true) => Severity::Info,
                };
                DependencyCycle {
                    nodes: nodes.iter().map(|n| n.id.clone()).collect(),
                    back_edge: (graph.nodes[from].id.clone(), graph.nodes[to].id.clone()),
                    severity,
                    involves_core,
                }
            })
            .collect()
    }

    /// Check every module-to-module edge against the declared layer order
    pub fn layer_violations(&self, graph: &DependencyGraph) -> Vec<LayerViolation> {
        let mut violations = Vec::new();
        for edge in &graph.edges {
            let (Some(from), Some(to)) = (graph.node(&edge.from), graph.node(&edge.to)) else {
                continue;
            };
            let (Some(from_ord), Some(to_ord)) = (from.layer_ordinal, to.layer_ordinal) else {
                continue;
            };
            let strict = self.config.layers.get(from_ord).is_some_and(|l| l.strict);

            let violation = if to_ord < from_ord && strict {
                Some((LayerViolationKind::UpwardDependency, self.config.upward_severity))
            } else if to_ord == from_ord && from.id != to.id {
                Some((LayerViolationKind::PeerDependency, self.config.peer_severity))
            } else if to_ord > from_ord + 1 {
                Some((LayerViolationKind::SkipLayer, self.config.skip_layer_severity))
            } else {
                None
            };

            if let Some((kind, severity)) = violation {
                violations.push(LayerViolation {
                    kind,
                    from: from.id.clone(),
                    to: to.id.clone(),
                    from_layer: from.layer.clone().unwrap_or_default(),
                    to_layer: to.layer.clone().unwrap_or_default(),
                    severity,
                });
            }
        }
        violations
    }
}

fn visit(
    node: usize,
    adjacency: &[Vec<usize>],
    colors: &mut [Color],
    stack: &mut Vec<usize>,
    found: &mut Vec<(Vec<usize>, (usize, usize))>,
) {
    colors[node] = Color::Gray;
    stack.push(node);

    for &next in &adjacency[node] {
        match colors[next] {
            Color::White => visit(next, adjacency, colors, stack, found),
            Color::Gray => {
                if let Some(position) = stack.iter().position(|&n| n == next) {
                    found.push((stack[position..].to_vec(), (node, next)));
                }
            }
            Color::Black => {}
        }
    }

    stack.pop();
    colors[node] = Color::Black;
}

/// Dependency-first order (Kahn); `None` when the graph has a cycle
pub fn topological_order(graph: &DependencyGraph) -> Option<Vec<String>> {
    let position: HashMap<&str, usize> =
        graph.nodes.iter().enumerate().map(|(i, n)| (n.id.as_str(), i)).collect();
    let mut remaining_deps = vec![0usize; graph.nodes.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); graph.nodes.len()];

    for edge in &graph.edges {
        if let (Some(&from), Some(&to)) = (position.get(edge.from.as_str()), position.get(edge.to.as_str())) {
            remaining_deps[from] += 1;
            dependents[to].push(from);
        }
    }

    let mut ready: BTreeSet<usize> =
        (0..graph.nodes.len()).filter(|&i| remaining_deps[i] == 0).collect();
    let mut order = Vec::with_capacity(graph.nodes.len());

    while let Some(next) = ready.pop_first() {
        order.push(graph.nodes[next].id.clone());
        for &dependent in &dependents[next] {
            remaining_deps[dependent] -= 1;
            if remaining_deps[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    (order.len() == graph.nodes.len()).then_some(order)
}

fn metrics(graph: &DependencyGraph, cycle_count: usize, violation_count: usize) -> GraphMetrics {
    let mut fan_in: HashMap<&str, usize> = HashMap::new();
    let mut fan_out: HashMap<&str, usize> = HashMap::new();
    for edge in &graph.edges {
        *fan_out.entry(edge.from.as_str()).or_default() += 1;
        *fan_in.entry(edge.to.as_str()).or_default() += 1;
    }
    GraphMetrics {
        node_count: graph.nodes.len(),
        edge_count: graph.edges.len(),
        external_count: graph.nodes.iter().filter(|n| n.node_type == NodeType::External).count(),
        max_fan_in: fan_in.values().copied().max().unwrap_or(0),
        max_fan_out: fan_out.values().copied().max().unwrap_or(0),
        cycle_count,
        violation_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::fs::{MemoryFileSystem, StdFileSystem};
    use serde_json::json;

    fn module(id: &str, layer: Option<&str>, deps: &[&str]) -> ModuleFacts {
        let mut facts = ModuleFacts::empty(id, format!("/mods/{id}"));
        let dependencies: serde_json::Map<String, JsonValue> =
            deps.iter().map(|d| (d.to_string(), json!("^1.0.0"))).collect();
        let mut manifest = json!({"name": id, "dependencies": dependencies});
        if let Some(layer) = layer {
            manifest["layer"] = json!(layer);
        }
        facts.manifest = manifest;
        facts.manifest_present = true;
        facts
    }

    fn layers(names: &[(&str, bool, bool)]) -> ArchitectureConfig {
        ArchitectureConfig {
            layers: names
                .iter()
                .map(|(name, strict, core)| LayerDefinition {
                    name: name.to_string(),
                    strict: *strict,
                    core: *core,
                })
                .collect(),
            ..ArchitectureConfig::default()
        }
    }

    fn analyzer(config: ArchitectureConfig) -> DependencyGraphAnalyzer {
        DependencyGraphAnalyzer::new(config, Arc::new(StdFileSystem))
    }

    #[test]
    fn test_two_module_cycle_with_core_layer() {
        let analysis = analyzer(ArchitectureConfig::default()).analyze(&[
            module("a", Some("core"), &["b"]),
            module("b", None, &["a"]),
        ]);

        assert_eq!(analysis.cycles.len(), 1);
        let cycle = &analysis.cycles[0];
        assert_eq!(cycle.nodes, vec!["a", "b"]);
        assert_eq!(cycle.back_edge, ("b".to_string(), "a".to_string()));
        assert_eq!(cycle.severity, Severity::Critical);
        assert!(analysis.topological_order.is_none());
    }

    #[test]
    fn test_non_core_cycles_scale_down_with_length() {
        let mut config = ArchitectureConfig::default();
        config.long_cycle_threshold = 2;
        let short = analyzer(config.clone())
            .analyze(&[module("a", None, &["b"]), module("b", None, &["a"])]);
        assert_eq!(short.cycles[0].severity, Severity::Warning);

        let long = analyzer(config).analyze(&[
            module("a", None, &["b"]),
            module("b", None, &["c"]),
            module("c", None, &["a"]),
        ]);
        assert_eq!(long.cycles[0].nodes, vec!["a", "b", "c"]);
        assert_eq!(long.cycles[0].severity, Severity::Info);
    }

    #[test]
    fn test_long_core_cycle_stays_critical() {
        let mut config = ArchitectureConfig::default();
        config.long_cycle_threshold = 2;
        let analysis = analyzer(config).analyze(&[
            module("a", Some("core"), &["b"]),
            module("b", None, &["c"]),
            module("c", None, &["a"]),
        ]);

        assert_eq!(analysis.cycles.len(), 1);
        assert_eq!(analysis.cycles[0].len(), 3);
        assert!(analysis.cycles[0].involves_core);
        assert_eq!(analysis.cycles[0].severity, Severity::Critical);
    }

    #[test]
    fn test_cycle_contains_back_edge_and_is_bounded() {
        // d -> e -> f -> e : cycle of length 2 inside a longer chain
        let analysis = analyzer(ArchitectureConfig::default()).analyze(&[
            module("d", None, &["e"]),
            module("e", None, &["f"]),
            module("f", None, &["e"]),
        ]);
        assert_eq!(analysis.cycles.len(), 1);
        let cycle = &analysis.cycles[0];
        assert!(cycle.len() >= 2 && cycle.len() <= 2);
        assert!(cycle.contains(&cycle.back_edge.0) && cycle.contains(&cycle.back_edge.1));
    }

    #[test]
    fn test_unresolved_dependencies_are_not_edges() {
        let mut m = module("api", None, &["lodash"]);
        m.manifest["devDependencies"] = json!({"jest": "^29.0.0"});
        let analysis = analyzer(ArchitectureConfig::default()).analyze(&[m]);

        assert!(analysis.graph.edges.is_empty());
        assert_eq!(analysis.unresolved.len(), 1);
        assert_eq!(analysis.unresolved[0].name, "lodash");
        assert!(analysis.unresolved[0].required);
        assert_eq!(analysis.topological_order, Some(vec!["api".to_string()]));
    }

    #[test]
    fn test_layer_violations() {
        let config = layers(&[("app", true, false), ("service", true, false), ("data", true, false), ("core", true, true)]);
        let analysis = analyzer(config).analyze(&[
            module("web", Some("app"), &["db"]),
            module("billing", Some("service"), &["web", "orders"]),
            module("orders", Some("service"), &[]),
            module("db", Some("data"), &[]),
        ]);

        let kinds: Vec<_> = analysis
            .layer_violations
            .iter()
            .map(|v| (v.from.as_str(), v.to.as_str(), v.kind))
            .collect();
        assert!(kinds.contains(&("billing", "web", LayerViolationKind::UpwardDependency)));
        assert!(kinds.contains(&("billing", "orders", LayerViolationKind::PeerDependency)));
        assert!(kinds.contains(&("web", "db", LayerViolationKind::SkipLayer)));
        assert_eq!(kinds.len(), 3);

        let skip = analysis
            .layer_violations
            .iter()
            .find(|v| v.kind == LayerViolationKind::SkipLayer)
            .unwrap();
        assert_eq!(skip.severity, Severity::Warning);
    }

    #[test]
    fn test_non_strict_layer_may_depend_upward() {
        let config = layers(&[("app", true, false), ("shared", false, false)]);
        let analysis = analyzer(config)
            .analyze(&[module("ui", Some("app"), &[]), module("utils", Some("shared"), &["ui"])]);
        assert!(analysis.layer_violations.is_empty());
    }

    #[test]
    fn test_topological_order_is_dependency_first() {
        let analysis = analyzer(ArchitectureConfig::default()).analyze(&[
            module("app", None, &["lib", "util"]),
            module("lib", None, &["util"]),
            module("util", None, &[]),
        ]);
        assert_eq!(
            analysis.topological_order,
            Some(vec!["util".to_string(), "lib".to_string(), "app".to_string()])
        );
        assert_eq!(analysis.metrics.max_fan_in, 2);
        assert_eq!(analysis.metrics.max_fan_out, 2);
        assert_eq!(analysis.view_for("lib").dependents, vec!["app".to_string()]);
    }

    #[test]
    fn test_external_expansion_is_bounded() {
        let mut fs = MemoryFileSystem::new();
        fs.add_file(
            "/mods/api/node_modules/express/package.json",
            r#"{"name":"express","dependencies":{"body-parser":"1.0.0"}}"#,
        )
        .add_file(
            "/mods/api/node_modules/body-parser/package.json",
            r#"{"name":"body-parser","dependencies":{"bytes":"1.0.0"}}"#,
        );

        let mut config = ArchitectureConfig::default();
        config.include_external = true;
        config.max_depth = 1;
        let analysis = DependencyGraphAnalyzer::new(config, Arc::new(fs))
            .analyze(&[module("api", None, &["express"])]);

        assert_eq!(analysis.metrics.external_count, 1);
        assert!(analysis.truncated);
        let express = analysis.graph.node("express").unwrap();
        assert_eq!(express.node_type, NodeType::External);
        assert_eq!(express.depth, 1);
        assert!(analysis.unresolved.is_empty());
    }

    #[test]
    fn test_dependencies_past_max_depth_are_unresolved() {
        let mut fs = MemoryFileSystem::new();
        fs.add_file("/mods/api/node_modules/express/package.json", r#"{"name":"express"}"#);

        let mut config = ArchitectureConfig::default();
        config.include_external = true;
        config.max_depth = 0;
        let analysis = DependencyGraphAnalyzer::new(config, Arc::new(fs))
            .analyze(&[module("api", None, &["express", "lodash"])]);

        assert!(analysis.truncated);
        assert_eq!(analysis.metrics.external_count, 0);
        let names: Vec<&str> = analysis.unresolved.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["express", "lodash"]);
        assert!(analysis.unresolved.iter().all(|u| u.truncated && u.required));
        assert!(analysis.graph.edges.is_empty());
    }
}
