//! Single-module validation pipeline
//!
//! Architecture: Application Service - the orchestrator sequences the domain services
//! - Stages run in a fixed order: probe, rules, dependency analysis, security scan
//! - Later stages only read the facts produced by the probe
//! - Dependency and security findings are folded in as synthetic results when present
//! - The report is scored once, after every stage has contributed

use crate::config::GuardianConfig;
use crate::domain::errors::{GuardianError, GuardianResult};
use crate::domain::facts::ModuleFacts;
use crate::domain::graph::{GraphAnalysis, ModuleDependencyView};
use crate::domain::results::{
    Effort, Priority, Recommendation, ReportBuilder, ResultStatus, Severity, ValidationReport,
    ValidationResult,
};
use crate::domain::security::ScanSummary;
use crate::engine::ComplianceRuleEngine;
use crate::graph::DependencyGraphAnalyzer;
use crate::probe::fs::{FileSystem, StdFileSystem};
use crate::probe::ModuleStructureProbe;
use crate::rules::{ComplianceRule, RuleCatalog};
use crate::security::{ScanFilter, SecurityPatternScanner};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Synthetic result id for dependency cycles touching a module
pub const CYCLE_RESULT_ID: &str = "architecture.cycle";
/// Synthetic result id for layer violations originating in a module
pub const LAYER_RESULT_ID: &str = "architecture.layer-violation";

/// Include/exclude/tag selection applied to the applicable rules
#[derive(Debug, Clone, Default)]
pub struct RuleSelection {
    include: Vec<glob::Pattern>,
    exclude: Vec<glob::Pattern>,
    tags: Vec<String>,
}

impl RuleSelection {
    /// Rule id patterns accept globs, e.g. `docs.*`
    pub fn new(include: &[String], exclude: &[String], tags: &[String]) -> GuardianResult<Self> {
        let compile = |raw: &String| {
            glob::Pattern::new(raw.trim()).map_err(|e| {
                GuardianError::config(format!("Invalid rule selection pattern '{raw}': {e}"))
            })
        };
        Ok(Self {
            include: include.iter().map(compile).collect::<GuardianResult<_>>()?,
            exclude: exclude.iter().map(compile).collect::<GuardianResult<_>>()?,
            tags: tags.iter().map(|t| t.trim().to_string()).collect(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty() && self.tags.is_empty()
    }

    pub fn selects(&self, rule: &ComplianceRule) -> bool {
        if !self.include.is_empty() && !self.include.iter().any(|p| p.matches(&rule.id)) {
            return false;
        }
        if self.exclude.iter().any(|p| p.matches(&rule.id)) {
            return false;
        }
        self.tags.is_empty() || self.tags.iter().any(|t| rule.has_tag(t))
    }
}

/// Per-call switches for one validation
#[derive(Debug, Clone)]
pub struct ValidationOptions {
    pub selection: RuleSelection,
    pub dependency_analysis: bool,
    pub security_scan: bool,
    /// Projection over security findings before they are folded
    pub scan_filter: ScanFilter,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            selection: RuleSelection::default(),
            dependency_analysis: true,
            security_scan: true,
            scan_filter: ScanFilter::default(),
        }
    }
}

/// Runs probe, rules, dependency analysis and security scan for one module
pub struct ValidationOrchestrator {
    config: Arc<GuardianConfig>,
    probe: ModuleStructureProbe,
    engine: ComplianceRuleEngine,
    graph: DependencyGraphAnalyzer,
    scanner: SecurityPatternScanner,
    fingerprint: String,
}

impl ValidationOrchestrator {
    /// Build against the real filesystem with the catalog the config describes
    pub fn from_config(config: GuardianConfig) -> GuardianResult<Self> {
        let catalog = Arc::new(config.build_catalog()?);
        Self::new(config, catalog)
    }

    pub fn new(config: GuardianConfig, catalog: Arc<RuleCatalog>) -> GuardianResult<Self> {
        Self::with_filesystem(config, catalog, Arc::new(StdFileSystem))
    }

    pub fn with_filesystem(
        config: GuardianConfig,
        catalog: Arc<RuleCatalog>,
        filesystem: Arc<dyn FileSystem>,
    ) -> GuardianResult<Self> {
        config.validate()?;
        let probe = ModuleStructureProbe::with_filesystem(&config, filesystem.clone())?;
        let scanner = SecurityPatternScanner::new(&config.security)?;
        let graph = DependencyGraphAnalyzer::new(config.architecture.clone(), filesystem);
        let fingerprint = config.fingerprint();

        Ok(Self {
            config: Arc::new(config),
            probe,
            engine: ComplianceRuleEngine::new(catalog),
            graph,
            scanner,
            fingerprint,
        })
    }

    pub fn config(&self) -> &GuardianConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<RuleCatalog> {
        self.engine.catalog()
    }

    pub fn config_fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Snapshot one module without evaluating anything
    pub fn probe(&self, module_path: &Path) -> GuardianResult<ModuleFacts> {
        self.probe.probe(module_path)
    }

    /// Analyse several modules as one dependency graph
    pub fn analyze_graph(&self, modules: &[ModuleFacts]) -> GraphAnalysis {
        self.graph.analyze(modules)
    }

    /// Applicable, enabled rules that the selection keeps, in catalog order
    pub fn selected_rules(
        &self,
        module_type: Option<&str>,
        selection: &RuleSelection,
    ) -> Vec<Arc<ComplianceRule>> {
        self.catalog()
            .get_applicable_rules(module_type)
            .into_iter()
            .filter(|rule| selection.selects(rule))
            .collect()
    }

    /// Validate one module; the dependency graph covers only this module
    pub fn validate(
        &self,
        module_path: &Path,
        options: &ValidationOptions,
    ) -> GuardianResult<ValidationReport> {
        self.validate_with_graph(module_path, options, None)
    }

    /// Validate one module against a graph shared by a batch run, if given
    pub fn validate_with_graph(
        &self,
        module_path: &Path,
        options: &ValidationOptions,
        shared_graph: Option<&GraphAnalysis>,
    ) -> GuardianResult<ValidationReport> {
        let start = Instant::now();
        let facts = self.probe.probe(module_path)?;
        let probe_time = start.elapsed();

        let mut report = self.assemble(&facts, options, shared_graph, probe_time);
        report.metrics.execution_time_ms = millis(start.elapsed());
        Ok(report)
    }

    /// Validate an existing snapshot
    pub fn validate_facts(
        &self,
        facts: &ModuleFacts,
        options: &ValidationOptions,
        shared_graph: Option<&GraphAnalysis>,
    ) -> ValidationReport {
        let start = Instant::now();
        let mut report = self.assemble(facts, options, shared_graph, Duration::ZERO);
        report.metrics.execution_time_ms = millis(start.elapsed());
        report
    }

    fn assemble(
        &self,
        facts: &ModuleFacts,
        options: &ValidationOptions,
        shared_graph: Option<&GraphAnalysis>,
        probe_time: Duration,
    ) -> ValidationReport {
        let mut builder = ReportBuilder::new(&facts.module_id, &facts.module_path);
        builder.set_config_fingerprint(self.fingerprint.clone());
        builder.set_fact_warnings(facts.warnings.clone());

        let rules_start = Instant::now();
        let rules = self.selected_rules(facts.module_type(), &options.selection);
        builder.extend_results(self.engine.evaluate_rules(&rules, facts));
        let rules_time = rules_start.elapsed();

        let graph_start = Instant::now();
        if options.dependency_analysis {
            let view = match shared_graph {
                Some(analysis) => analysis.view_for(&facts.module_id),
                None => self.graph.analyze(std::slice::from_ref(facts)).view_for(&facts.module_id),
            };
            if self.config.report.fold_findings {
                builder.extend_results(fold_dependency_findings(&view));
            }
            builder.set_dependencies(view);
        }
        let graph_time = graph_start.elapsed();

        let security_start = Instant::now();
        if options.security_scan {
            let summary = self.scanner.scan_filtered(facts, &options.scan_filter);
            if self.config.report.fold_findings {
                builder.extend_results(fold_security_findings(&summary));
            }
            builder.set_security(summary);
        }
        let security_time = security_start.elapsed();

        let recommendations = build_recommendations(
            builder.results(),
            self.catalog(),
            self.config.report.min_group_size,
        );
        builder.set_recommendations(recommendations);

        let metrics = builder.metrics_mut();
        metrics.files_probed = facts.files.len();
        metrics.excerpts_scanned = facts.excerpts.len();
        metrics.probe_time_ms = millis(probe_time);
        metrics.rules_time_ms = millis(rules_time);
        metrics.graph_time_ms = millis(graph_time);
        metrics.security_time_ms = millis(security_time);

        let report = builder.finish();
        tracing::info!(
            "Validated {}: score {:.1}, status {}, {} results",
            report.module_id,
            report.overall_score,
            report.status.as_str(),
            report.results.len()
        );
        report
    }
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Cycle and layer-violation results for a module, only when it has any
pub fn fold_dependency_findings(view: &ModuleDependencyView) -> Vec<ValidationResult> {
    let mut results = Vec::new();

    if let Some(severity) = view.cycles.iter().map(|c| c.severity).max() {
        let cycles: Vec<String> = view.cycles.iter().map(|c| c.describe()).collect();
        results.push(ValidationResult::new(
            CYCLE_RESULT_ID,
            ResultStatus::for_failure(severity),
            severity,
            "architecture",
            format!(
                "Module participates in {} dependency cycle(s): {}",
                cycles.len(),
                cycles.join("; ")
            ),
        )
        .folded());
    }

    if let Some(severity) = view.layer_violations.iter().map(|v| v.severity).max() {
        let violations: Vec<String> = view
            .layer_violations
            .iter()
            .map(|v| {
                format!("{} {} ({}) -> {} ({})", v.kind.as_str(), v.from, v.from_layer, v.to, v.to_layer)
            })
            .collect();
        results.push(ValidationResult::new(
            LAYER_RESULT_ID,
            ResultStatus::for_failure(severity),
            severity,
            "architecture",
            format!("{} layer violation(s): {}", violations.len(), violations.join("; ")),
        )
        .folded());
    }

    results
}

/// One `security.<type>` result per vulnerability type found
pub fn fold_security_findings(summary: &ScanSummary) -> Vec<ValidationResult> {
    const LISTED: usize = 3;

    summary
        .by_type()
        .into_iter()
        .filter_map(|(vulnerability_type, findings)| {
            let worst = findings.iter().max_by_key(|v| v.severity)?;
            let severity = worst.severity.as_rule_severity();

            let mut listed: Vec<String> = findings
                .iter()
                .take(LISTED)
                .map(|v| match v.location.line_number {
                    Some(line) => format!("{} ({}:{})", v.title, v.location.file_path, line),
                    None => format!("{} ({})", v.title, v.location.file_path),
                })
                .collect();
            if findings.len() > LISTED {
                listed.push(format!("{} more", findings.len() - LISTED));
            }

            Some(
                ValidationResult::new(
                    format!("security.{}", vulnerability_type.as_str()),
                    ResultStatus::for_failure(severity),
                    severity,
                    "security",
                    format!(
                        "{} {} finding(s): {}",
                        findings.len(),
                        vulnerability_type.as_str(),
                        listed.join("; ")
                    ),
                )
                .with_location(&worst.location.file_path, worst.location.line_number)
                .folded(),
            )
        })
        .collect()
}

/// Group failed results by category and severity into remediation advice
pub fn build_recommendations(
    results: &[ValidationResult],
    catalog: &RuleCatalog,
    min_group_size: usize,
) -> Vec<Recommendation> {
    let mut groups: BTreeMap<(String, Severity), Vec<&ValidationResult>> = BTreeMap::new();
    for result in results.iter().filter(|r| r.is_failure()) {
        groups
            .entry((result.category.clone(), result.severity))
            .or_default()
            .push(result);
    }

    let total = results.len().max(1) as f64;
    let mut recommendations: Vec<Recommendation> = groups
        .into_iter()
        .filter(|(_, group)| group.len() >= min_group_size.max(1))
        .map(|((category, severity), group)| {
            let priority = match severity {
                Severity::Critical | Severity::Error => Priority::High,
                Severity::Warning => Priority::Medium,
                Severity::Info => Priority::Low,
            };
            let effort = if group.iter().all(|r| r.can_auto_fix) {
                Effort::Low
            } else if group.len() <= 3 {
                Effort::Medium
            } else {
                Effort::High
            };
            let impact = (1000.0 * group.len() as f64 / total).round() / 10.0;

            let mut rule_ids: Vec<String> = group.iter().map(|r| r.rule_id.clone()).collect();
            rule_ids.sort();
            rule_ids.dedup();

            let steps = rule_ids
                .iter()
                .map(|id| remediation_step(id, &group, catalog))
                .collect();

            Recommendation {
                title: format!(
                    "Resolve {} {} {} finding(s)",
                    group.len(),
                    severity.as_str(),
                    category
                ),
                category,
                severity,
                priority,
                effort,
                impact,
                rule_ids,
                steps,
            }
        })
        .collect();

    recommendations.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| b.impact.total_cmp(&a.impact))
            .then_with(|| a.category.cmp(&b.category))
    });
    recommendations
}

fn remediation_step(rule_id: &str, group: &[&ValidationResult], catalog: &RuleCatalog) -> String {
    if let Some(text) = catalog.get_rule(rule_id).and_then(|r| r.remediation.clone()) {
        return format!("{rule_id}: {text}");
    }
    match group.iter().find(|r| r.rule_id == rule_id) {
        Some(result) if result.can_auto_fix => format!("{rule_id}: apply the automatic fix"),
        Some(result) => format!("{rule_id}: {}", result.message),
        None => rule_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::results::ReportStatus;
    use std::fs;
    use tempfile::TempDir;

    const TWO_RULES: &str = r#"
version: "1.0"
builtin_rules: false
rules:
  - id: docs.readme-present
    category: documentation
    severity: error
    scope: documentation
    conditions:
      - operator: file_exists
        value: README.md
  - id: testing.test-script
    category: testing
    severity: warning
    scope: testing
    tags: [ci]
    conditions:
      - field: package.scripts.test
        operator: exists
"#;

    fn orchestrator(yaml: &str) -> ValidationOrchestrator {
        let config = GuardianConfig::load_from_str(yaml).unwrap();
        ValidationOrchestrator::from_config(config).unwrap()
    }

    fn module(dir: &TempDir, name: &str, manifest: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("package.json"), manifest).unwrap();
        path
    }

    #[test]
    fn test_missing_readme_and_test_script() {
        let dir = TempDir::new().unwrap();
        let path = module(&dir, "billing", r#"{"name": "billing", "scripts": {}}"#);

        let report = orchestrator(TWO_RULES)
            .validate(&path, &ValidationOptions::default())
            .unwrap();

        assert_eq!(report.module_id, "billing");
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[0].status, ResultStatus::Fail);
        assert_eq!(report.results[1].status, ResultStatus::Warning);
        assert_eq!(report.overall_score, 0.0);
        assert_eq!(report.status, ReportStatus::Fail);
        assert_eq!(report.exit_code(), 1);
        assert!(report.config_fingerprint.is_some());
    }

    #[test]
    fn test_passing_module() {
        let dir = TempDir::new().unwrap();
        let path = module(&dir, "billing", r#"{"name": "billing", "scripts": {"test": "jest"}}"#);
        fs::write(path.join("README.md"), "# billing\n").unwrap();

        let report = orchestrator(TWO_RULES)
            .validate(&path, &ValidationOptions::default())
            .unwrap();

        assert_eq!(report.overall_score, 100.0);
        assert_eq!(report.status, ReportStatus::Pass);
        assert!(report.recommendations.is_empty());
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn test_missing_module_is_fatal() {
        let dir = TempDir::new().unwrap();
        let err = orchestrator(TWO_RULES)
            .validate(&dir.path().join("absent"), &ValidationOptions::default())
            .unwrap_err();
        assert!(matches!(err, GuardianError::PathNotFound { .. }));
    }

    #[test]
    fn test_rule_selection() {
        let dir = TempDir::new().unwrap();
        let path = module(&dir, "billing", r#"{"name": "billing"}"#);
        let orchestrator = orchestrator(TWO_RULES);

        let only_docs = ValidationOptions {
            selection: RuleSelection::new(&["docs.*".to_string()], &[], &[]).unwrap(),
            ..Default::default()
        };
        let report = orchestrator.validate(&path, &only_docs).unwrap();
        assert_eq!(report.failing_rule_ids(), vec!["docs.readme-present"]);

        let ci_tagged = ValidationOptions {
            selection: RuleSelection::new(&[], &[], &["ci".to_string()]).unwrap(),
            ..Default::default()
        };
        let report = orchestrator.validate(&path, &ci_tagged).unwrap();
        assert_eq!(report.failing_rule_ids(), vec!["testing.test-script"]);

        let excluded = ValidationOptions {
            selection: RuleSelection::new(&[], &["testing.*".to_string()], &[]).unwrap(),
            ..Default::default()
        };
        let report = orchestrator.validate(&path, &excluded).unwrap();
        assert!(report.result_for("testing.test-script").is_none());
    }

    #[test]
    fn test_security_findings_are_folded() {
        let dir = TempDir::new().unwrap();
        let path = module(&dir, "api", r#"{"name": "api", "scripts": {"test": "jest"}}"#);
        fs::write(path.join("README.md"), "# api\n").unwrap();
        fs::write(path.join("handler.js"), "function run(req) {\n  return eval(req.body.code);\n}\n").unwrap();

        let report = orchestrator(TWO_RULES)
            .validate(&path, &ValidationOptions::default())
            .unwrap();

        let folded = report.result_for("security.code").unwrap();
        assert_eq!(folded.file_path.as_deref(), Some("handler.js"));
        assert_eq!(folded.line_number, Some(2));
        assert_eq!(report.security.as_ref().unwrap().vulnerabilities.len(), 1);
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.status, ReportStatus::Fail);
    }

    #[test]
    fn test_score_counts_only_rule_results() {
        let dir = TempDir::new().unwrap();
        let path = module(&dir, "api", r#"{"name": "api", "scripts": {"test": "jest"}}"#);
        fs::write(path.join("README.md"), "# api\n").unwrap();
        fs::write(path.join("handler.js"), "function run(req) {\n  return eval(req.body.code);\n}\n").unwrap();

        let report = orchestrator(TWO_RULES)
            .validate(&path, &ValidationOptions::default())
            .unwrap();

        let statuses: Vec<(&str, ResultStatus)> =
            report.results.iter().map(|r| (r.rule_id.as_str(), r.status)).collect();
        assert_eq!(
            statuses,
            vec![
                ("docs.readme-present", ResultStatus::Pass),
                ("testing.test-script", ResultStatus::Pass),
                ("security.code", ResultStatus::Fail),
            ]
        );
        assert!(report.result_for("security.code").unwrap().folded);
        assert_eq!(report.overall_score, 100.0);
        assert_eq!(report.metrics.rules_evaluated, 2);
        assert_eq!(report.status, ReportStatus::Fail);
    }

    #[test]
    fn test_clean_module_keeps_only_rule_results() {
        let dir = TempDir::new().unwrap();
        let path = module(&dir, "api", r#"{"name": "api", "scripts": {"test": "jest"}}"#);
        fs::write(path.join("README.md"), "# api\n").unwrap();
        fs::write(path.join("index.js"), "// eval(req.body.code)\nmodule.exports = 1;\n").unwrap();

        let report = orchestrator(TWO_RULES)
            .validate(&path, &ValidationOptions::default())
            .unwrap();
        assert_eq!(report.results.len(), 2);
        assert!(report.dependencies.is_some());
    }

    #[test]
    fn test_shared_graph_cycle_is_folded() {
        let dir = TempDir::new().unwrap();
        let yaml = format!(
            "{TWO_RULES}architecture:\n  layers:\n    - name: core\n      core: true\n"
        );
        let orchestrator = orchestrator(&yaml);
        let a = module(&dir, "a", r#"{"name": "a", "layer": "core", "dependencies": {"b": "1.0.0"}}"#);
        let b = module(&dir, "b", r#"{"name": "b", "layer": "core", "dependencies": {"a": "1.0.0"}}"#);

        let facts = vec![orchestrator.probe(&a).unwrap(), orchestrator.probe(&b).unwrap()];
        let graph = orchestrator.analyze_graph(&facts);
        let report = orchestrator.validate_facts(&facts[0], &ValidationOptions::default(), Some(&graph));

        let cycle = report.result_for(CYCLE_RESULT_ID).unwrap();
        assert_eq!(cycle.severity, Severity::Critical);
        assert_eq!(cycle.status, ResultStatus::Fail);
        assert!(cycle.folded);
        assert_eq!(report.dependencies.as_ref().unwrap().cycles.len(), 1);
    }

    #[test]
    fn test_idempotent_revalidation() {
        let dir = TempDir::new().unwrap();
        let path = module(&dir, "billing", r#"{"name": "billing"}"#);
        let orchestrator = orchestrator(TWO_RULES);

        let first = orchestrator.validate(&path, &ValidationOptions::default()).unwrap();
        let second = orchestrator.validate(&path, &ValidationOptions::default()).unwrap();
        assert_eq!(first.overall_score, second.overall_score);
        assert_eq!(first.failing_rule_ids(), second.failing_rule_ids());
    }

    #[test]
    fn test_recommendations_group_by_category_and_severity() {
        let catalog = RuleCatalog::new();
        let failed = |id: &str, category: &str, severity: Severity| {
            ValidationResult::new(id, ResultStatus::for_failure(severity), severity, category, "failed")
        };
        let results = vec![
            failed("a.one", "docs", Severity::Error),
            failed("a.two", "docs", Severity::Error),
            failed("b.one", "testing", Severity::Warning),
            ValidationResult::new("c.one", ResultStatus::Pass, Severity::Error, "docs", "ok"),
        ];

        let all = build_recommendations(&results, &catalog, 1);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].category, "docs");
        assert_eq!(all[0].priority, Priority::High);
        assert_eq!(all[0].rule_ids, vec!["a.one", "a.two"]);
        assert_eq!(all[0].impact, 50.0);
        assert_eq!(all[1].priority, Priority::Medium);

        let grouped = build_recommendations(&results, &catalog, 2);
        assert_eq!(grouped.len(), 1);
    }
}
