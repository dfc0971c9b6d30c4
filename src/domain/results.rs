//! Core domain models for rule outcomes and module reports
//!
//! Architecture: Rich Domain Models - results classify themselves, reports score themselves
//! - ValidationResult is immutable once produced
//! - ValidationReport is the aggregate root and is only mutable through ReportBuilder
//! - Status is derived from the results, never from the score alone

use crate::domain::graph::ModuleDependencyView;
use crate::domain::security::ScanSummary;
use crate::domain::facts::FactWarning;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Severity levels for rules and findings
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational messages and suggestions
    Info,
    /// Should be addressed but does not fail the module
    Warning,
    /// Fails the module
    Error,
    /// Fails the module and should be fixed first
    Critical,
}

impl Severity {
    /// Whether a failure at this level fails the module
    pub fn is_blocking(self) -> bool {
        matches!(self, Self::Error | Self::Critical)
    }

    /// Convert to string for display
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }

    /// Parse from a case-insensitive name
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Some(Self::Info),
            "warning" | "warn" => Some(Self::Warning),
            "error" => Some(Self::Error),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    /// One step less severe, bottoming out at Info
    pub fn downgrade(self) -> Self {
        match self {
            Self::Critical => Self::Error,
            Self::Error => Self::Warning,
            Self::Warning | Self::Info => Self::Info,
        }
    }
}

/// Outcome of one rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Pass,
    /// A failed error or critical rule
    Fail,
    /// A failed warning or info rule
    Warning,
    /// The rule could not be evaluated
    Error,
}

impl ResultStatus {
    /// Status for a rule that did not hold, given its severity
    pub fn for_failure(severity: Severity) -> Self {
        if severity.is_blocking() {
            Self::Fail
        } else {
            Self::Warning
        }
    }

    pub fn is_pass(self) -> bool {
        matches!(self, Self::Pass)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// The result of evaluating one rule against one module
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub rule_id: String,
    pub status: ResultStatus,
    pub severity: Severity,
    pub category: String,
    pub message: String,
    /// File the result refers to, relative to the module root
    pub file_path: Option<String>,
    pub line_number: Option<u32>,
    /// True only when the rule declares an auto-fix action
    pub can_auto_fix: bool,
    /// Wall-clock time spent evaluating, in microseconds
    pub execution_time_us: u64,
    /// Dependency or security finding folded into the report; drives the
    /// status but not the score
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub folded: bool,
}

impl ValidationResult {
    /// Create a new result
    pub fn new(
        rule_id: impl Into<String>,
        status: ResultStatus,
        severity: Severity,
        category: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            status,
            severity,
            category: category.into(),
            message: message.into(),
            file_path: None,
            line_number: None,
            can_auto_fix: false,
            execution_time_us: 0,
            folded: false,
        }
    }

    /// Mark as a folded finding rather than a rule result
    pub fn folded(mut self) -> Self {
        self.folded = true;
        self
    }

    /// Attach a file location
    pub fn with_location(mut self, file_path: impl Into<String>, line: Option<u32>) -> Self {
        self.file_path = Some(file_path.into());
        self.line_number = line;
        self
    }

    pub fn with_auto_fix(mut self, can_auto_fix: bool) -> Self {
        self.can_auto_fix = can_auto_fix;
        self
    }

    pub fn with_execution_time(mut self, elapsed: Duration) -> Self {
        self.execution_time_us = elapsed.as_micros().min(u64::MAX as u128) as u64;
        self
    }

    /// Whether the rule did not pass
    pub fn is_failure(&self) -> bool {
        !self.status.is_pass()
    }

    /// Everything except timing, for reproducibility comparisons
    pub fn outcome(&self) -> (&str, ResultStatus, Severity, &str, Option<&str>, Option<u32>, bool) {
        (
            &self.rule_id,
            self.status,
            self.severity,
            &self.message,
            self.file_path.as_deref(),
            self.line_number,
            self.can_auto_fix,
        )
    }

    /// Format result for display
    pub fn format_display(&self) -> String {
        let location = match (&self.file_path, self.line_number) {
            (Some(file), Some(line)) => format!(" ({file}:{line})"),
            (Some(file), None) => format!(" ({file})"),
            _ => String::new(),
        };
        format!(
            "[{}] {} [{}] {}{}",
            self.status.as_str(),
            self.rule_id,
            self.severity.as_str(),
            self.message,
            location
        )
    }
}

/// Derived status of a whole module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Pass,
    Warning,
    Fail,
}

impl ReportStatus {
    /// Derive a module status from its results.
    ///
    /// Any blocking failure or evaluator error fails the module regardless of how
    /// many other rules passed.
    pub fn derive(results: &[ValidationResult]) -> Self {
        let blocking = results.iter().any(|r| match r.status {
            ResultStatus::Fail | ResultStatus::Error => true,
            ResultStatus::Warning => r.severity.is_blocking(),
            ResultStatus::Pass => false,
        });
        if blocking {
            Self::Fail
        } else if results.iter().any(ValidationResult::is_failure) {
            Self::Warning
        } else {
            Self::Pass
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Warning => "warning",
            Self::Fail => "fail",
        }
    }
}

/// `100 * passed / total` over rule results, or 100 when no rule was evaluated
pub fn compute_score(results: &[ValidationResult]) -> f64 {
    let rules: Vec<&ValidationResult> = results.iter().filter(|r| !r.folded).collect();
    if rules.is_empty() {
        return 100.0;
    }
    let passed = rules.iter().filter(|r| r.status.is_pass()).count();
    100.0 * passed as f64 / rules.len() as f64
}

/// Count of results by status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pass: usize,
    pub fail: usize,
    pub warning: usize,
    pub error: usize,
}

impl StatusCounts {
    pub fn from_results(results: &[ValidationResult]) -> Self {
        let mut counts = Self::default();
        for result in results {
            match result.status {
                ResultStatus::Pass => counts.pass += 1,
                ResultStatus::Fail => counts.fail += 1,
                ResultStatus::Warning => counts.warning += 1,
                ResultStatus::Error => counts.error += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.pass + self.fail + self.warning + self.error
    }
}

/// Measurements collected while validating a module
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportMetrics {
    pub rules_evaluated: usize,
    pub counts: StatusCounts,
    pub files_probed: usize,
    pub excerpts_scanned: usize,
    pub probe_time_ms: u64,
    pub rules_time_ms: u64,
    pub graph_time_ms: u64,
    pub security_time_ms: u64,
    pub execution_time_ms: u64,
}

/// How urgent a recommendation is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

/// Rough effort needed to act on a recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effort {
    Low,
    Medium,
    High,
}

/// Best-effort remediation advice derived from grouped failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub title: String,
    pub category: String,
    pub severity: Severity,
    pub priority: Priority,
    pub effort: Effort,
    /// Score points recovered if every grouped rule passed
    pub impact: f64,
    pub rule_ids: Vec<String>,
    /// Ordered remediation steps
    pub steps: Vec<String>,
}

/// Scored per-module outcome of rule, dependency and security analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub run_id: Uuid,
    pub module_id: String,
    pub module_path: PathBuf,
    pub timestamp: DateTime<Utc>,
    /// Results in catalog order, followed by folded findings
    pub results: Vec<ValidationResult>,
    pub overall_score: f64,
    pub status: ReportStatus,
    pub metrics: ReportMetrics,
    pub recommendations: Vec<Recommendation>,
    pub dependencies: Option<ModuleDependencyView>,
    pub security: Option<ScanSummary>,
    pub fact_warnings: Vec<FactWarning>,
    pub config_fingerprint: Option<String>,
}

impl ValidationReport {
    /// Whether the module failed
    pub fn has_errors(&self) -> bool {
        self.status == ReportStatus::Fail
    }

    /// Whether any result did not pass
    pub fn has_failures(&self) -> bool {
        self.results.iter().any(ValidationResult::is_failure)
    }

    /// Results that did not pass
    pub fn failures(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results.iter().filter(|r| r.is_failure())
    }

    /// Rule ids of every non-passing result, sorted
    pub fn failing_rule_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.failures().map(|r| r.rule_id.clone()).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Result for one rule
    pub fn result_for(&self, rule_id: &str) -> Option<&ValidationResult> {
        self.results.iter().find(|r| r.rule_id == rule_id)
    }

    /// CLI exit code: 0 on pass, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.status == ReportStatus::Pass {
            0
        } else {
            1
        }
    }
}

/// The only way to mutate a report; `finish` scores and freezes it
#[derive(Debug)]
pub struct ReportBuilder {
    module_id: String,
    module_path: PathBuf,
    results: Vec<ValidationResult>,
    metrics: ReportMetrics,
    recommendations: Vec<Recommendation>,
    dependencies: Option<ModuleDependencyView>,
    security: Option<ScanSummary>,
    fact_warnings: Vec<FactWarning>,
    config_fingerprint: Option<String>,
}

impl ReportBuilder {
    pub fn new(module_id: impl Into<String>, module_path: impl Into<PathBuf>) -> Self {
        Self {
            module_id: module_id.into(),
            module_path: module_path.into(),
            results: Vec::new(),
            metrics: ReportMetrics::default(),
            recommendations: Vec::new(),
            dependencies: None,
            security: None,
            fact_warnings: Vec::new(),
            config_fingerprint: None,
        }
    }

    pub fn push_result(&mut self, result: ValidationResult) {
        self.results.push(result);
    }

    pub fn extend_results(&mut self, results: impl IntoIterator<Item = ValidationResult>) {
        self.results.extend(results);
    }

    pub fn results(&self) -> &[ValidationResult] {
        &self.results
    }

    pub fn metrics_mut(&mut self) -> &mut ReportMetrics {
        &mut self.metrics
    }

    pub fn set_recommendations(&mut self, recommendations: Vec<Recommendation>) {
        self.recommendations = recommendations;
    }

    pub fn set_dependencies(&mut self, view: ModuleDependencyView) {
        self.dependencies = Some(view);
    }

    pub fn set_security(&mut self, summary: ScanSummary) {
        self.security = Some(summary);
    }

    pub fn set_fact_warnings(&mut self, warnings: Vec<FactWarning>) {
        self.fact_warnings = warnings;
    }

    pub fn set_config_fingerprint(&mut self, fingerprint: impl Into<String>) {
        self.config_fingerprint = Some(fingerprint.into());
    }

    /// Score the results, derive the status and freeze the report
    pub fn finish(mut self) -> ValidationReport {
        let overall_score = compute_score(&self.results);
        let status = ReportStatus::derive(&self.results);
        self.metrics.rules_evaluated = self.results.iter().filter(|r| !r.folded).count();
        self.metrics.counts = StatusCounts::from_results(&self.results);

        ValidationReport {
            run_id: Uuid::new_v4(),
            module_id: self.module_id,
            module_path: self.module_path,
            timestamp: Utc::now(),
            results: self.results,
            overall_score,
            status,
            metrics: self.metrics,
            recommendations: self.recommendations,
            dependencies: self.dependencies,
            security: self.security,
            fact_warnings: self.fact_warnings,
            config_fingerprint: self.config_fingerprint,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(rule: &str, status: ResultStatus, severity: Severity) -> ValidationResult {
        ValidationResult::new(rule, status, severity, "test", "message")
    }

    #[test]
    fn test_score_is_fraction_of_passes() {
        let results = vec![
            result("a", ResultStatus::Pass, Severity::Error),
            result("b", ResultStatus::Pass, Severity::Info),
            result("c", ResultStatus::Warning, Severity::Warning),
            result("d", ResultStatus::Fail, Severity::Error),
        ];
        assert_eq!(compute_score(&results), 50.0);
        assert_eq!(compute_score(&[]), 100.0);
    }

    #[test]
    fn test_single_critical_failure_is_not_masked() {
        let mut results: Vec<_> = (0..50)
            .map(|i| result(&format!("ok-{i}"), ResultStatus::Pass, Severity::Info))
            .collect();
        results.push(result("critical", ResultStatus::Fail, Severity::Critical));

        assert!(compute_score(&results) > 95.0);
        assert_eq!(ReportStatus::derive(&results), ReportStatus::Fail);
    }

    #[test]
    fn test_status_derivation() {
        let warn_only = vec![
            result("a", ResultStatus::Pass, Severity::Error),
            result("b", ResultStatus::Warning, Severity::Info),
        ];
        assert_eq!(ReportStatus::derive(&warn_only), ReportStatus::Warning);

        let evaluator_error = vec![result("a", ResultStatus::Error, Severity::Info)];
        assert_eq!(ReportStatus::derive(&evaluator_error), ReportStatus::Fail);

        assert_eq!(ReportStatus::derive(&[]), ReportStatus::Pass);
    }

    #[test]
    fn test_failure_status_follows_severity() {
        assert_eq!(ResultStatus::for_failure(Severity::Critical), ResultStatus::Fail);
        assert_eq!(ResultStatus::for_failure(Severity::Error), ResultStatus::Fail);
        assert_eq!(ResultStatus::for_failure(Severity::Warning), ResultStatus::Warning);
        assert_eq!(ResultStatus::for_failure(Severity::Info), ResultStatus::Warning);
    }

    #[test]
    fn test_builder_freezes_scored_report() {
        let mut builder = ReportBuilder::new("demo", "/tmp/demo");
        builder.push_result(result("a", ResultStatus::Pass, Severity::Error));
        builder.push_result(result("b", ResultStatus::Fail, Severity::Error));
        let report = builder.finish();

        assert_eq!(report.overall_score, 50.0);
        assert_eq!(report.status, ReportStatus::Fail);
        assert_eq!(report.metrics.counts.fail, 1);
        assert_eq!(report.failing_rule_ids(), vec!["b".to_string()]);
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn test_folded_findings_drive_status_but_not_score() {
        let mut builder = ReportBuilder::new("demo", "/tmp/demo");
        builder.push_result(result("a", ResultStatus::Pass, Severity::Error));
        builder.push_result(result("b", ResultStatus::Pass, Severity::Warning));
        builder.push_result(result("security.code", ResultStatus::Fail, Severity::Error).folded());
        let report = builder.finish();

        assert_eq!(report.overall_score, 100.0);
        assert_eq!(report.status, ReportStatus::Fail);
        assert_eq!(report.metrics.rules_evaluated, 2);
        assert_eq!(report.metrics.counts.fail, 1);

        let only_findings = vec![result("architecture.cycle", ResultStatus::Fail, Severity::Critical).folded()];
        assert_eq!(compute_score(&only_findings), 100.0);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::Error);
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
        assert_eq!(Severity::parse("WARN"), Some(Severity::Warning));
        assert_eq!(Severity::Critical.downgrade(), Severity::Error);
    }
}
