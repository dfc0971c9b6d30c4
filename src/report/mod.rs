//! Ecosystem-level aggregation of module reports
//!
//! Architecture: Read Model - the aggregator derives a summary from immutable reports
//! - Summaries are recomputed wholesale on every call and never persisted
//! - A prior summary supplied by the caller yields a single-step trend delta

pub mod format;

pub use format::{OutputFormat, ReportFormatter, ReportOptions};

use crate::batch::BatchOutcome;
use crate::config::ReportConfig;
use crate::domain::errors::{GuardianError, GuardianResult};
use crate::domain::results::{ReportStatus, Severity, ValidationReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Module counts per derived status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusBreakdown {
    pub pass: usize,
    pub warning: usize,
    pub fail: usize,
    /// Modules without a report (timeouts, probe errors, cancellations)
    pub error: usize,
}

/// Modules whose score falls in `[min, max)`; the top bucket includes 100
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBucket {
    pub label: String,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

/// A rule failing across the ecosystem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationCount {
    pub rule_id: String,
    pub category: String,
    /// Highest severity seen for this rule
    pub severity: Severity,
    pub count: usize,
    pub modules: Vec<String>,
}

/// Change relative to a caller-supplied earlier summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendDelta {
    pub previous_generated_at: DateTime<Utc>,
    pub average_score: f64,
    pub total_modules: i64,
    pub pass: i64,
    pub warning: i64,
    pub fail: i64,
    /// Top violations absent from the prior summary
    pub new_violations: Vec<String>,
    /// Prior top violations no longer present
    pub resolved_violations: Vec<String>,
}

/// Aggregate view across many validation reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EcosystemSummary {
    pub generated_at: DateTime<Utc>,
    /// Reported modules plus modules without a report
    pub total_modules: usize,
    /// Mean score of reported modules; 0 when none reported
    pub average_score: f64,
    pub status_breakdown: StatusBreakdown,
    pub score_distribution: Vec<ScoreBucket>,
    pub top_violations: Vec<ViolationCount>,
    pub total_vulnerabilities: usize,
    /// Highest per-module security risk score
    pub max_risk_score: u32,
    pub modules_in_cycles: usize,
    pub trend: Option<TrendDelta>,
}

impl EcosystemSummary {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> GuardianResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            GuardianError::validation(format!("Invalid summary file {}: {}", path.display(), e))
        })
    }

    /// 0 when every module passed and none failed to run
    pub fn exit_code(&self) -> i32 {
        let breakdown = &self.status_breakdown;
        if breakdown.warning + breakdown.fail + breakdown.error == 0 {
            0
        } else {
            1
        }
    }
}

const BUCKETS: [(&str, f64, f64); 4] = [
    ("0-49", 0.0, 50.0),
    ("50-69", 50.0, 70.0),
    ("70-89", 70.0, 90.0),
    ("90-100", 90.0, 100.0),
];

/// Merges module reports into an `EcosystemSummary`
#[derive(Debug, Clone)]
pub struct ReportAggregator {
    top_violations: usize,
}

impl ReportAggregator {
    pub fn new(config: &ReportConfig) -> Self {
        Self {
            top_violations: config.top_violations,
        }
    }

    pub fn summarize_batch(
        &self,
        outcome: &BatchOutcome,
        prior: Option<&EcosystemSummary>,
    ) -> EcosystemSummary {
        self.summarize(&outcome.reports, outcome.failed_items.len(), prior)
    }

    pub fn summarize(
        &self,
        reports: &[ValidationReport],
        failed_items: usize,
        prior: Option<&EcosystemSummary>,
    ) -> EcosystemSummary {
        let mut breakdown = StatusBreakdown {
            error: failed_items,
            ..Default::default()
        };
        for report in reports {
            match report.status {
                ReportStatus::Pass => breakdown.pass += 1,
                ReportStatus::Warning => breakdown.warning += 1,
                ReportStatus::Fail => breakdown.fail += 1,
            }
        }

        let average_score = if reports.is_empty() {
            0.0
        } else {
            let total: f64 = reports.iter().map(|r| r.overall_score).sum();
            (total / reports.len() as f64 * 10.0).round() / 10.0
        };

        let score_distribution = BUCKETS
            .iter()
            .map(|(label, min, max)| ScoreBucket {
                label: label.to_string(),
                min: *min,
                max: *max,
                count: reports
                    .iter()
                    .filter(|r| {
                        r.overall_score >= *min
                            && (r.overall_score < *max || (*max >= 100.0 && r.overall_score <= *max))
                    })
                    .count(),
            })
            .collect();

        let security = reports.iter().filter_map(|r| r.security.as_ref());
        let total_vulnerabilities = security.clone().map(|s| s.vulnerabilities.len()).sum();
        let max_risk_score = security.map(|s| s.risk_score).max().unwrap_or(0);
        let modules_in_cycles = reports
            .iter()
            .filter(|r| r.dependencies.as_ref().is_some_and(|d| !d.cycles.is_empty()))
            .count();

        let mut summary = EcosystemSummary {
            generated_at: Utc::now(),
            total_modules: reports.len() + failed_items,
            average_score,
            status_breakdown: breakdown,
            score_distribution,
            top_violations: self.top_violations(reports),
            total_vulnerabilities,
            max_risk_score,
            modules_in_cycles,
            trend: None,
        };
        summary.trend = prior.map(|prior| trend(&summary, prior));

        tracing::info!(
            "Ecosystem summary: {} modules, average score {:.1}",
            summary.total_modules,
            summary.average_score
        );
        summary
    }

    /// Failing rules by module count, then rule id
    fn top_violations(&self, reports: &[ValidationReport]) -> Vec<ViolationCount> {
        let mut by_rule: BTreeMap<&str, ViolationCount> = BTreeMap::new();
        for report in reports {
            for result in report.failures() {
                let entry = by_rule.entry(&result.rule_id).or_insert_with(|| ViolationCount {
                    rule_id: result.rule_id.clone(),
                    category: result.category.clone(),
                    severity: result.severity,
                    count: 0,
                    modules: Vec::new(),
                });
                entry.severity = entry.severity.max(result.severity);
                if !entry.modules.contains(&report.module_id) {
                    entry.count += 1;
                    entry.modules.push(report.module_id.clone());
                }
            }
        }

        let mut counts: Vec<ViolationCount> = by_rule.into_values().collect();
        for count in &mut counts {
            count.modules.sort();
        }
        counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.rule_id.cmp(&b.rule_id)));
        counts.truncate(self.top_violations);
        counts
    }
}

impl Default for ReportAggregator {
    fn default() -> Self {
        Self::new(&ReportConfig::default())
    }
}

fn signed(current: usize, previous: usize) -> i64 {
    i64::try_from(current).unwrap_or(i64::MAX) - i64::try_from(previous).unwrap_or(i64::MAX)
}

fn trend(current: &EcosystemSummary, prior: &EcosystemSummary) -> TrendDelta {
    let now: BTreeSet<&str> = current.top_violations.iter().map(|v| v.rule_id.as_str()).collect();
    let before: BTreeSet<&str> = prior.top_violations.iter().map(|v| v.rule_id.as_str()).collect();

    TrendDelta {
        previous_generated_at: prior.generated_at,
        average_score: ((current.average_score - prior.average_score) * 10.0).round() / 10.0,
        total_modules: signed(current.total_modules, prior.total_modules),
        pass: signed(current.status_breakdown.pass, prior.status_breakdown.pass),
        warning: signed(current.status_breakdown.warning, prior.status_breakdown.warning),
        fail: signed(current.status_breakdown.fail, prior.status_breakdown.fail),
        new_violations: now.difference(&before).map(|s| s.to_string()).collect(),
        resolved_violations: before.difference(&now).map(|s| s.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::results::{ReportBuilder, ResultStatus, ValidationResult};

    fn report(module: &str, results: &[(&str, ResultStatus, Severity)]) -> ValidationReport {
        let mut builder = ReportBuilder::new(module, format!("/modules/{module}"));
        for (rule, status, severity) in results {
            builder.push_result(ValidationResult::new(*rule, *status, *severity, "docs", "msg"));
        }
        builder.finish()
    }

    fn ecosystem() -> Vec<ValidationReport> {
        vec![
            report("a", &[("docs.readme", ResultStatus::Pass, Severity::Error)]),
            report(
                "b",
                &[
                    ("docs.readme", ResultStatus::Fail, Severity::Error),
                    ("testing.script", ResultStatus::Warning, Severity::Warning),
                ],
            ),
            report(
                "c",
                &[
                    ("docs.readme", ResultStatus::Fail, Severity::Error),
                    ("testing.script", ResultStatus::Pass, Severity::Warning),
                ],
            ),
            report("d", &[("testing.script", ResultStatus::Warning, Severity::Warning)]),
        ]
    }

    #[test]
    fn test_summary_counts() {
        let summary = ReportAggregator::default().summarize(&ecosystem(), 1, None);

        assert_eq!(summary.total_modules, 5);
        assert_eq!(summary.average_score, 37.5);
        assert_eq!(
            summary.status_breakdown,
            StatusBreakdown { pass: 1, warning: 1, fail: 2, error: 1 }
        );
        let counts: Vec<usize> = summary.score_distribution.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![2, 1, 0, 1]);
        assert_eq!(summary.exit_code(), 1);
    }

    #[test]
    fn test_top_violations_order() {
        let summary = ReportAggregator::default().summarize(&ecosystem(), 0, None);
        let top: Vec<(&str, usize)> = summary
            .top_violations
            .iter()
            .map(|v| (v.rule_id.as_str(), v.count))
            .collect();
        assert_eq!(top, vec![("docs.readme", 2), ("testing.script", 2)]);
        assert_eq!(summary.top_violations[0].modules, vec!["b", "c"]);
        assert_eq!(summary.top_violations[0].severity, Severity::Error);

        let aggregator = ReportAggregator::new(&ReportConfig { top_violations: 1, ..Default::default() });
        assert_eq!(aggregator.summarize(&ecosystem(), 0, None).top_violations.len(), 1);
    }

    #[test]
    fn test_trend_against_prior() {
        let aggregator = ReportAggregator::default();
        let prior = aggregator.summarize(&ecosystem()[..2], 0, None);
        let current = aggregator.summarize(&ecosystem()[..1], 0, Some(&prior));

        let trend = current.trend.unwrap();
        assert_eq!(trend.total_modules, -1);
        assert_eq!(trend.fail, -1);
        assert_eq!(trend.average_score, 50.0);
        assert_eq!(trend.resolved_violations, vec!["docs.readme", "testing.script"]);
        assert!(trend.new_violations.is_empty());
    }

    #[test]
    fn test_empty_ecosystem() {
        let summary = ReportAggregator::default().summarize(&[], 0, None);
        assert_eq!(summary.total_modules, 0);
        assert_eq!(summary.average_score, 0.0);
        assert!(summary.top_violations.is_empty());
        assert_eq!(summary.exit_code(), 0);
    }

    #[test]
    fn test_summary_round_trips_through_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("summary.json");
        let summary = ReportAggregator::default().summarize(&ecosystem(), 0, None);
        std::fs::write(&path, serde_json::to_string(&summary).unwrap()).unwrap();

        let loaded = EcosystemSummary::load_from_file(&path).unwrap();
        assert_eq!(loaded.top_violations, summary.top_violations);
        assert!(EcosystemSummary::load_from_file(dir.path().join("absent.json")).is_err());
    }
}
