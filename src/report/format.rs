//! Human and JSON rendering of reports
//!
//! Architecture: Anti-Corruption Layer - formatters translate domain objects to output text
//! - Reports stay format-agnostic; only this module knows about terminals and JSON
//! - Richer renderers (HTML, SARIF, CSV) live outside the crate

use super::EcosystemSummary;
use crate::batch::BatchOutcome;
use crate::domain::errors::{GuardianError, GuardianResult};
use crate::domain::results::{ReportStatus, ResultStatus, Severity, ValidationReport, ValidationResult};
use crate::rules::ComplianceRule;
use serde::Serialize;
use std::io::Write;
use std::sync::Arc;

/// Supported output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable format with colors
    Human,
    /// JSON format for programmatic consumption
    Json,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "human" => Some(Self::Human),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    pub fn all_formats() -> &'static [&'static str] {
        &["human", "json"]
    }
}

/// Options for customizing human output
#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub use_colors: bool,
    /// List passing results too
    pub show_passing: bool,
    pub show_recommendations: bool,
    /// Hide results below this severity
    pub min_severity: Option<Severity>,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            use_colors: true,
            show_passing: false,
            show_recommendations: true,
            min_severity: None,
        }
    }
}

pub struct ReportFormatter {
    options: ReportOptions,
}

impl Default for ReportFormatter {
    fn default() -> Self {
        Self::new(ReportOptions::default())
    }
}

impl ReportFormatter {
    pub fn new(options: ReportOptions) -> Self {
        Self { options }
    }

    pub fn format_report(&self, report: &ValidationReport, format: OutputFormat) -> GuardianResult<String> {
        match format {
            OutputFormat::Human => Ok(self.human_report(report)),
            OutputFormat::Json => to_json(report),
        }
    }

    pub fn format_batch(&self, outcome: &BatchOutcome, format: OutputFormat) -> GuardianResult<String> {
        match format {
            OutputFormat::Json => to_json(outcome),
            OutputFormat::Human => {
                let mut output = String::new();
                for report in &outcome.reports {
                    output.push_str(&self.human_report(report));
                    output.push('\n');
                }
                for failed in &outcome.failed_items {
                    output.push_str(&format!(
                        "{} {} ({:?}): {}\n",
                        self.paint("31", "✗"),
                        failed.path.display(),
                        failed.kind,
                        failed.message
                    ));
                }
                output.push_str(&format!(
                    "\n📊 {} modules: {} validated, {} failed, peak concurrency {} ({:.1}s)\n",
                    outcome.total,
                    outcome.completed(),
                    outcome.failed_items.len(),
                    outcome.peak_concurrency,
                    outcome.elapsed_ms as f64 / 1000.0
                ));
                Ok(output)
            }
        }
    }

    pub fn format_summary(&self, summary: &EcosystemSummary, format: OutputFormat) -> GuardianResult<String> {
        if format == OutputFormat::Json {
            return to_json(summary);
        }

        let mut output = String::new();
        let breakdown = &summary.status_breakdown;
        output.push_str(&format!(
            "📊 {}\n",
            self.paint("1", &format!("Ecosystem health: {} modules", summary.total_modules))
        ));
        output.push_str(&format!("  Average score: {:.1}\n", summary.average_score));
        output.push_str(&format!(
            "  Status: {} pass, {} warning, {} fail, {} error\n",
            self.paint("32", &breakdown.pass.to_string()),
            self.paint("33", &breakdown.warning.to_string()),
            self.paint("31", &breakdown.fail.to_string()),
            breakdown.error
        ));

        let distribution: Vec<String> = summary
            .score_distribution
            .iter()
            .map(|b| format!("{}: {}", b.label, b.count))
            .collect();
        output.push_str(&format!("  Scores: {}\n", distribution.join(", ")));
        output.push_str(&format!(
            "  Security: {} findings, max risk {}\n",
            summary.total_vulnerabilities, summary.max_risk_score
        ));
        if summary.modules_in_cycles > 0 {
            output.push_str(&format!("  Modules in dependency cycles: {}\n", summary.modules_in_cycles));
        }

        if !summary.top_violations.is_empty() {
            output.push_str("\n  Top violations:\n");
            for violation in &summary.top_violations {
                output.push_str(&format!(
                    "    {:>3}  {} [{}]\n",
                    violation.count,
                    violation.rule_id,
                    self.severity_label(violation.severity)
                ));
            }
        }

        if let Some(trend) = &summary.trend {
            output.push_str(&format!(
                "\n  Since {}: score {:+.1}, modules {:+}, failing {:+}\n",
                trend.previous_generated_at.format("%Y-%m-%d %H:%M"),
                trend.average_score,
                trend.total_modules,
                trend.fail
            ));
            if !trend.new_violations.is_empty() {
                output.push_str(&format!("    New: {}\n", trend.new_violations.join(", ")));
            }
            if !trend.resolved_violations.is_empty() {
                output.push_str(&format!("    Resolved: {}\n", trend.resolved_violations.join(", ")));
            }
        }

        Ok(output)
    }

    pub fn format_rules(&self, rules: &[Arc<ComplianceRule>], format: OutputFormat) -> GuardianResult<String> {
        if format == OutputFormat::Json {
            let rules: Vec<&ComplianceRule> = rules.iter().map(Arc::as_ref).collect();
            return to_json(&rules);
        }

        let mut output = String::new();
        let mut category = None;
        for rule in rules {
            if category != Some(&rule.category) {
                output.push_str(&format!("\n📁 {}\n", self.paint("1", &rule.category)));
                category = Some(&rule.category);
            }
            let fix = if rule.can_auto_fix() { " (auto-fix)" } else { "" };
            output.push_str(&format!(
                "  {} [{}] {}{}\n",
                rule.id,
                self.severity_label(rule.severity),
                rule.name,
                fix
            ));
        }
        output.push_str(&format!("\n{} rules\n", rules.len()));
        Ok(output)
    }

    /// Write a formatted report to a writer
    pub fn write_report<W: Write>(
        &self,
        report: &ValidationReport,
        format: OutputFormat,
        mut writer: W,
    ) -> GuardianResult<()> {
        let formatted = self.format_report(report, format)?;
        writer.write_all(formatted.as_bytes())?;
        Ok(())
    }

    fn visible<'a>(&self, results: &'a [ValidationResult]) -> Vec<&'a ValidationResult> {
        results
            .iter()
            .filter(|r| self.options.show_passing || r.is_failure())
            .filter(|r| self.options.min_severity.map_or(true, |min| r.severity >= min))
            .collect()
    }

    fn human_report(&self, report: &ValidationReport) -> String {
        let mut output = String::new();

        let (icon, color) = match report.status {
            ReportStatus::Pass => ("✅", "32"),
            ReportStatus::Warning => ("⚠️", "33"),
            ReportStatus::Fail => ("❌", "31"),
        };
        output.push_str(&format!(
            "{} {} {}\n",
            icon,
            self.paint("1", &report.module_id),
            self.paint(color, &format!("{} ({:.1})", report.status.as_str(), report.overall_score))
        ));
        output.push_str(&format!("   {}\n", report.module_path.display()));

        for result in self.visible(&report.results) {
            let location = match (&result.file_path, result.line_number) {
                (Some(file), Some(line)) => format!(" {file}:{line}"),
                (Some(file), None) => format!(" {file}"),
                _ => String::new(),
            };
            let fix = if result.can_auto_fix { " 🔧" } else { "" };
            output.push_str(&format!(
                "  {} {} [{}]{} {}{}\n",
                self.status_label(result.status),
                result.rule_id,
                self.severity_label(result.severity),
                location,
                result.message,
                fix
            ));
        }

        for warning in &report.fact_warnings {
            output.push_str(&format!("  {} {}: {}\n", self.paint("2", "note"), warning.path, warning.message));
        }

        if self.options.show_recommendations && !report.recommendations.is_empty() {
            output.push('\n');
            for recommendation in &report.recommendations {
                output.push_str(&format!(
                    "  💡 {} (priority {:?}, effort {:?}, +{:.1})\n",
                    recommendation.title, recommendation.priority, recommendation.effort, recommendation.impact
                ));
                for step in &recommendation.steps {
                    output.push_str(&format!("     - {step}\n"));
                }
            }
        }

        let counts = &report.metrics.counts;
        output.push_str(&format!(
            "\n📊 Summary: {} rules, {} passed, {} failed, {} warnings, {} errors ({:.1}s)\n",
            report.metrics.rules_evaluated,
            counts.pass,
            counts.fail,
            counts.warning,
            counts.error,
            report.metrics.execution_time_ms as f64 / 1000.0
        ));
        output
    }

    fn status_label(&self, status: ResultStatus) -> String {
        match status {
            ResultStatus::Pass => self.paint("32", "PASS"),
            ResultStatus::Fail => self.paint("31", "FAIL"),
            ResultStatus::Warning => self.paint("33", "WARN"),
            ResultStatus::Error => self.paint("35", "ERROR"),
        }
    }

    fn severity_label(&self, severity: Severity) -> String {
        let color = match severity {
            Severity::Critical => "1;31",
            Severity::Error => "31",
            Severity::Warning => "33",
            Severity::Info => "36",
        };
        self.paint(color, severity.as_str())
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if self.options.use_colors {
            format!("\x1b[{code}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> GuardianResult<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| GuardianError::config(format!("JSON serialization failed: {e}")))
}
