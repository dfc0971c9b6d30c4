//! Module Guardian - Compliance and architecture validation for module ecosystems
//!
//! Architecture: Clean Architecture - Library interface serves as the application layer
//! - Domain types and services live in their own modules with no I/O of their own
//! - The filesystem is reached through a collaborator trait so the pipeline stays testable
//! - `ComplianceValidator` wires the services together for callers and the CLI

pub mod batch;
pub mod config;
pub mod domain;
pub mod engine;
pub mod fix;
pub mod graph;
pub mod orchestrator;
pub mod probe;
pub mod report;
pub mod rules;
pub mod security;

// Re-export main types for convenient access
pub use domain::errors::{GuardianError, GuardianResult};
pub use domain::facts::ModuleFacts;
pub use domain::results::{ReportStatus, ResultStatus, Severity, ValidationReport, ValidationResult};

pub use config::{ConfigBuilder, GuardianConfig};

pub use batch::{BatchObserver, BatchOptions, BatchOutcome, BatchProgress, BatchScheduler, FailedItem};
pub use fix::{AutoFixApplier, FixOutcome, FixPlan};
pub use orchestrator::{RuleSelection, ValidationOptions, ValidationOrchestrator};
pub use report::{EcosystemSummary, OutputFormat, ReportAggregator, ReportFormatter, ReportOptions};
pub use rules::{ComplianceRule, RuleCatalog};

use probe::fs::{FileSystem, StdFileSystem};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Main validator providing high-level validation operations
pub struct ComplianceValidator {
    orchestrator: Arc<ValidationOrchestrator>,
    applier: AutoFixApplier,
    aggregator: ReportAggregator,
    report_formatter: ReportFormatter,
}

/// Which auto-fixes a fix session applies
#[derive(Debug, Clone, Default)]
pub struct FixRequest {
    /// Only these rule ids; empty means every auto-fixable failure
    pub rule_ids: Vec<String>,
    pub dry_run: bool,
}

/// An auto-fix that failed and was rolled back
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixFailure {
    pub rule_id: String,
    pub message: String,
    pub rolled_back: bool,
}

/// Status of one fixed rule before and after the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleChange {
    pub rule_id: String,
    pub before: ResultStatus,
    /// Absent for dry runs
    pub after: Option<ResultStatus>,
}

/// Result of validate, fix, re-validate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixSession {
    pub module_id: String,
    pub dry_run: bool,
    pub before: ValidationReport,
    pub after: Option<ValidationReport>,
    pub applied: Vec<FixOutcome>,
    pub failed: Vec<FixFailure>,
    pub changes: Vec<RuleChange>,
}

impl ComplianceValidator {
    /// Create a new validator with the given configuration
    pub fn new_with_config(config: GuardianConfig) -> GuardianResult<Self> {
        Self::with_filesystem(config, Arc::new(StdFileSystem))
    }

    /// Create a validator with default configuration
    pub fn new() -> GuardianResult<Self> {
        Self::new_with_config(GuardianConfig::default())
    }

    /// Create a validator loading configuration from file
    pub fn from_config_file<P: AsRef<Path>>(path: P) -> GuardianResult<Self> {
        let config = GuardianConfig::load_from_file(path)?;
        Self::new_with_config(config)
    }

    /// Create a validator reading modules through a custom filesystem collaborator
    pub fn with_filesystem(config: GuardianConfig, filesystem: Arc<dyn FileSystem>) -> GuardianResult<Self> {
        let catalog = Arc::new(config.build_catalog()?);
        let applier = AutoFixApplier::new(&config);
        let aggregator = ReportAggregator::new(&config.report);
        let orchestrator = ValidationOrchestrator::with_filesystem(config, catalog, filesystem)?;

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            applier,
            aggregator,
            report_formatter: ReportFormatter::default(),
        })
    }

    /// Set custom report formatter
    pub fn with_report_formatter(mut self, formatter: ReportFormatter) -> Self {
        self.report_formatter = formatter;
        self
    }

    pub fn orchestrator(&self) -> &Arc<ValidationOrchestrator> {
        &self.orchestrator
    }

    pub fn catalog(&self) -> &Arc<RuleCatalog> {
        self.orchestrator.catalog()
    }

    pub fn config(&self) -> &GuardianConfig {
        self.orchestrator.config()
    }

    /// Batch options seeded from the configuration
    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions::from_config(&self.config().batch)
    }

    /// Validate a single module
    pub fn validate_module<P: AsRef<Path>>(
        &self,
        module_path: P,
        options: &ValidationOptions,
    ) -> GuardianResult<ValidationReport> {
        self.orchestrator.validate(module_path.as_ref(), options)
    }

    /// Validate a single module, failing with `Timeout` if it takes too long
    pub async fn validate_module_with_timeout<P: AsRef<Path>>(
        &self,
        module_path: P,
        options: &ValidationOptions,
        timeout: Duration,
    ) -> GuardianResult<ValidationReport> {
        let path = module_path.as_ref().to_path_buf();
        let orchestrator = self.orchestrator.clone();
        let options = options.clone();
        let worker_path = path.clone();
        let task = tokio::task::spawn_blocking(move || orchestrator.validate(&worker_path, &options));

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(GuardianError::validation(format!(
                "Validation of {} panicked: {}",
                path.display(),
                e
            ))),
            Err(_) => {
                tracing::warn!("Validation of {} timed out after {:?}", path.display(), timeout);
                Err(GuardianError::Timeout {
                    path,
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    /// Scheduler over this validator's pipeline, for callers that want an observer
    pub fn scheduler(&self) -> BatchScheduler {
        BatchScheduler::new(self.orchestrator.clone())
    }

    /// Validate every module matched by the given paths or globs
    pub async fn validate_batch(
        &self,
        inputs: &[String],
        options: &BatchOptions,
    ) -> GuardianResult<BatchOutcome> {
        let paths = expand_module_paths(inputs)?;
        Ok(self.scheduler().run(paths, options).await)
    }

    /// Validate the matched modules and summarize them
    pub async fn ecosystem_health(
        &self,
        inputs: &[String],
        options: &BatchOptions,
        prior: Option<&EcosystemSummary>,
    ) -> GuardianResult<EcosystemSummary> {
        let outcome = self.validate_batch(inputs, options).await?;
        Ok(self.aggregator.summarize_batch(&outcome, prior))
    }

    pub fn summarize(
        &self,
        reports: &[ValidationReport],
        failed_items: usize,
        prior: Option<&EcosystemSummary>,
    ) -> EcosystemSummary {
        self.aggregator.summarize(reports, failed_items, prior)
    }

    /// Validate, apply auto-fixes for failing rules, then validate again
    pub fn fix_module<P: AsRef<Path>>(
        &self,
        module_path: P,
        request: &FixRequest,
    ) -> GuardianResult<FixSession> {
        let module_path = module_path.as_ref();
        let options = ValidationOptions::default();
        let before = self.orchestrator.validate(module_path, &options)?;

        let candidates: Vec<(String, ResultStatus)> = before
            .failures()
            .filter(|r| r.can_auto_fix)
            .filter(|r| request.rule_ids.is_empty() || request.rule_ids.contains(&r.rule_id))
            .map(|r| (r.rule_id.clone(), r.status))
            .collect();

        let mut applied = Vec::new();
        let mut failed = Vec::new();
        for (rule_id, _) in &candidates {
            let Some(rule) = self.catalog().get_rule(rule_id) else {
                continue;
            };
            // Re-read facts so each fix sees the previous fix's changes
            let facts = self.orchestrator.probe(module_path)?;
            match self.applier.apply(&rule, &facts, request.dry_run) {
                Ok(outcome) => applied.push(outcome),
                Err(GuardianError::AutoFixApply {
                    rule_id,
                    message,
                    rolled_back,
                }) => failed.push(FixFailure {
                    rule_id,
                    message,
                    rolled_back,
                }),
                Err(e) => return Err(e),
            }
        }

        let after = if request.dry_run || applied.is_empty() {
            None
        } else {
            Some(self.orchestrator.validate(module_path, &options)?)
        };

        let changes = candidates
            .into_iter()
            .map(|(rule_id, status)| RuleChange {
                after: after
                    .as_ref()
                    .map(|report| report.result_for(&rule_id).map_or(ResultStatus::Pass, |r| r.status)),
                before: status,
                rule_id,
            })
            .collect();

        Ok(FixSession {
            module_id: before.module_id.clone(),
            dry_run: request.dry_run,
            before,
            after,
            applied,
            failed,
            changes,
        })
    }

    /// Format a validation report for output
    pub fn format_report(&self, report: &ValidationReport, format: OutputFormat) -> GuardianResult<String> {
        self.report_formatter.format_report(report, format)
    }
}

/// Expand paths and globs into module directories, de-duplicated in input order.
///
/// Plain paths are kept even when missing so the batch reports them as failures;
/// glob matches are limited to directories.
pub fn expand_module_paths(inputs: &[String]) -> GuardianResult<Vec<PathBuf>> {
    let mut seen = BTreeSet::new();
    let mut paths = Vec::new();

    for input in inputs {
        let is_glob = input.contains(['*', '?', '[']);
        let matches: Vec<PathBuf> = if is_glob {
            glob::glob(input)
                .map_err(|e| GuardianError::pattern(format!("{}: {}", input, e)))?
                .filter_map(|entry| match entry {
                    Ok(path) => Some(path),
                    Err(e) => {
                        tracing::warn!("Skipping unreadable glob match: {}", e);
                        None
                    }
                })
                .filter(|path| path.is_dir())
                .collect()
        } else {
            vec![PathBuf::from(input)]
        };

        if is_glob && matches.is_empty() {
            tracing::warn!("Pattern '{}' matched no module directories", input);
        }
        for path in matches {
            if seen.insert(path.clone()) {
                paths.push(path);
            }
        }
    }

    Ok(paths)
}

/// Convenience function to validate one module with default settings
pub fn validate_module<P: AsRef<Path>>(module_path: P) -> GuardianResult<ValidationReport> {
    ComplianceValidator::new()?.validate_module(module_path, &ValidationOptions::default())
}

/// CI integration helpers
pub mod ci {
    use super::*;

    /// Gate a single module: an error if it fails validation
    pub fn module_gate<P: AsRef<Path>>(module_path: P) -> GuardianResult<ValidationReport> {
        let report = validate_module(module_path)?;
        if report.has_errors() {
            let failing = report.failing_rule_ids();
            return Err(GuardianError::validation(format!(
                "Module {} failed {} rule{}: {}",
                report.module_id,
                failing.len(),
                if failing.len() == 1 { "" } else { "s" },
                failing.join(", ")
            )));
        }
        Ok(report)
    }

    /// Gate an ecosystem: an error if any module failed to run or the
    /// average score is below `min_average_score`
    pub async fn ecosystem_gate(
        validator: &ComplianceValidator,
        inputs: &[String],
        min_average_score: f64,
    ) -> GuardianResult<EcosystemSummary> {
        let summary = validator
            .ecosystem_health(inputs, &validator.batch_options(), None)
            .await?;

        if summary.status_breakdown.error > 0 {
            return Err(GuardianError::validation(format!(
                "{} module{} could not be validated",
                summary.status_breakdown.error,
                if summary.status_breakdown.error == 1 { "" } else { "s" }
            )));
        }
        if summary.average_score < min_average_score {
            return Err(GuardianError::validation(format!(
                "Average score {:.1} is below the required {:.1}",
                summary.average_score, min_average_score
            )));
        }
        Ok(summary)
    }
}
