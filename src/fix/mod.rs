//! Reversible application of rule auto-fixes
//!
//! Architecture: Infrastructure Service - the applier is the only component that writes
//! - Every path an action touches is backed up before the first mutation
//! - Steps run in order; any failure restores the backups and removes created paths
//! - Filesystem operations are retried a bounded number of times with fixed backoff
//! - Dry runs only compute the plan

use crate::config::{FixConfig, GuardianConfig};
use crate::domain::errors::{GuardianError, GuardianResult};
use crate::domain::facts::ModuleFacts;
use crate::rules::action::FixStep;
use crate::rules::builtin::MODULE_ID_PLACEHOLDER;
use crate::rules::ComplianceRule;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::Duration;

/// The concrete change set an auto-fix would make
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixPlan {
    pub rule_id: String,
    pub module_path: PathBuf,
    pub description: String,
    /// Steps with placeholders already substituted
    pub steps: Vec<FixStep>,
    /// Paths relative to the module root that may change
    pub touched_paths: Vec<String>,
}

impl FixPlan {
    pub fn describe_steps(&self) -> Vec<String> {
        self.steps.iter().map(FixStep::describe).collect()
    }
}

/// Pre-fix state of one touched path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupEntry {
    pub path: String,
    pub existed: bool,
    /// Copy of the original file; `None` for directories and absent paths
    pub backup_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixOutcome {
    pub plan: FixPlan,
    pub dry_run: bool,
    pub applied_steps: usize,
    pub backups: Vec<BackupEntry>,
    pub backup_dir: Option<PathBuf>,
}

/// Applies `AutoFixAction`s with mandatory backup and rollback
pub struct AutoFixApplier {
    config: FixConfig,
    manifest_file: String,
}

impl AutoFixApplier {
    pub fn new(config: &GuardianConfig) -> Self {
        Self {
            config: config.fix.clone(),
            manifest_file: config.paths.manifest_file.clone(),
        }
    }

    /// Resolve the rule's action against one module
    pub fn plan(&self, rule: &ComplianceRule, facts: &ModuleFacts) -> GuardianResult<FixPlan> {
        let action = rule
            .auto_fix
            .as_ref()
            .ok_or_else(|| GuardianError::auto_fix(&rule.id, "rule declares no auto-fix", false))?;

        let steps: Vec<FixStep> = action
            .steps
            .iter()
            .map(|step| substitute(step, &facts.module_id))
            .collect();

        Ok(FixPlan {
            rule_id: rule.id.clone(),
            module_path: facts.module_path.clone(),
            description: action.description.clone(),
            steps,
            touched_paths: action.touched_paths(&self.manifest_file),
        })
    }

    /// Apply the rule's fix; on failure the module is restored and an error returned
    pub fn apply(
        &self,
        rule: &ComplianceRule,
        facts: &ModuleFacts,
        dry_run: bool,
    ) -> GuardianResult<FixOutcome> {
        let plan = self.plan(rule, facts)?;

        if dry_run {
            tracing::info!("Dry run for {} on {}: {} steps", plan.rule_id, facts.module_id, plan.steps.len());
            return Ok(FixOutcome {
                plan,
                dry_run: true,
                applied_steps: 0,
                backups: Vec::new(),
                backup_dir: None,
            });
        }

        if !self.config.allow_commands
            && plan.steps.iter().any(|s| matches!(s, FixStep::RunCommand { .. }))
        {
            return Err(GuardianError::auto_fix(
                &plan.rule_id,
                "fix runs a command but fix.allow_commands is off",
                false,
            ));
        }

        let backup_dir = self.backup_dir_for(&plan);
        let backups = self
            .back_up(&plan, &backup_dir)
            .map_err(|e| GuardianError::auto_fix(&plan.rule_id, format!("backup failed: {e}"), false))?;

        let mut applied_steps = 0;
        for step in &plan.steps {
            if let Err(e) = self.apply_step(&plan.module_path, step) {
                let message = format!("step '{}' failed: {e}", step.describe());
                tracing::warn!("Auto-fix {} failed on {}: {}; rolling back", plan.rule_id, facts.module_id, message);
                let rolled_back = match self.restore(&plan.module_path, &backups) {
                    Ok(()) => true,
                    Err(restore_error) => {
                        tracing::warn!("Rollback of {} incomplete: {}", plan.rule_id, restore_error);
                        false
                    }
                };
                return Err(GuardianError::auto_fix(&plan.rule_id, message, rolled_back));
            }
            applied_steps += 1;
        }

        tracing::info!("Applied auto-fix {} to {}", plan.rule_id, facts.module_id);
        Ok(FixOutcome {
            plan,
            dry_run: false,
            applied_steps,
            backups,
            backup_dir: Some(backup_dir),
        })
    }

    fn backup_dir_for(&self, plan: &FixPlan) -> PathBuf {
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3f");
        let rule: String = plan
            .rule_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        let unique = uuid::Uuid::new_v4().simple().to_string();
        plan.module_path
            .join(&self.config.backup_dir)
            .join(format!("{stamp}-{rule}-{}", &unique[..8]))
    }

    fn back_up(&self, plan: &FixPlan, backup_dir: &Path) -> io::Result<Vec<BackupEntry>> {
        self.with_retry(|| fs::create_dir_all(backup_dir))?;

        let mut entries = Vec::with_capacity(plan.touched_paths.len());
        for relative in &plan.touched_paths {
            let original = plan.module_path.join(relative);
            let entry = if original.is_file() {
                let copy = backup_dir.join(relative);
                if let Some(parent) = copy.parent() {
                    self.with_retry(|| fs::create_dir_all(parent))?;
                }
                self.with_retry(|| fs::copy(&original, &copy).map(|_| ()))?;
                BackupEntry {
                    path: relative.clone(),
                    existed: true,
                    backup_path: Some(copy),
                }
            } else {
                BackupEntry {
                    path: relative.clone(),
                    existed: original.exists(),
                    backup_path: None,
                }
            };
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Put every touched path back the way the backup found it
    fn restore(&self, module_path: &Path, backups: &[BackupEntry]) -> io::Result<()> {
        let mut first_error = None;
        for entry in backups.iter().rev() {
            let target = module_path.join(&entry.path);
            let result = match (&entry.backup_path, entry.existed) {
                (Some(copy), _) => self.with_retry(|| {
                    if let Some(parent) = target.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    if target.is_dir() {
                        fs::remove_dir_all(&target)?;
                    }
                    fs::copy(copy, &target).map(|_| ())
                }),
                (None, false) if target.is_dir() => self.with_retry(|| fs::remove_dir_all(&target)),
                (None, false) if target.exists() => self.with_retry(|| fs::remove_file(&target)),
                _ => Ok(()),
            };
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn apply_step(&self, module_path: &Path, step: &FixStep) -> io::Result<()> {
        match step {
            FixStep::CreateFile { path, content } => {
                let target = module_path.join(path);
                if target.exists() {
                    return Err(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        format!("{path} already exists"),
                    ));
                }
                self.write_file(&target, content)
            }
            FixStep::UpdateFile { path, content } => self.write_file(&module_path.join(path), content),
            FixStep::DeleteFile { path } => {
                let target = module_path.join(path);
                match self.with_retry(|| fs::remove_file(&target)) {
                    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                    other => other,
                }
            }
            FixStep::CreateDirectory { path } => {
                let target = module_path.join(path);
                self.with_retry(|| fs::create_dir_all(&target))
            }
            FixStep::UpdateManifestField { field, value } => {
                self.update_manifest(&module_path.join(&self.manifest_file), field, value)
            }
            FixStep::RunCommand { program, args, .. } => {
                tracing::debug!("Running {} {:?} in {}", program, args, module_path.display());
                let status = Command::new(program).args(args).current_dir(module_path).status()?;
                if status.success() {
                    Ok(())
                } else {
                    Err(io::Error::new(
                        io::ErrorKind::Other,
                        format!("`{program}` exited with {status}"),
                    ))
                }
            }
        }
    }

    fn write_file(&self, target: &Path, content: &str) -> io::Result<()> {
        if let Some(parent) = target.parent() {
            self.with_retry(|| fs::create_dir_all(parent))?;
        }
        self.with_retry(|| fs::write(target, content))
    }

    fn update_manifest(&self, manifest: &Path, field: &str, value: &JsonValue) -> io::Result<()> {
        let mut document = match fs::read_to_string(manifest) {
            Ok(source) => serde_json::from_str::<JsonValue>(&source).map_err(|e| {
                io::Error::new(io::ErrorKind::InvalidData, format!("manifest is not valid JSON: {e}"))
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => JsonValue::Object(Map::new()),
            Err(e) => return Err(e),
        };

        set_field(&mut document, field, value.clone()).map_err(|message| {
            io::Error::new(io::ErrorKind::InvalidData, message)
        })?;

        let mut rendered = serde_json::to_string_pretty(&document)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        rendered.push('\n');
        self.write_file(manifest, &rendered)
    }

    /// Retry transient failures; missing and already-existing paths fail immediately
    fn with_retry<T>(&self, mut operation: impl FnMut() -> io::Result<T>) -> io::Result<T> {
        let attempts = self.config.retry_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation() {
                Ok(value) => return Ok(value),
                Err(e)
                    if attempt < attempts
                        && !matches!(
                            e.kind(),
                            io::ErrorKind::NotFound | io::ErrorKind::AlreadyExists | io::ErrorKind::InvalidData
                        ) =>
                {
                    tracing::debug!("Filesystem operation failed (attempt {}/{}): {}", attempt, attempts, e);
                    thread::sleep(Duration::from_millis(self.config.retry_backoff_ms));
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn substitute(step: &FixStep, module_id: &str) -> FixStep {
    let fill = |text: &str| text.replace(MODULE_ID_PLACEHOLDER, module_id);
    match step {
        FixStep::CreateFile { path, content } => FixStep::CreateFile {
            path: path.clone(),
            content: fill(content),
        },
        FixStep::UpdateFile { path, content } => FixStep::UpdateFile {
            path: path.clone(),
            content: fill(content),
        },
        FixStep::UpdateManifestField {
            field,
            value: JsonValue::String(text),
        } => FixStep::UpdateManifestField {
            field: field.clone(),
            value: JsonValue::String(fill(text)),
        },
        other => other.clone(),
    }
}

/// Set a dot-path field, creating intermediate objects
fn set_field(document: &mut JsonValue, field: &str, value: JsonValue) -> Result<(), String> {
    let segments: Vec<&str> = field.split('.').filter(|s| !s.is_empty()).collect();
    let Some((last, parents)) = segments.split_last() else {
        return Err("manifest field path is empty".to_string());
    };

    let mut current = document;
    for segment in parents {
        let JsonValue::Object(map) = current else {
            return Err(format!("cannot descend into non-object at '{segment}'"));
        };
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| JsonValue::Object(Map::new()));
    }

    match current {
        JsonValue::Object(map) => {
            map.insert(last.to_string(), value);
            Ok(())
        }
        _ => Err(format!("cannot set '{field}' on a non-object")),
    }
}
