//! Declarative remediation attached to a rule

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// One filesystem or manifest mutation. Paths are relative to the module root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FixStep {
    /// Create a file; fails if it already exists
    CreateFile { path: String, content: String },
    /// Replace (or create) a file's content
    UpdateFile { path: String, content: String },
    DeleteFile { path: String },
    CreateDirectory { path: String },
    /// Set a dot-path field in the module manifest
    UpdateManifestField { field: String, value: JsonValue },
    /// Run a program in the module root; `touches` lists files it may modify
    RunCommand {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        touches: Vec<String>,
    },
}

impl FixStep {
    /// Files this step may create, modify or remove
    pub fn touched_paths(&self, manifest_file: &str) -> Vec<String> {
        match self {
            Self::CreateFile { path, .. }
            | Self::UpdateFile { path, .. }
            | Self::DeleteFile { path }
            | Self::CreateDirectory { path } => vec![path.clone()],
            Self::UpdateManifestField { .. } => vec![manifest_file.to_string()],
            Self::RunCommand { touches, .. } => touches.clone(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::CreateFile { path, .. } => format!("create file {path}"),
            Self::UpdateFile { path, .. } => format!("update file {path}"),
            Self::DeleteFile { path } => format!("delete file {path}"),
            Self::CreateDirectory { path } => format!("create directory {path}"),
            Self::UpdateManifestField { field, value } => format!("set manifest {field} = {value}"),
            Self::RunCommand { program, args, .. } if args.is_empty() => format!("run `{program}`"),
            Self::RunCommand { program, args, .. } => format!("run `{program} {}`", args.join(" ")),
        }
    }
}

/// The remediation a rule can apply automatically
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoFixAction {
    pub description: String,
    pub steps: Vec<FixStep>,
}

impl AutoFixAction {
    pub fn new(description: impl Into<String>, steps: Vec<FixStep>) -> Self {
        Self {
            description: description.into(),
            steps,
        }
    }

    /// Every path touched by any step, de-duplicated in first-seen order
    pub fn touched_paths(&self, manifest_file: &str) -> Vec<String> {
        let mut seen = Vec::new();
        for path in self.steps.iter().flat_map(|s| s.touched_paths(manifest_file)) {
            if !seen.contains(&path) {
                seen.push(path);
            }
        }
        seen
    }

    /// Load-time checks: no absolute paths, no parent traversal, at least one step
    pub fn validate(&self) -> Result<(), String> {
        if self.steps.is_empty() {
            return Err("auto-fix declares no steps".to_string());
        }
        for path in self.touched_paths("package.json") {
            let p = std::path::Path::new(&path);
            if p.is_absolute() || p.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
                return Err(format!("auto-fix path '{path}' escapes the module root"));
            }
            if path.trim().is_empty() {
                return Err("auto-fix path is empty".to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_touched_paths_dedup() {
        let action = AutoFixAction::new(
            "scaffold docs",
            vec![
                FixStep::CreateFile { path: "README.md".into(), content: "# x".into() },
                FixStep::UpdateManifestField { field: "version".into(), value: json!("0.1.0") },
                FixStep::UpdateFile { path: "README.md".into(), content: "# y".into() },
            ],
        );
        assert_eq!(action.touched_paths("package.json"), vec!["README.md", "package.json"]);
        assert!(action.validate().is_ok());
    }

    #[test]
    fn test_escaping_paths_are_rejected() {
        let action = AutoFixAction::new(
            "bad",
            vec![FixStep::DeleteFile { path: "../other/README.md".into() }],
        );
        assert!(action.validate().unwrap_err().contains("escapes"));
        assert!(AutoFixAction::new("empty", vec![]).validate().is_err());
    }

    #[test]
    fn test_steps_deserialize_from_tagged_yaml() {
        let yaml = "kind: update_manifest_field\nfield: scripts.test\nvalue: jest\n";
        let step: FixStep = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            step,
            FixStep::UpdateManifestField { field: "scripts.test".into(), value: json!("jest") }
        );
    }
}
