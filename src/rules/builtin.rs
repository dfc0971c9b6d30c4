//! Built-in rule set shipped with every catalog

use super::action::{AutoFixAction, FixStep};
use super::condition::ConditionDefinition;
use super::{ComplianceRule, RuleDefinition, RuleScope};
use crate::domain::results::Severity;
use serde_json::json;

/// Placeholder replaced with the module id when fix content is written
pub const MODULE_ID_PLACEHOLDER: &str = "{module_id}";

struct Builtin {
    id: &'static str,
    name: &'static str,
    category: &'static str,
    severity: Severity,
    scope: RuleScope,
    conditions: Vec<ConditionDefinition>,
    auto_fix: Option<AutoFixAction>,
    applicable_types: &'static [&'static str],
    remediation: &'static str,
}

fn condition(field: Option<&str>, operator: &str, value: Option<serde_json::Value>) -> ConditionDefinition {
    ConditionDefinition::new(field, operator, value)
}

fn definitions() -> Vec<Builtin> {
    vec![
        Builtin {
            id: "docs.readme",
            name: "README present",
            category: "documentation",
            severity: Severity::Error,
            scope: RuleScope::Documentation,
            conditions: vec![condition(None, "file_exists", Some(json!("README.md")))],
            auto_fix: Some(AutoFixAction::new(
                "Create a README.md skeleton",
                vec![FixStep::CreateFile {
                    path: "README.md".to_string(),
                    content: format!("# {MODULE_ID_PLACEHOLDER}\n\nDescribe what this module does.\n"),
                }],
            )),
            applicable_types: &[],
            remediation: "Add a README.md describing the module's purpose and usage",
        },
        Builtin {
            id: "docs.changelog",
            name: "Changelog present",
            category: "documentation",
            severity: Severity::Info,
            scope: RuleScope::Documentation,
            conditions: vec![condition(None, "file_exists", Some(json!("CHANGELOG.md")))],
            auto_fix: Some(AutoFixAction::new(
                "Create an empty CHANGELOG.md",
                vec![FixStep::CreateFile {
                    path: "CHANGELOG.md".to_string(),
                    content: "# Changelog\n\n## Unreleased\n".to_string(),
                }],
            )),
            applicable_types: &[],
            remediation: "Track notable changes in CHANGELOG.md",
        },
        Builtin {
            id: "docs.license",
            name: "License file present",
            category: "documentation",
            severity: Severity::Warning,
            scope: RuleScope::Documentation,
            conditions: vec![condition(None, "file_exists", Some(json!("LICENSE*")))],
            auto_fix: None,
            applicable_types: &["library", "package"],
            remediation: "Add a LICENSE file matching the manifest's license field",
        },
        Builtin {
            id: "structure.manifest",
            name: "Module manifest present",
            category: "structure",
            severity: Severity::Error,
            scope: RuleScope::Structure,
            conditions: vec![condition(Some("module.hasManifest"), "equals", Some(json!(true)))],
            auto_fix: None,
            applicable_types: &[],
            remediation: "Add a manifest declaring the module's name, version and dependencies",
        },
        Builtin {
            id: "structure.sources",
            name: "Module has sources",
            category: "structure",
            severity: Severity::Warning,
            scope: RuleScope::Structure,
            conditions: vec![],
            auto_fix: None,
            applicable_types: &[],
            remediation: "Keep module sources under src/ or lib/",
        },
        Builtin {
            id: "metadata.name",
            name: "Manifest declares a name",
            category: "metadata",
            severity: Severity::Error,
            scope: RuleScope::Metadata,
            conditions: vec![condition(Some("package.name"), "exists", None)],
            auto_fix: None,
            applicable_types: &[],
            remediation: "Set the manifest's name field",
        },
        Builtin {
            id: "metadata.version",
            name: "Manifest declares a semantic version",
            category: "metadata",
            severity: Severity::Warning,
            scope: RuleScope::Metadata,
            conditions: vec![condition(
                Some("package.version"),
                "matches_regex",
                Some(json!(r"^\d+\.\d+\.\d+(?:[-+][0-9A-Za-z.-]+)?$")),
            )],
            auto_fix: Some(AutoFixAction::new(
                "Set the manifest version to 0.1.0",
                vec![FixStep::UpdateManifestField {
                    field: "version".to_string(),
                    value: json!("0.1.0"),
                }],
            )),
            applicable_types: &[],
            remediation: "Use a MAJOR.MINOR.PATCH version in the manifest",
        },
        Builtin {
            id: "metadata.description",
            name: "Manifest declares a description",
            category: "metadata",
            severity: Severity::Info,
            scope: RuleScope::Metadata,
            conditions: vec![condition(Some("package.description"), "exists", None)],
            auto_fix: None,
            applicable_types: &[],
            remediation: "Add a one-line description to the manifest",
        },
        Builtin {
            id: "testing.script",
            name: "Test script declared",
            category: "testing",
            severity: Severity::Warning,
            scope: RuleScope::Testing,
            conditions: vec![condition(Some("package.scripts.test"), "exists", None)],
            auto_fix: None,
            applicable_types: &[],
            remediation: "Declare scripts.test so CI can run the module's tests",
        },
        Builtin {
            id: "testing.suite",
            name: "Tests present",
            category: "testing",
            severity: Severity::Warning,
            scope: RuleScope::Testing,
            conditions: vec![],
            auto_fix: None,
            applicable_types: &[],
            remediation: "Add tests under test/, tests/ or __tests__/",
        },
        Builtin {
            id: "dependencies.pinned",
            name: "Dependency versions are bounded",
            category: "dependencies",
            severity: Severity::Warning,
            scope: RuleScope::Dependencies,
            conditions: vec![],
            auto_fix: None,
            applicable_types: &[],
            remediation: "Replace '*' and 'latest' with explicit version ranges",
        },
        Builtin {
            id: "security.secret-files",
            name: "No committed secret files",
            category: "security",
            severity: Severity::Critical,
            scope: RuleScope::Security,
            conditions: vec![],
            auto_fix: None,
            applicable_types: &[],
            remediation: "Remove key and environment files from the module and rotate their contents",
        },
        Builtin {
            id: "architecture.layer",
            name: "Architecture layer declared",
            category: "architecture",
            severity: Severity::Info,
            scope: RuleScope::Architecture,
            conditions: vec![],
            auto_fix: None,
            applicable_types: &[],
            remediation: "Declare the module's layer in the manifest",
        },
    ]
}

/// Compile the built-in rule set
pub fn builtin_rules() -> Vec<ComplianceRule> {
    definitions()
        .into_iter()
        .filter_map(|b| {
            let definition = RuleDefinition {
                id: b.id.to_string(),
                name: Some(b.name.to_string()),
                description: Some(b.remediation.to_string()),
                category: b.category.to_string(),
                severity: b.severity,
                scope: b.scope,
                conditions: b.conditions,
                auto_fix: b.auto_fix,
                applicable_types: b.applicable_types.iter().map(|t| t.to_string()).collect(),
                tags: vec!["builtin".to_string()],
                version: "1".to_string(),
                remediation: Some(b.remediation.to_string()),
            };
            match definition.compile() {
                Ok(rule) => Some(rule),
                Err(e) => {
                    tracing::error!("Built-in rule '{}' failed to compile: {}", b.id, e);
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_builtin_compiles() {
        assert_eq!(builtin_rules().len(), definitions().len());
    }

    #[test]
    fn test_builtin_ids_are_unique() {
        let mut ids: Vec<_> = builtin_rules().into_iter().map(|r| r.id).collect();
        let before = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), before);
    }

    #[test]
    fn test_fixable_builtins() {
        let fixable: Vec<_> = builtin_rules()
            .into_iter()
            .filter(|r| r.can_auto_fix())
            .map(|r| r.id)
            .collect();
        assert_eq!(fixable, vec!["docs.readme", "docs.changelog", "metadata.version"]);
    }
}
