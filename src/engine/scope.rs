//! Built-in checks for rules that declare no conditions
//!
//! A zero-condition rule is never an automatic pass: its scope picks one of
//! these structural checks instead.

use crate::domain::errors::GuardianResult;
use crate::domain::facts::ModuleFacts;
use crate::rules::{CheckOutcome, RuleScope, ScopeCheck};

const SOURCE_DIRS: &[&str] = &["src", "lib"];
const TEST_DIRS: &[&str] = &["test", "tests", "__tests__", "spec"];
const UNBOUNDED_VERSIONS: &[&str] = &["*", "latest", "", "x"];
const SECRET_FILE_SUFFIXES: &[&str] = &[".pem", ".key", ".p12", ".pfx"];
const SECRET_FILE_NAMES: &[&str] = &["id_rsa", "id_dsa", "id_ecdsa", "id_ed25519"];

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Manifest present and at least one source file
pub struct StructureCheck;

impl ScopeCheck for StructureCheck {
    fn describe(&self) -> &str {
        "module has a manifest and sources"
    }

    fn check(&self, facts: &ModuleFacts) -> GuardianResult<CheckOutcome> {
        if !facts.manifest_present {
            return Ok(CheckOutcome::fail(format!("missing manifest {}", facts.manifest_file)));
        }
        let has_sources = facts
            .files
            .iter()
            .any(|f| SOURCE_DIRS.iter().any(|d| f.starts_with(&format!("{d}/"))))
            || facts.manifest_str("main").is_some_and(|main| facts.has_file(main.trim_start_matches("./")));
        if has_sources {
            Ok(CheckOutcome::pass())
        } else {
            Ok(CheckOutcome::fail("no source files under src/ or lib/"))
        }
    }
}

/// Manifest declares name and version
pub struct MetadataCheck;

impl ScopeCheck for MetadataCheck {
    fn describe(&self) -> &str {
        "manifest declares name and version"
    }

    fn check(&self, facts: &ModuleFacts) -> GuardianResult<CheckOutcome> {
        let missing: Vec<&str> = ["name", "version"]
            .into_iter()
            .filter(|key| facts.manifest_str(key).map_or(true, |v| v.trim().is_empty()))
            .collect();
        if missing.is_empty() {
            Ok(CheckOutcome::pass())
        } else {
            Ok(CheckOutcome::fail(format!("manifest is missing {}", missing.join(", ")))
                .at(facts.manifest_file.clone()))
        }
    }
}

/// A README of any extension at the module root
pub struct DocumentationCheck;

impl ScopeCheck for DocumentationCheck {
    fn describe(&self) -> &str {
        "module has a README"
    }

    fn check(&self, facts: &ModuleFacts) -> GuardianResult<CheckOutcome> {
        let found = facts
            .files
            .iter()
            .any(|f| !f.contains('/') && f.to_ascii_uppercase().starts_with("README"));
        if found {
            Ok(CheckOutcome::pass())
        } else {
            Ok(CheckOutcome::fail("no README at the module root"))
        }
    }
}

/// Test directory, test-named files, or a declared test script
pub struct TestingCheck;

impl ScopeCheck for TestingCheck {
    fn describe(&self) -> &str {
        "module has tests"
    }

    fn check(&self, facts: &ModuleFacts) -> GuardianResult<CheckOutcome> {
        let has_dir = facts
            .directories
            .iter()
            .any(|d| TEST_DIRS.contains(&file_name(d)));
        let has_files = facts.files.iter().any(|f| {
            let name = file_name(f);
            name.contains(".test.") || name.contains(".spec.") || name.ends_with("_test.go")
        });
        let has_script = facts
            .manifest
            .pointer("/scripts/test")
            .and_then(|v| v.as_str())
            .is_some_and(|s| !s.contains("no test specified"));

        if has_dir || has_files || has_script {
            Ok(CheckOutcome::pass())
        } else {
            Ok(CheckOutcome::fail("no tests found"))
        }
    }
}

/// No unbounded dependency versions
pub struct DependenciesCheck;

impl ScopeCheck for DependenciesCheck {
    fn describe(&self) -> &str {
        "dependency versions are bounded"
    }

    fn check(&self, facts: &ModuleFacts) -> GuardianResult<CheckOutcome> {
        let unbounded: Vec<String> = facts
            .dependencies()
            .into_iter()
            .filter(|d| UNBOUNDED_VERSIONS.contains(&d.version_req.trim()))
            .map(|d| format!("{}@{}", d.name, d.version_req))
            .collect();
        if unbounded.is_empty() {
            Ok(CheckOutcome::pass())
        } else {
            Ok(CheckOutcome::fail(format!("unbounded dependency versions: {}", unbounded.join(", ")))
                .at(facts.manifest_file.clone()))
        }
    }
}

/// No key material or environment files in the module
pub struct SecretFilesCheck;

impl ScopeCheck for SecretFilesCheck {
    fn describe(&self) -> &str {
        "no committed secret files"
    }

    fn check(&self, facts: &ModuleFacts) -> GuardianResult<CheckOutcome> {
        let offending = facts.files.iter().find(|f| {
            let name = file_name(f);
            let is_env = name == ".env" || (name.starts_with(".env.") && !name.ends_with(".example"));
            is_env
                || SECRET_FILE_NAMES.contains(&name)
                || SECRET_FILE_SUFFIXES.iter().any(|s| name.ends_with(s))
        });
        match offending {
            Some(path) => Ok(CheckOutcome::fail(format!("secret file committed: {path}")).at(path.clone())),
            None => Ok(CheckOutcome::pass()),
        }
    }
}

/// Manifest declares an architecture layer
pub struct ArchitectureCheck;

impl ScopeCheck for ArchitectureCheck {
    fn describe(&self) -> &str {
        "module declares its layer"
    }

    fn check(&self, facts: &ModuleFacts) -> GuardianResult<CheckOutcome> {
        match facts.layer() {
            Some(layer) if !layer.trim().is_empty() => Ok(CheckOutcome::pass()),
            _ => Ok(CheckOutcome::fail("manifest does not declare a layer").at(facts.manifest_file.clone())),
        }
    }
}

/// Built-in check for a scope; `None` for custom scopes
pub fn builtin_check(scope: &RuleScope) -> Option<&'static dyn ScopeCheck> {
    match scope {
        RuleScope::Structure => Some(&StructureCheck),
        RuleScope::Metadata => Some(&MetadataCheck),
        RuleScope::Documentation => Some(&DocumentationCheck),
        RuleScope::Testing => Some(&TestingCheck),
        RuleScope::Dependencies => Some(&DependenciesCheck),
        RuleScope::Security => Some(&SecretFilesCheck),
        RuleScope::Architecture => Some(&ArchitectureCheck),
        RuleScope::Custom(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn facts(files: &[&str], dirs: &[&str], manifest: serde_json::Value) -> ModuleFacts {
        let mut facts = ModuleFacts::empty("m", "/m");
        facts.files = files.iter().map(|s| s.to_string()).collect();
        facts.directories = dirs.iter().map(|s| s.to_string()).collect();
        facts.manifest_present = files.contains(&"package.json");
        facts.manifest = manifest;
        facts
    }

    #[test]
    fn test_structure_check() {
        let ok = facts(&["package.json", "src/index.js"], &["src"], json!({}));
        assert!(StructureCheck.check(&ok).unwrap().passed);

        let via_main = facts(&["package.json", "index.js"], &[], json!({"main": "./index.js"}));
        assert!(StructureCheck.check(&via_main).unwrap().passed);

        let bare = facts(&["src/index.js"], &["src"], json!({}));
        assert!(!StructureCheck.check(&bare).unwrap().passed);
    }

    #[test]
    fn test_testing_check_variants() {
        let by_dir = facts(&[], &["tests"], json!({}));
        let by_name = facts(&["src/auth.spec.ts"], &["src"], json!({}));
        let by_script = facts(&[], &[], json!({"scripts": {"test": "jest"}}));
        let npm_stub = facts(&[], &[], json!({"scripts": {"test": "echo \"Error: no test specified\""}}));

        assert!(TestingCheck.check(&by_dir).unwrap().passed);
        assert!(TestingCheck.check(&by_name).unwrap().passed);
        assert!(TestingCheck.check(&by_script).unwrap().passed);
        assert!(!TestingCheck.check(&npm_stub).unwrap().passed);
    }

    #[test]
    fn test_dependencies_check_flags_wildcards() {
        let f = facts(
            &["package.json"],
            &[],
            json!({"dependencies": {"a": "^1.0.0", "b": "*"}, "devDependencies": {"c": "latest"}}),
        );
        let outcome = DependenciesCheck.check(&f).unwrap();
        assert!(!outcome.passed);
        let message = outcome.message.unwrap();
        assert!(message.contains("b@*"));
        assert!(message.contains("c@latest"));
        assert!(!message.contains("a@"));
    }

    #[test]
    fn test_secret_files_check() {
        assert!(!SecretFilesCheck.check(&facts(&["config/.env"], &[], json!({}))).unwrap().passed);
        assert!(!SecretFilesCheck.check(&facts(&["certs/server.pem"], &[], json!({}))).unwrap().passed);
        assert!(SecretFilesCheck.check(&facts(&[".env.example", ".npmrc"], &[], json!({}))).unwrap().passed);
    }

    #[test]
    fn test_custom_scope_has_no_builtin() {
        assert!(builtin_check(&RuleScope::Custom("perf".into())).is_none());
        assert!(builtin_check(&RuleScope::Architecture).is_some());
    }
}
