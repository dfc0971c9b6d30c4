//! Rule catalog holding compiled compliance rules
//!
//! Architecture: Repository - the catalog is the single source of rule definitions
//! - Definitions are compiled and validated once, at registration
//! - Reads are concurrent; register/disable are serialized behind a write lock
//! - Listing order is always by rule id so evaluation is reproducible

pub mod action;
pub mod builtin;
pub mod condition;

pub use action::{AutoFixAction, FixStep};
pub use condition::{
    evaluate_condition, known_fields, ConditionDefinition, ConditionOperator, FactField,
    RuleCondition,
};

use crate::domain::errors::{GuardianError, GuardianResult};
use crate::domain::facts::ModuleFacts;
use crate::domain::results::Severity;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// What a rule looks at; selects the built-in check for zero-condition rules
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RuleScope {
    Structure,
    Metadata,
    Documentation,
    Testing,
    Dependencies,
    Security,
    Architecture,
    /// Resolved through a check registered with `RuleCatalog::register_check`
    Custom(String),
}

impl RuleScope {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Structure => "structure",
            Self::Metadata => "metadata",
            Self::Documentation => "documentation",
            Self::Testing => "testing",
            Self::Dependencies => "dependencies",
            Self::Security => "security",
            Self::Architecture => "architecture",
            Self::Custom(name) => name,
        }
    }
}

impl From<&str> for RuleScope {
    fn from(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "structure" => Self::Structure,
            "metadata" => Self::Metadata,
            "documentation" | "docs" => Self::Documentation,
            "testing" | "tests" => Self::Testing,
            "dependencies" => Self::Dependencies,
            "security" => Self::Security,
            "architecture" => Self::Architecture,
            _ => Self::Custom(s.trim().to_string()),
        }
    }
}

impl TryFrom<String> for RuleScope {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if s.trim().is_empty() {
            return Err("rule scope must not be empty".to_string());
        }
        Ok(RuleScope::from(s.as_str()))
    }
}

impl From<RuleScope> for String {
    fn from(scope: RuleScope) -> Self {
        scope.as_str().to_string()
    }
}

impl fmt::Display for RuleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a scope check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub passed: bool,
    pub message: Option<String>,
    pub file_path: Option<String>,
}

impl CheckOutcome {
    pub fn pass() -> Self {
        Self { passed: true, message: None, file_path: None }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self { passed: false, message: Some(message.into()), file_path: None }
    }

    pub fn at(mut self, file_path: impl Into<String>) -> Self {
        self.file_path = Some(file_path.into());
        self
    }
}

/// A structural check used by rules that declare no conditions
pub trait ScopeCheck: Send + Sync {
    /// Short description used in result messages
    fn describe(&self) -> &str;

    /// Inspect the facts; an `Err` becomes an evaluator-failure result
    fn check(&self, facts: &ModuleFacts) -> GuardianResult<CheckOutcome>;
}

/// A rule as written in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub category: String,
    pub severity: Severity,
    pub scope: RuleScope,
    #[serde(default)]
    pub conditions: Vec<ConditionDefinition>,
    #[serde(default)]
    pub auto_fix: Option<AutoFixAction>,
    #[serde(default)]
    pub applicable_types: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_rule_version")]
    pub version: String,
    #[serde(default)]
    pub remediation: Option<String>,
}

fn default_rule_version() -> String {
    "1".to_string()
}

impl RuleDefinition {
    /// Validate and compile into an immutable rule
    pub fn compile(&self) -> GuardianResult<ComplianceRule> {
        let id = self.id.trim();
        if id.is_empty() {
            return Err(GuardianError::rule_load("<empty>", "rule id must not be empty"));
        }
        if self.category.trim().is_empty() {
            return Err(GuardianError::rule_load(id, "category must not be empty"));
        }

        let conditions = self
            .conditions
            .iter()
            .enumerate()
            .map(|(index, definition)| {
                RuleCondition::compile(definition).map_err(|e| {
                    GuardianError::rule_load(id, format!("condition #{}: {e}", index + 1))
                })
            })
            .collect::<GuardianResult<Vec<_>>>()?;

        if let Some(action) = &self.auto_fix {
            action
                .validate()
                .map_err(|e| GuardianError::rule_load(id, e))?;
        }

        Ok(ComplianceRule {
            id: id.to_string(),
            name: self.name.clone().unwrap_or_else(|| id.to_string()),
            description: self.description.clone().unwrap_or_default(),
            category: self.category.trim().to_string(),
            severity: self.severity,
            scope: self.scope.clone(),
            conditions,
            auto_fix: self.auto_fix.clone(),
            applicable_types: self.applicable_types.clone(),
            tags: self.tags.clone(),
            version: self.version.clone(),
            remediation: self.remediation.clone(),
        })
    }
}

/// An immutable, compiled compliance rule
#[derive(Debug, Clone, Serialize)]
pub struct ComplianceRule {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub severity: Severity,
    pub scope: RuleScope,
    /// ANDed together
    pub conditions: Vec<RuleCondition>,
    pub auto_fix: Option<AutoFixAction>,
    /// Module types this rule applies to; empty means all
    pub applicable_types: Vec<String>,
    pub tags: Vec<String>,
    pub version: String,
    pub remediation: Option<String>,
}

impl ComplianceRule {
    /// Whether the rule applies to a module of the given type
    pub fn applies_to(&self, module_type: Option<&str>) -> bool {
        if self.applicable_types.is_empty() {
            return true;
        }
        module_type.is_some_and(|t| self.applicable_types.iter().any(|a| a.eq_ignore_ascii_case(t)))
    }

    pub fn can_auto_fix(&self) -> bool {
        self.auto_fix.is_some()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

#[derive(Default)]
struct CatalogState {
    rules: BTreeMap<String, Arc<ComplianceRule>>,
    disabled: BTreeSet<String>,
    checks: BTreeMap<String, Arc<dyn ScopeCheck>>,
}

/// Built-in and user-registered rules, safe for concurrent reads
#[derive(Default)]
pub struct RuleCatalog {
    state: RwLock<CatalogState>,
}

impl fmt::Debug for RuleCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        f.debug_struct("RuleCatalog")
            .field("rules", &state.rules.keys().collect::<Vec<_>>())
            .field("disabled", &state.disabled)
            .field("checks", &state.checks.keys().collect::<Vec<_>>())
            .finish()
    }
}

lazy_static::lazy_static! {
    static ref GLOBAL_CATALOG: Arc<RuleCatalog> = Arc::new(RuleCatalog::with_builtin_rules());
}

impl RuleCatalog {
    /// An empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog holding the built-in rule set
    pub fn with_builtin_rules() -> Self {
        let catalog = Self::new();
        {
            let mut state = catalog.write();
            for rule in builtin::builtin_rules() {
                state.rules.insert(rule.id.clone(), Arc::new(rule));
            }
        }
        catalog
    }

    /// Process-wide catalog with the built-in rules, loaded on first use
    pub fn global() -> Arc<RuleCatalog> {
        Arc::clone(&GLOBAL_CATALOG)
    }

    // Catalog state stays consistent across a panicking writer: every write is a
    // single insert or remove.
    fn read(&self) -> RwLockReadGuard<'_, CatalogState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CatalogState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a compiled rule; duplicate ids are a conflict
    pub fn register_rule(&self, rule: ComplianceRule) -> GuardianResult<()> {
        let mut state = self.write();
        if state.rules.contains_key(&rule.id) {
            return Err(GuardianError::RuleConflict { rule_id: rule.id });
        }
        tracing::debug!("Registering rule '{}' ({})", rule.id, rule.category);
        state.rules.insert(rule.id.clone(), Arc::new(rule));
        Ok(())
    }

    /// Compile and register a definition
    pub fn register_definition(&self, definition: &RuleDefinition) -> GuardianResult<()> {
        self.register_rule(definition.compile()?)
    }

    /// Disable a rule. Unknown ids are ignored.
    pub fn disable_rule(&self, rule_id: &str) {
        let mut state = self.write();
        if state.rules.contains_key(rule_id) {
            state.disabled.insert(rule_id.to_string());
        } else {
            tracing::debug!("Ignoring disable request for unknown rule '{}'", rule_id);
        }
    }

    /// Re-enable a disabled rule. Unknown ids are ignored.
    pub fn enable_rule(&self, rule_id: &str) {
        self.write().disabled.remove(rule_id);
    }

    pub fn is_disabled(&self, rule_id: &str) -> bool {
        self.read().disabled.contains(rule_id)
    }

    pub fn get_rule(&self, rule_id: &str) -> Option<Arc<ComplianceRule>> {
        self.read().rules.get(rule_id).cloned()
    }

    /// Every registered rule, enabled or not, ordered by id
    pub fn get_all_rules(&self) -> Vec<Arc<ComplianceRule>> {
        self.read().rules.values().cloned().collect()
    }

    /// Enabled rules that apply to a module type, ordered by id
    pub fn get_applicable_rules(&self, module_type: Option<&str>) -> Vec<Arc<ComplianceRule>> {
        let state = self.read();
        state
            .rules
            .values()
            .filter(|rule| !state.disabled.contains(&rule.id))
            .filter(|rule| rule.applies_to(module_type))
            .cloned()
            .collect()
    }

    /// Rules grouped by category
    pub fn rules_by_category(&self) -> BTreeMap<String, Vec<Arc<ComplianceRule>>> {
        let mut grouped: BTreeMap<String, Vec<Arc<ComplianceRule>>> = BTreeMap::new();
        for rule in self.get_all_rules() {
            grouped.entry(rule.category.clone()).or_default().push(rule);
        }
        grouped
    }

    /// Register a check for a custom scope name
    pub fn register_check(&self, scope: impl Into<String>, check: Arc<dyn ScopeCheck>) {
        self.write().checks.insert(scope.into(), check);
    }

    /// Check registered for a custom scope
    pub fn check_for(&self, scope: &str) -> Option<Arc<dyn ScopeCheck>> {
        self.read().checks.get(scope).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::thread;

    fn definition(id: &str, severity: Severity) -> RuleDefinition {
        RuleDefinition {
            id: id.to_string(),
            name: None,
            description: None,
            category: "documentation".to_string(),
            severity,
            scope: RuleScope::Documentation,
            conditions: vec![ConditionDefinition::new(None, "file_exists", Some(json!("README.md")))],
            auto_fix: None,
            applicable_types: vec![],
            tags: vec![],
            version: "1".to_string(),
            remediation: None,
        }
    }

    #[test]
    fn test_rules_are_listed_by_id() {
        let catalog = RuleCatalog::new();
        for id in ["zeta", "alpha", "mid"] {
            catalog.register_definition(&definition(id, Severity::Warning)).unwrap();
        }
        let ids: Vec<_> = catalog.get_all_rules().iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_duplicate_registration_conflicts() {
        let catalog = RuleCatalog::new();
        catalog.register_definition(&definition("docs.readme", Severity::Error)).unwrap();
        let err = catalog
            .register_definition(&definition("docs.readme", Severity::Info))
            .unwrap_err();
        assert!(matches!(err, GuardianError::RuleConflict { .. }));
        assert_eq!(catalog.get_rule("docs.readme").unwrap().severity, Severity::Error);
    }

    #[test]
    fn test_disable_unknown_rule_is_noop() {
        let catalog = RuleCatalog::new();
        catalog.register_definition(&definition("a", Severity::Info)).unwrap();
        catalog.disable_rule("does-not-exist");
        catalog.disable_rule("does-not-exist");
        assert!(!catalog.is_disabled("does-not-exist"));
        assert_eq!(catalog.get_applicable_rules(None).len(), 1);

        catalog.disable_rule("a");
        catalog.disable_rule("a");
        assert!(catalog.get_applicable_rules(None).is_empty());
        assert_eq!(catalog.get_all_rules().len(), 1);

        catalog.enable_rule("a");
        assert_eq!(catalog.get_applicable_rules(None).len(), 1);
    }

    #[test]
    fn test_applicable_types_filter() {
        let catalog = RuleCatalog::new();
        let mut service_only = definition("service.health", Severity::Warning);
        service_only.applicable_types = vec!["service".to_string()];
        catalog.register_definition(&service_only).unwrap();
        catalog.register_definition(&definition("all", Severity::Warning)).unwrap();

        assert_eq!(catalog.get_applicable_rules(Some("service")).len(), 2);
        assert_eq!(catalog.get_applicable_rules(Some("Service")).len(), 2);
        assert_eq!(catalog.get_applicable_rules(Some("library")).len(), 1);
        assert_eq!(catalog.get_applicable_rules(None).len(), 1);
    }

    #[test]
    fn test_unknown_operator_fails_loading() {
        let mut def = definition("bad", Severity::Error);
        def.conditions = vec![ConditionDefinition::new(Some("files"), "roughly", None)];
        let err = def.compile().unwrap_err();
        assert!(matches!(err, GuardianError::RuleLoad { .. }));
        assert!(err.to_string().contains("unknown operator"));
    }

    #[test]
    fn test_rule_definition_from_yaml() {
        let yaml = r#"
id: testing.script
category: testing
severity: warning
scope: testing
conditions:
  - field: package.scripts.test
    operator: exists
tags: [ci]
"#;
        let def: RuleDefinition = serde_yaml::from_str(yaml).unwrap();
        let rule = def.compile().unwrap();
        assert_eq!(rule.scope, RuleScope::Testing);
        assert_eq!(rule.conditions.len(), 1);
        assert!(rule.has_tag("ci"));
        assert!(!rule.can_auto_fix());
    }

    #[test]
    fn test_concurrent_reads_during_writes() {
        let catalog = Arc::new(RuleCatalog::with_builtin_rules());
        let builtin_count = catalog.len();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let catalog = Arc::clone(&catalog);
                thread::spawn(move || {
                    if i % 2 == 0 {
                        catalog
                            .register_definition(&definition(&format!("custom.{i}"), Severity::Info))
                            .unwrap();
                    }
                    catalog.get_applicable_rules(None).len()
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap() >= builtin_count);
        }
        assert_eq!(catalog.len(), builtin_count + 4);
    }

    #[test]
    fn test_global_catalog_has_builtins() {
        assert!(!RuleCatalog::global().is_empty());
        assert!(Arc::ptr_eq(&RuleCatalog::global(), &RuleCatalog::global()));
    }
}
