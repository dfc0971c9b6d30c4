//! Compliance rule engine
//!
//! Architecture: Domain Service - the engine turns (rules, facts) into results
//! - Rules run in catalog order, so identical inputs give identical result lists
//! - Conditions are ANDed; zero-condition rules fall back to their scope check
//! - Each rule runs inside its own failure boundary: errors and panics become
//!   an ERROR-status result and the remaining rules still run

pub mod scope;

use crate::domain::errors::{GuardianError, GuardianResult};
use crate::domain::facts::ModuleFacts;
use crate::domain::results::{ResultStatus, Severity, ValidationResult};
use crate::rules::{CheckOutcome, ComplianceRule, ConditionOperator, RuleCatalog, RuleScope};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

/// Message prefix of results produced by a failing evaluator
pub const EVALUATOR_FAILURE: &str = "evaluator-failure";

/// Evaluates catalog rules against module facts
pub struct ComplianceRuleEngine {
    catalog: Arc<RuleCatalog>,
}

impl ComplianceRuleEngine {
    pub fn new(catalog: Arc<RuleCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Arc<RuleCatalog> {
        &self.catalog
    }

    /// Evaluate every enabled rule applicable to the module's type
    pub fn evaluate(&self, facts: &ModuleFacts) -> Vec<ValidationResult> {
        let rules = self.catalog.get_applicable_rules(facts.module_type());
        self.evaluate_rules(&rules, facts)
    }

    /// Evaluate the given rules in order
    pub fn evaluate_rules(
        &self,
        rules: &[Arc<ComplianceRule>],
        facts: &ModuleFacts,
    ) -> Vec<ValidationResult> {
        tracing::debug!("Evaluating {} rules against {}", rules.len(), facts.module_id);
        rules.iter().map(|rule| self.evaluate_rule(rule, facts)).collect()
    }

    /// Evaluate one rule; never fails
    pub fn evaluate_rule(&self, rule: &ComplianceRule, facts: &ModuleFacts) -> ValidationResult {
        let start = Instant::now();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.check_rule(rule, facts)))
            .unwrap_or_else(|payload| {
                Err(GuardianError::rule_evaluation(&rule.id, panic_message(payload.as_ref())))
            });

        let result = match outcome {
            Ok(outcome) if outcome.passed => ValidationResult::new(
                &rule.id,
                ResultStatus::Pass,
                rule.severity,
                &rule.category,
                format!("{} passed", rule.name),
            ),
            Ok(outcome) => {
                let message = match outcome.message {
                    Some(detail) => format!("{}: {detail}", rule.name),
                    None => rule.name.clone(),
                };
                let mut result = ValidationResult::new(
                    &rule.id,
                    ResultStatus::for_failure(rule.severity),
                    rule.severity,
                    &rule.category,
                    message,
                );
                if let Some(path) = outcome.file_path {
                    result = result.with_location(path, None);
                }
                result
            }
            Err(e) => {
                tracing::warn!("Rule '{}' failed to evaluate on {}: {}", rule.id, facts.module_id, e);
                ValidationResult::new(
                    &rule.id,
                    ResultStatus::Error,
                    rule.severity.max(Severity::Error),
                    &rule.category,
                    format!("{EVALUATOR_FAILURE}: {e}"),
                )
            }
        };

        tracing::debug!("Rule '{}' -> {}", rule.id, result.status.as_str());
        result
            .with_auto_fix(rule.can_auto_fix())
            .with_execution_time(start.elapsed())
    }

    fn check_rule(&self, rule: &ComplianceRule, facts: &ModuleFacts) -> GuardianResult<CheckOutcome> {
        if rule.conditions.is_empty() {
            return self.scope_check(rule, facts);
        }

        for condition in &rule.conditions {
            if !condition.evaluate(facts) {
                let mut outcome = CheckOutcome::fail(format!("expected {}", condition.describe()));
                if matches!(
                    condition.operator(),
                    ConditionOperator::FileExists | ConditionOperator::DirectoryExists
                ) {
                    if let Some(path) = condition.value().and_then(|v| v.as_str()) {
                        outcome = outcome.at(path);
                    }
                }
                return Ok(outcome);
            }
        }
        Ok(CheckOutcome::pass())
    }

    fn scope_check(&self, rule: &ComplianceRule, facts: &ModuleFacts) -> GuardianResult<CheckOutcome> {
        if let Some(check) = scope::builtin_check(&rule.scope) {
            return check.check(facts);
        }
        let RuleScope::Custom(name) = &rule.scope else {
            return Err(GuardianError::rule_evaluation(&rule.id, "scope has no check"));
        };
        match self.catalog.check_for(name) {
            Some(check) => check.check(facts),
            None => Err(GuardianError::rule_evaluation(
                &rule.id,
                format!("no check registered for scope '{name}'"),
            )),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{ConditionDefinition, RuleDefinition, ScopeCheck};
    use serde_json::json;

    fn rule(
        id: &str,
        severity: Severity,
        scope: RuleScope,
        conditions: Vec<ConditionDefinition>,
    ) -> RuleDefinition {
        RuleDefinition {
            id: id.to_string(),
            name: None,
            description: None,
            category: "test".to_string(),
            severity,
            scope,
            conditions,
            auto_fix: None,
            applicable_types: vec![],
            tags: vec![],
            version: "1".to_string(),
            remediation: None,
        }
    }

    fn module_without_readme() -> ModuleFacts {
        let mut facts = ModuleFacts::empty("payments", "/mods/payments");
        facts.files.insert("package.json".into());
        facts.manifest_present = true;
        facts.manifest = json!({"name": "payments", "scripts": {}});
        facts
    }

    struct Exploding;

    impl ScopeCheck for Exploding {
        fn describe(&self) -> &str {
            "always panics"
        }

        fn check(&self, _facts: &ModuleFacts) -> GuardianResult<CheckOutcome> {
            panic!("boom")
        }
    }

    struct Refusing;

    impl ScopeCheck for Refusing {
        fn describe(&self) -> &str {
            "always errors"
        }

        fn check(&self, _facts: &ModuleFacts) -> GuardianResult<CheckOutcome> {
            Err(GuardianError::validation("cannot inspect"))
        }
    }

    #[test]
    fn test_readme_and_test_script_example() {
        let catalog = RuleCatalog::new();
        catalog
            .register_definition(&rule(
                "docs.readme",
                Severity::Error,
                RuleScope::Documentation,
                vec![ConditionDefinition::new(None, "file_exists", Some(json!("README.md")))],
            ))
            .unwrap();
        catalog
            .register_definition(&rule(
                "testing.script",
                Severity::Warning,
                RuleScope::Testing,
                vec![ConditionDefinition::new(Some("package.scripts.test"), "exists", None)],
            ))
            .unwrap();

        let engine = ComplianceRuleEngine::new(Arc::new(catalog));
        let results = engine.evaluate(&module_without_readme());

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].rule_id, "docs.readme");
        assert_eq!(results[0].status, ResultStatus::Fail);
        assert_eq!(results[0].file_path.as_deref(), Some("README.md"));
        assert_eq!(results[1].rule_id, "testing.script");
        assert_eq!(results[1].status, ResultStatus::Warning);
    }

    #[test]
    fn test_zero_condition_rule_uses_scope_check() {
        let catalog = RuleCatalog::new();
        catalog
            .register_definition(&rule("docs.any", Severity::Info, RuleScope::Documentation, vec![]))
            .unwrap();
        let engine = ComplianceRuleEngine::new(Arc::new(catalog));

        let results = engine.evaluate(&module_without_readme());
        assert_eq!(results[0].status, ResultStatus::Warning);

        let mut with_readme = module_without_readme();
        with_readme.files.insert("readme.markdown".into());
        assert_eq!(engine.evaluate(&with_readme)[0].status, ResultStatus::Pass);
    }

    #[test]
    fn test_evaluator_failures_are_contained() {
        let catalog = RuleCatalog::new();
        catalog.register_check("explode", Arc::new(Exploding));
        catalog.register_check("refuse", Arc::new(Refusing));
        for (id, scope) in [("a.explodes", "explode"), ("b.refuses", "refuse"), ("c.missing", "nothing")] {
            catalog
                .register_definition(&rule(id, Severity::Warning, RuleScope::from(scope), vec![]))
                .unwrap();
        }
        catalog
            .register_definition(&rule(
                "d.ok",
                Severity::Error,
                RuleScope::Metadata,
                vec![ConditionDefinition::new(Some("package.name"), "equals", Some(json!("payments")))],
            ))
            .unwrap();

        let engine = ComplianceRuleEngine::new(Arc::new(catalog));
        let results = engine.evaluate(&module_without_readme());

        assert_eq!(results.len(), 4);
        for result in &results[..3] {
            assert_eq!(result.status, ResultStatus::Error);
            assert!(result.message.starts_with(EVALUATOR_FAILURE));
        }
        assert!(results[0].message.contains("boom"));
        assert_eq!(results[3].status, ResultStatus::Pass);
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let engine = ComplianceRuleEngine::new(Arc::new(RuleCatalog::with_builtin_rules()));
        let facts = module_without_readme();

        let first: Vec<_> = engine.evaluate(&facts);
        let second: Vec<_> = engine.evaluate(&facts);
        let a: Vec<_> = first.iter().map(|r| r.outcome()).collect();
        let b: Vec<_> = second.iter().map(|r| r.outcome()).collect();
        assert_eq!(a, b);

        let ids: Vec<_> = first.iter().map(|r| r.rule_id.clone()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_can_auto_fix_follows_rule_action() {
        let engine = ComplianceRuleEngine::new(Arc::new(RuleCatalog::with_builtin_rules()));
        let results = engine.evaluate(&module_without_readme());
        let readme = results.iter().find(|r| r.rule_id == "docs.readme").unwrap();
        let name = results.iter().find(|r| r.rule_id == "metadata.name").unwrap();
        assert!(readme.can_auto_fix);
        assert!(!name.can_auto_fix);
        assert_eq!(name.status, ResultStatus::Pass);
    }
}
