//! Typed rule conditions and their evaluation against module facts
//!
//! Architecture: Anti-Corruption Layer - string-keyed condition definitions are compiled once
//! - Operators form a closed enum; unknown names fail at load time
//! - Field paths resolve through an explicit accessor table into ModuleFacts
//! - Evaluation never fails: missing fields and coercion failures are `false`

use crate::domain::facts::{DependencyKind, ModuleFacts};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

/// Comparison applied by a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Exists,
    NotExists,
    Equals,
    NotEquals,
    Contains,
    NotContains,
    MatchesRegex,
    FileExists,
    DirectoryExists,
    GreaterThan,
    LessThan,
}

impl ConditionOperator {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exists => "exists",
            Self::NotExists => "not_exists",
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::Contains => "contains",
            Self::NotContains => "not_contains",
            Self::MatchesRegex => "matches_regex",
            Self::FileExists => "file_exists",
            Self::DirectoryExists => "directory_exists",
            Self::GreaterThan => "greater_than",
            Self::LessThan => "less_than",
        }
    }

    /// Existence operators must not carry a value; everything else needs one
    pub fn requires_value(self) -> bool {
        !matches!(self, Self::Exists | Self::NotExists)
    }

    /// Path operators default their field to the file or directory listing
    fn default_field(self) -> Option<&'static str> {
        match self {
            Self::FileExists => Some("files"),
            Self::DirectoryExists => Some("directories"),
            _ => None,
        }
    }
}

impl FromStr for ConditionOperator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let op = match s.trim() {
            "exists" => Self::Exists,
            "not_exists" => Self::NotExists,
            "equals" => Self::Equals,
            "not_equals" => Self::NotEquals,
            "contains" => Self::Contains,
            "not_contains" => Self::NotContains,
            "matches_regex" => Self::MatchesRegex,
            "file_exists" => Self::FileExists,
            "directory_exists" => Self::DirectoryExists,
            "greater_than" => Self::GreaterThan,
            "less_than" => Self::LessThan,
            other => return Err(format!("unknown operator '{other}'")),
        };
        Ok(op)
    }
}

impl fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed-path facts reachable by name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimpleField {
    ModuleId,
    ModuleName,
    ModuleVersion,
    ModulePath,
    ModuleType,
    ModuleLayer,
    ModuleTags,
    HasManifest,
    Files,
    FileCount,
    Directories,
    DirectoryCount,
    SourceFiles,
    SourceLines,
    DependencyNames,
    DependencyCount,
    DevDependencyCount,
    PeerDependencyCount,
    WarningCount,
}

/// Accessor table for every fixed fact path
const FIELD_TABLE: &[(&str, SimpleField)] = &[
    ("module.id", SimpleField::ModuleId),
    ("module.name", SimpleField::ModuleName),
    ("module.version", SimpleField::ModuleVersion),
    ("module.path", SimpleField::ModulePath),
    ("module.type", SimpleField::ModuleType),
    ("module.layer", SimpleField::ModuleLayer),
    ("module.tags", SimpleField::ModuleTags),
    ("module.hasManifest", SimpleField::HasManifest),
    ("files", SimpleField::Files),
    ("files.count", SimpleField::FileCount),
    ("directories", SimpleField::Directories),
    ("directories.count", SimpleField::DirectoryCount),
    ("source.files", SimpleField::SourceFiles),
    ("source.lines", SimpleField::SourceLines),
    ("dependencies.names", SimpleField::DependencyNames),
    ("dependencies.count", SimpleField::DependencyCount),
    ("devDependencies.count", SimpleField::DevDependencyCount),
    ("peerDependencies.count", SimpleField::PeerDependencyCount),
    ("warnings.count", SimpleField::WarningCount),
];

/// Roots under which arbitrary dot paths walk the manifest
const MANIFEST_ROOTS: &[&str] = &["package", "manifest"];

/// A resolved field accessor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FactField {
    Simple(SimpleFieldRef),
    /// Dot path into the manifest, e.g. `package.scripts.test`
    Manifest(Vec<String>),
}

/// Opaque handle to an accessor table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimpleFieldRef(SimpleField);

impl FactField {
    /// Resolve a dot path against the accessor table
    pub fn parse(path: &str) -> Result<Self, String> {
        let path = path.trim();
        if let Some((_, field)) = FIELD_TABLE.iter().find(|(name, _)| *name == path) {
            return Ok(Self::Simple(SimpleFieldRef(*field)));
        }

        if let Some((root, rest)) = path.split_once('.') {
            if MANIFEST_ROOTS.contains(&root) {
                let segments: Vec<String> = rest.split('.').map(str::to_string).collect();
                if segments.iter().any(String::is_empty) {
                    return Err(format!("empty segment in field path '{path}'"));
                }
                return Ok(Self::Manifest(segments));
            }
        }

        Err(format!(
            "unknown field '{path}' (expected one of {} or a path under {})",
            known_fields().join(", "),
            MANIFEST_ROOTS.iter().map(|r| format!("'{r}.'")).collect::<Vec<_>>().join(" / ")
        ))
    }

    /// Read the field from facts; `None` means "not found"
    pub fn resolve(&self, facts: &ModuleFacts) -> Option<JsonValue> {
        let field = match self {
            Self::Manifest(segments) => return facts.manifest_value(segments).cloned(),
            Self::Simple(SimpleFieldRef(field)) => *field,
        };

        let count_kind = |kind: DependencyKind| {
            JsonValue::from(facts.dependencies().iter().filter(|d| d.kind == kind).count())
        };

        match field {
            SimpleField::ModuleId => Some(JsonValue::from(facts.module_id.clone())),
            SimpleField::ModuleName => facts.manifest.get("name").cloned(),
            SimpleField::ModuleVersion => facts.manifest.get("version").cloned(),
            SimpleField::ModulePath => {
                Some(JsonValue::from(facts.module_path.to_string_lossy().into_owned()))
            }
            SimpleField::ModuleType => facts.module_type().map(JsonValue::from),
            SimpleField::ModuleLayer => facts.layer().map(JsonValue::from),
            SimpleField::ModuleTags => Some(JsonValue::from(facts.tags())),
            SimpleField::HasManifest => Some(JsonValue::from(facts.manifest_present)),
            SimpleField::Files => {
                Some(JsonValue::from(facts.files.iter().cloned().collect::<Vec<_>>()))
            }
            SimpleField::FileCount => Some(JsonValue::from(facts.files.len())),
            SimpleField::Directories => {
                Some(JsonValue::from(facts.directories.iter().cloned().collect::<Vec<_>>()))
            }
            SimpleField::DirectoryCount => Some(JsonValue::from(facts.directories.len())),
            SimpleField::SourceFiles => Some(JsonValue::from(facts.excerpts.len())),
            SimpleField::SourceLines => Some(JsonValue::from(facts.source_lines())),
            SimpleField::DependencyNames => Some(JsonValue::from(
                facts.dependencies().into_iter().map(|d| d.name).collect::<Vec<_>>(),
            )),
            SimpleField::DependencyCount => Some(count_kind(DependencyKind::Runtime)),
            SimpleField::DevDependencyCount => Some(count_kind(DependencyKind::Dev)),
            SimpleField::PeerDependencyCount => Some(count_kind(DependencyKind::Peer)),
            SimpleField::WarningCount => Some(JsonValue::from(facts.warnings.len())),
        }
    }

    fn is_listing(&self, wanted: SimpleField) -> bool {
        matches!(self, Self::Simple(SimpleFieldRef(field)) if *field == wanted)
    }
}

/// Every fixed field path, in table order
pub fn known_fields() -> Vec<&'static str> {
    FIELD_TABLE.iter().map(|(name, _)| *name).collect()
}

/// A condition as written in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionDefinition {
    /// Dot path into module facts; optional for `file_exists` / `directory_exists`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub operator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<JsonValue>,
}

impl ConditionDefinition {
    pub fn new(field: Option<&str>, operator: &str, value: Option<JsonValue>) -> Self {
        Self {
            field: field.map(str::to_string),
            operator: operator.to_string(),
            value,
        }
    }
}

#[derive(Debug, Clone)]
enum PathMatcher {
    Exact(String),
    Glob(glob::Pattern),
}

impl PathMatcher {
    fn new(raw: &str) -> Result<Self, String> {
        let normalized = raw.trim().trim_start_matches("./").trim_end_matches('/').to_string();
        if normalized.contains(['*', '?', '[']) {
            glob::Pattern::new(&normalized)
                .map(Self::Glob)
                .map_err(|e| format!("invalid path pattern '{raw}': {e}"))
        } else {
            Ok(Self::Exact(normalized))
        }
    }

    fn matches_any<'a>(&self, mut paths: impl Iterator<Item = &'a String>) -> bool {
        match self {
            Self::Exact(path) => paths.any(|p| p == path),
            Self::Glob(pattern) => paths.any(|p| pattern.matches(p)),
        }
    }
}

/// A compiled, load-time validated condition
#[derive(Debug, Clone)]
pub struct RuleCondition {
    field_path: String,
    field: FactField,
    operator: ConditionOperator,
    value: Option<JsonValue>,
    regex: Option<Regex>,
    path: Option<PathMatcher>,
}

impl RuleCondition {
    /// Compile a definition, rejecting anything that could only fail at evaluation time
    pub fn compile(definition: &ConditionDefinition) -> Result<Self, String> {
        let operator: ConditionOperator = definition.operator.parse()?;

        let field_path = match (&definition.field, operator.default_field()) {
            (Some(field), _) => field.clone(),
            (None, Some(default)) => default.to_string(),
            (None, None) => return Err(format!("operator '{operator}' requires a field")),
        };
        let field = FactField::parse(&field_path)?;

        match (&definition.value, operator.requires_value()) {
            (None, true) => return Err(format!("operator '{operator}' requires a value")),
            (Some(_), false) => return Err(format!("operator '{operator}' must not carry a value")),
            _ => {}
        }

        let mut regex = None;
        let mut path = None;
        match operator {
            ConditionOperator::MatchesRegex => {
                let pattern = definition
                    .value
                    .as_ref()
                    .and_then(JsonValue::as_str)
                    .ok_or_else(|| "matches_regex value must be a string".to_string())?;
                regex = Some(
                    Regex::new(pattern).map_err(|e| format!("invalid regex '{pattern}': {e}"))?,
                );
            }
            ConditionOperator::FileExists | ConditionOperator::DirectoryExists => {
                let wanted = if operator == ConditionOperator::FileExists {
                    SimpleField::Files
                } else {
                    SimpleField::Directories
                };
                if !field.is_listing(wanted) {
                    return Err(format!(
                        "operator '{operator}' only applies to '{}'",
                        operator.default_field().unwrap_or_default()
                    ));
                }
                let raw = definition
                    .value
                    .as_ref()
                    .and_then(JsonValue::as_str)
                    .ok_or_else(|| format!("{operator} value must be a path string"))?;
                path = Some(PathMatcher::new(raw)?);
            }
            ConditionOperator::GreaterThan | ConditionOperator::LessThan => {
                if definition.value.as_ref().and_then(as_number).is_none() {
                    return Err(format!("operator '{operator}' requires a numeric value"));
                }
            }
            _ => {}
        }

        Ok(Self {
            field_path,
            field,
            operator,
            value: definition.value.clone(),
            regex,
            path,
        })
    }

    /// Shorthand for tests and built-in rules
    pub fn parse(field: Option<&str>, operator: &str, value: Option<JsonValue>) -> Result<Self, String> {
        Self::compile(&ConditionDefinition::new(field, operator, value))
    }

    pub fn operator(&self) -> ConditionOperator {
        self.operator
    }

    pub fn field_path(&self) -> &str {
        &self.field_path
    }

    pub fn value(&self) -> Option<&JsonValue> {
        self.value.as_ref()
    }

    /// Back to the configuration form
    pub fn to_definition(&self) -> ConditionDefinition {
        ConditionDefinition {
            field: Some(self.field_path.clone()),
            operator: self.operator.as_str().to_string(),
            value: self.value.clone(),
        }
    }

    /// Human-readable form, e.g. `exists(package.scripts.test)`
    pub fn describe(&self) -> String {
        match (&self.operator, &self.value) {
            (ConditionOperator::FileExists | ConditionOperator::DirectoryExists, Some(v)) => {
                format!("{}({})", self.operator, display_value(v))
            }
            (_, Some(v)) => format!("{}({}, {})", self.operator, self.field_path, display_value(v)),
            (_, None) => format!("{}({})", self.operator, self.field_path),
        }
    }

    /// Evaluate against a facts snapshot
    pub fn evaluate(&self, facts: &ModuleFacts) -> bool {
        evaluate_condition(self, facts)
    }
}

impl Serialize for RuleCondition {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_definition().serialize(serializer)
    }
}

/// Evaluate one condition. Missing fields resolve to "not found" and any
/// numeric or text coercion failure yields `false`.
pub fn evaluate_condition(condition: &RuleCondition, facts: &ModuleFacts) -> bool {
    let expected = condition.value.as_ref();
    match condition.operator {
        ConditionOperator::Exists => exists(condition.field.resolve(facts)),
        ConditionOperator::NotExists => !exists(condition.field.resolve(facts)),
        ConditionOperator::Equals => equals(condition.field.resolve(facts), expected),
        ConditionOperator::NotEquals => !equals(condition.field.resolve(facts), expected),
        ConditionOperator::Contains => contains(condition.field.resolve(facts), expected),
        ConditionOperator::NotContains => !contains(condition.field.resolve(facts), expected),
        ConditionOperator::MatchesRegex => {
            let actual = condition.field.resolve(facts);
            match (actual.as_ref().and_then(as_text), &condition.regex) {
                (Some(text), Some(regex)) => regex.is_match(&text),
                _ => false,
            }
        }
        ConditionOperator::FileExists => condition
            .path
            .as_ref()
            .is_some_and(|m| m.matches_any(facts.files.iter())),
        ConditionOperator::DirectoryExists => condition
            .path
            .as_ref()
            .is_some_and(|m| m.matches_any(facts.directories.iter())),
        ConditionOperator::GreaterThan => {
            compare(condition.field.resolve(facts), expected, |a, b| a > b)
        }
        ConditionOperator::LessThan => compare(condition.field.resolve(facts), expected, |a, b| a < b),
    }
}

fn exists(actual: Option<JsonValue>) -> bool {
    actual.is_some_and(|v| !v.is_null())
}

fn equals(actual: Option<JsonValue>, expected: Option<&JsonValue>) -> bool {
    match (actual, expected) {
        (Some(actual), Some(expected)) => loose_eq(&actual, expected),
        _ => false,
    }
}

fn contains(actual: Option<JsonValue>, expected: Option<&JsonValue>) -> bool {
    let (Some(actual), Some(expected)) = (actual, expected) else {
        return false;
    };
    match &actual {
        JsonValue::String(s) => as_text(expected).is_some_and(|needle| s.contains(&needle)),
        JsonValue::Array(items) => items.iter().any(|item| loose_eq(item, expected)),
        JsonValue::Object(map) => as_text(expected).is_some_and(|key| map.contains_key(&key)),
        _ => false,
    }
}

fn compare(
    actual: Option<JsonValue>,
    expected: Option<&JsonValue>,
    op: impl Fn(f64, f64) -> bool,
) -> bool {
    match (actual.as_ref().and_then(as_number), expected.and_then(as_number)) {
        (Some(a), Some(b)) => op(a, b),
        _ => false,
    }
}

/// Equality that also accepts `1` == `"1"` and `true` == `"true"`
fn loose_eq(actual: &JsonValue, expected: &JsonValue) -> bool {
    if actual == expected {
        return true;
    }
    if let (Some(a), Some(b)) = (as_number(actual), as_number(expected)) {
        return a == b;
    }
    match (actual, expected) {
        (JsonValue::Array(_) | JsonValue::Object(_), _) | (_, JsonValue::Array(_) | JsonValue::Object(_)) => false,
        _ => as_text(actual) == as_text(expected),
    }
}

fn as_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn as_number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn display_value(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}
