//! Configuration loading and management for Module Guardian
//!
//! Architecture: Anti-Corruption Layer - Configuration translates external YAML formats
//! - Raw YAML structures are converted to clean domain objects
//! - Default configurations are embedded in the domain, not infrastructure
//! - Custom rules are compiled here so bad definitions fail at load time

use crate::domain::errors::{GuardianError, GuardianResult};
use crate::domain::results::Severity;
use crate::rules::{RuleCatalog, RuleDefinition};
use crate::security::advisories::Advisory;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

/// Main configuration structure for Module Guardian
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardianConfig {
    /// Configuration format version
    pub version: String,
    /// Path filtering configuration
    pub paths: PathConfig,
    pub probe: ProbeConfig,
    /// Custom rules added to the built-in set
    pub rules: Vec<RuleDefinition>,
    /// Rule ids disabled at load
    pub disabled_rules: Vec<String>,
    /// Skip the built-in rule set entirely
    pub builtin_rules: bool,
    pub architecture: ArchitectureConfig,
    pub security: SecurityConfig,
    pub batch: BatchConfig,
    pub fix: FixConfig,
    pub report: ReportConfig,
}

/// Which paths inside a module are looked at
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Exclusion patterns (gitignore-style, `!` re-includes)
    pub patterns: Vec<String>,
    /// Manifest file name at the module root
    pub manifest_file: String,
}

/// Limits for the structure probe
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Byte ceiling for each captured excerpt
    pub max_excerpt_bytes: usize,
    /// Stop listing after this many files
    pub max_files: usize,
    /// Maximum directory depth below the module root
    pub max_depth: usize,
    /// Extensions (without dot) whose content is captured
    pub source_extensions: Vec<String>,
}

/// One architectural layer in the declared ordering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerDefinition {
    pub name: String,
    /// Strict layers may not depend upward
    #[serde(default = "default_true")]
    pub strict: bool,
    /// Cycles through a core layer are critical
    #[serde(default)]
    pub core: bool,
}

/// Dependency graph settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchitectureConfig {
    /// Layer order, outermost first; ordinal = position
    pub layers: Vec<LayerDefinition>,
    pub upward_severity: Severity,
    pub peer_severity: Severity,
    pub skip_layer_severity: Severity,
    /// Count devDependencies as graph edges
    pub include_dev_dependencies: bool,
    /// Resolve external dependencies from `node_modules` and expand them
    pub include_external: bool,
    /// Bound on outward expansion when `include_external` is set
    pub max_depth: usize,
    /// Cycles longer than this are reported one severity lower
    pub long_cycle_threshold: usize,
}

/// Security scanner settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub dependency_scan: bool,
    pub code_scan: bool,
    pub configuration_scan: bool,
    pub secrets_scan: bool,
    /// Files larger than this are skipped
    pub max_file_bytes: u64,
    /// Additional known-vulnerable versions
    pub advisories: Vec<Advisory>,
}

/// Batch validation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub max_concurrent: usize,
    pub timeout_secs: u64,
    pub continue_on_error: bool,
    /// Analyse all modules of a batch as one dependency graph
    pub shared_graph: bool,
}

/// Auto-fix settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FixConfig {
    /// Backup directory; relative paths resolve against the module root
    pub backup_dir: String,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
    /// Whether `run_command` steps may execute
    pub allow_commands: bool,
}

/// Recommendation and summary settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Failed results in a category/severity group needed for a recommendation
    pub min_group_size: usize,
    /// Length of the ecosystem top-violations list
    pub top_violations: usize,
    /// Fold dependency and security findings into module results
    pub fold_findings: bool,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            patterns: vec![
                // Default exclusions
                "**/node_modules/**".to_string(),
                "**/.git/**".to_string(),
                "**/target/**".to_string(),
                "**/dist/**".to_string(),
                "**/build/**".to_string(),
                "**/coverage/**".to_string(),
                "**/.guardian-backups/**".to_string(),
                "**/*.min.js".to_string(),
            ],
            manifest_file: "package.json".to_string(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            max_excerpt_bytes: 64 * 1024,
            max_files: 5_000,
            max_depth: 12,
            source_extensions: [
                "js", "jsx", "mjs", "cjs", "ts", "tsx", "vue", "py", "rb", "go", "rs", "java",
                "kt", "php", "cs", "sh", "html", "json", "yml", "yaml", "toml", "ini", "conf",
                "cfg", "env", "properties", "xml",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl Default for ArchitectureConfig {
    fn default() -> Self {
        Self {
            layers: Vec::new(),
            upward_severity: Severity::Error,
            peer_severity: Severity::Info,
            skip_layer_severity: Severity::Warning,
            include_dev_dependencies: false,
            include_external: false,
            max_depth: 3,
            long_cycle_threshold: 4,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            dependency_scan: true,
            code_scan: true,
            configuration_scan: true,
            secrets_scan: true,
            max_file_bytes: 1024 * 1024,
            advisories: Vec::new(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            timeout_secs: 60,
            continue_on_error: true,
            shared_graph: false,
        }
    }
}

impl Default for FixConfig {
    fn default() -> Self {
        Self {
            backup_dir: ".guardian-backups".to_string(),
            retry_attempts: 3,
            retry_backoff_ms: 50,
            allow_commands: false,
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            min_group_size: 1,
            top_violations: 10,
            fold_findings: true,
        }
    }
}

impl GuardianConfig {
    /// Load configuration from a YAML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> GuardianResult<Self> {
        let contents = fs::read_to_string(&path).map_err(|e| {
            GuardianError::config(format!(
                "Failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let config: Self = serde_yaml::from_str(&contents).map_err(|e| {
            GuardianError::config(format!(
                "Failed to parse config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from string content
    pub fn load_from_str(content: &str) -> GuardianResult<Self> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| GuardianError::config(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Look for a config file in `dir`, falling back to defaults
    pub fn discover<P: AsRef<Path>>(dir: P) -> GuardianResult<Self> {
        const DEFAULT_CONFIGS: [&str; 3] =
            ["module_guardian.yaml", "module_guardian.yml", ".module_guardian.yaml"];

        for name in DEFAULT_CONFIGS {
            let candidate = dir.as_ref().join(name);
            if candidate.is_file() {
                tracing::debug!("Using configuration {}", candidate.display());
                return Self::load_from_file(candidate);
            }
        }
        Ok(Self::default())
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> GuardianResult<()> {
        if !["1.0"].contains(&self.version.as_str()) {
            return Err(GuardianError::config(format!(
                "Unsupported configuration version: {}. Supported versions: 1.0",
                self.version
            )));
        }

        if self.paths.manifest_file.trim().is_empty() {
            return Err(GuardianError::config("paths.manifest_file must not be empty"));
        }

        for pattern in &self.paths.patterns {
            glob::Pattern::new(pattern.trim_start_matches('!')).map_err(|e| {
                GuardianError::config(format!("Invalid path pattern '{pattern}': {e}"))
            })?;
        }

        let mut layer_names = BTreeSet::new();
        for layer in &self.architecture.layers {
            if !layer_names.insert(layer.name.as_str()) {
                return Err(GuardianError::config(format!(
                    "Duplicate architecture layer '{}'",
                    layer.name
                )));
            }
        }

        if self.batch.max_concurrent == 0 {
            return Err(GuardianError::config("batch.max_concurrent must be at least 1"));
        }

        // Compile custom rules so bad operators and fields fail here
        let mut rule_ids = BTreeSet::new();
        for rule in &self.rules {
            if !rule_ids.insert(rule.id.as_str()) {
                return Err(GuardianError::config(format!("Duplicate rule ID '{}'", rule.id)));
            }
            rule.compile()?;
        }

        for advisory in &self.security.advisories {
            advisory.validate()?;
        }

        Ok(())
    }

    /// Build the rule catalog this configuration describes
    pub fn build_catalog(&self) -> GuardianResult<RuleCatalog> {
        let catalog = if self.builtin_rules {
            RuleCatalog::with_builtin_rules()
        } else {
            RuleCatalog::new()
        };

        for rule in &self.rules {
            catalog.register_definition(rule)?;
        }
        for rule_id in &self.disabled_rules {
            catalog.disable_rule(rule_id);
        }

        Ok(catalog)
    }

    /// Position of a layer name in the declared ordering
    pub fn layer_ordinal(&self, name: &str) -> Option<usize> {
        self.architecture.layers.iter().position(|l| l.name == name)
    }

    /// Convert to JSON for serialization
    pub fn to_json(&self) -> GuardianResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| GuardianError::config(format!("Failed to serialize config: {e}")))
    }

    /// Create a fingerprint of the configuration for report provenance
    pub fn fingerprint(&self) -> String {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();

        // serde_json keeps struct field order, so this is stable for a given config
        match serde_json::to_string(self) {
            Ok(serialized) => serialized.hash(&mut hasher),
            Err(_) => self.version.hash(&mut hasher),
        }

        format!("{:x}", hasher.finish())
    }
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            paths: PathConfig::default(),
            probe: ProbeConfig::default(),
            rules: Vec::new(),
            disabled_rules: Vec::new(),
            builtin_rules: true,
            architecture: ArchitectureConfig::default(),
            security: SecurityConfig::default(),
            batch: BatchConfig::default(),
            fix: FixConfig::default(),
            report: ReportConfig::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Configuration builder for programmatic construction
pub struct ConfigBuilder {
    config: GuardianConfig,
}

impl ConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self { config: GuardianConfig::default() }
    }

    /// Add a path exclusion pattern
    pub fn add_path_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.config.paths.patterns.push(pattern.into());
        self
    }

    /// Set the manifest file name
    pub fn manifest_file(mut self, name: impl Into<String>) -> Self {
        self.config.paths.manifest_file = name.into();
        self
    }

    /// Add a custom rule
    pub fn add_rule(mut self, rule: RuleDefinition) -> Self {
        self.config.rules.push(rule);
        self
    }

    /// Disable a rule by id
    pub fn disable_rule(mut self, rule_id: impl Into<String>) -> Self {
        self.config.disabled_rules.push(rule_id.into());
        self
    }

    /// Start from an empty catalog instead of the built-in rules
    pub fn without_builtin_rules(mut self) -> Self {
        self.config.builtin_rules = false;
        self
    }

    /// Append a layer to the ordering
    pub fn add_layer(mut self, name: impl Into<String>, strict: bool, core: bool) -> Self {
        self.config.architecture.layers.push(LayerDefinition { name: name.into(), strict, core });
        self
    }

    pub fn max_concurrent(mut self, max: usize) -> Self {
        self.config.batch.max_concurrent = max;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.batch.timeout_secs = secs;
        self
    }

    pub fn continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.config.batch.continue_on_error = continue_on_error;
        self
    }

    pub fn shared_graph(mut self, shared: bool) -> Self {
        self.config.batch.shared_graph = shared;
        self
    }

    pub fn fold_findings(mut self, fold: bool) -> Self {
        self.config.report.fold_findings = fold;
        self
    }

    /// Build the final configuration
    pub fn build(self) -> GuardianResult<GuardianConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = GuardianConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.architecture.skip_layer_severity, Severity::Warning);
        assert!(config.build_catalog().unwrap().len() > 5);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
version: "1.0"
architecture:
  layers:
    - name: app
    - name: service
    - name: core
      core: true
batch:
  max_concurrent: 2
"#;
        let config = GuardianConfig::load_from_str(yaml).unwrap();
        assert_eq!(config.layer_ordinal("core"), Some(2));
        assert!(config.architecture.layers[0].strict);
        assert!(config.architecture.layers[2].core);
        assert_eq!(config.batch.max_concurrent, 2);
        assert_eq!(config.batch.timeout_secs, 60);
        assert_eq!(config.paths.manifest_file, "package.json");
    }

    #[test]
    fn test_unknown_operator_fails_config_load() {
        let yaml = r#"
version: "1.0"
rules:
  - id: custom.bad
    category: custom
    severity: error
    scope: structure
    conditions:
      - field: files.count
        operator: about
        value: 3
"#;
        let err = GuardianConfig::load_from_str(yaml).unwrap_err();
        assert!(err.to_string().contains("unknown operator"));
    }

    #[test]
    fn test_rejects_bad_versions_and_layers() {
        assert!(GuardianConfig::load_from_str("version: \"2.0\"").is_err());

        let duplicate_layers = ConfigBuilder::new()
            .add_layer("core", true, true)
            .add_layer("core", true, false)
            .build();
        assert!(duplicate_layers.is_err());

        assert!(ConfigBuilder::new().max_concurrent(0).build().is_err());
    }

    #[test]
    fn test_catalog_respects_disabled_and_builtin_flags() {
        let config = ConfigBuilder::new()
            .disable_rule("docs.readme")
            .disable_rule("not.a.rule")
            .build()
            .unwrap();
        let catalog = config.build_catalog().unwrap();
        assert!(catalog.is_disabled("docs.readme"));

        let empty = ConfigBuilder::new().without_builtin_rules().build().unwrap();
        assert!(empty.build_catalog().unwrap().is_empty());
    }

    #[test]
    fn test_fingerprint_is_stable_and_sensitive() {
        let a = GuardianConfig::default();
        let b = GuardianConfig::default();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let c = ConfigBuilder::new().max_concurrent(9).build().unwrap();
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_yaml_round_trip_preserves_rules() {
        let config = GuardianConfig::load_from_str(
            r#"
version: "1.0"
rules:
  - id: custom.src
    category: structure
    severity: info
    scope: structure
    conditions:
      - operator: directory_exists
        value: src
"#,
        )
        .unwrap();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let again = GuardianConfig::load_from_str(&yaml).unwrap();
        assert_eq!(again.rules, config.rules);
    }
}
