//! Point-in-time snapshot of a module's observable state
//!
//! Architecture: Value Object - ModuleFacts is built once by the probe and never mutated
//! - Later pipeline stages only read from it
//! - Per-file problems are carried as warnings instead of aborting the snapshot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// A declared dependency read from the module manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredDependency {
    pub name: String,
    pub version_req: String,
    pub kind: DependencyKind,
}

/// Which manifest table a dependency came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    Runtime,
    Peer,
    Dev,
}

impl DependencyKind {
    /// Manifest key holding this kind of dependency
    pub fn manifest_key(self) -> &'static str {
        match self {
            Self::Runtime => "dependencies",
            Self::Peer => "peerDependencies",
            Self::Dev => "devDependencies",
        }
    }

    pub fn all() -> [DependencyKind; 3] {
        [Self::Runtime, Self::Peer, Self::Dev]
    }
}

/// A capped text excerpt of one file, kept for pattern scanning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceExcerpt {
    /// Path relative to the module root, `/`-separated
    pub path: String,
    /// Text content, truncated at the probe's byte ceiling
    pub content: String,
    /// Size of the file on disk in bytes
    pub size: u64,
    /// Whether `content` was cut short
    pub truncated: bool,
}

impl SourceExcerpt {
    /// File extension, lowercased
    pub fn extension(&self) -> Option<String> {
        let name = self.path.rsplit('/').next()?;
        // dotfiles such as `.env` report their name as the extension
        let (_, ext) = name.rsplit_once('.')?;
        Some(ext.to_ascii_lowercase())
    }

    /// File name without directories
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// What went wrong while probing a single path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactWarningKind {
    UnreadableFile,
    UnreadableDirectory,
    ManifestParse,
    FileLimitReached,
}

/// A facts-level warning: recorded, never fatal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactWarning {
    pub kind: FactWarningKind,
    pub path: String,
    pub message: String,
}

/// Counters collected while probing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeStats {
    pub files_seen: usize,
    pub excerpts_captured: usize,
    pub binary_skipped: usize,
    pub truncated: usize,
    pub total_bytes: u64,
}

/// Immutable snapshot of one module, produced per validation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleFacts {
    /// Stable module identifier (manifest name, else directory name)
    pub module_id: String,
    /// Module root on disk
    pub module_path: PathBuf,
    /// Relative paths of every file found
    pub files: BTreeSet<String>,
    /// Relative paths of every directory found
    pub directories: BTreeSet<String>,
    /// Whether a manifest file exists
    pub manifest_present: bool,
    /// Relative path of the manifest
    pub manifest_file: String,
    /// Parsed manifest; an empty object when absent or malformed
    pub manifest: JsonValue,
    /// Raw manifest text, when readable
    pub manifest_source: Option<String>,
    /// Text excerpts for scanning
    pub excerpts: Vec<SourceExcerpt>,
    /// Non-fatal problems met while probing
    pub warnings: Vec<FactWarning>,
    pub stats: ProbeStats,
    pub probed_at: DateTime<Utc>,
}

impl ModuleFacts {
    /// An empty snapshot for a module root
    pub fn empty(module_id: impl Into<String>, module_path: impl Into<PathBuf>) -> Self {
        Self {
            module_id: module_id.into(),
            module_path: module_path.into(),
            files: BTreeSet::new(),
            directories: BTreeSet::new(),
            manifest_present: false,
            manifest_file: "package.json".to_string(),
            manifest: JsonValue::Object(Default::default()),
            manifest_source: None,
            excerpts: Vec::new(),
            warnings: Vec::new(),
            stats: ProbeStats::default(),
            probed_at: Utc::now(),
        }
    }

    /// Look up a value in the manifest by path segments
    pub fn manifest_value(&self, segments: &[String]) -> Option<&JsonValue> {
        segments
            .iter()
            .try_fold(&self.manifest, |current, segment| match current {
                JsonValue::Object(map) => map.get(segment),
                JsonValue::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            })
    }

    /// Manifest string field
    pub fn manifest_str(&self, key: &str) -> Option<&str> {
        self.manifest.get(key).and_then(JsonValue::as_str)
    }

    /// Declared architecture layer
    pub fn layer(&self) -> Option<&str> {
        self.manifest_str("layer")
    }

    /// Declared module type, used to select applicable rules
    pub fn module_type(&self) -> Option<&str> {
        self.manifest_str("moduleType").or_else(|| self.manifest_str("type"))
    }

    /// Declared tags
    pub fn tags(&self) -> Vec<String> {
        self.manifest
            .get("tags")
            .and_then(JsonValue::as_array)
            .map(|tags| tags.iter().filter_map(|t| t.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    }

    /// Dependencies declared across all manifest tables, sorted by kind then name
    pub fn dependencies(&self) -> Vec<DeclaredDependency> {
        declared_dependencies(&self.manifest)
    }

    /// Whether a relative file path exists
    pub fn has_file(&self, relative: &str) -> bool {
        self.files.contains(relative)
    }

    /// Whether a relative directory path exists
    pub fn has_directory(&self, relative: &str) -> bool {
        self.directories.contains(relative.trim_end_matches('/'))
    }

    /// Total line count across captured excerpts
    pub fn source_lines(&self) -> usize {
        self.excerpts.iter().map(|e| e.content.lines().count()).sum()
    }
}

/// Read dependency tables from a parsed manifest
pub fn declared_dependencies(manifest: &JsonValue) -> Vec<DeclaredDependency> {
    let mut deps = Vec::new();
    for kind in DependencyKind::all() {
        let Some(table) = manifest.get(kind.manifest_key()).and_then(JsonValue::as_object) else {
            continue;
        };
        let sorted: BTreeMap<&String, &JsonValue> = table.iter().collect();
        for (name, req) in sorted {
            deps.push(DeclaredDependency {
                name: name.clone(),
                version_req: req.as_str().unwrap_or("*").to_string(),
                kind,
            });
        }
    }
    deps
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn facts_with_manifest(manifest: JsonValue) -> ModuleFacts {
        let mut facts = ModuleFacts::empty("demo", "/tmp/demo");
        facts.manifest = manifest;
        facts.manifest_present = true;
        facts
    }

    #[test]
    fn test_manifest_value_walks_objects_and_arrays() {
        let facts = facts_with_manifest(json!({
            "scripts": { "test": "jest" },
            "files": ["dist", "lib"]
        }));

        let path = |p: &str| p.split('.').map(str::to_string).collect::<Vec<_>>();
        assert_eq!(facts.manifest_value(&path("scripts.test")), Some(&json!("jest")));
        assert_eq!(facts.manifest_value(&path("files.1")), Some(&json!("lib")));
        assert_eq!(facts.manifest_value(&path("scripts.build")), None);
        assert_eq!(facts.manifest_value(&path("scripts.test.deeper")), None);
    }

    #[test]
    fn test_dependencies_are_sorted_by_kind_then_name() {
        let facts = facts_with_manifest(json!({
            "dependencies": { "zod": "^3.0.0", "axios": "1.6.0" },
            "devDependencies": { "jest": "^29.0.0" }
        }));

        let names: Vec<_> = facts.dependencies().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["axios", "zod", "jest"]);
    }

    #[test]
    fn test_excerpt_extension() {
        let excerpt = SourceExcerpt {
            path: "config/.env".to_string(),
            content: String::new(),
            size: 0,
            truncated: false,
        };
        assert_eq!(excerpt.extension().as_deref(), Some("env"));
        assert_eq!(excerpt.file_name(), ".env");
    }
}
