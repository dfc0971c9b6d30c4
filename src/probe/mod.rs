//! Module structure probe
//!
//! Architecture: Anti-Corruption Layer - the probe turns a directory into ModuleFacts
//! - Only a missing module root is fatal; per-file problems become fact warnings
//! - Manifests are parsed tolerantly, malformed JSON degrades to an empty object
//! - Binary files are sniffed and skipped, text excerpts are capped

pub mod fs;
pub mod path_filter;

pub use fs::{FileSystem, MemoryFileSystem, StdFileSystem, WalkEntry};
pub use path_filter::PathFilter;

use crate::config::{GuardianConfig, ProbeConfig};
use crate::domain::errors::{GuardianError, GuardianResult};
use crate::domain::facts::{
    FactWarning, FactWarningKind, ModuleFacts, ProbeStats, SourceExcerpt,
};
use rayon::prelude::*;
use serde_json::Value as JsonValue;
use std::path::Path;
use std::sync::Arc;

/// Bytes inspected when sniffing for binary content
const SNIFF_BYTES: usize = 8 * 1024;

/// File names captured regardless of extension
const ALWAYS_CAPTURED: &[&str] = &["Dockerfile", ".npmrc", ".env", "Procfile"];

/// Reads one module directory into a `ModuleFacts` snapshot
pub struct ModuleStructureProbe {
    filesystem: Arc<dyn FileSystem>,
    filter: PathFilter,
    manifest_file: String,
    limits: ProbeConfig,
}

impl ModuleStructureProbe {
    /// Probe the real filesystem
    pub fn new(config: &GuardianConfig) -> GuardianResult<Self> {
        Self::with_filesystem(config, Arc::new(StdFileSystem))
    }

    /// Probe through a custom filesystem collaborator
    pub fn with_filesystem(
        config: &GuardianConfig,
        filesystem: Arc<dyn FileSystem>,
    ) -> GuardianResult<Self> {
        Ok(Self {
            filesystem,
            filter: PathFilter::new(&config.paths.patterns)?,
            manifest_file: config.paths.manifest_file.clone(),
            limits: config.probe.clone(),
        })
    }

    pub fn filesystem(&self) -> &Arc<dyn FileSystem> {
        &self.filesystem
    }

    /// Take a snapshot of the module at `module_path`
    pub fn probe(&self, module_path: &Path) -> GuardianResult<ModuleFacts> {
        if !self.filesystem.exists(module_path) {
            return Err(GuardianError::path_not_found(module_path));
        }
        if !self.filesystem.is_dir(module_path) {
            return Err(GuardianError::validation(format!(
                "Module path {} is not a directory",
                module_path.display()
            )));
        }

        tracing::debug!("Probing module at {}", module_path.display());

        let fallback_id = module_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| module_path.display().to_string());
        let mut facts = ModuleFacts::empty(fallback_id, module_path);
        facts.manifest_file = self.manifest_file.clone();

        let filter = self.module_filter(module_path);
        let walk = self
            .filesystem
            .walk(module_path, self.limits.max_depth.max(1), &|rel, is_dir| {
                filter.should_include(rel, is_dir)
            });

        for error in walk.errors {
            tracing::warn!("Unreadable path {} in {}: {}", error.relative, module_path.display(), error.message);
            facts.warnings.push(FactWarning {
                kind: FactWarningKind::UnreadableDirectory,
                path: error.relative,
                message: error.message,
            });
        }

        let mut files = Vec::new();
        for entry in walk.entries {
            if entry.is_dir {
                facts.directories.insert(entry.relative);
                continue;
            }
            if files.len() >= self.limits.max_files {
                facts.warnings.push(FactWarning {
                    kind: FactWarningKind::FileLimitReached,
                    path: entry.relative,
                    message: format!("file listing stopped at {} files", self.limits.max_files),
                });
                break;
            }
            facts.files.insert(entry.relative.clone());
            files.push(entry);
        }

        self.read_manifest(module_path, &mut facts);
        if let Some(name) = facts.manifest_str("name").filter(|n| !n.trim().is_empty()) {
            facts.module_id = name.to_string();
        }

        let (excerpts, stats, warnings) = self.capture_excerpts(module_path, &files);
        facts.excerpts = excerpts;
        facts.stats = stats;
        facts.warnings.extend(warnings);

        tracing::debug!(
            "Probed {}: {} files, {} excerpts, {} warnings",
            facts.module_id,
            facts.files.len(),
            facts.excerpts.len(),
            facts.warnings.len()
        );

        Ok(facts)
    }

    /// Configured filter plus the module's own ignore file
    fn module_filter(&self, module_path: &Path) -> PathFilter {
        let mut filter = self.filter.clone();
        let ignore_file = module_path.join(path_filter::IGNORE_FILENAME);
        if self.filesystem.exists(&ignore_file) {
            match self.filesystem.read_to_string(&ignore_file) {
                Ok(content) => filter.extend_from_ignore_file(&content),
                Err(e) => tracing::warn!("Failed to read {}: {}", ignore_file.display(), e),
            }
        }
        filter
    }

    fn read_manifest(&self, module_path: &Path, facts: &mut ModuleFacts) {
        if !facts.files.contains(&self.manifest_file) {
            return;
        }
        facts.manifest_present = true;

        let manifest_path = module_path.join(&self.manifest_file);
        let source = match self.filesystem.read_to_string(&manifest_path) {
            Ok(source) => source,
            Err(e) => {
                facts.warnings.push(FactWarning {
                    kind: FactWarningKind::UnreadableFile,
                    path: self.manifest_file.clone(),
                    message: e.to_string(),
                });
                return;
            }
        };

        match serde_json::from_str::<JsonValue>(&source) {
            Ok(value @ JsonValue::Object(_)) => facts.manifest = value,
            Ok(_) => self.manifest_warning(facts, "manifest root is not an object".to_string()),
            Err(e) => self.manifest_warning(facts, e.to_string()),
        }
        facts.manifest_source = Some(source);
    }

    fn manifest_warning(&self, facts: &mut ModuleFacts, message: String) {
        let error = GuardianError::ManifestParse {
            path: facts.module_path.join(&self.manifest_file),
            message: message.clone(),
        };
        tracing::warn!("{}; continuing with empty metadata", error);
        facts.warnings.push(FactWarning {
            kind: FactWarningKind::ManifestParse,
            path: self.manifest_file.clone(),
            message,
        });
    }

    fn should_capture(&self, relative: &str) -> bool {
        let name = relative.rsplit('/').next().unwrap_or(relative);
        if ALWAYS_CAPTURED.contains(&name) || name.starts_with(".env") {
            return true;
        }
        name.rsplit_once('.')
            .map(|(_, ext)| {
                let ext = ext.to_ascii_lowercase();
                self.limits.source_extensions.iter().any(|e| *e == ext)
            })
            .unwrap_or(false)
    }

    fn capture_excerpts(
        &self,
        module_path: &Path,
        files: &[WalkEntry],
    ) -> (Vec<SourceExcerpt>, ProbeStats, Vec<FactWarning>) {
        let limit = self.limits.max_excerpt_bytes;
        let candidates: Vec<&WalkEntry> =
            files.iter().filter(|f| self.should_capture(&f.relative)).collect();

        let reads: Vec<ExcerptRead> = candidates
            .par_iter()
            .map(|entry| {
                let path = module_path.join(&entry.relative);
                match self.filesystem.read_capped(&path, limit.max(SNIFF_BYTES)) {
                    Ok((bytes, size)) => {
                        let sniff = &bytes[..bytes.len().min(SNIFF_BYTES)];
                        if sniff.contains(&0) {
                            return ExcerptRead::Binary;
                        }
                        let kept = &bytes[..bytes.len().min(limit)];
                        let truncated = (kept.len() as u64) < size;
                        ExcerptRead::Text(SourceExcerpt {
                            path: entry.relative.clone(),
                            content: decode_prefix(kept),
                            size,
                            truncated,
                        })
                    }
                    Err(e) => ExcerptRead::Failed(FactWarning {
                        kind: FactWarningKind::UnreadableFile,
                        path: entry.relative.clone(),
                        message: e.to_string(),
                    }),
                }
            })
            .collect();

        let mut stats = ProbeStats {
            files_seen: files.len(),
            total_bytes: files.iter().map(|f| f.size).sum(),
            ..ProbeStats::default()
        };
        let mut excerpts = Vec::new();
        let mut warnings = Vec::new();

        for read in reads {
            match read {
                ExcerptRead::Text(excerpt) => {
                    if excerpt.truncated {
                        stats.truncated += 1;
                    }
                    excerpts.push(excerpt);
                }
                ExcerptRead::Binary => stats.binary_skipped += 1,
                ExcerptRead::Failed(warning) => {
                    tracing::warn!("Unreadable file {}: {}", warning.path, warning.message);
                    warnings.push(warning);
                }
            }
        }
        stats.excerpts_captured = excerpts.len();

        (excerpts, stats, warnings)
    }
}

enum ExcerptRead {
    Text(SourceExcerpt),
    Binary,
    Failed(FactWarning),
}

/// Decode a possibly truncated UTF-8 prefix, dropping a split trailing character
fn decode_prefix(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(e) if e.error_len().is_none() => {
            String::from_utf8_lossy(&bytes[..e.valid_up_to()]).into_owned()
        }
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn probe_for(fs: MemoryFileSystem) -> ModuleStructureProbe {
        ModuleStructureProbe::with_filesystem(&GuardianConfig::default(), Arc::new(fs)).unwrap()
    }

    #[test]
    fn test_missing_root_is_path_not_found() {
        let probe = probe_for(MemoryFileSystem::new());
        let err = probe.probe(Path::new("/nope")).unwrap_err();
        assert!(matches!(err, GuardianError::PathNotFound { .. }));
    }

    #[test]
    fn test_manifest_and_listing() {
        let mut fs = MemoryFileSystem::new();
        fs.add_file("/mods/auth/package.json", r#"{"name":"auth","layer":"core","scripts":{"test":"jest"}}"#)
            .add_file("/mods/auth/src/index.js", "module.exports = {};\n")
            .add_file("/mods/auth/node_modules/x/index.js", "ignored")
            .add_dir("/mods/auth/tests");

        let facts = probe_for(fs).probe(Path::new("/mods/auth")).unwrap();
        assert_eq!(facts.module_id, "auth");
        assert!(facts.manifest_present);
        assert_eq!(facts.layer(), Some("core"));
        assert!(facts.has_file("src/index.js"));
        assert!(facts.has_directory("tests"));
        assert!(!facts.files.iter().any(|f| f.starts_with("node_modules")));
        assert!(facts.warnings.is_empty());
    }

    #[test]
    fn test_malformed_manifest_degrades_to_empty_object() {
        let mut fs = MemoryFileSystem::new();
        fs.add_file("/m/package.json", "{ not json");

        let facts = probe_for(fs).probe(Path::new("/m")).unwrap();
        assert!(facts.manifest_present);
        assert_eq!(facts.manifest, serde_json::json!({}));
        assert_eq!(facts.module_id, "m");
        assert_eq!(facts.warnings.len(), 1);
        assert_eq!(facts.warnings[0].kind, FactWarningKind::ManifestParse);
    }

    #[test]
    fn test_unreadable_file_is_a_warning() {
        let mut fs = MemoryFileSystem::new();
        fs.add_file("/m/package.json", r#"{"name":"m"}"#)
            .add_unreadable("/m/src/locked.js")
            .add_file("/m/src/ok.js", "let a = 1;");

        let facts = probe_for(fs).probe(Path::new("/m")).unwrap();
        assert!(facts.has_file("src/locked.js"));
        assert_eq!(facts.excerpts.len(), 2);
        assert!(facts
            .warnings
            .iter()
            .any(|w| w.kind == FactWarningKind::UnreadableFile && w.path == "src/locked.js"));
    }

    #[test]
    fn test_binary_files_are_skipped_and_excerpts_capped() {
        let mut config = GuardianConfig::default();
        config.probe.max_excerpt_bytes = 16;

        let mut fs = MemoryFileSystem::new();
        fs.add_file("/m/logo.js", vec![0x89, b'P', b'N', b'G', 0, 0, 1])
            .add_file("/m/long.js", "a".repeat(100));

        let probe = ModuleStructureProbe::with_filesystem(&config, Arc::new(fs)).unwrap();
        let facts = probe.probe(Path::new("/m")).unwrap();

        assert_eq!(facts.stats.binary_skipped, 1);
        assert_eq!(facts.excerpts.len(), 1);
        assert_eq!(facts.excerpts[0].content.len(), 16);
        assert!(facts.excerpts[0].truncated);
        assert_eq!(facts.excerpts[0].size, 100);
    }

    #[test]
    fn test_file_limit_is_recorded() {
        let mut config = GuardianConfig::default();
        config.probe.max_files = 2;

        let mut fs = MemoryFileSystem::new();
        for i in 0..5 {
            fs.add_file(PathBuf::from(format!("/m/f{i}.js")), "x");
        }

        let probe = ModuleStructureProbe::with_filesystem(&config, Arc::new(fs)).unwrap();
        let facts = probe.probe(Path::new("/m")).unwrap();
        assert_eq!(facts.files.len(), 2);
        assert!(facts.warnings.iter().any(|w| w.kind == FactWarningKind::FileLimitReached));
    }

    #[test]
    fn test_guardianignore_and_real_disk() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        std::fs::create_dir_all(root.join("fixtures")).unwrap();
        std::fs::write(root.join(".guardianignore"), "fixtures/\n").unwrap();
        std::fs::write(root.join("fixtures/leak.js"), "const k = 1;").unwrap();
        std::fs::write(root.join("index.js"), "const k = 2;").unwrap();

        let probe = ModuleStructureProbe::new(&GuardianConfig::default()).unwrap();
        let facts = probe.probe(root).unwrap();
        assert!(facts.has_file("index.js"));
        assert!(!facts.has_file("fixtures/leak.js"));
        assert!(!facts.manifest_present);
    }

    #[test]
    fn test_truncation_keeps_utf8_boundaries() {
        assert_eq!(decode_prefix("héllo".as_bytes()), "héllo");
        assert_eq!(decode_prefix(&"é".as_bytes()[..1]), "");
    }
}
