//! Filesystem collaborator used by the probe
//!
//! Architecture: Port and Adapter - the probe only sees the `FileSystem` trait
//! - `StdFileSystem` walks the real disk with walkdir
//! - `MemoryFileSystem` serves fixtures and injected failures in tests

use std::collections::BTreeMap;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// One entry found while walking a module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    /// Path relative to the walk root, `/`-separated
    pub relative: String,
    pub is_dir: bool,
    pub size: u64,
}

/// A path the walk could not read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkError {
    pub relative: String,
    pub message: String,
}

/// Result of walking a module root
#[derive(Debug, Clone, Default)]
pub struct WalkOutcome {
    /// Sorted by relative path
    pub entries: Vec<WalkEntry>,
    pub errors: Vec<WalkError>,
}

/// Directory listing, stat and read, as the probe needs them
pub trait FileSystem: Send + Sync {
    fn exists(&self, path: &Path) -> bool;

    fn is_dir(&self, path: &Path) -> bool;

    /// Walk `root` up to `max_depth`; `keep(relative, is_dir)` prunes entries and whole directories
    fn walk(&self, root: &Path, max_depth: usize, keep: &dyn Fn(&str, bool) -> bool) -> WalkOutcome;

    /// Read at most `limit` bytes; returns the bytes and the full file size
    fn read_capped(&self, path: &Path, limit: usize) -> io::Result<(Vec<u8>, u64)>;

    fn read_to_string(&self, path: &Path) -> io::Result<String>;
}

/// Convert a path below `root` to the `/`-separated relative form
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// The real filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct StdFileSystem;

impl FileSystem for StdFileSystem {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn walk(&self, root: &Path, max_depth: usize, keep: &dyn Fn(&str, bool) -> bool) -> WalkOutcome {
        let mut outcome = WalkOutcome::default();

        let walker = WalkDir::new(root)
            .follow_links(false)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| match relative_path(root, entry.path()) {
                Some(relative) => keep(&relative, entry.file_type().is_dir()),
                None => true,
            });

        for entry in walker {
            match entry {
                Ok(entry) => {
                    let Some(relative) = relative_path(root, entry.path()) else {
                        continue;
                    };
                    let is_dir = entry.file_type().is_dir();
                    let size = if is_dir {
                        0
                    } else {
                        entry.metadata().map(|m| m.len()).unwrap_or(0)
                    };
                    outcome.entries.push(WalkEntry { relative, is_dir, size });
                }
                Err(e) => {
                    let relative = e
                        .path()
                        .and_then(|p| relative_path(root, p))
                        .unwrap_or_else(|| ".".to_string());
                    outcome.errors.push(WalkError { relative, message: e.to_string() });
                }
            }
        }

        outcome.entries.sort_by(|a, b| a.relative.cmp(&b.relative));
        outcome
    }

    fn read_capped(&self, path: &Path, limit: usize) -> io::Result<(Vec<u8>, u64)> {
        let file = std::fs::File::open(path)?;
        let size = file.metadata()?.len();
        let mut buffer = Vec::with_capacity(limit.min(size as usize));
        file.take(limit as u64).read_to_end(&mut buffer)?;
        Ok((buffer, size))
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }
}

#[derive(Debug, Clone)]
enum MemoryNode {
    Directory,
    File(Vec<u8>),
    /// Listed but fails on read
    Unreadable,
}

/// In-memory filesystem for tests
#[derive(Debug, Clone, Default)]
pub struct MemoryFileSystem {
    nodes: BTreeMap<PathBuf, MemoryNode>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn add_parents(&mut self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir.as_os_str().is_empty() {
                break;
            }
            self.nodes.entry(dir.to_path_buf()).or_insert(MemoryNode::Directory);
            current = dir.parent();
        }
    }

    pub fn add_dir(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        let path = path.into();
        self.add_parents(&path);
        self.nodes.insert(path, MemoryNode::Directory);
        self
    }

    pub fn add_file(&mut self, path: impl Into<PathBuf>, content: impl Into<Vec<u8>>) -> &mut Self {
        let path = path.into();
        self.add_parents(&path);
        self.nodes.insert(path, MemoryNode::File(content.into()));
        self
    }

    /// A file that appears in listings but cannot be read
    pub fn add_unreadable(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        let path = path.into();
        self.add_parents(&path);
        self.nodes.insert(path, MemoryNode::Unreadable);
        self
    }

    fn file(&self, path: &Path) -> io::Result<&[u8]> {
        match self.nodes.get(path) {
            Some(MemoryNode::File(bytes)) => Ok(bytes),
            Some(MemoryNode::Directory) => {
                Err(io::Error::new(io::ErrorKind::Other, "is a directory"))
            }
            Some(MemoryNode::Unreadable) => {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "permission denied"))
            }
            None => Err(io::Error::new(io::ErrorKind::NotFound, "no such file")),
        }
    }
}

impl FileSystem for MemoryFileSystem {
    fn exists(&self, path: &Path) -> bool {
        self.nodes.contains_key(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        matches!(self.nodes.get(path), Some(MemoryNode::Directory))
    }

    fn walk(&self, root: &Path, max_depth: usize, keep: &dyn Fn(&str, bool) -> bool) -> WalkOutcome {
        let mut outcome = WalkOutcome::default();
        let mut pruned: Vec<String> = Vec::new();

        // BTreeMap order puts parents before children
        for (path, node) in self.nodes.range(root.to_path_buf()..) {
            let Some(relative) = relative_path(root, path) else {
                if path.starts_with(root) {
                    continue;
                }
                break;
            };
            if relative.split('/').count() > max_depth {
                continue;
            }
            if pruned.iter().any(|p| relative.starts_with(&format!("{p}/"))) {
                continue;
            }
            let is_dir = matches!(node, MemoryNode::Directory);
            if !keep(&relative, is_dir) {
                if is_dir {
                    pruned.push(relative);
                }
                continue;
            }
            let size = match node {
                MemoryNode::File(bytes) => bytes.len() as u64,
                _ => 0,
            };
            outcome.entries.push(WalkEntry { relative, is_dir, size });
        }

        outcome.entries.sort_by(|a, b| a.relative.cmp(&b.relative));
        outcome
    }

    fn read_capped(&self, path: &Path, limit: usize) -> io::Result<(Vec<u8>, u64)> {
        let bytes = self.file(path)?;
        Ok((bytes[..bytes.len().min(limit)].to_vec(), bytes.len() as u64))
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        let bytes = self.file(path)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_std_walk_prunes_and_sorts() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        std::fs::create_dir_all(root.join("src/nested")).unwrap();
        std::fs::create_dir_all(root.join("node_modules/dep")).unwrap();
        std::fs::write(root.join("src/b.js"), "b").unwrap();
        std::fs::write(root.join("src/a.js"), "a").unwrap();
        std::fs::write(root.join("node_modules/dep/index.js"), "x").unwrap();

        let outcome = StdFileSystem.walk(root, 8, &|rel, _| rel != "node_modules");
        let paths: Vec<_> = outcome.entries.iter().map(|e| e.relative.as_str()).collect();
        assert_eq!(paths, vec!["src", "src/a.js", "src/b.js", "src/nested"]);
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn test_std_read_capped_reports_full_size() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("big.txt");
        std::fs::write(&file, "0123456789").unwrap();

        let (bytes, size) = StdFileSystem.read_capped(&file, 4).unwrap();
        assert_eq!(bytes, b"0123");
        assert_eq!(size, 10);
    }

    #[test]
    fn test_memory_walk_respects_depth_and_pruning() {
        let mut fs = MemoryFileSystem::new();
        fs.add_file("/m/src/index.js", "x")
            .add_file("/m/src/deep/er/file.js", "y")
            .add_file("/m/dist/out.js", "z")
            .add_file("/other/file.js", "w");

        let outcome = fs.walk(Path::new("/m"), 2, &|rel, _| rel != "dist");
        let paths: Vec<_> = outcome.entries.iter().map(|e| e.relative.as_str()).collect();
        assert_eq!(paths, vec!["src", "src/deep", "src/index.js"]);
    }

    #[test]
    fn test_memory_unreadable_file() {
        let mut fs = MemoryFileSystem::new();
        fs.add_unreadable("/m/secret.bin");
        assert!(fs.exists(Path::new("/m/secret.bin")));
        assert!(fs.is_dir(Path::new("/m")));
        assert_eq!(
            fs.read_to_string(Path::new("/m/secret.bin")).unwrap_err().kind(),
            io::ErrorKind::PermissionDenied
        );
    }
}
