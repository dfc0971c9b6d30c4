//! Path filtering using .gitignore-style patterns
//!
//! Architectural Principle: Service Layer - PathFilter owns the include/exclude decision
//! - Paths are matched relative to the module root, `/`-separated
//! - Patterns apply in order, the last match wins, `!` re-includes
//! - An optional `.guardianignore` at the module root adds further patterns

use crate::domain::errors::{GuardianError, GuardianResult};

/// Name of the per-module ignore file
pub const IGNORE_FILENAME: &str = ".guardianignore";

/// Decides which module paths the probe looks at
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    patterns: Vec<FilterPattern>,
}

#[derive(Debug, Clone)]
struct FilterPattern {
    pattern: glob::Pattern,
    /// Whether this is an include pattern (starts with !)
    is_include: bool,
    /// Pattern only matches directories (ends with /)
    dir_only: bool,
    /// Pattern has a slash, so it matches the full relative path
    anchored: bool,
    original: String,
}

impl FilterPattern {
    fn parse(raw: &str) -> GuardianResult<Self> {
        let (is_include, rest) = match raw.strip_prefix('!') {
            Some(stripped) => (true, stripped),
            None => (false, raw),
        };
        let dir_only = rest.ends_with('/');
        let trimmed = rest.trim_end_matches('/');
        let trimmed = trimmed.strip_prefix('/').unwrap_or(trimmed);
        let anchored = rest.trim_end_matches('/').contains('/');

        let pattern = glob::Pattern::new(trimmed)
            .map_err(|e| GuardianError::pattern(format!("Invalid pattern '{raw}': {e}")))?;

        Ok(Self {
            pattern,
            is_include,
            dir_only,
            anchored,
            original: raw.to_string(),
        })
    }

    fn matches(&self, relative: &str, is_dir: bool) -> bool {
        if self.dir_only && !is_dir {
            return false;
        }
        if self.anchored {
            // `**/x/**` should also catch the directory `x` itself and top-level `x/...`
            return self.pattern.matches(relative)
                || self.pattern.matches(&format!("{relative}/"))
                || self.pattern.matches(&format!("./{relative}"))
                || self.pattern.matches(&format!("./{relative}/"));
        }
        let name = relative.rsplit('/').next().unwrap_or(relative);
        self.pattern.matches(name)
    }
}

impl PathFilter {
    /// Create a new path filter with the given patterns
    pub fn new(patterns: &[String]) -> GuardianResult<Self> {
        let patterns = patterns
            .iter()
            .map(|p| FilterPattern::parse(p))
            .collect::<GuardianResult<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Append the patterns of an ignore file. Invalid lines are skipped with a warning.
    pub fn extend_from_ignore_file(&mut self, content: &str) {
        for line in content.lines() {
            let line = line.trim();

            // Skip empty lines and comments
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match FilterPattern::parse(line) {
                Ok(pattern) => self.patterns.push(pattern),
                Err(e) => tracing::warn!("Skipping ignore pattern: {}", e),
            }
        }
    }

    /// Add a single pattern
    pub fn add_pattern(&mut self, pattern: &str) -> GuardianResult<()> {
        self.patterns.push(FilterPattern::parse(pattern)?);
        Ok(())
    }

    /// Whether a module-relative path should be probed
    pub fn should_include(&self, relative: &str, is_dir: bool) -> bool {
        let relative = relative.trim_start_matches("./");
        let mut include = true;
        for pattern in &self.patterns {
            if pattern.matches(relative, is_dir) {
                include = pattern.is_include;
            }
        }
        include
    }

    /// Patterns matching a path, for `--verbose` diagnostics
    pub fn debug_patterns(&self, relative: &str, is_dir: bool) -> Vec<String> {
        self.patterns
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let verdict = if p.matches(relative, is_dir) { "MATCH" } else { "no match" };
                format!("Pattern {i}: {} -> {verdict}", p.original)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(patterns: &[&str]) -> PathFilter {
        PathFilter::new(&patterns.iter().map(|s| s.to_string()).collect::<Vec<_>>()).unwrap()
    }

    #[test]
    fn test_basic_exclusions() {
        let filter = filter(&["**/node_modules/**", "*.min.js"]);
        assert!(filter.should_include("src/index.js", false));
        assert!(!filter.should_include("node_modules", true));
        assert!(!filter.should_include("node_modules/lodash/index.js", false));
        assert!(!filter.should_include("lib/vendor.min.js", false));
    }

    #[test]
    fn test_include_override_and_order() {
        let filter = filter(&["tests/**", "!tests/important.js"]);
        assert!(!filter.should_include("tests/unit.js", false));
        assert!(filter.should_include("tests/important.js", false));
    }

    #[test]
    fn test_directory_only_patterns() {
        let filter = filter(&["fixtures/"]);
        assert!(!filter.should_include("fixtures", true));
        assert!(filter.should_include("fixtures", false));
    }

    #[test]
    fn test_ignore_file_patterns() {
        let mut filter = filter(&[]);
        filter.extend_from_ignore_file("# generated\n*.tmp\n\n[bad\n!keep.tmp\n");
        assert!(!filter.should_include("scratch/a.tmp", false));
        assert!(filter.should_include("keep.tmp", false));
        assert!(filter.should_include("src/a.js", false));
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        assert!(PathFilter::new(&["[invalid".to_string()]).is_err());
    }

    #[test]
    fn test_debug_patterns_reports_matches() {
        let filter = filter(&["*.md", "src/**"]);
        let info = filter.debug_patterns("README.md", false);
        assert!(info[0].ends_with("MATCH"));
        assert!(info[1].ends_with("no match"));
    }
}
