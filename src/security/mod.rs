//! Security pattern scanning over module facts
//!
//! Architecture: Domain Service - four independent passes over captured excerpts
//! - Dependency pass: manifest entries against the advisory table
//! - Code, configuration and secrets passes: regex families on comment-stripped text
//! - Findings are fingerprinted and deduplicated before any filter is applied

pub mod advisories;
pub mod comments;
pub mod patterns;

pub use advisories::{builtin_advisories, declared_version, Advisory};
pub use comments::{strip_comments, CommentStyle};
pub use patterns::{security_patterns, ScanPass, SecurityPattern};

use crate::config::SecurityConfig;
use crate::domain::errors::GuardianResult;
use crate::domain::facts::{ModuleFacts, SourceExcerpt};
use crate::domain::security::{
    FindingLocation, ScanSummary, SecurityVulnerability, SeverityHistogram, VulnerabilitySeverity,
    VulnerabilityType,
};
use chrono::Utc;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashSet};

/// Fingerprint of a finding: sha256 over type, file, line and matched text
pub fn fingerprint(
    vulnerability_type: VulnerabilityType,
    file_path: &str,
    line: Option<u32>,
    matched: &str,
) -> String {
    let line = line.map(|l| l.to_string()).unwrap_or_default();
    let parts = [vulnerability_type.as_str(), file_path, line.as_str(), matched];
    let mut hasher = Sha256::new();
    hasher.update(parts.join("|").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Final projection over a scan result
#[derive(Debug, Clone, Default)]
pub struct ScanFilter {
    /// Keep only these types; empty keeps all
    pub types: BTreeSet<VulnerabilityType>,
    pub min_severity: Option<VulnerabilitySeverity>,
    pub max_results: Option<usize>,
}

impl ScanFilter {
    /// Apply to deduplicated findings; histogram and risk score are left as scanned
    pub fn apply(&self, mut summary: ScanSummary) -> ScanSummary {
        summary.vulnerabilities.retain(|v| {
            (self.types.is_empty() || self.types.contains(&v.vulnerability_type))
                && self.min_severity.map_or(true, |min| v.severity >= min)
        });
        if let Some(max) = self.max_results {
            summary.vulnerabilities.truncate(max);
        }
        summary
    }
}

/// A raw hit before fingerprinting
struct Finding {
    vulnerability_type: VulnerabilityType,
    severity: VulnerabilitySeverity,
    title: String,
    description: String,
    location: FindingLocation,
    matched: String,
    cwe: Option<String>,
    cvss: Option<f32>,
    affected_package: Option<String>,
    affected_version: Option<String>,
    recommendation: String,
}

/// Scans manifests and source excerpts for vulnerable patterns
pub struct SecurityPatternScanner {
    config: SecurityConfig,
    advisories: Vec<Advisory>,
}

impl SecurityPatternScanner {
    pub fn new(config: &SecurityConfig) -> GuardianResult<Self> {
        let mut advisories = builtin_advisories().to_vec();
        for advisory in &config.advisories {
            advisory.validate()?;
            advisories.push(advisory.clone());
        }
        Ok(Self {
            config: config.clone(),
            advisories,
        })
    }

    /// Run every enabled pass; findings are deduplicated and sorted
    pub fn scan(&self, facts: &ModuleFacts) -> ScanSummary {
        let mut findings = Vec::new();
        let mut files_scanned = 0;
        let mut files_skipped = 0;

        if self.config.dependency_scan {
            findings.extend(self.dependency_pass(facts));
        }

        let pattern_passes = self.config.code_scan || self.config.configuration_scan || self.config.secrets_scan;
        if pattern_passes {
            let eligible: Vec<&SourceExcerpt> = facts
                .excerpts
                .iter()
                .filter(|excerpt| {
                    let skip = excerpt.size > self.config.max_file_bytes
                        || patterns::SKIPPED_FILES.contains(&excerpt.file_name());
                    if skip {
                        files_skipped += 1;
                    }
                    !skip
                })
                .collect();
            files_scanned = eligible.len();

            let per_file: Vec<Vec<Finding>> =
                eligible.par_iter().map(|excerpt| self.scan_excerpt(excerpt)).collect();
            findings.extend(per_file.into_iter().flatten());
        }
        files_skipped += facts.stats.binary_skipped;

        let (vulnerabilities, duplicates_removed) = deduplicate(findings);
        let mut histogram = SeverityHistogram::default();
        for vulnerability in &vulnerabilities {
            histogram.add(vulnerability.severity);
        }

        tracing::debug!(
            "Security scan of {}: {} findings ({} duplicates removed) across {} files",
            facts.module_id,
            vulnerabilities.len(),
            duplicates_removed,
            files_scanned
        );

        ScanSummary {
            risk_score: histogram.risk_score(),
            vulnerabilities,
            histogram,
            files_scanned,
            files_skipped,
            duplicates_removed,
        }
    }

    /// Scan, then project through a filter
    pub fn scan_filtered(&self, facts: &ModuleFacts, filter: &ScanFilter) -> ScanSummary {
        filter.apply(self.scan(facts))
    }

    fn dependency_pass(&self, facts: &ModuleFacts) -> Vec<Finding> {
        let mut findings = Vec::new();
        for dependency in facts.dependencies() {
            for advisory in self.advisories.iter().filter(|a| a.package == dependency.name) {
                if !advisory.affects(&dependency.version_req) {
                    continue;
                }
                let line = facts
                    .manifest_source
                    .as_deref()
                    .and_then(|source| find_line(source, &format!("\"{}\"", dependency.name)));
                findings.push(Finding {
                    vulnerability_type: VulnerabilityType::Dependency,
                    severity: advisory.severity(),
                    title: format!("{}: {}", advisory.id, advisory.title),
                    description: format!(
                        "{}@{} is within the affected range {}",
                        dependency.name, dependency.version_req, advisory.vulnerable
                    ),
                    location: FindingLocation {
                        file_path: facts.manifest_file.clone(),
                        line_number: line,
                        column: None,
                    },
                    matched: format!("{}@{}", dependency.name, dependency.version_req),
                    cwe: advisory.cwe.clone(),
                    cvss: advisory.cvss,
                    affected_package: Some(dependency.name.clone()),
                    affected_version: Some(dependency.version_req.clone()),
                    recommendation: advisory.recommendation(),
                });
            }
        }
        findings
    }

    fn pass_enabled(&self, pass: ScanPass) -> bool {
        match pass {
            ScanPass::Code => self.config.code_scan,
            ScanPass::Configuration => self.config.configuration_scan,
            ScanPass::Secrets => self.config.secrets_scan,
        }
    }

    fn scan_excerpt(&self, excerpt: &SourceExcerpt) -> Vec<Finding> {
        let extension = excerpt.extension();
        let style = CommentStyle::for_extension(extension.as_deref());
        let content = strip_comments(&excerpt.content, style);
        let is_code = extension
            .as_deref()
            .is_some_and(|ext| patterns::CODE_EXTENSIONS.contains(&ext));

        let passes = ScanPass::ALL
            .into_iter()
            .filter(|pass| self.pass_enabled(*pass) && (*pass != ScanPass::Code || is_code));

        let mut findings = Vec::new();
        for pattern in passes.flat_map(patterns::patterns_for) {
            for hit in pattern.regex.find_iter(&content) {
                let (line, column) = match_location(&content, hit.start());
                findings.push(Finding {
                    vulnerability_type: pattern.vulnerability_type,
                    severity: pattern.severity,
                    title: pattern.title.to_string(),
                    description: pattern.description.to_string(),
                    location: FindingLocation {
                        file_path: excerpt.path.clone(),
                        line_number: Some(line),
                        column: Some(column),
                    },
                    matched: hit.as_str().trim().to_string(),
                    cwe: Some(pattern.cwe.to_string()),
                    cvss: None,
                    affected_package: None,
                    affected_version: None,
                    recommendation: pattern.recommendation.to_string(),
                });
            }
        }
        findings
    }
}

/// 1-based line and column of a byte offset
fn match_location(content: &str, offset: usize) -> (u32, u32) {
    let before = &content[..offset];
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map_or(0, |i| i + 1);
    let column = before[line_start..].chars().count() + 1;
    (line as u32, column as u32)
}

fn find_line(source: &str, needle: &str) -> Option<u32> {
    source
        .lines()
        .position(|line| line.contains(needle))
        .map(|index| index as u32 + 1)
}

/// Collapse findings sharing a fingerprint; output is sorted for stable reports
fn deduplicate(findings: Vec<Finding>) -> (Vec<SecurityVulnerability>, usize) {
    let mut seen = HashSet::new();
    let mut removed = 0;
    let detected_at = Utc::now();
    let mut vulnerabilities = Vec::new();

    for finding in findings {
        let fingerprint = fingerprint(
            finding.vulnerability_type,
            &finding.location.file_path,
            finding.location.line_number,
            &finding.matched,
        );
        if !seen.insert(fingerprint.clone()) {
            removed += 1;
            continue;
        }
        vulnerabilities.push(SecurityVulnerability {
            id: format!("SEC-{}", &fingerprint[..12]),
            vulnerability_type: finding.vulnerability_type,
            severity: finding.severity,
            title: finding.title,
            description: finding.description,
            location: finding.location,
            cwe: finding.cwe,
            cvss: finding.cvss,
            affected_package: finding.affected_package,
            affected_version: finding.affected_version,
            recommendation: finding.recommendation,
            fingerprint,
            detected_at,
        });
    }

    vulnerabilities.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.location.file_path.cmp(&b.location.file_path))
            .then_with(|| a.location.line_number.cmp(&b.location.line_number))
            .then_with(|| a.location.column.cmp(&b.location.column))
            .then_with(|| a.fingerprint.cmp(&b.fingerprint))
    });

    (vulnerabilities, removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn facts_with(files: &[(&str, &str)]) -> ModuleFacts {
        let mut facts = ModuleFacts::empty("svc", "/mods/svc");
        for (path, content) in files {
            facts.files.insert(path.to_string());
            facts.excerpts.push(SourceExcerpt {
                path: path.to_string(),
                content: content.to_string(),
                size: content.len() as u64,
                truncated: false,
            });
        }
        facts
    }

    fn scanner() -> SecurityPatternScanner {
        SecurityPatternScanner::new(&SecurityConfig::default()).unwrap()
    }

    #[test]
    fn test_eval_example_yields_one_code_finding() {
        let facts = facts_with(&[("src/handler.js", "const x = 1;\neval(req.body.code)\n")]);
        let summary = scanner().scan(&facts);

        assert_eq!(summary.vulnerabilities.len(), 1);
        let finding = &summary.vulnerabilities[0];
        assert_eq!(finding.vulnerability_type, VulnerabilityType::Code);
        assert_eq!(finding.severity, VulnerabilitySeverity::High);
        assert_eq!(finding.cwe.as_deref(), Some("CWE-95"));
        assert_eq!(finding.location.line_number, Some(2));
        assert_eq!(finding.location.column, Some(1));
        assert!(finding.id.starts_with("SEC-"));
    }

    #[test]
    fn test_commented_eval_is_suppressed() {
        let facts = facts_with(&[("src/handler.js", "// eval(req.body.code)\n")]);
        assert!(scanner().scan(&facts).vulnerabilities.is_empty());
    }

    #[test]
    fn test_duplicates_share_a_fingerprint() {
        let facts = facts_with(&[("src/a.js", "eval(a); eval(a);\neval(a);\n")]);
        let summary = scanner().scan(&facts);

        // two hits on line 1 collapse; line 2 is distinct
        assert_eq!(summary.vulnerabilities.len(), 2);
        assert_eq!(summary.duplicates_removed, 1);
        let fingerprints: HashSet<_> = summary.vulnerabilities.iter().map(|v| &v.fingerprint).collect();
        assert_eq!(fingerprints.len(), 2);
    }

    #[test]
    fn test_dependency_pass_uses_advisories() {
        let mut facts = facts_with(&[]);
        let manifest = json!({"name": "svc", "dependencies": {"lodash": "^4.17.15", "left-pad": "1.0.0"}});
        facts.manifest_source = Some(serde_json::to_string_pretty(&manifest).unwrap());
        facts.manifest = manifest;

        let summary = scanner().scan(&facts);
        assert_eq!(summary.vulnerabilities.len(), 1);
        let finding = &summary.vulnerabilities[0];
        assert_eq!(finding.vulnerability_type, VulnerabilityType::Dependency);
        assert_eq!(finding.affected_package.as_deref(), Some("lodash"));
        assert_eq!(finding.location.file_path, "package.json");
        assert!(finding.location.line_number.is_some());
    }

    #[test]
    fn test_passes_toggle_independently() {
        let facts = facts_with(&[
            ("src/a.js", "eval(x);\n"),
            ("config/app.yml", "debug: true\n"),
            (".env", "API_KEY=\"abcdefghijklmnop\"\n"),
        ]);
        let config = SecurityConfig {
            code_scan: false,
            configuration_scan: false,
            ..SecurityConfig::default()
        };
        let summary = SecurityPatternScanner::new(&config).unwrap().scan(&facts);
        let types: BTreeSet<_> = summary.vulnerabilities.iter().map(|v| v.vulnerability_type).collect();
        assert_eq!(types, BTreeSet::from([VulnerabilityType::Secrets]));
    }

    #[test]
    fn test_large_files_and_lockfiles_are_skipped() {
        let mut facts = facts_with(&[
            ("package-lock.json", "\"password\": \"abcdefghijkl\""),
            ("src/big.js", "eval(x)"),
        ]);
        facts.excerpts[1].size = 10 * 1024 * 1024;
        let summary = scanner().scan(&facts);
        assert!(summary.vulnerabilities.is_empty());
        assert_eq!(summary.files_skipped, 2);
        assert_eq!(summary.files_scanned, 0);
    }

    #[test]
    fn test_filter_is_a_final_projection() {
        let facts = facts_with(&[(
            "src/a.js",
            "eval(x);\nel.innerHTML = y;\nconst password = 'supersecretvalue';\n",
        )]);
        let full = scanner().scan(&facts);
        let filter = ScanFilter {
            types: BTreeSet::from([VulnerabilityType::Code]),
            min_severity: Some(VulnerabilitySeverity::High),
            max_results: None,
        };
        let filtered = scanner().scan_filtered(&facts, &filter);

        assert_eq!(filtered.vulnerabilities.len(), 1);
        assert_eq!(filtered.risk_score, full.risk_score);
        assert_eq!(filtered.histogram, full.histogram);
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = fingerprint(VulnerabilityType::Code, "a.js", Some(3), "eval(");
        let b = fingerprint(VulnerabilityType::Code, "a.js", Some(3), "eval(");
        let c = fingerprint(VulnerabilityType::Code, "a.js", Some(4), "eval(");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
