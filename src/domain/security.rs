//! Security findings produced by the pattern scanner

use crate::domain::results::Severity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Family a finding belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VulnerabilityType {
    Dependency,
    Code,
    Configuration,
    Secrets,
    Injection,
    Permissions,
}

impl VulnerabilityType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dependency => "dependency",
            Self::Code => "code",
            Self::Configuration => "configuration",
            Self::Secrets => "secrets",
            Self::Injection => "injection",
            Self::Permissions => "permissions",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "dependency" => Some(Self::Dependency),
            "code" => Some(Self::Code),
            "configuration" | "config" => Some(Self::Configuration),
            "secrets" | "secret" => Some(Self::Secrets),
            "injection" => Some(Self::Injection),
            "permissions" => Some(Self::Permissions),
            _ => None,
        }
    }
}

/// Security severity scale, distinct from rule severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VulnerabilitySeverity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl VulnerabilitySeverity {
    /// Weight used in the risk score
    pub fn weight(self) -> u32 {
        match self {
            Self::Critical => 10,
            Self::High => 6,
            Self::Medium => 3,
            Self::Low => 1,
            Self::Info => 0,
        }
    }

    /// CVSS v3 qualitative rating
    pub fn from_cvss(score: f32) -> Self {
        if score >= 9.0 {
            Self::Critical
        } else if score >= 7.0 {
            Self::High
        } else if score >= 4.0 {
            Self::Medium
        } else if score > 0.0 {
            Self::Low
        } else {
            Self::Info
        }
    }

    /// Rule severity used when a finding is folded into a report
    pub fn as_rule_severity(self) -> Severity {
        match self {
            Self::Critical => Severity::Critical,
            Self::High => Severity::Error,
            Self::Medium => Severity::Warning,
            Self::Low | Self::Info => Severity::Info,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Where a finding was detected
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FindingLocation {
    /// Relative to the module root
    pub file_path: String,
    pub line_number: Option<u32>,
    pub column: Option<u32>,
}

/// One detected security issue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityVulnerability {
    pub id: String,
    pub vulnerability_type: VulnerabilityType,
    pub severity: VulnerabilitySeverity,
    pub title: String,
    pub description: String,
    pub location: FindingLocation,
    pub cwe: Option<String>,
    pub cvss: Option<f32>,
    pub affected_package: Option<String>,
    pub affected_version: Option<String>,
    pub recommendation: String,
    /// Dedup key: hash of type, file, line and matched text
    pub fingerprint: String,
    pub detected_at: DateTime<Utc>,
}

/// Count of findings per severity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityHistogram {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub info: usize,
}

impl SeverityHistogram {
    pub fn add(&mut self, severity: VulnerabilitySeverity) {
        match severity {
            VulnerabilitySeverity::Critical => self.critical += 1,
            VulnerabilitySeverity::High => self.high += 1,
            VulnerabilitySeverity::Medium => self.medium += 1,
            VulnerabilitySeverity::Low => self.low += 1,
            VulnerabilitySeverity::Info => self.info += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.critical + self.high + self.medium + self.low + self.info
    }

    /// Weighted sum capped at 100
    pub fn risk_score(&self) -> u32 {
        let raw = self.critical * 10 + self.high * 6 + self.medium * 3 + self.low;
        raw.min(100) as u32
    }
}

/// Scan outcome for one module
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanSummary {
    /// Findings after dedup and the final filter projection
    pub vulnerabilities: Vec<SecurityVulnerability>,
    /// Histogram over every deduplicated finding, before filtering
    pub histogram: SeverityHistogram,
    pub risk_score: u32,
    pub files_scanned: usize,
    pub files_skipped: usize,
    pub duplicates_removed: usize,
}

impl ScanSummary {
    /// Findings grouped by type
    pub fn by_type(&self) -> BTreeMap<VulnerabilityType, Vec<&SecurityVulnerability>> {
        let mut grouped: BTreeMap<VulnerabilityType, Vec<&SecurityVulnerability>> = BTreeMap::new();
        for vuln in &self.vulnerabilities {
            grouped.entry(vuln.vulnerability_type).or_default().push(vuln);
        }
        grouped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_score_is_weighted_and_capped() {
        let mut histogram = SeverityHistogram::default();
        histogram.add(VulnerabilitySeverity::Critical);
        histogram.add(VulnerabilitySeverity::High);
        histogram.add(VulnerabilitySeverity::Medium);
        histogram.add(VulnerabilitySeverity::Low);
        histogram.add(VulnerabilitySeverity::Info);
        assert_eq!(histogram.risk_score(), 20);

        for _ in 0..20 {
            histogram.add(VulnerabilitySeverity::Critical);
        }
        assert_eq!(histogram.risk_score(), 100);
    }

    #[test]
    fn test_cvss_rating() {
        assert_eq!(VulnerabilitySeverity::from_cvss(9.8), VulnerabilitySeverity::Critical);
        assert_eq!(VulnerabilitySeverity::from_cvss(7.5), VulnerabilitySeverity::High);
        assert_eq!(VulnerabilitySeverity::from_cvss(5.3), VulnerabilitySeverity::Medium);
        assert_eq!(VulnerabilitySeverity::from_cvss(0.0), VulnerabilitySeverity::Info);
    }
}
