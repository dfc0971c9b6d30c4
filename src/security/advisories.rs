//! Known-vulnerable package versions for the dependency pass

use crate::domain::errors::{GuardianError, GuardianResult};
use crate::domain::security::VulnerabilitySeverity;
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};

/// One advisory: a package and the version range it affects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advisory {
    pub package: String,
    /// semver requirement describing affected versions, e.g. `<4.17.21`
    pub vulnerable: String,
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub cwe: Option<String>,
    #[serde(default)]
    pub cvss: Option<f32>,
    #[serde(default)]
    pub severity: Option<VulnerabilitySeverity>,
    #[serde(default)]
    pub fixed_in: Option<String>,
}

impl Advisory {
    pub fn validate(&self) -> GuardianResult<()> {
        if self.package.trim().is_empty() {
            return Err(GuardianError::config(format!("Advisory '{}' has no package", self.id)));
        }
        self.requirement().map(|_| ())
    }

    fn requirement(&self) -> GuardianResult<VersionReq> {
        VersionReq::parse(&self.vulnerable).map_err(|e| {
            GuardianError::config(format!(
                "Advisory '{}' has an invalid version range '{}': {}",
                self.id, self.vulnerable, e
            ))
        })
    }

    /// Effective severity: explicit, else from CVSS, else medium
    pub fn severity(&self) -> VulnerabilitySeverity {
        self.severity
            .or_else(|| self.cvss.map(VulnerabilitySeverity::from_cvss))
            .unwrap_or(VulnerabilitySeverity::Medium)
    }

    /// Whether a declared version requirement pins into the affected range
    pub fn affects(&self, declared: &str) -> bool {
        let (Ok(requirement), Some(version)) = (self.requirement(), declared_version(declared)) else {
            return false;
        };
        requirement.matches(&version)
    }

    pub fn recommendation(&self) -> String {
        match &self.fixed_in {
            Some(fixed) => format!("Upgrade {} to {} or later", self.package, fixed),
            None => format!("Replace or upgrade {}", self.package),
        }
    }
}

/// Lowest version a manifest requirement admits, e.g. `^4.17.15` -> 4.17.15
pub fn declared_version(declared: &str) -> Option<Version> {
    let first = declared.split_whitespace().next()?;
    let first = first.split("||").next()?.trim();
    let stripped = first.trim_start_matches(|c| matches!(c, '^' | '~' | '>' | '=' | 'v' | 'V'));
    if stripped.is_empty() || stripped.starts_with('<') {
        return None;
    }

    let core: String = stripped
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let mut parts: Vec<&str> = core.split('.').filter(|p| !p.is_empty()).collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    while parts.len() < 3 {
        parts.push("0");
    }
    let rest = &stripped[core.len()..];
    let candidate = if rest.starts_with('-') || rest.starts_with('+') {
        format!("{}{}", parts.join("."), rest)
    } else {
        parts.join(".")
    };
    Version::parse(&candidate).ok()
}

fn advisory(
    package: &str,
    vulnerable: &str,
    id: &str,
    title: &str,
    cwe: &str,
    cvss: f32,
    fixed_in: &str,
) -> Advisory {
    Advisory {
        package: package.to_string(),
        vulnerable: vulnerable.to_string(),
        id: id.to_string(),
        title: title.to_string(),
        cwe: Some(cwe.to_string()),
        cvss: Some(cvss),
        severity: None,
        fixed_in: Some(fixed_in.to_string()),
    }
}

lazy_static::lazy_static! {
    static ref BUILTIN_ADVISORIES: Vec<Advisory> = vec![
        advisory("lodash", "<4.17.21", "CVE-2021-23337", "Command injection via template", "CWE-94", 7.2, "4.17.21"),
        advisory("minimist", "<1.2.6", "CVE-2021-44906", "Prototype pollution", "CWE-1321", 9.8, "1.2.6"),
        advisory("axios", "<0.21.1", "CVE-2020-28168", "Server-side request forgery via redirect", "CWE-918", 5.9, "0.21.1"),
        advisory("node-fetch", "<2.6.7", "CVE-2022-0235", "Exposure of sensitive headers on redirect", "CWE-200", 8.8, "2.6.7"),
        advisory("jsonwebtoken", "<9.0.0", "CVE-2022-23529", "Insecure key handling in verify", "CWE-20", 7.6, "9.0.0"),
        advisory("express", "<4.19.2", "CVE-2024-29041", "Open redirect in malformed URLs", "CWE-601", 6.1, "4.19.2"),
        advisory("ws", ">=7.0.0, <7.4.6", "CVE-2021-32640", "Regular expression denial of service", "CWE-1333", 5.3, "7.4.6"),
        advisory("handlebars", "<4.7.7", "CVE-2021-23369", "Remote code execution in compile", "CWE-94", 9.8, "4.7.7"),
        advisory("moment", "<2.29.4", "CVE-2022-31129", "Regular expression denial of service in RFC 2822 parsing", "CWE-1333", 7.5, "2.29.4"),
    ];
}

/// The built-in advisory table
pub fn builtin_advisories() -> &'static [Advisory] {
    &BUILTIN_ADVISORIES
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("^4.17.15", Some("4.17.15"))]
    #[case("~1.2", Some("1.2.0"))]
    #[case(">=2.0.0 <3", Some("2.0.0"))]
    #[case("v3", Some("3.0.0"))]
    #[case("1.0.0-beta.1", Some("1.0.0-beta.1"))]
    #[case("*", None)]
    #[case("latest", None)]
    #[case("git+https://github.com/a/b.git", None)]
    fn test_declared_version(#[case] declared: &str, #[case] expected: Option<&str>) {
        assert_eq!(declared_version(declared).map(|v| v.to_string()).as_deref(), expected);
    }

    #[test]
    fn test_builtin_table_is_valid() {
        for advisory in builtin_advisories() {
            advisory.validate().unwrap();
        }
    }

    #[test]
    fn test_affects() {
        let lodash = builtin_advisories().iter().find(|a| a.package == "lodash").unwrap();
        assert!(lodash.affects("^4.17.15"));
        assert!(!lodash.affects("^4.17.21"));
        assert_eq!(lodash.severity(), VulnerabilitySeverity::High);

        let ws = builtin_advisories().iter().find(|a| a.package == "ws").unwrap();
        assert!(ws.affects("7.2.0"));
        assert!(!ws.affects("6.2.1"));
    }

    #[test]
    fn test_invalid_range_fails_validation() {
        let mut bad = builtin_advisories()[0].clone();
        bad.vulnerable = "not a range".to_string();
        assert!(bad.validate().is_err());
    }
}
