//! Regex families for the code, configuration and secrets passes

use crate::domain::security::{VulnerabilitySeverity, VulnerabilityType};
use regex::Regex;

/// Which scan pass a pattern belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanPass {
    Code,
    Configuration,
    Secrets,
}

impl ScanPass {
    pub const ALL: [ScanPass; 3] = [ScanPass::Code, ScanPass::Configuration, ScanPass::Secrets];
}

/// A compiled security pattern
#[derive(Debug)]
pub struct SecurityPattern {
    pub id: &'static str,
    pub pass: ScanPass,
    pub vulnerability_type: VulnerabilityType,
    pub severity: VulnerabilitySeverity,
    pub title: &'static str,
    pub description: &'static str,
    pub cwe: &'static str,
    pub recommendation: &'static str,
    pub regex: Regex,
}

/// Extensions the code pass looks at
pub const CODE_EXTENSIONS: &[&str] = &[
    "js", "jsx", "mjs", "cjs", "ts", "tsx", "vue", "html", "htm", "py", "rb", "php", "go", "java",
    "kt", "cs", "sh", "bash",
];

/// Files never scanned for patterns; lockfiles are full of hashes that look like secrets
pub const SKIPPED_FILES: &[&str] =
    &["package-lock.json", "yarn.lock", "pnpm-lock.yaml", "npm-shrinkwrap.json"];

struct Spec {
    id: &'static str,
    pass: ScanPass,
    vulnerability_type: VulnerabilityType,
    severity: VulnerabilitySeverity,
    title: &'static str,
    description: &'static str,
    cwe: &'static str,
    recommendation: &'static str,
    pattern: &'static str,
}

const SPECS: &[Spec] = &[
    // Code pass
    Spec {
        id: "code.eval",
        pass: ScanPass::Code,
        vulnerability_type: VulnerabilityType::Code,
        severity: VulnerabilitySeverity::High,
        title: "Dynamic code evaluation",
        description: "eval() executes arbitrary code built at runtime",
        cwe: "CWE-95",
        recommendation: "Remove eval(); parse data with JSON.parse or dispatch through a lookup table",
        pattern: r"\beval\s*\(",
    },
    Spec {
        id: "code.function-constructor",
        pass: ScanPass::Code,
        vulnerability_type: VulnerabilityType::Code,
        severity: VulnerabilitySeverity::High,
        title: "Function constructor",
        description: "new Function() compiles code from strings at runtime",
        cwe: "CWE-95",
        recommendation: "Replace dynamically built functions with static code",
        pattern: r"\bnew\s+Function\s*\(",
    },
    Spec {
        id: "code.command-injection",
        pass: ScanPass::Code,
        vulnerability_type: VulnerabilityType::Injection,
        severity: VulnerabilitySeverity::High,
        title: "Shell command built from dynamic input",
        description: "A process is spawned with a command assembled by concatenation or interpolation",
        cwe: "CWE-78",
        recommendation: "Pass arguments as an array to execFile/spawn and validate them",
        pattern: r#"\b(?:exec|execSync|spawnSync|os\.system|subprocess\.(?:call|run|Popen))\s*\(\s*(?:[^)\n]*["'`]\s*\+|`[^`\n]*\$\{|f["'])"#,
    },
    Spec {
        id: "code.sql-concatenation",
        pass: ScanPass::Code,
        vulnerability_type: VulnerabilityType::Injection,
        severity: VulnerabilitySeverity::High,
        title: "SQL built by string concatenation",
        description: "A SQL statement is assembled from strings and variables",
        cwe: "CWE-89",
        recommendation: "Use parameterized queries or a query builder",
        pattern: r#"(?i)["'`]\s*(?:SELECT\s.+\sFROM|INSERT\s+INTO|UPDATE\s+\w+\s+SET|DELETE\s+FROM)\b[^\n]*?(?:["']\s*\+|\$\{)"#,
    },
    Spec {
        id: "code.dom-xss",
        pass: ScanPass::Code,
        vulnerability_type: VulnerabilityType::Code,
        severity: VulnerabilitySeverity::Medium,
        title: "DOM XSS sink",
        description: "HTML is written to the DOM without escaping",
        cwe: "CWE-79",
        recommendation: "Use textContent or a sanitizer such as DOMPurify",
        pattern: r"\.(?:innerHTML|outerHTML)\s*=[^=]|\bdocument\.write(?:ln)?\s*\(|\binsertAdjacentHTML\s*\(|\bdangerouslySetInnerHTML\b",
    },
    Spec {
        id: "code.world-writable",
        pass: ScanPass::Code,
        vulnerability_type: VulnerabilityType::Permissions,
        severity: VulnerabilitySeverity::Medium,
        title: "World-writable permissions",
        description: "Files or directories are made writable by every user",
        cwe: "CWE-732",
        recommendation: "Grant the narrowest mode that works, e.g. 0o644 or 0o755",
        pattern: r"\bchmod(?:Sync)?\s*(?:\(\s*[^,\n]+,\s*|\s+(?:-R\s+)?)(?:0o?)?777\b",
    },
    // Configuration pass
    Spec {
        id: "config.tls-disabled",
        pass: ScanPass::Configuration,
        vulnerability_type: VulnerabilityType::Configuration,
        severity: VulnerabilitySeverity::High,
        title: "TLS certificate verification disabled",
        description: "Certificate validation is switched off, allowing man-in-the-middle attacks",
        cwe: "CWE-295",
        recommendation: "Keep certificate verification on and trust a private CA explicitly if needed",
        pattern: r#"\brejectUnauthorized["']?\s*:\s*false\b|NODE_TLS_REJECT_UNAUTHORIZED["']?\s*[:=]\s*["']?0\b|\bverify\s*=\s*False\b|\bInsecureSkipVerify\s*:\s*true\b|\bstrict-ssl\s*=\s*false\b"#,
    },
    Spec {
        id: "config.cors-wildcard",
        pass: ScanPass::Configuration,
        vulnerability_type: VulnerabilityType::Configuration,
        severity: VulnerabilitySeverity::Medium,
        title: "Wildcard CORS origin",
        description: "Any origin may read responses",
        cwe: "CWE-942",
        recommendation: "List the allowed origins explicitly",
        pattern: r#"(?i)Access-Control-Allow-Origin["']?\s*[:,=]\s*["']\*["']|\borigin["']?\s*:\s*["']\*["']"#,
    },
    Spec {
        id: "config.debug-enabled",
        pass: ScanPass::Configuration,
        vulnerability_type: VulnerabilityType::Configuration,
        severity: VulnerabilitySeverity::Low,
        title: "Debug mode enabled",
        description: "Debug settings can leak stack traces and internals",
        cwe: "CWE-489",
        recommendation: "Drive debug flags from the environment and keep them off in production",
        pattern: r#"(?i)\bdebug["']?\s*[:=]\s*["']?(?:true|1|on)\b"#,
    },
    // Secrets pass
    Spec {
        id: "secrets.private-key",
        pass: ScanPass::Secrets,
        vulnerability_type: VulnerabilityType::Secrets,
        severity: VulnerabilitySeverity::Critical,
        title: "Private key material",
        description: "A PEM private key is embedded in the module",
        cwe: "CWE-321",
        recommendation: "Remove the key, rotate it, and load keys from a secret store",
        pattern: r"-----BEGIN (?:RSA |EC |DSA |OPENSSH |PGP )?PRIVATE KEY-----",
    },
    Spec {
        id: "secrets.aws-access-key",
        pass: ScanPass::Secrets,
        vulnerability_type: VulnerabilityType::Secrets,
        severity: VulnerabilitySeverity::Critical,
        title: "AWS access key id",
        description: "An AWS access key id is hard-coded",
        cwe: "CWE-798",
        recommendation: "Revoke the key and use role-based credentials",
        pattern: r"\b(?:AKIA|ASIA)[0-9A-Z]{16}\b",
    },
    Spec {
        id: "secrets.github-token",
        pass: ScanPass::Secrets,
        vulnerability_type: VulnerabilityType::Secrets,
        severity: VulnerabilitySeverity::Critical,
        title: "GitHub token",
        description: "A GitHub access token is hard-coded",
        cwe: "CWE-798",
        recommendation: "Revoke the token and inject it from CI secrets",
        pattern: r"\bgh[pousr]_[A-Za-z0-9]{36,}\b",
    },
    Spec {
        id: "secrets.stripe-key",
        pass: ScanPass::Secrets,
        vulnerability_type: VulnerabilityType::Secrets,
        severity: VulnerabilitySeverity::Critical,
        title: "Stripe live secret key",
        description: "A Stripe live key is hard-coded",
        cwe: "CWE-798",
        recommendation: "Roll the key in the Stripe dashboard and load it from the environment",
        pattern: r"\b(?:sk|rk)_live_[0-9A-Za-z]{24,}\b",
    },
    Spec {
        id: "secrets.slack-token",
        pass: ScanPass::Secrets,
        vulnerability_type: VulnerabilityType::Secrets,
        severity: VulnerabilitySeverity::High,
        title: "Slack token",
        description: "A Slack token is hard-coded",
        cwe: "CWE-798",
        recommendation: "Revoke the token and load it from a secret store",
        pattern: r"\bxox[abprs]-[0-9A-Za-z-]{10,}\b",
    },
    Spec {
        id: "secrets.generic-credential",
        pass: ScanPass::Secrets,
        vulnerability_type: VulnerabilityType::Secrets,
        severity: VulnerabilitySeverity::High,
        title: "Hard-coded credential",
        description: "A password, token or API key is assigned a literal value",
        cwe: "CWE-798",
        recommendation: "Read credentials from the environment or a secret manager",
        pattern: r#"(?i)\b(?:api[_-]?key|api[_-]?secret|secret[_-]?key|access[_-]?token|auth[_-]?token|password|passwd)["']?\s*[:=]\s*["'][^"'\s$<>{}]{8,}["']"#,
    },
];

lazy_static::lazy_static! {
    static ref PATTERNS: Vec<SecurityPattern> = SPECS
        .iter()
        .filter_map(|spec| match Regex::new(spec.pattern) {
            Ok(regex) => Some(SecurityPattern {
                id: spec.id,
                pass: spec.pass,
                vulnerability_type: spec.vulnerability_type,
                severity: spec.severity,
                title: spec.title,
                description: spec.description,
                cwe: spec.cwe,
                recommendation: spec.recommendation,
                regex,
            }),
            Err(e) => {
                tracing::error!("Security pattern '{}' failed to compile: {}", spec.id, e);
                None
            }
        })
        .collect();
}

/// Every compiled pattern
pub fn security_patterns() -> &'static [SecurityPattern] {
    &PATTERNS
}

/// Patterns of one pass
pub fn patterns_for(pass: ScanPass) -> impl Iterator<Item = &'static SecurityPattern> {
    security_patterns().iter().filter(move |p| p.pass == pass)
}
