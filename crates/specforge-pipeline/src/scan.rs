//! Default secret scanner behind the `security-scan` extension point.

use std::sync::OnceLock;

use regex::Regex;
use specforge_core::domain::ArtifactBag;
use specforge_core::extensions::{Finding, ScanReport, Severity};

struct Rule {
    id: &'static str,
    severity: Severity,
    pattern: Regex,
    message: &'static str,
}

const RULE_SOURCES: &[(&str, Severity, &str, &str)] = &[
    (
        "aws-access-key",
        Severity::Critical,
        r"\b(AKIA|ASIA)[0-9A-Z]{16}\b",
        "AWS access key id embedded in source",
    ),
    (
        "private-key",
        Severity::Critical,
        r"-----BEGIN (RSA |EC |OPENSSH |DSA )?PRIVATE KEY-----",
        "private key material embedded in source",
    ),
    (
        "github-token",
        Severity::Critical,
        r"\bgh[pousr]_[A-Za-z0-9]{36,}\b",
        "GitHub token embedded in source",
    ),
    (
        "hardcoded-credential",
        Severity::Warning,
        r#"(?i)\b(password|passwd|secret|api_key|apikey|token)\b\s*[:=]\s*["'][^"'\s]{8,}["']"#,
        "string literal assigned to a credential-like name",
    ),
];

fn rules() -> &'static [Rule] {
    static RULES: OnceLock<Vec<Rule>> = OnceLock::new();
    RULES.get_or_init(|| {
        RULE_SOURCES
            .iter()
            .filter_map(|&(id, severity, source, message)| {
                Regex::new(source).ok().map(|pattern| Rule {
                    id,
                    severity,
                    pattern,
                    message,
                })
            })
            .collect()
    })
}

/// Scan every artifact for embedded secrets. One finding per rule per file.
pub fn scan_artifacts(bag: &ArtifactBag) -> ScanReport {
    let mut report = ScanReport::default();
    for (_, artifact) in bag.iter() {
        report.scanned += 1;
        for rule in rules() {
            if rule.pattern.is_match(&artifact.content) {
                report.findings.push(Finding {
                    path: artifact.path.clone(),
                    rule: rule.id.to_string(),
                    severity: rule.severity,
                    message: rule.message.to_string(),
                });
            }
        }
    }
    report
}
