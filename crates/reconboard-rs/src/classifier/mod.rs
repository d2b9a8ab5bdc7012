use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    None,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Outputs shorter than this (after trimming) carry no usable signal.
pub const MIN_OUTPUT_LEN: usize = 8;

const CRITICAL_KEYWORDS: &[&str] = &[
    "eternalblue",
    "ms17-010",
    "ms08-067",
    "bluekeep",
    "cve-2019-0708",
    "heartbleed",
    "shellshock",
    "log4shell",
    "cve-2021-44228",
    "smbghost",
    "cve-2020-0796",
    "zerologon",
    "cve-2020-1472",
    "printnightmare",
    "remote code execution",
    "arbitrary code execution",
    "command injection",
    "backdoor",
    "exploitable",
];

const HIGH_KEYWORDS: &[&str] = &[
    "anonymous login allowed",
    "anonymous access",
    "anonymous",
    "default credentials",
    "default password",
    "valid credentials",
    "empty password",
    "no authentication",
    "authentication disabled",
    "null session",
    "weak cipher",
    "sslv2",
    "sslv3",
    "rc4",
    "export cipher",
    "information disclosure",
    "directory listing",
    "unrestricted",
    "vulnerable",
];

const MEDIUM_KEYWORDS: &[&str] = &[
    "deprecated",
    "debug mode",
    "debug",
    "trace method",
    "trace is enabled",
    "self-signed",
    "expired",
    "outdated",
    "enumeration",
    "enumerated",
];

const VULN_SCRIPT_MARKER: &str = "vuln";

static CVE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bcve-\d{4}-\d{4,}\b").expect("valid CVE pattern"));

/// Assigns a severity tier to one script finding.
///
/// Tiers are checked critical first, then high, then medium. When nothing
/// matches, a CVE identifier or a vulnerability-script name still yields
/// [`Severity::High`].
pub fn classify(script_name: &str, output: &str) -> Severity {
    let trimmed = output.trim();
    if trimmed.len() < MIN_OUTPUT_LEN {
        return Severity::None;
    }

    let output_lower = trimmed.to_lowercase();
    let name_lower = script_name.trim().to_lowercase();

    if contains_any(&output_lower, CRITICAL_KEYWORDS) || contains_any(&name_lower, CRITICAL_KEYWORDS) {
        return Severity::Critical;
    }
    if contains_any(&output_lower, HIGH_KEYWORDS) {
        return Severity::High;
    }
    if contains_any(&output_lower, MEDIUM_KEYWORDS) {
        return Severity::Medium;
    }

    if CVE_PATTERN.is_match(&output_lower)
        || CVE_PATTERN.is_match(&name_lower)
        || output_lower.contains(VULN_SCRIPT_MARKER)
        || name_lower.contains(VULN_SCRIPT_MARKER)
    {
        return Severity::High;
    }

    Severity::None
}

fn contains_any(haystack: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| haystack.contains(keyword))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_exploit_is_critical() {
        assert_eq!(
            classify("smb-vuln", "Host is likely affected by EternalBlue"),
            Severity::Critical
        );
    }

    #[test]
    fn critical_tier_also_checks_script_name() {
        assert_eq!(
            classify("smb-vuln-ms17-010", "State: LIKELY AFFECTED"),
            Severity::Critical
        );
    }

    #[test]
    fn anonymous_login_is_high() {
        assert_eq!(
            classify("ftp-anon", "Anonymous login allowed (FTP code 230)"),
            Severity::High
        );
    }

    #[test]
    fn debug_mode_is_medium() {
        assert_eq!(classify("http-headers", "debug mode enabled"), Severity::Medium);
    }

    #[test]
    fn blank_or_short_output_is_none() {
        assert_eq!(classify("banner", ""), Severity::None);
        assert_eq!(classify("banner", "   \n\t "), Severity::None);
        assert_eq!(classify("smb-vuln-ms17-010", "ok"), Severity::None);
    }

    #[test]
    fn vuln_script_without_keyword_falls_back_to_high() {
        assert_eq!(
            classify("vuln-scanner", "Scan finished with 3 findings"),
            Severity::High
        );
    }

    #[test]
    fn cve_token_without_keyword_falls_back_to_high() {
        assert_eq!(
            classify("http-title", "Matches advisory CVE-2023-12345 signature"),
            Severity::High
        );
    }

    #[test]
    fn higher_tier_wins_when_several_match() {
        assert_eq!(
            classify("ftp-anon", "anonymous access; server build deprecated"),
            Severity::High
        );
        assert_eq!(
            classify("x", "debug console exposes remote code execution"),
            Severity::Critical
        );
    }

    #[test]
    fn unremarkable_output_is_none() {
        assert_eq!(
            classify("http-title", "Site doesn't have a title (text/html)."),
            Severity::None
        );
    }

    #[test]
    fn severities_order_by_tier() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::None);
    }
}
