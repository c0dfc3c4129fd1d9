//! Rule-based anomaly detection over raw log lines.

use regex::Regex;
use std::sync::LazyLock;

/// Substrings (lowercase) that mark a line as a candidate error
pub const ANOMALY_KEYWORDS: [&str; 12] = [
    "exception",
    "failed",
    "error",
    "refused",
    "timeout",
    "unavailable",
    "denied",
    "panic",
    "stacktrace",
    "crash",
    "fatal",
    "killed",
];

/// Informational levels short-circuit detection regardless of content
static INFO_LEVEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(INFO|DEBUG|TRACE)\b").unwrap()
});

/// `[service] ... <issue>` where the issue keyword follows the first bracketed tag
static SERVICE_ISSUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[(.*?)\].*?(Exception|Failed|Error|Refused|Timeout|Killed|Unavailable|Crash|Panic)")
        .unwrap()
});

/// First issue keyword anywhere in the line
static ISSUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Exception|Failed|Error|Refused|Timeout|Killed|Unavailable|Crash|Panic").unwrap()
});

/// Returns true when the line looks like an error worth classifying.
///
/// Lines carrying an INFO, DEBUG or TRACE level token are never anomalous.
pub fn is_anomalous(line: &str) -> bool {
    if INFO_LEVEL_RE.is_match(line) {
        return false;
    }

    let lower = line.to_lowercase();
    ANOMALY_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
}

/// Compact one-line summary of an anomalous line.
///
/// `"<issue phrase> in <service>"` when a bracketed service tag precedes an
/// issue keyword, otherwise `"Anomaly detected: <line>"`. The issue phrase
/// runs from the first issue keyword in the whole line (which may sit before
/// the tag) to the end of the line.
pub fn extract_compact_error(line: &str) -> String {
    if let Some(service) = SERVICE_ISSUE_RE.captures(line).and_then(|caps| caps.get(1)) {
        if let Some(issue) = ISSUE_RE.find(line) {
            let phrase = line[issue.start()..].trim();
            return format!("{} in {}", phrase, service.as_str());
        }
    }

    format!("Anomaly detected: {}", line.replace('\t', " ").trim())
}
