//! Pattern-based security scanning over entity source.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::MetricThresholds;
use crate::store::{SecurityIssue, SecurityIssueKind};

static SQL_CONCAT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)["'](select |insert into |update |delete from )[^"']*["']\s*(\.|\+|%)"#)
        .unwrap()
});
static SQL_INTERP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(select |insert into |update |delete from )[^"'\n]*(\{\$\w+|\{\w+\})"#)
        .unwrap()
});
static XSS_ECHO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(echo|print)\s+.*\$_(GET|POST|REQUEST|COOKIE)").unwrap()
});
static WEAK_HASH: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(md5|sha1)\s*\(").unwrap());
static SHELL_EXEC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(exec|system|shell_exec|passthru|popen|os\.system|subprocess\.call)\s*\(")
        .unwrap()
});
static FILE_FROM_REQUEST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(fopen|file_get_contents|include|require|open)\s*\(\s*.{0,40}\$_(GET|POST|REQUEST)")
        .unwrap()
});
static SECRET_ASSIGN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(password|passwd|secret|api[_-]?key|token|private[_-]?key)\w*\s*[:=]+\s*["']([^"']+)["']"#)
        .unwrap()
});
static STRING_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"["']([A-Za-z0-9+/=_\-]{12,})["']"#).unwrap());

/// Scans entity source line by line and returns every issue found.
pub fn scan(code: &str, thresholds: &MetricThresholds) -> Vec<SecurityIssue> {
    let mut issues = Vec::new();
    for (idx, line) in code.lines().enumerate() {
        let line_no = idx as u32 + 1;

        if SQL_CONCAT.is_match(line) || SQL_INTERP.is_match(line) {
            issues.push(SecurityIssue {
                kind: SecurityIssueKind::SqlInjection,
                line: line_no,
                detail: "SQL built from runtime values".to_string(),
            });
        }
        if XSS_ECHO.is_match(line) {
            issues.push(SecurityIssue {
                kind: SecurityIssueKind::Xss,
                line: line_no,
                detail: "request data echoed without escaping".to_string(),
            });
        }
        if WEAK_HASH.is_match(line) {
            issues.push(SecurityIssue {
                kind: SecurityIssueKind::WeakCrypto,
                line: line_no,
                detail: "md5/sha1 are not collision resistant".to_string(),
            });
        }
        if SHELL_EXEC.is_match(line) && line.contains('$') {
            issues.push(SecurityIssue {
                kind: SecurityIssueKind::CommandInjection,
                line: line_no,
                detail: "shell command built from variables".to_string(),
            });
        }
        if FILE_FROM_REQUEST.is_match(line) {
            issues.push(SecurityIssue {
                kind: SecurityIssueKind::PathTraversal,
                line: line_no,
                detail: "file path taken from request data".to_string(),
            });
        }
        if let Some(secret) = hardcoded_secret(line, thresholds) {
            issues.push(SecurityIssue {
                kind: SecurityIssueKind::HardcodedSecret,
                line: line_no,
                detail: secret,
            });
        }
    }
    issues
}

/// A secret is either a suspicious assignment target or a long high-entropy
/// literal. Returns a redacted description rather than the value.
fn hardcoded_secret(line: &str, thresholds: &MetricThresholds) -> Option<String> {
    if let Some(caps) = SECRET_ASSIGN.captures(line) {
        let value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        // Obvious placeholders are not findings.
        let lowered = value.to_lowercase();
        if value.len() >= 6
            && !lowered.contains("example")
            && !lowered.contains("changeme")
            && !lowered.contains("your_")
        {
            return Some(format!(
                "credential assigned to `{}`",
                caps.get(1).map(|m| m.as_str()).unwrap_or("?")
            ));
        }
        return None;
    }
    for caps in STRING_LITERAL.captures_iter(line) {
        let value = &caps[1];
        if value.len() >= thresholds.secret_min_length
            && shannon_entropy(value) > thresholds.secret_min_entropy
            && !value.chars().all(|c| c.is_ascii_lowercase() || c == '_')
        {
            return Some("high-entropy string literal".to_string());
        }
    }
    None
}

fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }
    let mut counts = [0usize; 256];
    for b in s.bytes() {
        counts[b as usize] += 1;
    }
    let len = s.len() as f64;
    counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / len;
            -p * p.log2()
        })
        .sum()
}
