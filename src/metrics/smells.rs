//! Structural smell detection: coupling, cohesion, N+1 query shapes.

use std::collections::HashSet;

use super::LanguageRules;

/// Distinct external symbols per statement, clamped to 1. Own-state access
/// and local variables are excluded.
pub fn coupling(code: &str, rules: &dyn LanguageRules) -> f64 {
    let self_prefix = rules.self_access_prefix();
    let mut refs: HashSet<&str> = HashSet::new();
    let mut statements = 0usize;
    for line in code.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !matches!(line, "{" | "}" | "};") {
            statements += 1;
        }
        for token in line.split(|c: char| !c.is_alphanumeric() && c != '_' && c != '\\') {
            if token.is_empty() {
                continue;
            }
            // Type-like identifiers: capitalized or namespace-qualified.
            let looks_external = token.contains('\\')
                || token
                    .chars()
                    .next()
                    .map(|c| c.is_uppercase())
                    .unwrap_or(false);
            if looks_external && !line.starts_with(self_prefix) && token.len() > 1 {
                refs.insert(token);
            }
        }
    }
    if statements == 0 {
        return 0.0;
    }
    (refs.len() as f64 / statements as f64).min(1.0)
}

/// Fraction of callables that touch the entity's own instance state. Only
/// meaningful for container entities.
pub fn cohesion(code: &str, rules: &dyn LanguageRules) -> Option<f64> {
    let bodies = callable_bodies(code, rules);
    if bodies.is_empty() {
        return None;
    }
    let prefix = rules.self_access_prefix();
    let touching = bodies.iter().filter(|b| b.contains(prefix)).count();
    Some(touching as f64 / bodies.len() as f64)
}

pub fn method_count(code: &str, rules: &dyn LanguageRules) -> usize {
    callable_bodies(code, rules).len()
}

/// A query call inside a loop body is the classic N+1 shape. A marker that
/// also appears outside every loop is treated as a deliberate batch/fallback
/// pair and not flagged.
pub fn n_plus_one(code: &str, rules: &dyn LanguageRules) -> bool {
    let mut in_loop_at: Option<usize> = None;
    let mut brace_depth = 0i32;
    let mut base_indent: Option<usize> = None;
    let mut inside_loop: Vec<&'static str> = Vec::new();
    let mut outside_loop: Vec<&'static str> = Vec::new();

    for line in code.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let depth = if rules.uses_braces() {
            let d = brace_depth.max(0) as usize;
            brace_depth += line.matches('{').count() as i32 - line.matches('}').count() as i32;
            d
        } else {
            let indent = line.len() - line.trim_start().len();
            let base = *base_indent.get_or_insert(indent);
            indent.saturating_sub(base) / 4
        };

        let mut in_body = false;
        if let Some(loop_depth) = in_loop_at {
            if depth > loop_depth {
                in_body = true;
            } else if !is_loop_header(line, rules) {
                in_loop_at = None;
            }
        }
        for &marker in rules.query_markers() {
            if line.contains(marker) {
                if in_body {
                    inside_loop.push(marker);
                } else {
                    outside_loop.push(marker);
                }
            }
        }
        if is_loop_header(line, rules) {
            in_loop_at = Some(depth);
        }
    }
    inside_loop.iter().any(|m| !outside_loop.contains(m))
}

/// Calls on other objects dominate calls on own state.
pub fn feature_envy(code: &str, rules: &dyn LanguageRules, max_ratio: f64) -> bool {
    let op = rules.member_access_operator();
    let own_prefix = rules.self_access_prefix();
    let mut own = 0usize;
    let mut foreign = 0usize;
    let mut at = 0usize;
    while let Some(pos) = code[at..].find(op) {
        at += pos + op.len();
        let rest = &code[at..];
        let mut ident_end = 0usize;
        for (i, c) in rest.char_indices() {
            if c.is_alphanumeric() || c == '_' {
                ident_end = i + c.len_utf8();
            } else {
                break;
            }
        }
        if ident_end == 0 || !rest[ident_end..].starts_with('(') {
            continue;
        }
        if code[..at].ends_with(own_prefix) {
            own += 1;
        } else {
            foreign += 1;
        }
    }
    let total = own + foreign;
    total >= 4 && foreign as f64 / total as f64 > max_ratio
}

fn is_loop_header(line: &str, rules: &dyn LanguageRules) -> bool {
    let trimmed = line.trim_start();
    rules.loop_keywords().iter().any(|k| {
        trimmed.starts_with(k)
            && trimmed
                .as_bytes()
                .get(k.len())
                .map(|&b| !(b as char).is_alphanumeric() && b != b'_')
                .unwrap_or(true)
    })
}

/// Splits a container body into one chunk per callable. Chunks run from a
/// callable keyword to the next one, which is enough for prefix scans.
fn callable_bodies<'a>(code: &'a str, rules: &dyn LanguageRules) -> Vec<&'a str> {
    let keyword = rules.callable_keyword();
    let mut starts = Vec::new();
    let mut rest = 0usize;
    while let Some(pos) = code[rest..].find(keyword) {
        let abs = rest + pos;
        let boundary = code[..abs]
            .chars()
            .next_back()
            .map(|c| !c.is_alphanumeric() && c != '_')
            .unwrap_or(true);
        if boundary {
            starts.push(abs);
        }
        rest = abs + keyword.len();
    }
    let mut bodies = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(code.len());
        bodies.push(&code[start..end]);
    }
    bodies
}
