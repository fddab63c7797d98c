//! Control-flow and asymptotic complexity estimation over entity source.

use crate::store::ComplexityClass;

use super::LanguageRules;

/// Cyclomatic complexity: one plus every decision point and boolean operator.
pub fn cyclomatic(code: &str, rules: &dyn LanguageRules) -> u32 {
    let mut count = 1u32;
    for line in code.lines() {
        count += decision_hits(line, rules);
        count += boolean_hits(line);
    }
    count
}

/// Cognitive complexity: decisions cost one plus their nesting depth, boolean
/// operators cost a flat one.
pub fn cognitive(code: &str, rules: &dyn LanguageRules) -> u32 {
    let mut total = 0u32;
    for (depth, line) in DepthLines::new(code, rules) {
        let hits = decision_hits(line, rules);
        if hits > 0 {
            total += hits * (1 + depth as u32);
        }
        total += boolean_hits(line);
    }
    total
}

pub fn max_nesting_depth(code: &str, rules: &dyn LanguageRules) -> u32 {
    DepthLines::new(code, rules)
        .map(|(depth, _)| depth as u32)
        .max()
        .unwrap_or(0)
}

/// Counts declared parameters in the entity's signature.
pub fn parameter_count(code: &str, rules: &dyn LanguageRules) -> u32 {
    let Some(params) = signature_params(code) else {
        return 0;
    };
    params
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .filter(|p| {
            // Receiver arguments are not caller-supplied.
            if rules.uses_braces() {
                true
            } else {
                let name = p.split(&[':', '='][..]).next().unwrap_or(p).trim();
                name != "self" && name != "cls"
            }
        })
        .count() as u32
}

/// Estimates the asymptotic class from loop nesting and self-recursion.
/// Returns an explanation for anything beyond the trivial cases.
pub fn estimate_asymptotic(
    name: &str,
    code: &str,
    rules: &dyn LanguageRules,
) -> (ComplexityClass, Option<String>) {
    let self_calls = self_call_count(name, code);
    let memoized = ["memo", "cache", "lru_cache"]
        .iter()
        .any(|m| code.contains(m));
    if self_calls >= 2 && !memoized {
        return (
            ComplexityClass::Exponential,
            Some(format!(
                "branches into {self_calls} recursive calls per invocation without memoization"
            )),
        );
    }

    let loop_depth = max_loop_nesting(code, rules);
    let halves = ["/= 2", "// 2", ">> 1", ">>= 1", "/ 2"]
        .iter()
        .any(|m| code.contains(m));
    let sorts = [".sort(", "sorted(", "usort(", "sort(", "ksort("]
        .iter()
        .any(|m| code.contains(m));

    if self_calls == 1 && !memoized {
        return (
            ComplexityClass::Linear,
            Some("single recursive call per invocation".to_string()),
        );
    }

    match loop_depth {
        0 if sorts => (
            ComplexityClass::Linearithmic,
            Some("delegates to a sort".to_string()),
        ),
        0 => (ComplexityClass::Constant, None),
        1 if halves => (
            ComplexityClass::Logarithmic,
            Some("loop halves its range each iteration".to_string()),
        ),
        1 if sorts => (
            ComplexityClass::Linearithmic,
            Some("single loop plus a sort".to_string()),
        ),
        1 => (ComplexityClass::Linear, None),
        2 if halves => (
            ComplexityClass::Linearithmic,
            Some("outer linear loop over a halving inner loop".to_string()),
        ),
        2 => (
            ComplexityClass::Quadratic,
            Some("two nested loops over the input".to_string()),
        ),
        _ => (
            ComplexityClass::Cubic,
            Some(format!("{loop_depth} nested loops over the input")),
        ),
    }
}

/// Lines of `code` paired with their structural nesting depth, relative to
/// the entity's own top level.
struct DepthLines<'a> {
    lines: std::str::Lines<'a>,
    rules: &'a dyn LanguageRules,
    brace_depth: i32,
    base_indent: Option<usize>,
}

impl<'a> DepthLines<'a> {
    fn new(code: &'a str, rules: &'a dyn LanguageRules) -> Self {
        Self {
            lines: code.lines(),
            rules,
            brace_depth: 0,
            base_indent: None,
        }
    }
}

impl<'a> Iterator for DepthLines<'a> {
    type Item = (usize, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = self.lines.next()?;
            if line.trim().is_empty() {
                continue;
            }
            let depth = if self.rules.uses_braces() {
                let at_entry = self.brace_depth.max(0) as usize;
                let opens = line.matches('{').count() as i32;
                let closes = line.matches('}').count() as i32;
                self.brace_depth += opens - closes;
                // Depth 0 is the entity's own body, so the wrapping brace
                // is discounted. A closing line belongs to the level it
                // closes.
                if closes > opens {
                    (self.brace_depth.max(0) as usize).saturating_sub(1)
                } else {
                    at_entry.saturating_sub(1)
                }
            } else {
                let indent = line.len() - line.trim_start().len();
                let base = *self.base_indent.get_or_insert(indent);
                ((indent.saturating_sub(base)) / 4).saturating_sub(1)
            };
            return Some((depth, line));
        }
    }
}

fn decision_hits(line: &str, rules: &dyn LanguageRules) -> u32 {
    let mut hits = 0;
    for word in words(line) {
        if rules.decision_keywords().contains(&word) {
            hits += 1;
        }
    }
    hits
}

fn boolean_hits(line: &str) -> u32 {
    let mut hits = (line.matches("&&").count() + line.matches("||").count()) as u32;
    for word in words(line) {
        if word == "and" || word == "or" {
            hits += 1;
        }
    }
    hits
}

fn words(line: &str) -> impl Iterator<Item = &str> {
    line.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
}

fn signature_params(code: &str) -> Option<&str> {
    let open = code.find('(')?;
    let mut depth = 0usize;
    for (i, c) in code[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&code[open + 1..open + i]);
                }
            }
            _ => {}
        }
    }
    None
}

fn self_call_count(name: &str, code: &str) -> usize {
    if name.is_empty() {
        return 0;
    }
    let needle = format!("{name}(");
    let mut count = 0;
    let mut rest = code;
    while let Some(pos) = rest.find(&needle) {
        let preceded_by_def = {
            let before = &rest[..pos];
            let tail = before.trim_end();
            tail.ends_with("function") || tail.ends_with("def")
        };
        // Word boundary on the left so `rename(` does not count for `name`.
        let boundary_ok = rest[..pos]
            .chars()
            .next_back()
            .map(|c| !c.is_alphanumeric() && c != '_')
            .unwrap_or(true);
        if !preceded_by_def && boundary_ok {
            count += 1;
        }
        rest = &rest[pos + needle.len()..];
    }
    count
}

fn max_loop_nesting(code: &str, rules: &dyn LanguageRules) -> usize {
    let mut open_loops: Vec<usize> = Vec::new();
    let mut max = 0;
    for (depth, line) in DepthLines::new(code, rules) {
        // Any line at or below an open loop's depth closes it, except the
        // loop's own body.
        open_loops.retain(|&d| d < depth);
        let trimmed = line.trim_start();
        let is_loop = rules
            .loop_keywords()
            .iter()
            .any(|k| trimmed.starts_with(k) && !starts_with_word_continuation(trimmed, k));
        if is_loop {
            open_loops.push(depth);
            max = max.max(open_loops.len());
        }
    }
    max
}

fn starts_with_word_continuation(line: &str, keyword: &str) -> bool {
    line.as_bytes()
        .get(keyword.len())
        .map(|&b| (b as char).is_alphanumeric() || b == b'_')
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{PhpRules, PythonRules};

    #[test]
    fn test_cyclomatic_counts_branches_and_booleans() {
        let code = "function f($a) {\n    if ($a > 0 && $a < 10) {\n        return 1;\n    }\n    return 0;\n}";
        assert_eq!(cyclomatic(code, &PhpRules), 3);
    }

    #[test]
    fn test_cognitive_penalizes_nesting() {
        let flat = "def f(a):\n    if a:\n        return 1\n    if a > 2:\n        return 2\n";
        let nested = "def f(a):\n    if a:\n        if a > 2:\n            return 2\n";
        assert!(cognitive(nested, &PythonRules) >= cognitive(flat, &PythonRules));
    }

    #[test]
    fn test_parameter_count_skips_python_receiver() {
        let code = "def handle(self, request, timeout=5):\n    pass\n";
        assert_eq!(parameter_count(code, &PythonRules), 2);
    }

    #[test]
    fn test_parameter_count_php() {
        let code = "function f(int $a, string $b) { return $a; }";
        assert_eq!(parameter_count(code, &PhpRules), 2);
    }

    #[test]
    fn test_nested_loops_are_quadratic() {
        let code = "def pairs(items):\n    out = []\n    for a in items:\n        for b in items:\n            out.append((a, b))\n    return out\n";
        let (class, explanation) = estimate_asymptotic("pairs", code, &PythonRules);
        assert_eq!(class, ComplexityClass::Quadratic);
        assert!(explanation.is_some());
    }

    #[test]
    fn test_single_loop_is_linear() {
        let code = "function sum($xs) {\n    $t = 0;\n    foreach ($xs as $x) {\n        $t += $x;\n    }\n    return $t;\n}";
        let (class, _) = estimate_asymptotic("sum", code, &PhpRules);
        assert_eq!(class, ComplexityClass::Linear);
    }

    #[test]
    fn test_halving_loop_is_logarithmic() {
        let code = "def search(xs, t):\n    lo, hi = 0, len(xs)\n    while lo < hi:\n        mid = (lo + hi) // 2\n        if xs[mid] < t:\n            lo = mid + 1\n        else:\n            hi = mid\n    return lo\n";
        let (class, _) = estimate_asymptotic("search", code, &PythonRules);
        assert_eq!(class, ComplexityClass::Logarithmic);
    }

    #[test]
    fn test_branching_recursion_is_exponential() {
        let code = "def fib(n):\n    if n < 2:\n        return n\n    return fib(n - 1) + fib(n - 2)\n";
        let (class, explanation) = estimate_asymptotic("fib", code, &PythonRules);
        assert_eq!(class, ComplexityClass::Exponential);
        assert!(explanation.unwrap().contains("memoization"));
    }

    #[test]
    fn test_memoized_recursion_is_not_exponential() {
        let code = "def fib(n, memo={}):\n    if n in memo:\n        return memo[n]\n    if n < 2:\n        return n\n    memo[n] = fib(n - 1) + fib(n - 2)\n    return memo[n]\n";
        let (class, _) = estimate_asymptotic("fib", code, &PythonRules);
        assert_ne!(class, ComplexityClass::Exponential);
    }

    #[test]
    fn test_max_nesting_depth_php() {
        let code = "function f($a) {\n    if ($a) {\n        while ($a) {\n            $a--;\n        }\n    }\n}";
        assert!(max_nesting_depth(code, &PhpRules) >= 2);
    }
}
