//! Static metrics computed locally, without the analysis gateway.
//!
//! Everything here operates on entity source text plus a small set of
//! per-language syntax rules. Results are deterministic for a given input.

pub mod complexity;
pub mod security;
pub mod smells;

use crate::config::MetricThresholds;
use crate::store::{ComplexityClass, EntityKind, SecurityIssue, SolidViolation};

/// Per-language syntax hints consumed by the metric passes. Implemented by
/// each registered language so the engine itself stays language-agnostic.
pub trait LanguageRules: Send + Sync {
    /// Keywords that open a conditional or branching construct.
    fn decision_keywords(&self) -> &[&'static str];
    /// Keywords that open a loop.
    fn loop_keywords(&self) -> &[&'static str];
    /// Whether nesting depth follows braces (otherwise indentation).
    fn uses_braces(&self) -> bool;
    /// Substrings that indicate a database query call.
    fn query_markers(&self) -> &[&'static str];
    /// Prefix for access to the entity's own instance state.
    fn self_access_prefix(&self) -> &'static str;
    /// Operator between a receiver and a member, used to spot method calls.
    fn member_access_operator(&self) -> &'static str;
    /// Keyword introducing a callable member, used to count methods.
    fn callable_keyword(&self) -> &'static str;
}

pub struct PhpRules;

impl LanguageRules for PhpRules {
    fn decision_keywords(&self) -> &[&'static str] {
        &["if", "elseif", "case", "match", "catch", "while", "for", "foreach", "do"]
    }
    fn loop_keywords(&self) -> &[&'static str] {
        &["for", "foreach", "while", "do"]
    }
    fn uses_braces(&self) -> bool {
        true
    }
    fn query_markers(&self) -> &[&'static str] {
        &["->query(", "->exec(", "->prepare(", "->find(", "->findBy", "->get(", "DB::"]
    }
    fn self_access_prefix(&self) -> &'static str {
        "$this->"
    }
    fn member_access_operator(&self) -> &'static str {
        "->"
    }
    fn callable_keyword(&self) -> &'static str {
        "function "
    }
}

pub struct PythonRules;

impl LanguageRules for PythonRules {
    fn decision_keywords(&self) -> &[&'static str] {
        &["if", "elif", "case", "except", "while", "for"]
    }
    fn loop_keywords(&self) -> &[&'static str] {
        &["for", "while"]
    }
    fn uses_braces(&self) -> bool {
        false
    }
    fn query_markers(&self) -> &[&'static str] {
        &[".query(", ".execute(", ".filter(", ".get(", ".all(", ".objects."]
    }
    fn self_access_prefix(&self) -> &'static str {
        "self."
    }
    fn member_access_operator(&self) -> &'static str {
        "."
    }
    fn callable_keyword(&self) -> &'static str {
        "def "
    }
}

/// Static metrics for a single entity.
#[derive(Debug, Clone, Default)]
pub struct EntityMetrics {
    pub complexity: ComplexityClass,
    pub complexity_explanation: Option<String>,
    pub cyclomatic: u32,
    pub cognitive: u32,
    pub max_nesting_depth: u32,
    pub parameter_count: u32,
    pub lines_of_code: u32,
    /// Distinct external references over statements, 0 to 1.
    pub coupling_score: f64,
    pub cohesion_score: Option<f64>,
    pub solid_violations: Vec<SolidViolation>,
    pub security_issues: Vec<SecurityIssue>,
    pub has_n_plus_one: bool,
    pub is_god_object: bool,
    pub has_feature_envy: bool,
    pub long_parameter_list: bool,
}

pub struct MetricsEngine {
    thresholds: MetricThresholds,
}

impl MetricsEngine {
    pub fn new(thresholds: MetricThresholds) -> Self {
        Self { thresholds }
    }

    /// Computes the full metric set for one entity.
    pub fn analyze(
        &self,
        kind: EntityKind,
        name: &str,
        code: &str,
        rules: &dyn LanguageRules,
    ) -> EntityMetrics {
        let lines_of_code = code.lines().filter(|l| !l.trim().is_empty()).count() as u32;

        // Constants have no control flow to measure.
        if matches!(kind, EntityKind::Constant | EntityKind::EnumCase) {
            return EntityMetrics {
                complexity: ComplexityClass::Constant,
                cyclomatic: 1,
                lines_of_code,
                security_issues: security::scan(code, &self.thresholds),
                ..EntityMetrics::default()
            };
        }

        let cyclomatic = complexity::cyclomatic(code, rules);
        let cognitive = complexity::cognitive(code, rules);
        let max_nesting_depth = complexity::max_nesting_depth(code, rules);
        let parameter_count = complexity::parameter_count(code, rules);
        let (asymptotic, explanation) = complexity::estimate_asymptotic(name, code, rules);

        let coupling_score = smells::coupling(code, rules);
        let cohesion_score = if kind.is_container() {
            smells::cohesion(code, rules)
        } else {
            None
        };
        let has_n_plus_one = smells::n_plus_one(code, rules);
        let method_count = smells::method_count(code, rules);
        let has_feature_envy = matches!(kind, EntityKind::Method)
            && smells::feature_envy(code, rules, self.thresholds.feature_envy_ratio);

        let is_god_object = kind.is_container()
            && (method_count > self.thresholds.god_object_methods
                || lines_of_code as usize > self.thresholds.god_object_loc
                || cyclomatic > 50);
        let long_parameter_list = parameter_count as usize > self.thresholds.long_parameter_list;

        let mut solid_violations = Vec::new();
        if is_god_object {
            solid_violations.push(SolidViolation {
                principle: "SRP".to_string(),
                detail: format!(
                    "{name} has {method_count} methods and {lines_of_code} lines"
                ),
            });
        }
        if kind.is_container() {
            if let Some(score) = cohesion_score {
                if score < 0.3 && method_count >= 3 {
                    solid_violations.push(SolidViolation {
                        principle: "SRP".to_string(),
                        detail: format!("low cohesion ({score:.2}) across {method_count} methods"),
                    });
                }
            }
        }

        EntityMetrics {
            complexity: asymptotic,
            complexity_explanation: explanation,
            cyclomatic,
            cognitive,
            max_nesting_depth,
            parameter_count,
            lines_of_code,
            coupling_score,
            cohesion_score,
            solid_violations,
            security_issues: security::scan(code, &self.thresholds),
            has_n_plus_one,
            is_god_object,
            has_feature_envy,
            long_parameter_list,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_is_always_constant_time() {
        let engine = MetricsEngine::new(MetricThresholds::default());
        let m = engine.analyze(
            EntityKind::Constant,
            "MAX_RETRIES",
            "const MAX_RETRIES = 3;",
            &PhpRules,
        );
        assert_eq!(m.complexity, ComplexityClass::Constant);
        assert_eq!(m.cyclomatic, 1);
    }

    #[test]
    fn test_god_object_by_method_count() {
        let engine = MetricsEngine::new(MetricThresholds::default());
        let mut code = String::from("class Big {\n");
        for i in 0..25 {
            code.push_str(&format!("    public function m{i}() {{ return {i}; }}\n"));
        }
        code.push_str("}\n");
        let m = engine.analyze(EntityKind::Class, "Big", &code, &PhpRules);
        assert!(m.is_god_object);
        assert!(m.solid_violations.iter().any(|v| v.principle == "SRP"));
    }

    #[test]
    fn test_long_parameter_list() {
        let engine = MetricsEngine::new(MetricThresholds::default());
        let code = "function f($a, $b, $c, $d, $e, $f) { return $a; }";
        let m = engine.analyze(EntityKind::Function, "f", code, &PhpRules);
        assert!(m.long_parameter_list);
        assert_eq!(m.parameter_count, 6);
    }

    #[test]
    fn test_small_function_is_not_flagged() {
        let engine = MetricsEngine::new(MetricThresholds::default());
        let code = "def add(a, b):\n    return a + b\n";
        let m = engine.analyze(EntityKind::Function, "add", code, &PythonRules);
        assert!(!m.is_god_object);
        assert!(!m.long_parameter_list);
        assert_eq!(m.complexity, ComplexityClass::Constant);
    }
}
