//! Analysis gateway boundary: the orchestrator hands entities across this
//! seam and merges whatever comes back into the stored analysis record.

pub mod http;
pub mod keywords;

use std::future::Future;

use thiserror::Error;

use crate::config::IndexerConfig;
use crate::languages::ExtractedEntity;
use crate::store::{ComplexityClass, EntityKind, ReferenceKind};

pub use http::HttpAnalysisGateway;
pub use keywords::keywords_for;

#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub language: String,
    pub kind: EntityKind,
    pub name: String,
    pub qualified_name: String,
    pub code: String,
    /// Surrounding facts: what the entity extends, implements, imports and
    /// calls. Kept small on purpose.
    pub context: String,
    /// Language the generated description should be written in.
    pub ui_locale: String,
}

#[derive(Debug, Clone, Default)]
pub struct AnalysisOutcome {
    pub description: String,
    pub complexity: Option<ComplexityClass>,
    pub complexity_explanation: Option<String>,
    pub design_patterns: Vec<String>,
    pub ddd_role: Option<String>,
    pub mvc_role: Option<String>,
    pub testability_score: Option<u32>,
    pub testability_issues: Vec<String>,
    /// Tokens the provider spent on this entity.
    pub tokens_used: u64,
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("analysis timed out")]
    Timeout,
    #[error("malformed analysis response: {0}")]
    MalformedResponse(String),
    #[error("analysis provider error: {0}")]
    Provider(String),
}

/// One entity in, one result out. Implementations must be cancel-safe; the
/// orchestrator wraps every call in a timeout.
pub trait AnalysisGateway: Send + Sync {
    fn analyze(
        &self,
        request: &AnalysisRequest,
    ) -> impl Future<Output = std::result::Result<AnalysisOutcome, GatewayError>> + Send;
}

/// Builds the context block sent alongside an entity's code.
pub fn build_context(entity: &ExtractedEntity, config: &IndexerConfig) -> String {
    let mut lines = Vec::new();
    for reference in &entity.references {
        match reference.kind {
            ReferenceKind::Extends => lines.push(format!("extends {}", reference.target)),
            ReferenceKind::Implements => lines.push(format!("implements {}", reference.target)),
            ReferenceKind::Uses => lines.push(format!("uses {}", reference.target)),
            _ => {}
        }
    }
    let imports: Vec<_> = entity
        .references
        .iter()
        .filter(|r| r.kind == ReferenceKind::Import)
        .take(config.context_import_limit)
        .collect();
    for import in imports {
        lines.push(format!("imports {}", import.target));
    }
    let calls: Vec<_> = entity
        .references
        .iter()
        .filter(|r| matches!(r.kind, ReferenceKind::Calls | ReferenceKind::Instantiates))
        .take(config.context_call_limit)
        .collect();
    for call in calls {
        lines.push(format!("calls {}", call.target));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{RawReference, Visibility};

    fn entity_with_refs(references: Vec<RawReference>) -> ExtractedEntity {
        ExtractedEntity {
            kind: EntityKind::Class,
            name: "C".to_string(),
            full_qualified_name: "App\\C".to_string(),
            start_line: 1,
            end_line: 2,
            visibility: Visibility::Public,
            code: String::new(),
            references,
        }
    }

    #[test]
    fn test_context_limits_imports_and_calls() {
        let mut refs = Vec::new();
        for i in 0..10 {
            refs.push(RawReference {
                kind: ReferenceKind::Import,
                target: format!("Dep{i}"),
                line: 1,
            });
        }
        for i in 0..10 {
            refs.push(RawReference {
                kind: ReferenceKind::Calls,
                target: format!("fn{i}"),
                line: 2,
            });
        }
        let entity = entity_with_refs(refs);
        let context = build_context(&entity, &IndexerConfig::default());
        assert_eq!(context.matches("imports ").count(), 5);
        assert_eq!(context.matches("calls ").count(), 3);
    }

    #[test]
    fn test_context_includes_inheritance() {
        let entity = entity_with_refs(vec![
            RawReference {
                kind: ReferenceKind::Extends,
                target: "Base".to_string(),
                line: 1,
            },
            RawReference {
                kind: ReferenceKind::Implements,
                target: "Contract".to_string(),
                line: 1,
            },
        ]);
        let context = build_context(&entity, &IndexerConfig::default());
        assert!(context.contains("extends Base"));
        assert!(context.contains("implements Contract"));
    }
}
