//! Binds raw references to concrete entities within the project.
//!
//! Resolution never fails outright: a reference that matches nothing becomes
//! an edge with a name but no target, so the graph records the dependency
//! and a later run can still bind it.

use crate::config::AmbiguityPolicy;
use crate::error::Result;
use crate::store::{
    DeclarationSite, DependencyEdge, RawReference, ReferenceKind, SqliteStore,
};

pub struct DependencyResolver<'a> {
    store: &'a SqliteStore,
    policy: AmbiguityPolicy,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(store: &'a SqliteStore, policy: AmbiguityPolicy) -> Self {
        Self { store, policy }
    }

    /// Resolves every reference of one entity into dependency edges.
    /// Duplicate (kind, target) pairs collapse into a single edge.
    pub fn resolve(
        &self,
        project_id: i64,
        source_entity_id: i64,
        source_rel_path: &str,
        source_line: u32,
        references: &[RawReference],
    ) -> Result<Vec<DependencyEdge>> {
        let mut edges: Vec<DependencyEdge> = Vec::new();
        for reference in references {
            if edges
                .iter()
                .any(|e| e.kind == reference.kind && e.depends_on_name == reference.target)
            {
                continue;
            }
            let (target, low_confidence) = self.resolve_target(
                project_id,
                source_entity_id,
                source_rel_path,
                source_line,
                &reference.target,
                reference.kind,
            )?;
            edges.push(DependencyEdge {
                id: 0,
                entity_id: source_entity_id,
                depends_on_entity_id: target,
                depends_on_name: reference.target.clone(),
                kind: reference.kind,
                low_confidence,
            });
        }
        Ok(edges)
    }

    /// Re-binds a single stored edge, used by the end-of-run pass over
    /// edges that resolved to nothing the first time.
    pub fn resolve_edge(
        &self,
        project_id: i64,
        edge: &DependencyEdge,
        source_rel_path: &str,
        source_line: u32,
    ) -> Result<(Option<i64>, bool)> {
        self.resolve_target(
            project_id,
            edge.entity_id,
            source_rel_path,
            source_line,
            &edge.depends_on_name,
            edge.kind,
        )
    }

    fn resolve_target(
        &self,
        project_id: i64,
        source_entity_id: i64,
        source_rel_path: &str,
        source_line: u32,
        target: &str,
        kind: ReferenceKind,
    ) -> Result<(Option<i64>, bool)> {
        // Qualified names get an exact pass first.
        let qualified = target.contains('\\') || target.contains('.') || target.contains("::");
        let mut candidates = if qualified {
            self.store.find_by_fqn(project_id, target)?
        } else {
            Vec::new()
        };
        let mut exact = !candidates.is_empty();
        if candidates.is_empty() {
            let name = target
                .rsplit(['\\', '.', ':'])
                .next()
                .unwrap_or(target);
            candidates = self.store.find_by_name(project_id, name)?;
            exact = false;
        }
        candidates.retain(|c| c.entity_id != source_entity_id);
        let candidates = prefer_kinds(candidates, kind);

        match candidates.len() {
            0 => Ok((None, false)),
            1 => Ok((Some(candidates[0].entity_id), false)),
            _ => {
                let chosen = match self.policy {
                    AmbiguityPolicy::FirstDeclaration => &candidates[0],
                    AmbiguityPolicy::NearestDeclaration => {
                        nearest(&candidates, source_rel_path, source_line)
                    }
                };
                // Multiple exact qualified matches mean duplicated
                // declarations; still ambiguous.
                Ok((Some(chosen.entity_id), !exact || candidates.len() > 1))
            }
        }
    }
}

/// Type references should bind to type declarations, calls to callables.
/// When nothing of the preferred shape exists the full set stays in play.
fn prefer_kinds(candidates: Vec<DeclarationSite>, kind: ReferenceKind) -> Vec<DeclarationSite> {
    let preferred: Vec<DeclarationSite> = match kind {
        ReferenceKind::Extends
        | ReferenceKind::Implements
        | ReferenceKind::Uses
        | ReferenceKind::Instantiates
        | ReferenceKind::Import => candidates
            .iter()
            .filter(|c| c.kind.is_container())
            .cloned()
            .collect(),
        ReferenceKind::Calls => candidates
            .iter()
            .filter(|c| {
                matches!(
                    c.kind,
                    crate::store::EntityKind::Function
                        | crate::store::EntityKind::Method
                        | crate::store::EntityKind::Closure
                )
            })
            .cloned()
            .collect(),
    };
    if preferred.is_empty() {
        candidates
    } else {
        preferred
    }
}

fn nearest<'c>(
    candidates: &'c [DeclarationSite],
    source_rel_path: &str,
    source_line: u32,
) -> &'c DeclarationSite {
    candidates
        .iter()
        .min_by_key(|c| {
            let same_file = c.rel_path == source_rel_path;
            let line_distance = if same_file {
                c.start_line.abs_diff(source_line)
            } else {
                u32::MAX
            };
            (
                !same_file,
                path_distance(&c.rel_path, source_rel_path),
                line_distance,
                c.entity_id,
            )
        })
        .expect("candidates is non-empty")
}

/// Components on either side of the longest shared directory prefix.
fn path_distance(a: &str, b: &str) -> usize {
    let a: Vec<&str> = a.split('/').collect();
    let b: Vec<&str> = b.split('/').collect();
    let common = a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count();
    (a.len() - common) + (b.len() - common)
}
