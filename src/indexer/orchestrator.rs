//! Drives a full indexing run: walk, extract, measure, analyze, persist,
//! resolve. Owns the project lifecycle states and the resume cursor.

use std::path::Path;
use std::sync::Arc;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::analysis::{build_context, keywords_for, AnalysisGateway, AnalysisRequest};
use crate::config::IndexerConfig;
use crate::error::{IndexerError, Result};
use crate::languages::{LanguageGrammar, LanguageRegistry};
use crate::metrics::MetricsEngine;
use crate::store::{
    AnalysisRecord, EntityKind, FilePersist, PersistEntity, Project, ProjectState, SqliteStore,
};

use super::extractor::{content_hash, EntityExtractor};
use super::progress::IndexingProgress;
use super::resolver::DependencyResolver;
use super::walker::{rel_path, FileWalker};

/// Description stored for an entity whose gateway analysis failed. The
/// reindex pass finds these through the `analysis_failed` flag.
pub const ANALYSIS_FAILED_MARKER: &str = "Analysis failed";

#[derive(Debug)]
pub struct IndexOutcome {
    pub state: ProjectState,
    pub indexed_files: u64,
    pub total_entities: u64,
    pub failed_entities: u64,
}

pub struct Orchestrator<G: AnalysisGateway> {
    store: Arc<SqliteStore>,
    registry: LanguageRegistry,
    config: IndexerConfig,
    metrics: MetricsEngine,
    gateway: Option<G>,
    progress: IndexingProgress,
}

impl<G: AnalysisGateway> Orchestrator<G> {
    pub fn new(store: Arc<SqliteStore>, config: IndexerConfig, gateway: Option<G>) -> Self {
        let metrics = MetricsEngine::new(config.thresholds.clone());
        Self {
            store,
            registry: LanguageRegistry::new(),
            config,
            metrics,
            gateway,
            progress: IndexingProgress::new(),
        }
    }

    /// Handle for rendering progress from another task.
    pub fn progress(&self) -> IndexingProgress {
        self.progress.clone()
    }

    /// Indexes a project from scratch, or continues a stopped run when
    /// `resume` is set. `force` re-extracts every file even when its content
    /// hash is unchanged. Cancellation is honored at file boundaries; the
    /// cursor then points at the last fully persisted file.
    pub async fn index_project(
        &self,
        project_id: i64,
        resume: bool,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<IndexOutcome> {
        let project = self.store.get_project(project_id)?;
        if resume {
            if project.state != ProjectState::Stopped {
                return Err(IndexerError::StateTransition {
                    project_id,
                    state: project.state,
                    action: "resume",
                });
            }
            self.store
                .transition_state(project_id, ProjectState::Stopped, ProjectState::Indexing)?;
        } else {
            if !project.state.can_start_indexing() {
                return Err(IndexerError::ConcurrencyConflict {
                    project_id,
                    state: project.state,
                });
            }
            self.store
                .transition_state(project_id, project.state, ProjectState::Indexing)?;
            self.store.reset_run_progress(project_id)?;
        }
        info!(project = %project.name, resume, force, "indexing started");

        match self.run(&project, resume, force, cancel).await {
            Ok(outcome) => {
                self.store.set_state(project_id, outcome.state)?;
                self.store.set_current_file(project_id, None)?;
                let message = match outcome.state {
                    ProjectState::Stopped => "stopped, resume to continue".to_string(),
                    _ => format!(
                        "indexed {} files, {} entities ({} failed analyses)",
                        outcome.indexed_files, outcome.total_entities, outcome.failed_entities
                    ),
                };
                self.store.set_status_message(project_id, Some(&message))?;
                info!(project = %project.name, state = %outcome.state, "indexing finished");
                Ok(outcome)
            }
            Err(err) => {
                let _ = self.store.set_state(project_id, ProjectState::Failed);
                let _ = self
                    .store
                    .set_status_message(project_id, Some(&err.to_string()));
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        project: &Project,
        resume: bool,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<IndexOutcome> {
        let grammar = self.registry.get(&project.language)?;
        let files =
            FileWalker::new(&self.config.excluded_dirs).collect(&project.root_path, grammar)?;
        let rels: Vec<String> = files
            .iter()
            .map(|p| rel_path(&project.root_path, p))
            .collect();
        self.store.set_total_files(project.id, files.len() as u64)?;
        self.store.prune_missing_files(project.id, &files)?;

        // A cursor pointing at a file that no longer exists restarts the
        // walk from the top; already-indexed files are hash-skipped anyway.
        let start = match (resume, &project.last_indexed_file_path) {
            (true, Some(cursor)) => rels
                .iter()
                .position(|r| r == cursor)
                .map(|i| i + 1)
                .unwrap_or(0),
            _ => 0,
        };
        let already = if resume { project.indexed_files } else { 0 };
        self.progress.start_run(files.len() as u64, already);

        let mut extractor = EntityExtractor::new(grammar)?;
        let mut failed_entities = 0u64;
        let mut stopped = false;
        for (path, rel) in files.iter().zip(&rels).skip(start) {
            if cancel.is_cancelled() {
                info!(project = %project.name, at = %rel, "stop requested, checkpointing");
                stopped = true;
                break;
            }
            self.store.set_current_file(project.id, Some(rel))?;
            self.progress.file_started(rel);
            failed_entities += self
                .process_file(project, grammar, &mut extractor, path, rel, force)
                .await?;
        }

        self.rebind_unresolved(project.id)?;
        self.progress.finish();

        let refreshed = self.store.get_project(project.id)?;
        Ok(IndexOutcome {
            state: if stopped {
                ProjectState::Stopped
            } else {
                ProjectState::Completed
            },
            indexed_files: refreshed.indexed_files,
            total_entities: refreshed.total_entities,
            failed_entities,
        })
    }

    async fn process_file(
        &self,
        project: &Project,
        grammar: &dyn LanguageGrammar,
        extractor: &mut EntityExtractor<'_>,
        path: &Path,
        rel: &str,
        force: bool,
    ) -> Result<u64> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(file = %rel, %err, "unreadable file, skipping");
                self.store
                    .mark_file_skipped(project.id, path, rel, &format!("unreadable: {err}"))?;
                self.progress.file_done(0);
                return Ok(0);
            }
        };
        let source = match String::from_utf8(bytes) {
            Ok(source) => source,
            Err(_) => {
                debug!(file = %rel, "not valid UTF-8, skipping");
                self.store
                    .mark_file_skipped(project.id, path, rel, "not valid UTF-8")?;
                self.progress.file_done(0);
                return Ok(0);
            }
        };

        // Fresh and resumed runs both skip unchanged files; only a forced
        // reindex pays for re-extraction.
        let hash = content_hash(source.as_bytes());
        if !force {
            if let Some(existing) = self.store.get_file(project.id, path)? {
                if existing.indexed
                    && existing.content_hash == hash
                    && existing.parse_warning.is_none()
                {
                    debug!(file = %rel, "unchanged, skipping");
                    self.store.bump_indexed(project.id, rel)?;
                    self.progress.file_done(existing.entity_count);
                    return Ok(0);
                }
            }
        }

        let extraction = match extractor.extract(&source) {
            Ok(extraction) => extraction,
            Err(err) => {
                warn!(file = %rel, %err, "parse failed, skipping");
                self.store
                    .mark_file_skipped(project.id, path, rel, &err.to_string())?;
                self.progress.file_done(0);
                return Ok(0);
            }
        };

        let mut failed = 0u64;
        let mut tokens = 0u64;
        let mut persist_entities = Vec::with_capacity(extraction.entities.len());
        for entity in &extraction.entities {
            let metrics =
                self.metrics
                    .analyze(entity.kind, &entity.name, &entity.code, grammar.rules());
            let mut record = AnalysisRecord::from_metrics(0, metrics);
            record.keywords = keywords_for(&entity.name, &entity.full_qualified_name);

            let request = AnalysisRequest {
                language: project.language.clone(),
                kind: entity.kind,
                name: entity.name.clone(),
                qualified_name: entity.full_qualified_name.clone(),
                code: entity.code.clone(),
                context: build_context(entity, &self.config),
                ui_locale: project.ui_locale.clone(),
            };
            let analysis_failed = self.gateway_pass(request, &mut record).await;
            tokens += record.tokens_used;
            if analysis_failed {
                failed += 1;
                self.progress.entity_failed();
            }

            persist_entities.push(PersistEntity {
                kind: entity.kind,
                name: entity.name.clone(),
                full_qualified_name: entity.full_qualified_name.clone(),
                start_line: entity.start_line,
                end_line: entity.end_line,
                visibility: entity.visibility,
                code: entity.code.clone(),
                analysis_failed,
                analysis: Some(record),
            });
        }

        let entity_count = persist_entities.len() as u64;
        let ids = self.store.persist_file(&FilePersist {
            project_id: project.id,
            path: path.to_path_buf(),
            rel_path: rel.to_string(),
            content_hash: hash,
            parse_warning: extraction.parse_warning.clone(),
            entities: persist_entities,
            advance_cursor: true,
        })?;
        self.store.add_tokens_used(project.id, tokens)?;

        // Second phase: outgoing edges, one transaction per entity.
        let resolver = DependencyResolver::new(self.store.as_ref(), self.config.ambiguity_policy);
        for (id, entity) in ids.iter().zip(&extraction.entities) {
            let edges =
                resolver.resolve(project.id, *id, rel, entity.start_line, &entity.references)?;
            self.store.replace_dependencies(*id, &edges)?;
        }

        self.progress.file_done(entity_count);
        debug!(file = %rel, entities = entity_count, "file indexed");
        Ok(failed)
    }

    /// Sends one entity through the gateway and merges the result into the
    /// record. Returns true when the analysis failed; the record then
    /// carries the failure marker so the entity is visible to reindexing.
    async fn gateway_pass(&self, request: AnalysisRequest, record: &mut AnalysisRecord) -> bool {
        let Some(gateway) = &self.gateway else {
            return false;
        };
        // Constants carry no behavior worth a round trip.
        if matches!(request.kind, EntityKind::Constant | EntityKind::EnumCase) {
            return false;
        }
        match timeout(self.config.analysis_timeout(), gateway.analyze(&request)).await {
            Ok(Ok(outcome)) => {
                record.description = Some(outcome.description);
                if let Some(complexity) = outcome.complexity {
                    record.complexity = complexity;
                    if outcome.complexity_explanation.is_some() {
                        record.complexity_explanation = outcome.complexity_explanation;
                    }
                }
                record.design_patterns = outcome.design_patterns;
                record.ddd_role = outcome.ddd_role;
                record.mvc_role = outcome.mvc_role;
                record.testability_score = outcome.testability_score;
                record.testability_issues = outcome.testability_issues;
                record.tokens_used = outcome.tokens_used;
                false
            }
            Ok(Err(err)) => {
                warn!(entity = %request.qualified_name, %err, "analysis failed");
                record.description = Some(ANALYSIS_FAILED_MARKER.to_string());
                true
            }
            Err(_) => {
                warn!(entity = %request.qualified_name, "analysis timed out");
                record.description = Some(ANALYSIS_FAILED_MARKER.to_string());
                true
            }
        }
    }

    /// Retries edges that pointed at nothing when their file was indexed,
    /// now that every declaration in the project is known.
    fn rebind_unresolved(&self, project_id: i64) -> Result<()> {
        let resolver = DependencyResolver::new(self.store.as_ref(), self.config.ambiguity_policy);
        let mut bound = 0u64;
        for (edge, rel, line) in self.store.unresolved_edges(project_id)? {
            let (target, low_confidence) = resolver.resolve_edge(project_id, &edge, &rel, line)?;
            if target.is_some() {
                self.store.set_edge_target(edge.id, target, low_confidence)?;
                bound += 1;
            }
        }
        if bound > 0 {
            debug!(project_id, bound, "late-bound dependency edges");
        }
        Ok(())
    }

    /// Re-runs gateway analysis for entities whose last attempt failed or
    /// that never got one. Extraction, metrics persistence and dependency
    /// edges of healthy entities are left untouched.
    pub async fn reindex_failed(
        &self,
        project_id: i64,
        cancel: &CancellationToken,
    ) -> Result<IndexOutcome> {
        let project = self.store.get_project(project_id)?;
        if !project.state.can_start_indexing() {
            return Err(IndexerError::ConcurrencyConflict {
                project_id,
                state: project.state,
            });
        }
        self.store
            .transition_state(project_id, project.state, ProjectState::ReindexingFailed)?;

        let grammar = self.registry.get(&project.language)?;
        let pending = self.store.entities_needing_analysis(project_id)?;
        info!(project = %project.name, count = pending.len(), "reanalyzing entities");
        self.progress.start_run(pending.len() as u64, 0);

        let mut failed = 0u64;
        let mut processed = 0u64;
        let mut tokens = 0u64;
        let mut stopped = false;
        for entity in &pending {
            if cancel.is_cancelled() {
                stopped = true;
                break;
            }
            processed += 1;
            // Structural metrics are already stored; a retry only needs to
            // refresh the gateway-derived part of the record.
            let mut record = match self.store.get_analysis(entity.id)? {
                Some(existing) => existing,
                None => AnalysisRecord::from_metrics(
                    entity.id,
                    self.metrics.analyze(
                        entity.kind,
                        &entity.name,
                        &entity.code,
                        grammar.rules(),
                    ),
                ),
            };
            if record.keywords.is_empty() {
                record.keywords = keywords_for(&entity.name, &entity.full_qualified_name);
            }

            let context = self
                .store
                .dependencies_of(entity.id)?
                .iter()
                .take(8)
                .map(|d| format!("{} {}", d.kind, d.depends_on_name))
                .collect::<Vec<_>>()
                .join("\n");
            let request = AnalysisRequest {
                language: project.language.clone(),
                kind: entity.kind,
                name: entity.name.clone(),
                qualified_name: entity.full_qualified_name.clone(),
                code: entity.code.clone(),
                context,
                ui_locale: project.ui_locale.clone(),
            };
            let analysis_failed = self.gateway_pass(request, &mut record).await;
            tokens += record.tokens_used;

            self.store.upsert_analysis(entity.id, &record)?;
            self.store.set_analysis_failed(entity.id, analysis_failed)?;
            if analysis_failed {
                failed += 1;
                self.progress.entity_failed();
            }
            self.progress.file_done(1);
        }
        self.store.add_tokens_used(project_id, tokens)?;
        self.progress.finish();

        let end_state = if stopped {
            ProjectState::Stopped
        } else {
            ProjectState::Completed
        };
        self.store.set_state(project_id, end_state)?;
        self.store.set_status_message(
            project_id,
            Some(&format!(
                "reanalyzed {processed} entities ({failed} still failing)"
            )),
        )?;
        Ok(IndexOutcome {
            state: end_state,
            indexed_files: project.indexed_files,
            total_entities: self.store.entity_count(project_id)?,
            failed_entities: failed,
        })
    }
}
