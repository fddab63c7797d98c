//! End-to-end indexing lifecycle against real files and an in-memory store.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use coderag_indexer::analysis::{
    AnalysisGateway, AnalysisOutcome, AnalysisRequest, GatewayError,
};
use coderag_indexer::indexer::ANALYSIS_FAILED_MARKER;
use coderag_indexer::store::{ProjectState, ReferenceKind, SqliteStore};
use coderag_indexer::{IndexerConfig, Orchestrator};

/// Gateway test double: configurable failures, optional cancellation
/// trigger, call counting.
#[derive(Default)]
struct StubGateway {
    fail_names: Mutex<HashSet<String>>,
    cancel_when: Mutex<Option<(String, CancellationToken)>>,
    calls: Arc<AtomicU64>,
}

impl StubGateway {
    fn failing(names: &[&str]) -> Self {
        Self {
            fail_names: Mutex::new(names.iter().map(|s| s.to_string()).collect()),
            ..Self::default()
        }
    }

    fn cancelling_on(name: &str, token: CancellationToken) -> Self {
        Self {
            cancel_when: Mutex::new(Some((name.to_string(), token))),
            ..Self::default()
        }
    }

    /// Handle that stays live after the gateway moves into an orchestrator.
    fn call_counter(&self) -> Arc<AtomicU64> {
        self.calls.clone()
    }
}

impl AnalysisGateway for StubGateway {
    async fn analyze(
        &self,
        request: &AnalysisRequest,
    ) -> std::result::Result<AnalysisOutcome, GatewayError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some((name, token)) = &*self.cancel_when.lock().unwrap() {
            if &request.name == name {
                token.cancel();
            }
        }
        if self.fail_names.lock().unwrap().contains(&request.name) {
            return Err(GatewayError::Provider("stubbed failure".to_string()));
        }
        Ok(AnalysisOutcome {
            description: format!("analyzed {}", request.name),
            tokens_used: 7,
            ..AnalysisOutcome::default()
        })
    }
}

fn create_file(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
}

/// Three PHP files with a forward reference and an unresolvable import.
fn seed_project(root: &Path) {
    create_file(
        root,
        "a.php",
        r#"<?php
class Alpha extends Zulu
{
    public function run() { return $this->helper(); }
}
"#,
    );
    create_file(
        root,
        "b.php",
        r#"<?php
class Beta
{
    public function b1() { return 1; }
    public function b2() { return new Alpha(); }
}
"#,
    );
    create_file(
        root,
        "c.php",
        r#"<?php
use Vendor\Lib\Missing;

function gamma() { return new Alpha(); }
"#,
    );
    create_file(root, "z.php", "<?php\nclass Zulu {}\n");
}

fn setup(
    gateway: StubGateway,
) -> (TempDir, Arc<SqliteStore>, Orchestrator<StubGateway>, i64) {
    let dir = TempDir::new().unwrap();
    seed_project(dir.path());
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let project = store.create_project("app", dir.path(), "php", "en").unwrap();
    let orchestrator = Orchestrator::new(store.clone(), IndexerConfig::default(), Some(gateway));
    (dir, store, orchestrator, project.id)
}

#[tokio::test]
async fn test_full_run_completes_and_extracts_everything() {
    let (_dir, store, orchestrator, project_id) = setup(StubGateway::default());
    let cancel = CancellationToken::new();
    let outcome = orchestrator
        .index_project(project_id, false, false, &cancel)
        .await
        .unwrap();

    assert_eq!(outcome.state, ProjectState::Completed);
    assert_eq!(outcome.indexed_files, 4);
    assert_eq!(outcome.failed_entities, 0);
    // Alpha, run, Beta, b1, b2, gamma, Zulu
    assert_eq!(store.entity_count(project_id).unwrap(), 7);

    let project = store.get_project(project_id).unwrap();
    assert_eq!(project.state, ProjectState::Completed);
    assert_eq!(project.last_indexed_file_path.as_deref(), Some("z.php"));
    // Gateway token spend is accumulated on the project row.
    assert!(project.tokens_used > 0);
}

#[tokio::test]
async fn test_forward_reference_is_resolved_after_the_run() {
    let (_dir, store, orchestrator, project_id) = setup(StubGateway::default());
    let cancel = CancellationToken::new();
    orchestrator
        .index_project(project_id, false, false, &cancel)
        .await
        .unwrap();

    // Alpha extends Zulu; z.php is walked after a.php.
    let alpha = store.search(project_id, "Alpha", 5).unwrap()[0].entity_id;
    let zulu = store.search(project_id, "Zulu", 5).unwrap()[0].entity_id;
    let edges = store.dependencies_of(alpha).unwrap();
    let extends = edges
        .iter()
        .find(|e| e.kind == ReferenceKind::Extends)
        .expect("extends edge recorded");
    assert_eq!(extends.depends_on_entity_id, Some(zulu));
}

#[tokio::test]
async fn test_unresolved_import_keeps_placeholder_edge() {
    let (_dir, store, orchestrator, project_id) = setup(StubGateway::default());
    let cancel = CancellationToken::new();
    orchestrator
        .index_project(project_id, false, false, &cancel)
        .await
        .unwrap();

    let gamma = store.search(project_id, "gamma", 5).unwrap()[0].entity_id;
    let edges = store.dependencies_of(gamma).unwrap();
    let import = edges
        .iter()
        .find(|e| e.kind == ReferenceKind::Import)
        .expect("import edge recorded");
    assert_eq!(import.depends_on_entity_id, None);
    assert_eq!(import.depends_on_name, "Vendor\\Lib\\Missing");
}

#[tokio::test]
async fn test_failed_entity_is_isolated_and_marked() {
    let (_dir, store, orchestrator, project_id) = setup(StubGateway::failing(&["b2"]));
    let cancel = CancellationToken::new();
    let outcome = orchestrator
        .index_project(project_id, false, false, &cancel)
        .await
        .unwrap();

    // One failure does not fail the file or the run.
    assert_eq!(outcome.state, ProjectState::Completed);
    assert_eq!(outcome.failed_entities, 1);

    let b2 = store.search(project_id, "b2", 5).unwrap()[0].entity_id;
    let entity = store.get_entity(b2).unwrap();
    assert!(entity.analysis_failed);
    let analysis = store.get_analysis(b2).unwrap().unwrap();
    assert_eq!(analysis.description.as_deref(), Some(ANALYSIS_FAILED_MARKER));

    let b1 = store.search(project_id, "b1", 5).unwrap()[0].entity_id;
    assert!(!store.get_entity(b1).unwrap().analysis_failed);
    assert_eq!(
        store.get_analysis(b1).unwrap().unwrap().description.as_deref(),
        Some("analyzed b1")
    );
}

#[tokio::test]
async fn test_reindex_only_failed_touches_only_failed_entities() {
    let (_dir, store, orchestrator, project_id) = setup(StubGateway::failing(&["b2"]));
    let cancel = CancellationToken::new();
    orchestrator
        .index_project(project_id, false, false, &cancel)
        .await
        .unwrap();
    drop(orchestrator);

    let b1 = store.search(project_id, "b1", 5).unwrap()[0].entity_id;
    let b1_before = store.get_analysis(b1).unwrap().unwrap();

    // Tamper with a stored metric; a retry refreshes the gateway-derived
    // fields only, so the stored value must survive.
    let b2 = store.search(project_id, "b2", 5).unwrap()[0].entity_id;
    let mut tampered = store.get_analysis(b2).unwrap().unwrap();
    tampered.cyclomatic = 99;
    store.upsert_analysis(b2, &tampered).unwrap();

    // New orchestrator whose gateway now succeeds.
    let retry = Orchestrator::new(
        store.clone(),
        IndexerConfig::default(),
        Some(StubGateway::default()),
    );
    let outcome = retry.reindex_failed(project_id, &cancel).await.unwrap();
    assert_eq!(outcome.state, ProjectState::Completed);
    assert_eq!(outcome.failed_entities, 0);

    let entity = store.get_entity(b2).unwrap();
    assert!(!entity.analysis_failed);
    let b2_after = store.get_analysis(b2).unwrap().unwrap();
    assert_eq!(b2_after.description.as_deref(), Some("analyzed b2"));
    assert_eq!(b2_after.cyclomatic, 99);
    // Healthy entities were not re-sent.
    assert_eq!(
        store.get_analysis(b1).unwrap().unwrap().description,
        b1_before.description
    );
}

#[tokio::test]
async fn test_stop_checkpoints_and_resume_finishes_the_job() {
    let dir = TempDir::new().unwrap();
    seed_project(dir.path());
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let project_id = store.create_project("app", dir.path(), "php", "en").unwrap().id;

    // The gateway cancels while the first file is in flight; the stop takes
    // effect at the next file boundary.
    let cancel = CancellationToken::new();
    let gateway = StubGateway::cancelling_on("Alpha", cancel.clone());
    let orchestrator = Orchestrator::new(store.clone(), IndexerConfig::default(), Some(gateway));
    let outcome = orchestrator
        .index_project(project_id, false, false, &cancel)
        .await
        .unwrap();
    assert_eq!(outcome.state, ProjectState::Stopped);

    let project = store.get_project(project_id).unwrap();
    assert_eq!(project.state, ProjectState::Stopped);
    assert_eq!(project.last_indexed_file_path.as_deref(), Some("a.php"));
    assert_eq!(project.indexed_files, 1);

    // Resume with a fresh token; only the remaining files are processed.
    let resume_gateway = StubGateway::default();
    let resume =
        Orchestrator::new(store.clone(), IndexerConfig::default(), Some(resume_gateway));
    let fresh = CancellationToken::new();
    let outcome = resume.index_project(project_id, true, false, &fresh).await.unwrap();
    assert_eq!(outcome.state, ProjectState::Completed);
    assert_eq!(outcome.indexed_files, 4);
    assert_eq!(store.entity_count(project_id).unwrap(), 7);

    // Same end state as a never-interrupted run over the same tree.
    let reference_store = Arc::new(SqliteStore::in_memory().unwrap());
    let reference_id = reference_store
        .create_project("app", dir.path(), "php", "en")
        .unwrap()
        .id;
    let reference = Orchestrator::new(
        reference_store.clone(),
        IndexerConfig::default(),
        Some(StubGateway::default()),
    );
    reference
        .index_project(reference_id, false, false, &CancellationToken::new())
        .await
        .unwrap();

    let names = |s: &SqliteStore, id: i64| -> HashSet<String> {
        s.search(id, "", 100)
            .unwrap()
            .into_iter()
            .map(|h| h.full_qualified_name)
            .collect()
    };
    assert_eq!(names(&store, project_id), names(&reference_store, reference_id));
}

#[tokio::test]
async fn test_resume_requires_a_stopped_project() {
    let (_dir, _store, orchestrator, project_id) = setup(StubGateway::default());
    let cancel = CancellationToken::new();
    let err = orchestrator
        .index_project(project_id, true, false, &cancel)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("resume"));
}

#[tokio::test]
async fn test_second_run_is_idempotent_and_skips_unchanged_files() {
    let (_dir, store, orchestrator, project_id) = setup(StubGateway::default());
    let cancel = CancellationToken::new();
    orchestrator
        .index_project(project_id, false, false, &cancel)
        .await
        .unwrap();
    let first_ids: Vec<i64> = store
        .search(project_id, "", 100)
        .unwrap()
        .into_iter()
        .map(|h| h.entity_id)
        .collect();

    let second = Orchestrator::new(
        store.clone(),
        IndexerConfig::default(),
        Some(StubGateway::default()),
    );
    let outcome = second
        .index_project(project_id, false, false, &cancel)
        .await
        .unwrap();
    assert_eq!(outcome.state, ProjectState::Completed);
    assert_eq!(outcome.indexed_files, 4);

    let second_ids: Vec<i64> = store
        .search(project_id, "", 100)
        .unwrap()
        .into_iter()
        .map(|h| h.entity_id)
        .collect();
    assert_eq!(first_ids, second_ids);
}

#[tokio::test]
async fn test_forced_reindex_reprocesses_unchanged_files() {
    let (_dir, store, orchestrator, project_id) = setup(StubGateway::default());
    let cancel = CancellationToken::new();
    orchestrator
        .index_project(project_id, false, false, &cancel)
        .await
        .unwrap();
    let first_ids: Vec<i64> = store
        .search(project_id, "", 100)
        .unwrap()
        .into_iter()
        .map(|h| h.entity_id)
        .collect();

    // Nothing on disk changed, but force must still re-extract and re-analyze.
    let gateway = StubGateway::default();
    let calls = gateway.call_counter();
    let second = Orchestrator::new(store.clone(), IndexerConfig::default(), Some(gateway));
    let outcome = second
        .index_project(project_id, false, true, &cancel)
        .await
        .unwrap();
    assert_eq!(outcome.state, ProjectState::Completed);
    assert_eq!(outcome.indexed_files, 4);
    assert!(calls.load(Ordering::Relaxed) > 0);

    // Re-extraction keeps entity ids stable.
    let second_ids: Vec<i64> = store
        .search(project_id, "", 100)
        .unwrap()
        .into_iter()
        .map(|h| h.entity_id)
        .collect();
    assert_eq!(first_ids, second_ids);
}

#[tokio::test]
async fn test_resume_skips_unchanged_files_after_stale_checkpoint() {
    let (dir, store, orchestrator, project_id) = setup(StubGateway::default());
    let cancel = CancellationToken::new();
    orchestrator
        .index_project(project_id, false, false, &cancel)
        .await
        .unwrap();
    drop(orchestrator);

    // The checkpointed file disappears, so the resume cursor no longer
    // matches the walk and the run restarts from the first file.
    std::fs::remove_file(dir.path().join("z.php")).unwrap();
    store.set_state(project_id, ProjectState::Stopped).unwrap();

    let gateway = StubGateway::default();
    let calls = gateway.call_counter();
    let resume = Orchestrator::new(store.clone(), IndexerConfig::default(), Some(gateway));
    let outcome = resume
        .index_project(project_id, true, false, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.state, ProjectState::Completed);
    // Every surviving file is unchanged, so no entity goes back to the
    // gateway.
    assert_eq!(calls.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn test_changed_file_is_reprocessed_and_edges_follow() {
    let (dir, store, orchestrator, project_id) = setup(StubGateway::default());
    let cancel = CancellationToken::new();
    orchestrator
        .index_project(project_id, false, false, &cancel)
        .await
        .unwrap();
    let zulu_before = store.search(project_id, "Zulu", 5).unwrap()[0].entity_id;

    // Grow Zulu; incoming edges must still point at the same entity id.
    create_file(
        dir.path(),
        "z.php",
        "<?php\nclass Zulu {\n    public function extra() {}\n}\n",
    );
    let second = Orchestrator::new(
        store.clone(),
        IndexerConfig::default(),
        Some(StubGateway::default()),
    );
    second
        .index_project(project_id, false, false, &cancel)
        .await
        .unwrap();

    let zulu_after = store.search(project_id, "Zulu", 5).unwrap()[0].entity_id;
    assert_eq!(zulu_before, zulu_after);

    let alpha = store.search(project_id, "Alpha", 5).unwrap()[0].entity_id;
    let extends = store
        .dependencies_of(alpha)
        .unwrap()
        .into_iter()
        .find(|e| e.kind == ReferenceKind::Extends)
        .unwrap();
    assert_eq!(extends.depends_on_entity_id, Some(zulu_after));
}

#[tokio::test]
async fn test_unreadable_file_does_not_fail_the_run() {
    let dir = TempDir::new().unwrap();
    create_file(dir.path(), "good.php", "<?php\nfunction ok() {}\n");
    std::fs::write(dir.path().join("binary.php"), [0xff, 0xfe, 0x00, 0x80]).unwrap();

    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let project_id = store.create_project("app", dir.path(), "php", "en").unwrap().id;
    let orchestrator = Orchestrator::new(
        store.clone(),
        IndexerConfig::default(),
        Some(StubGateway::default()),
    );
    let outcome = orchestrator
        .index_project(project_id, false, false, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.state, ProjectState::Completed);
    assert_eq!(outcome.indexed_files, 2);
    assert_eq!(store.entity_count(project_id).unwrap(), 1);
    let binary = store
        .get_file(project_id, &dir.path().join("binary.php"))
        .unwrap()
        .unwrap();
    assert!(binary.parse_warning.is_some());
}

#[tokio::test]
async fn test_gateway_skipped_when_not_configured() {
    let dir = TempDir::new().unwrap();
    create_file(dir.path(), "a.php", "<?php\nfunction solo() {}\n");
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let project_id = store.create_project("app", dir.path(), "php", "en").unwrap().id;
    let orchestrator: Orchestrator<StubGateway> =
        Orchestrator::new(store.clone(), IndexerConfig::default(), None);

    let outcome = orchestrator
        .index_project(project_id, false, false, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.state, ProjectState::Completed);
    assert_eq!(outcome.failed_entities, 0);

    // Metrics-only analysis is still recorded.
    let solo = store.search(project_id, "solo", 5).unwrap()[0].entity_id;
    let analysis = store.get_analysis(solo).unwrap().unwrap();
    assert!(analysis.description.is_none());
}
