//! SQLite-backed metadata store.
//!
//! All access goes through a single connection behind a mutex. Multi-step
//! writes (per-file persistence, edge replacement) run inside transactions so
//! readers never observe a file with half of its entities.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::{IndexerError, Result};

use super::models::{
    now_epoch, AnalysisRecord, DependencyEdge, Entity, EntityKind, Project, ProjectState,
    ReferenceKind, SourceFile, Visibility,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS projects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    root_path TEXT NOT NULL UNIQUE,
    language TEXT NOT NULL,
    ui_locale TEXT NOT NULL DEFAULT 'en',
    state TEXT NOT NULL DEFAULT 'idle',
    last_indexed_file_path TEXT,
    current_file_path TEXT,
    status_message TEXT,
    total_files INTEGER NOT NULL DEFAULT 0,
    indexed_files INTEGER NOT NULL DEFAULT 0,
    total_entities INTEGER NOT NULL DEFAULT 0,
    tokens_used INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS source_files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    path TEXT NOT NULL,
    rel_path TEXT NOT NULL,
    content_hash INTEGER NOT NULL DEFAULT 0,
    indexed INTEGER NOT NULL DEFAULT 0,
    indexed_at INTEGER,
    entity_count INTEGER NOT NULL DEFAULT 0,
    parse_warning TEXT,
    UNIQUE(project_id, path)
);

CREATE TABLE IF NOT EXISTS entities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_id INTEGER NOT NULL REFERENCES source_files(id) ON DELETE CASCADE,
    kind TEXT NOT NULL,
    name TEXT NOT NULL,
    full_qualified_name TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    visibility TEXT NOT NULL DEFAULT 'public',
    code TEXT NOT NULL,
    analysis_failed INTEGER NOT NULL DEFAULT 0,
    UNIQUE(file_id, full_qualified_name, kind)
);

CREATE TABLE IF NOT EXISTS analyses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_id INTEGER NOT NULL UNIQUE REFERENCES entities(id) ON DELETE CASCADE,
    schema_version INTEGER NOT NULL,
    description TEXT,
    complexity TEXT NOT NULL,
    complexity_explanation TEXT,
    cyclomatic INTEGER NOT NULL,
    cognitive INTEGER NOT NULL,
    max_nesting_depth INTEGER NOT NULL,
    parameter_count INTEGER NOT NULL,
    lines_of_code INTEGER NOT NULL,
    coupling_score REAL NOT NULL,
    cohesion_score REAL,
    solid_violations TEXT NOT NULL DEFAULT '[]',
    design_patterns TEXT NOT NULL DEFAULT '[]',
    ddd_role TEXT,
    mvc_role TEXT,
    testability_score INTEGER,
    testability_issues TEXT NOT NULL DEFAULT '[]',
    security_issues TEXT NOT NULL DEFAULT '[]',
    has_n_plus_one INTEGER NOT NULL DEFAULT 0,
    is_god_object INTEGER NOT NULL DEFAULT 0,
    has_feature_envy INTEGER NOT NULL DEFAULT 0,
    long_parameter_list INTEGER NOT NULL DEFAULT 0,
    keywords TEXT NOT NULL DEFAULT '[]',
    tokens_used INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS dependencies (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_id INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    depends_on_entity_id INTEGER REFERENCES entities(id) ON DELETE SET NULL,
    depends_on_name TEXT NOT NULL,
    kind TEXT NOT NULL,
    low_confidence INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_files_project ON source_files(project_id);
CREATE INDEX IF NOT EXISTS idx_entities_file ON entities(file_id);
CREATE INDEX IF NOT EXISTS idx_entities_name ON entities(name);
CREATE INDEX IF NOT EXISTS idx_entities_fqn ON entities(full_qualified_name);
CREATE INDEX IF NOT EXISTS idx_deps_entity ON dependencies(entity_id);
CREATE INDEX IF NOT EXISTS idx_deps_target ON dependencies(depends_on_entity_id);
CREATE INDEX IF NOT EXISTS idx_entities_failed ON entities(analysis_failed);
CREATE INDEX IF NOT EXISTS idx_entities_span ON entities(file_id, start_line, end_line);
"#;

/// One entity ready to be written, together with its static analysis.
#[derive(Debug, Clone)]
pub struct PersistEntity {
    pub kind: EntityKind,
    pub name: String,
    pub full_qualified_name: String,
    pub start_line: u32,
    pub end_line: u32,
    pub visibility: Visibility,
    pub code: String,
    pub analysis_failed: bool,
    /// `entity_id` inside is ignored; the store fills in the real id.
    pub analysis: Option<AnalysisRecord>,
}

/// Everything produced for one source file, persisted atomically.
#[derive(Debug)]
pub struct FilePersist {
    pub project_id: i64,
    pub path: PathBuf,
    pub rel_path: String,
    pub content_hash: u64,
    pub parse_warning: Option<String>,
    pub entities: Vec<PersistEntity>,
    /// Advance the project's resume cursor to this file.
    pub advance_cursor: bool,
}

/// A declaration candidate surfaced to the resolver.
#[derive(Debug, Clone)]
pub struct DeclarationSite {
    pub entity_id: i64,
    pub kind: EntityKind,
    pub name: String,
    pub full_qualified_name: String,
    pub rel_path: String,
    pub start_line: u32,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub entity_id: i64,
    pub kind: EntityKind,
    pub name: String,
    pub full_qualified_name: String,
    pub rel_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub complexity: Option<String>,
    pub description: Option<String>,
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// In-memory database, used by tests.
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;",
        )?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ---- projects ----

    pub fn create_project(
        &self,
        name: &str,
        root_path: &Path,
        language: &str,
        ui_locale: &str,
    ) -> Result<Project> {
        let conn = self.conn.lock().unwrap();
        let root = root_path.to_string_lossy();
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM projects WHERE root_path = ?1",
                params![root],
                |row| row.get(0),
            )
            .optional()?;
        let id = match existing {
            Some(id) => id,
            None => {
                let now = now_epoch();
                conn.execute(
                    "INSERT INTO projects (name, root_path, language, ui_locale, state, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, 'idle', ?5, ?5)",
                    params![name, root, language, ui_locale, now],
                )?;
                conn.last_insert_rowid()
            }
        };
        Self::project_by_id(&conn, id)
    }

    /// Accumulates gateway token spend onto the project row.
    pub fn add_tokens_used(&self, project_id: i64, tokens: u64) -> Result<()> {
        if tokens == 0 {
            return Ok(());
        }
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE projects SET tokens_used = tokens_used + ?1, updated_at = ?2 WHERE id = ?3",
            params![tokens as i64, now_epoch(), project_id],
        )?;
        Ok(())
    }

    pub fn get_project(&self, id: i64) -> Result<Project> {
        let conn = self.conn.lock().unwrap();
        Self::project_by_id(&conn, id)
    }

    pub fn get_project_by_name(&self, name: &str) -> Result<Project> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM projects WHERE name = ?1 ORDER BY id LIMIT 1",
            params![name],
            row_to_project,
        )
        .optional()?
        .ok_or_else(|| IndexerError::ProjectNotFound(name.to_string()))
    }

    pub fn list_projects(&self) -> Result<Vec<Project>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM projects ORDER BY id")?;
        let rows = stmt.query_map([], row_to_project)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    fn project_by_id(conn: &Connection, id: i64) -> Result<Project> {
        conn.query_row(
            "SELECT * FROM projects WHERE id = ?1",
            params![id],
            row_to_project,
        )
        .optional()?
        .ok_or_else(|| IndexerError::ProjectNotFound(id.to_string()))
    }

    /// Compare-and-swap state transition. Only succeeds when the row is still
    /// in `from`; a concurrent job that won the race makes this fail.
    pub fn transition_state(
        &self,
        project_id: i64,
        from: ProjectState,
        to: ProjectState,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE projects SET state = ?1, updated_at = ?2 WHERE id = ?3 AND state = ?4",
            params![to.as_str(), now_epoch(), project_id, from.as_str()],
        )?;
        if changed == 0 {
            let current = Self::project_by_id(&conn, project_id)?.state;
            return Err(IndexerError::ConcurrencyConflict {
                project_id,
                state: current,
            });
        }
        debug!(project_id, from = %from, to = %to, "project state transition");
        Ok(())
    }

    /// Unconditionally sets the terminal state at the end of a run.
    pub fn set_state(&self, project_id: i64, state: ProjectState) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE projects SET state = ?1, updated_at = ?2 WHERE id = ?3",
            params![state.as_str(), now_epoch(), project_id],
        )?;
        Ok(())
    }

    pub fn set_status_message(&self, project_id: i64, message: Option<&str>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE projects SET status_message = ?1, updated_at = ?2 WHERE id = ?3",
            params![message, now_epoch(), project_id],
        )?;
        Ok(())
    }

    pub fn set_current_file(&self, project_id: i64, rel_path: Option<&str>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE projects SET current_file_path = ?1, updated_at = ?2 WHERE id = ?3",
            params![rel_path, now_epoch(), project_id],
        )?;
        Ok(())
    }

    pub fn set_total_files(&self, project_id: i64, total: u64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE projects SET total_files = ?1, updated_at = ?2 WHERE id = ?3",
            params![total as i64, now_epoch(), project_id],
        )?;
        Ok(())
    }

    /// Fresh (non-resume) runs drop the cursor and per-run counters.
    pub fn reset_run_progress(&self, project_id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE projects
             SET last_indexed_file_path = NULL, current_file_path = NULL,
                 indexed_files = 0, status_message = NULL, updated_at = ?1
             WHERE id = ?2",
            params![now_epoch(), project_id],
        )?;
        Ok(())
    }

    // ---- files ----

    pub fn get_file(&self, project_id: i64, path: &Path) -> Result<Option<SourceFile>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM source_files WHERE project_id = ?1 AND path = ?2",
            params![project_id, path.to_string_lossy()],
            row_to_file,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn file_count(&self, project_id: i64) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM source_files WHERE project_id = ?1 AND indexed = 1",
            params![project_id],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    /// Removes file rows (and their entities via cascade) for paths that no
    /// longer exist in the walked tree.
    pub fn prune_missing_files(&self, project_id: i64, live_paths: &[PathBuf]) -> Result<u64> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut removed = 0u64;
        {
            let mut stmt =
                tx.prepare("SELECT id, path FROM source_files WHERE project_id = ?1")?;
            let known: Vec<(i64, String)> = stmt
                .query_map(params![project_id], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for (id, path) in known {
                if !live_paths.iter().any(|p| p.to_string_lossy() == path) {
                    tx.execute("DELETE FROM source_files WHERE id = ?1", params![id])?;
                    removed += 1;
                }
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    // ---- per-file persistence ----

    /// Writes the file row, upserts every entity and analysis, drops entities
    /// that vanished from the file, and advances progress counters. One
    /// transaction, so readers see either the old or the new file contents.
    ///
    /// Entity identity is (file, qualified name, kind); re-persisting keeps
    /// existing ids so incoming dependency edges stay valid.
    pub fn persist_file(&self, batch: &FilePersist) -> Result<Vec<i64>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = now_epoch();

        tx.execute(
            "INSERT INTO source_files (project_id, path, rel_path, content_hash, indexed, indexed_at, entity_count, parse_warning)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?7)
             ON CONFLICT(project_id, path) DO UPDATE SET
                 content_hash = excluded.content_hash,
                 indexed = 1,
                 indexed_at = excluded.indexed_at,
                 entity_count = excluded.entity_count,
                 parse_warning = excluded.parse_warning",
            params![
                batch.project_id,
                batch.path.to_string_lossy(),
                batch.rel_path,
                batch.content_hash as i64,
                now,
                batch.entities.len() as i64,
                batch.parse_warning,
            ],
        )?;
        let file_id: i64 = tx.query_row(
            "SELECT id FROM source_files WHERE project_id = ?1 AND path = ?2",
            params![batch.project_id, batch.path.to_string_lossy()],
            |row| row.get(0),
        )?;

        let mut ids = Vec::with_capacity(batch.entities.len());
        for entity in &batch.entities {
            let id: i64 = tx.query_row(
                "INSERT INTO entities (file_id, kind, name, full_qualified_name, start_line, end_line, visibility, code, analysis_failed)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(file_id, full_qualified_name, kind) DO UPDATE SET
                     name = excluded.name,
                     start_line = excluded.start_line,
                     end_line = excluded.end_line,
                     visibility = excluded.visibility,
                     code = excluded.code,
                     analysis_failed = excluded.analysis_failed
                 RETURNING id",
                params![
                    file_id,
                    entity.kind.as_str(),
                    entity.name,
                    entity.full_qualified_name,
                    entity.start_line,
                    entity.end_line,
                    entity.visibility.as_str(),
                    entity.code,
                    entity.analysis_failed,
                ],
                |row| row.get(0),
            )?;
            if let Some(analysis) = &entity.analysis {
                upsert_analysis_tx(&tx, id, analysis)?;
            }
            ids.push(id);
        }

        // Entities no longer present in the file are gone for good.
        if ids.is_empty() {
            tx.execute("DELETE FROM entities WHERE file_id = ?1", params![file_id])?;
        } else {
            let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let sql = format!(
                "DELETE FROM entities WHERE file_id = ?1 AND id NOT IN ({placeholders})"
            );
            let mut sql_params: Vec<&dyn rusqlite::ToSql> = vec![&file_id];
            for id in &ids {
                sql_params.push(id);
            }
            tx.execute(&sql, sql_params.as_slice())?;
        }

        tx.execute(
            "UPDATE projects SET
                 last_indexed_file_path =
                     CASE WHEN ?4 THEN ?1 ELSE last_indexed_file_path END,
                 indexed_files = indexed_files + 1,
                 total_entities = (
                     SELECT COUNT(*) FROM entities e
                     JOIN source_files f ON f.id = e.file_id
                     WHERE f.project_id = ?2
                 ),
                 updated_at = ?3
             WHERE id = ?2",
            params![batch.rel_path, batch.project_id, now, batch.advance_cursor],
        )?;

        tx.commit()?;
        Ok(ids)
    }

    /// Marks a file indexed without entities, used for unreadable sources.
    pub fn mark_file_skipped(
        &self,
        project_id: i64,
        path: &Path,
        rel_path: &str,
        warning: &str,
    ) -> Result<()> {
        self.persist_file(&FilePersist {
            project_id,
            path: path.to_path_buf(),
            rel_path: rel_path.to_string(),
            content_hash: 0,
            parse_warning: Some(warning.to_string()),
            entities: Vec::new(),
            advance_cursor: true,
        })
        .map(|_| ())
    }

    /// Counts a file without touching its entities, used when the content
    /// hash shows nothing changed.
    pub fn bump_indexed(&self, project_id: i64, rel_path: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE projects SET
                 indexed_files = indexed_files + 1,
                 last_indexed_file_path = ?1,
                 updated_at = ?2
             WHERE id = ?3",
            params![rel_path, now_epoch(), project_id],
        )?;
        Ok(())
    }

    // ---- entities ----

    pub fn get_entity(&self, id: i64) -> Result<Entity> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM entities WHERE id = ?1",
            params![id],
            row_to_entity,
        )
        .optional()?
        .ok_or(IndexerError::EntityNotFound(id))
    }

    pub fn entity_file_rel_path(&self, entity_id: i64) -> Result<String> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT f.rel_path FROM entities e JOIN source_files f ON f.id = e.file_id
             WHERE e.id = ?1",
            params![entity_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or(IndexerError::EntityNotFound(entity_id))
    }

    pub fn set_analysis_failed(&self, entity_id: i64, failed: bool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE entities SET analysis_failed = ?1 WHERE id = ?2",
            params![failed, entity_id],
        )?;
        Ok(())
    }

    pub fn entity_count(&self, project_id: i64) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entities e
             JOIN source_files f ON f.id = e.file_id
             WHERE f.project_id = ?1",
            params![project_id],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    pub fn entities_with_failed_analysis(&self, project_id: i64) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entities e
             JOIN source_files f ON f.id = e.file_id
             WHERE f.project_id = ?1 AND e.analysis_failed = 1",
            params![project_id],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    pub fn entities_without_analysis(&self, project_id: i64) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entities e
             JOIN source_files f ON f.id = e.file_id
             LEFT JOIN analyses a ON a.entity_id = e.id
             WHERE f.project_id = ?1 AND a.id IS NULL",
            params![project_id],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    /// Innermost entity whose span covers the given line of a file.
    pub fn find_entity_at(
        &self,
        project_id: i64,
        rel_path: &str,
        line: u32,
    ) -> Result<Option<Entity>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT e.* FROM entities e
             JOIN source_files f ON f.id = e.file_id
             WHERE f.project_id = ?1 AND f.rel_path = ?2
               AND e.start_line <= ?3 AND e.end_line >= ?3
             ORDER BY e.end_line - e.start_line, e.id
             LIMIT 1",
            params![project_id, rel_path, line],
            row_to_entity,
        )
        .optional()
        .map_err(Into::into)
    }

    /// Entities whose last analysis failed, plus entities never analyzed.
    pub fn entities_needing_analysis(&self, project_id: i64) -> Result<Vec<Entity>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT e.* FROM entities e
             JOIN source_files f ON f.id = e.file_id
             LEFT JOIN analyses a ON a.entity_id = e.id
             WHERE f.project_id = ?1 AND (e.analysis_failed = 1 OR a.id IS NULL)
             ORDER BY e.id",
        )?;
        let rows = stmt.query_map(params![project_id], row_to_entity)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    // ---- resolver lookups ----

    pub fn find_by_fqn(&self, project_id: i64, fqn: &str) -> Result<Vec<DeclarationSite>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT e.id, e.kind, e.name, e.full_qualified_name, f.rel_path, e.start_line
             FROM entities e JOIN source_files f ON f.id = e.file_id
             WHERE f.project_id = ?1 AND e.full_qualified_name = ?2
             ORDER BY e.id",
        )?;
        let rows = stmt.query_map(params![project_id, fqn], row_to_site)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    pub fn find_by_name(&self, project_id: i64, name: &str) -> Result<Vec<DeclarationSite>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT e.id, e.kind, e.name, e.full_qualified_name, f.rel_path, e.start_line
             FROM entities e JOIN source_files f ON f.id = e.file_id
             WHERE f.project_id = ?1 AND e.name = ?2
             ORDER BY e.id",
        )?;
        let rows = stmt.query_map(params![project_id, name], row_to_site)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    // ---- analyses ----

    pub fn upsert_analysis(&self, entity_id: i64, record: &AnalysisRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        upsert_analysis_tx(&conn, entity_id, record)
    }

    pub fn get_analysis(&self, entity_id: i64) -> Result<Option<AnalysisRecord>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM analyses WHERE entity_id = ?1",
            params![entity_id],
            row_to_analysis,
        )
        .optional()
        .map_err(Into::into)
    }

    // ---- dependencies ----

    /// Replaces every outgoing edge of `entity_id` in one transaction.
    pub fn replace_dependencies(&self, entity_id: i64, edges: &[DependencyEdge]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM dependencies WHERE entity_id = ?1",
            params![entity_id],
        )?;
        for edge in edges {
            tx.execute(
                "INSERT INTO dependencies (entity_id, depends_on_entity_id, depends_on_name, kind, low_confidence)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    entity_id,
                    edge.depends_on_entity_id,
                    edge.depends_on_name,
                    edge.kind.as_str(),
                    edge.low_confidence,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Outgoing edges of an entity.
    pub fn dependencies_of(&self, entity_id: i64) -> Result<Vec<DependencyEdge>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM dependencies WHERE entity_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![entity_id], row_to_edge)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    /// Incoming edges, i.e. entities that depend on this one.
    pub fn dependents_of(&self, entity_id: i64) -> Result<Vec<DependencyEdge>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM dependencies WHERE depends_on_entity_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![entity_id], row_to_edge)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    /// Edges still pointing at nothing, with where their source entity
    /// lives. The resolver retries these at the end of a run, once every
    /// file has been indexed.
    pub fn unresolved_edges(
        &self,
        project_id: i64,
    ) -> Result<Vec<(DependencyEdge, String, u32)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT d.id, d.entity_id, d.depends_on_entity_id, d.depends_on_name,
                    d.kind, d.low_confidence, f.rel_path, e.start_line
             FROM dependencies d
             JOIN entities e ON e.id = d.entity_id
             JOIN source_files f ON f.id = e.file_id
             WHERE f.project_id = ?1 AND d.depends_on_entity_id IS NULL
             ORDER BY d.id",
        )?;
        let rows = stmt.query_map(params![project_id], |row| {
            let kind: String = row.get(4)?;
            Ok((
                DependencyEdge {
                    id: row.get(0)?,
                    entity_id: row.get(1)?,
                    depends_on_entity_id: row.get(2)?,
                    depends_on_name: row.get(3)?,
                    kind: ReferenceKind::from_str(&kind).unwrap_or(ReferenceKind::Calls),
                    low_confidence: row.get(5)?,
                },
                row.get::<_, String>(6)?,
                row.get::<_, u32>(7)?,
            ))
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    pub fn set_edge_target(
        &self,
        edge_id: i64,
        target: Option<i64>,
        low_confidence: bool,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE dependencies SET depends_on_entity_id = ?1, low_confidence = ?2 WHERE id = ?3",
            params![target, low_confidence, edge_id],
        )?;
        Ok(())
    }

    // ---- search ----

    /// Substring match over names, qualified names, keywords and
    /// descriptions.
    pub fn search(&self, project_id: i64, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let conn = self.conn.lock().unwrap();
        let pattern = format!("%{}%", query.replace('%', "\\%"));
        let mut stmt = conn.prepare(
            "SELECT e.id, e.kind, e.name, e.full_qualified_name, f.rel_path,
                    e.start_line, e.end_line, a.complexity, a.description
             FROM entities e
             JOIN source_files f ON f.id = e.file_id
             LEFT JOIN analyses a ON a.entity_id = e.id
             WHERE f.project_id = ?1 AND (
                 e.name LIKE ?2 ESCAPE '\\'
                 OR e.full_qualified_name LIKE ?2 ESCAPE '\\'
                 OR a.keywords LIKE ?2 ESCAPE '\\'
                 OR a.description LIKE ?2 ESCAPE '\\'
             )
             ORDER BY CASE WHEN e.name = ?4 OR e.full_qualified_name = ?4 THEN 0 ELSE 1 END,
                      LENGTH(e.name), e.name
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![project_id, pattern, limit as i64, query], |row| {
            Ok(SearchHit {
                entity_id: row.get(0)?,
                kind: EntityKind::from_str(&row.get::<_, String>(1)?)
                    .unwrap_or(EntityKind::Function),
                name: row.get(2)?,
                full_qualified_name: row.get(3)?,
                rel_path: row.get(4)?,
                start_line: row.get(5)?,
                end_line: row.get(6)?,
                complexity: row.get(7)?,
                description: row.get(8)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }
}

fn upsert_analysis_tx(conn: &Connection, entity_id: i64, record: &AnalysisRecord) -> Result<()> {
    let solid = serde_json::to_string(&record.solid_violations)?;
    let patterns = serde_json::to_string(&record.design_patterns)?;
    let testability = serde_json::to_string(&record.testability_issues)?;
    let security = serde_json::to_string(&record.security_issues)?;
    let keywords = serde_json::to_string(&record.keywords)?;
    conn.execute(
        "INSERT INTO analyses (entity_id, schema_version, description, complexity,
             complexity_explanation, cyclomatic, cognitive, max_nesting_depth,
             parameter_count, lines_of_code, coupling_score, cohesion_score,
             solid_violations, design_patterns, ddd_role, mvc_role,
             testability_score, testability_issues, security_issues,
             has_n_plus_one, is_god_object, has_feature_envy,
             long_parameter_list, keywords, tokens_used, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                 ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?26)
         ON CONFLICT(entity_id) DO UPDATE SET
             schema_version = excluded.schema_version,
             description = excluded.description,
             complexity = excluded.complexity,
             complexity_explanation = excluded.complexity_explanation,
             cyclomatic = excluded.cyclomatic,
             cognitive = excluded.cognitive,
             max_nesting_depth = excluded.max_nesting_depth,
             parameter_count = excluded.parameter_count,
             lines_of_code = excluded.lines_of_code,
             coupling_score = excluded.coupling_score,
             cohesion_score = excluded.cohesion_score,
             solid_violations = excluded.solid_violations,
             design_patterns = excluded.design_patterns,
             ddd_role = excluded.ddd_role,
             mvc_role = excluded.mvc_role,
             testability_score = excluded.testability_score,
             testability_issues = excluded.testability_issues,
             security_issues = excluded.security_issues,
             has_n_plus_one = excluded.has_n_plus_one,
             is_god_object = excluded.is_god_object,
             has_feature_envy = excluded.has_feature_envy,
             long_parameter_list = excluded.long_parameter_list,
             keywords = excluded.keywords,
             tokens_used = excluded.tokens_used,
             updated_at = excluded.updated_at",
        params![
            entity_id,
            record.schema_version,
            record.description,
            record.complexity.as_str(),
            record.complexity_explanation,
            record.cyclomatic,
            record.cognitive,
            record.max_nesting_depth,
            record.parameter_count,
            record.lines_of_code,
            record.coupling_score,
            record.cohesion_score,
            solid,
            patterns,
            record.ddd_role,
            record.mvc_role,
            record.testability_score,
            testability,
            security,
            record.has_n_plus_one,
            record.is_god_object,
            record.has_feature_envy,
            record.long_parameter_list,
            keywords,
            record.tokens_used as i64,
            now_epoch(),
        ],
    )?;
    Ok(())
}

fn row_to_project(row: &rusqlite::Row<'_>) -> rusqlite::Result<Project> {
    let state: String = row.get("state")?;
    let root: String = row.get("root_path")?;
    Ok(Project {
        id: row.get("id")?,
        name: row.get("name")?,
        root_path: PathBuf::from(root),
        language: row.get("language")?,
        ui_locale: row.get("ui_locale")?,
        state: ProjectState::from_str(&state).unwrap_or(ProjectState::Idle),
        last_indexed_file_path: row.get("last_indexed_file_path")?,
        current_file_path: row.get("current_file_path")?,
        status_message: row.get("status_message")?,
        total_files: row.get::<_, i64>("total_files")? as u64,
        indexed_files: row.get::<_, i64>("indexed_files")? as u64,
        total_entities: row.get::<_, i64>("total_entities")? as u64,
        tokens_used: row.get::<_, i64>("tokens_used")? as u64,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<SourceFile> {
    let path: String = row.get("path")?;
    Ok(SourceFile {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        path: PathBuf::from(path),
        rel_path: row.get("rel_path")?,
        content_hash: row.get::<_, i64>("content_hash")? as u64,
        indexed: row.get("indexed")?,
        indexed_at: row.get("indexed_at")?,
        entity_count: row.get::<_, i64>("entity_count")? as u64,
        parse_warning: row.get("parse_warning")?,
    })
}

fn row_to_entity(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entity> {
    let kind: String = row.get("kind")?;
    let visibility: String = row.get("visibility")?;
    Ok(Entity {
        id: row.get("id")?,
        file_id: row.get("file_id")?,
        kind: EntityKind::from_str(&kind).unwrap_or(EntityKind::Function),
        name: row.get("name")?,
        full_qualified_name: row.get("full_qualified_name")?,
        start_line: row.get("start_line")?,
        end_line: row.get("end_line")?,
        visibility: Visibility::from_str(&visibility).unwrap_or_default(),
        code: row.get("code")?,
        analysis_failed: row.get("analysis_failed")?,
    })
}

fn row_to_site(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeclarationSite> {
    let kind: String = row.get(1)?;
    Ok(DeclarationSite {
        entity_id: row.get(0)?,
        kind: EntityKind::from_str(&kind).unwrap_or(EntityKind::Function),
        name: row.get(2)?,
        full_qualified_name: row.get(3)?,
        rel_path: row.get(4)?,
        start_line: row.get(5)?,
    })
}

fn row_to_edge(row: &rusqlite::Row<'_>) -> rusqlite::Result<DependencyEdge> {
    let kind: String = row.get("kind")?;
    Ok(DependencyEdge {
        id: row.get("id")?,
        entity_id: row.get("entity_id")?,
        depends_on_entity_id: row.get("depends_on_entity_id")?,
        depends_on_name: row.get("depends_on_name")?,
        kind: ReferenceKind::from_str(&kind).unwrap_or(ReferenceKind::Calls),
        low_confidence: row.get("low_confidence")?,
    })
}

fn row_to_analysis(row: &rusqlite::Row<'_>) -> rusqlite::Result<AnalysisRecord> {
    let complexity: String = row.get("complexity")?;
    let solid: String = row.get("solid_violations")?;
    let patterns: String = row.get("design_patterns")?;
    let testability: String = row.get("testability_issues")?;
    let security: String = row.get("security_issues")?;
    let keywords: String = row.get("keywords")?;
    Ok(AnalysisRecord {
        entity_id: row.get("entity_id")?,
        schema_version: row.get("schema_version")?,
        description: row.get("description")?,
        complexity: crate::store::ComplexityClass::from_str(&complexity)
            .unwrap_or(crate::store::ComplexityClass::Constant),
        complexity_explanation: row.get("complexity_explanation")?,
        cyclomatic: row.get("cyclomatic")?,
        cognitive: row.get("cognitive")?,
        max_nesting_depth: row.get("max_nesting_depth")?,
        parameter_count: row.get("parameter_count")?,
        lines_of_code: row.get("lines_of_code")?,
        coupling_score: row.get("coupling_score")?,
        cohesion_score: row.get("cohesion_score")?,
        solid_violations: serde_json::from_str(&solid).unwrap_or_default(),
        design_patterns: serde_json::from_str(&patterns).unwrap_or_default(),
        ddd_role: row.get("ddd_role")?,
        mvc_role: row.get("mvc_role")?,
        testability_score: row.get("testability_score")?,
        testability_issues: serde_json::from_str(&testability).unwrap_or_default(),
        security_issues: serde_json::from_str(&security).unwrap_or_default(),
        has_n_plus_one: row.get("has_n_plus_one")?,
        is_god_object: row.get("is_god_object")?,
        has_feature_envy: row.get("has_feature_envy")?,
        long_parameter_list: row.get("long_parameter_list")?,
        keywords: serde_json::from_str(&keywords).unwrap_or_default(),
        tokens_used: row.get::<_, i64>("tokens_used")? as u64,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ComplexityClass;

    fn sample_entity(name: &str) -> PersistEntity {
        PersistEntity {
            kind: EntityKind::Function,
            name: name.to_string(),
            full_qualified_name: format!("app\\{name}"),
            start_line: 1,
            end_line: 5,
            visibility: Visibility::Public,
            code: format!("function {name}() {{}}"),
            analysis_failed: false,
            analysis: None,
        }
    }

    fn persist(store: &SqliteStore, project_id: i64, file: &str, names: &[&str]) -> Vec<i64> {
        store
            .persist_file(&FilePersist {
                project_id,
                path: PathBuf::from(format!("/proj/{file}")),
                rel_path: file.to_string(),
                content_hash: 42,
                parse_warning: None,
                entities: names.iter().map(|n| sample_entity(n)).collect(),
                advance_cursor: true,
            })
            .unwrap()
    }

    #[test]
    fn test_create_project_is_idempotent_by_root() {
        let store = SqliteStore::in_memory().unwrap();
        let a = store
            .create_project("app", Path::new("/proj"), "php", "en")
            .unwrap();
        let b = store
            .create_project("app-again", Path::new("/proj"), "php", "en")
            .unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.name, "app");
    }

    #[test]
    fn test_state_cas_rejects_stale_transition() {
        let store = SqliteStore::in_memory().unwrap();
        let p = store
            .create_project("app", Path::new("/proj"), "php", "en")
            .unwrap();
        store
            .transition_state(p.id, ProjectState::Idle, ProjectState::Indexing)
            .unwrap();
        let err = store
            .transition_state(p.id, ProjectState::Idle, ProjectState::Indexing)
            .unwrap_err();
        assert!(matches!(
            err,
            IndexerError::ConcurrencyConflict {
                state: ProjectState::Indexing,
                ..
            }
        ));
    }

    #[test]
    fn test_entity_ids_stable_across_reindex() {
        let store = SqliteStore::in_memory().unwrap();
        let p = store
            .create_project("app", Path::new("/proj"), "php", "en")
            .unwrap();
        let first = persist(&store, p.id, "a.php", &["alpha", "beta"]);
        let second = persist(&store, p.id, "a.php", &["alpha", "beta"]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_vanished_entities_are_deleted() {
        let store = SqliteStore::in_memory().unwrap();
        let p = store
            .create_project("app", Path::new("/proj"), "php", "en")
            .unwrap();
        let ids = persist(&store, p.id, "a.php", &["alpha", "beta"]);
        persist(&store, p.id, "a.php", &["alpha"]);
        assert!(store.get_entity(ids[0]).is_ok());
        assert!(matches!(
            store.get_entity(ids[1]),
            Err(IndexerError::EntityNotFound(_))
        ));
        assert_eq!(store.entity_count(p.id).unwrap(), 1);
    }

    #[test]
    fn test_incoming_edges_survive_target_reindex() {
        let store = SqliteStore::in_memory().unwrap();
        let p = store
            .create_project("app", Path::new("/proj"), "php", "en")
            .unwrap();
        let a = persist(&store, p.id, "a.php", &["caller"])[0];
        let b = persist(&store, p.id, "b.php", &["target"])[0];
        store
            .replace_dependencies(
                a,
                &[DependencyEdge {
                    id: 0,
                    entity_id: a,
                    depends_on_entity_id: Some(b),
                    depends_on_name: "target".to_string(),
                    kind: ReferenceKind::Calls,
                    low_confidence: false,
                }],
            )
            .unwrap();

        // Reindex the file that declares the target.
        persist(&store, p.id, "b.php", &["target"]);
        let edges = store.dependencies_of(a).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].depends_on_entity_id, Some(b));
    }

    #[test]
    fn test_replace_dependencies_swaps_edge_set() {
        let store = SqliteStore::in_memory().unwrap();
        let p = store
            .create_project("app", Path::new("/proj"), "php", "en")
            .unwrap();
        let a = persist(&store, p.id, "a.php", &["caller"])[0];
        let edge = |name: &str| DependencyEdge {
            id: 0,
            entity_id: a,
            depends_on_entity_id: None,
            depends_on_name: name.to_string(),
            kind: ReferenceKind::Import,
            low_confidence: false,
        };
        store.replace_dependencies(a, &[edge("X"), edge("Y")]).unwrap();
        store.replace_dependencies(a, &[edge("Z")]).unwrap();
        let edges = store.dependencies_of(a).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].depends_on_name, "Z");
    }

    #[test]
    fn test_analysis_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        let p = store
            .create_project("app", Path::new("/proj"), "php", "en")
            .unwrap();
        let id = persist(&store, p.id, "a.php", &["f"])[0];
        let mut record = AnalysisRecord::from_metrics(
            id,
            crate::metrics::EntityMetrics {
                complexity: ComplexityClass::Linear,
                complexity_explanation: None,
                cyclomatic: 2,
                cognitive: 1,
                max_nesting_depth: 1,
                parameter_count: 1,
                lines_of_code: 4,
                coupling_score: 0.0,
                cohesion_score: None,
                solid_violations: Vec::new(),
                security_issues: Vec::new(),
                has_n_plus_one: false,
                is_god_object: false,
                has_feature_envy: false,
                long_parameter_list: false,
            },
        );
        record.description = Some("sums things".to_string());
        record.keywords = vec!["sum".to_string()];
        store.upsert_analysis(id, &record).unwrap();

        let loaded = store.get_analysis(id).unwrap().unwrap();
        assert_eq!(loaded.complexity, ComplexityClass::Linear);
        assert_eq!(loaded.description.as_deref(), Some("sums things"));
        assert_eq!(loaded.keywords, vec!["sum".to_string()]);
    }

    #[test]
    fn test_entities_needing_analysis() {
        let store = SqliteStore::in_memory().unwrap();
        let p = store
            .create_project("app", Path::new("/proj"), "php", "en")
            .unwrap();
        let ids = persist(&store, p.id, "a.php", &["good", "bad", "missing"]);
        let record = AnalysisRecord::from_metrics(
            ids[0],
            crate::metrics::EntityMetrics {
                complexity: ComplexityClass::Constant,
                complexity_explanation: None,
                cyclomatic: 1,
                cognitive: 0,
                max_nesting_depth: 0,
                parameter_count: 0,
                lines_of_code: 1,
                coupling_score: 0.0,
                cohesion_score: None,
                solid_violations: Vec::new(),
                security_issues: Vec::new(),
                has_n_plus_one: false,
                is_god_object: false,
                has_feature_envy: false,
                long_parameter_list: false,
            },
        );
        store.upsert_analysis(ids[0], &record).unwrap();
        store.upsert_analysis(ids[1], &record).unwrap();
        store.set_analysis_failed(ids[1], true).unwrap();

        let pending = store.entities_needing_analysis(p.id).unwrap();
        let pending_ids: Vec<i64> = pending.iter().map(|e| e.id).collect();
        assert_eq!(pending_ids, vec![ids[1], ids[2]]);
    }

    #[test]
    fn test_search_matches_name_and_keywords() {
        let store = SqliteStore::in_memory().unwrap();
        let p = store
            .create_project("app", Path::new("/proj"), "php", "en")
            .unwrap();
        persist(&store, p.id, "a.php", &["renderInvoice", "submitOrder"]);
        let hits = store.search(p.id, "invoice", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "renderInvoice");
    }

    #[test]
    fn test_search_ranks_exact_name_first() {
        let store = SqliteStore::in_memory().unwrap();
        let p = store
            .create_project("app", Path::new("/proj"), "php", "en")
            .unwrap();
        // "ab" is a substring of both, but shorter names would otherwise win.
        persist(&store, p.id, "a.php", &["ab", "cabinet"]);
        let hits = store.search(p.id, "cabinet", 10).unwrap();
        assert_eq!(hits[0].name, "cabinet");
    }

    #[test]
    fn test_find_entity_at_picks_innermost_span() {
        let store = SqliteStore::in_memory().unwrap();
        let p = store
            .create_project("app", Path::new("/proj"), "php", "en")
            .unwrap();
        let outer = PersistEntity {
            kind: EntityKind::Class,
            name: "C".to_string(),
            full_qualified_name: "app\\C".to_string(),
            start_line: 1,
            end_line: 20,
            visibility: Visibility::Public,
            code: String::new(),
            analysis_failed: false,
            analysis: None,
        };
        let inner = PersistEntity {
            kind: EntityKind::Method,
            name: "m".to_string(),
            full_qualified_name: "app\\C::m".to_string(),
            start_line: 5,
            end_line: 9,
            visibility: Visibility::Public,
            code: String::new(),
            analysis_failed: false,
            analysis: None,
        };
        store
            .persist_file(&FilePersist {
                project_id: p.id,
                path: PathBuf::from("/proj/a.php"),
                rel_path: "a.php".to_string(),
                content_hash: 1,
                parse_warning: None,
                entities: vec![outer, inner],
                advance_cursor: true,
            })
            .unwrap();

        let hit = store.find_entity_at(p.id, "a.php", 7).unwrap().unwrap();
        assert_eq!(hit.name, "m");
        let hit = store.find_entity_at(p.id, "a.php", 2).unwrap().unwrap();
        assert_eq!(hit.name, "C");
        assert!(store.find_entity_at(p.id, "a.php", 99).unwrap().is_none());
        assert!(store.find_entity_at(p.id, "b.php", 7).unwrap().is_none());
    }

    #[test]
    fn test_analysis_count_queries() {
        let store = SqliteStore::in_memory().unwrap();
        let p = store
            .create_project("app", Path::new("/proj"), "php", "en")
            .unwrap();
        let ids = persist(&store, p.id, "a.php", &["good", "bad", "missing"]);
        let record = AnalysisRecord::from_metrics(
            ids[0],
            crate::metrics::EntityMetrics::default(),
        );
        store.upsert_analysis(ids[0], &record).unwrap();
        store.upsert_analysis(ids[1], &record).unwrap();
        store.set_analysis_failed(ids[1], true).unwrap();

        assert_eq!(store.entities_without_analysis(p.id).unwrap(), 1);
        assert_eq!(store.entities_with_failed_analysis(p.id).unwrap(), 1);
    }

    #[test]
    fn test_tokens_accumulate_on_project() {
        let store = SqliteStore::in_memory().unwrap();
        let p = store
            .create_project("app", Path::new("/proj"), "php", "ru")
            .unwrap();
        assert_eq!(p.ui_locale, "ru");
        assert_eq!(p.tokens_used, 0);
        store.add_tokens_used(p.id, 120).unwrap();
        store.add_tokens_used(p.id, 80).unwrap();
        assert_eq!(store.get_project(p.id).unwrap().tokens_used, 200);
    }

    #[test]
    fn test_gateway_fields_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        let p = store
            .create_project("app", Path::new("/proj"), "php", "en")
            .unwrap();
        let id = persist(&store, p.id, "a.php", &["f"])[0];
        let mut record =
            AnalysisRecord::from_metrics(id, crate::metrics::EntityMetrics::default());
        record.design_patterns = vec!["Repository".to_string()];
        record.ddd_role = Some("repository".to_string());
        record.mvc_role = Some("model".to_string());
        record.testability_score = Some(70);
        record.testability_issues = vec!["static dependency".to_string()];
        record.tokens_used = 314;
        store.upsert_analysis(id, &record).unwrap();

        let loaded = store.get_analysis(id).unwrap().unwrap();
        assert_eq!(loaded.design_patterns, vec!["Repository".to_string()]);
        assert_eq!(loaded.ddd_role.as_deref(), Some("repository"));
        assert_eq!(loaded.mvc_role.as_deref(), Some("model"));
        assert_eq!(loaded.testability_score, Some(70));
        assert_eq!(loaded.testability_issues.len(), 1);
        assert_eq!(loaded.tokens_used, 314);
    }
}
