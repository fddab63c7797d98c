//! Persistent metadata: projects, files, entities, analyses and dependency
//! edges, all in a single SQLite database.

pub mod models;
pub mod sqlite;

pub use models::{
    now_epoch, AnalysisRecord, ComplexityClass, DependencyEdge, Entity, EntityKind, Project,
    ProjectState, RawReference, ReferenceKind, SecurityIssue, SecurityIssueKind, SolidViolation,
    SourceFile, Visibility,
};
pub use sqlite::{DeclarationSite, FilePersist, PersistEntity, SearchHit, SqliteStore};
