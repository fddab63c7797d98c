use thiserror::Error;

use crate::store::ProjectState;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Language not supported: {0}")]
    UnsupportedLanguage(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Entity not found: {0}")]
    EntityNotFound(i64),

    #[error("Project {project_id} is already running a job (state: {state})")]
    ConcurrencyConflict {
        project_id: i64,
        state: ProjectState,
    },

    #[error("Cannot {action} while project {project_id} is in state {state}")]
    StateTransition {
        project_id: i64,
        state: ProjectState,
        action: &'static str,
    },

    #[error("Config error: {0}")]
    Config(String),
}

impl From<serde_yaml::Error> for IndexerError {
    fn from(err: serde_yaml::Error) -> Self {
        IndexerError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for IndexerError {
    fn from(err: serde_json::Error) -> Self {
        IndexerError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IndexerError>;
