//! Incremental source-code indexing with entity-level analysis and a
//! project-wide dependency graph.
//!
//! A project is walked file by file; each file is parsed with tree-sitter,
//! its declarations become entities with static metrics attached, an
//! optional analysis gateway enriches them, and raw references are resolved
//! into dependency edges. Runs checkpoint after every file, so a stopped
//! run resumes where it left off.

pub mod analysis;
pub mod cli;
pub mod config;
pub mod error;
pub mod indexer;
pub mod languages;
pub mod metrics;
pub mod store;

pub use config::IndexerConfig;
pub use error::{IndexerError, Result};
pub use indexer::{IndexOutcome, Orchestrator};
pub use store::SqliteStore;
