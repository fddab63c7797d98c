//! Command line interface.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "coderag", about = "Code indexing and dependency analysis", version)]
pub struct Cli {
    /// Path to the index database.
    #[arg(long, global = true, default_value = "coderag.db")]
    pub db: PathBuf,

    /// Optional YAML config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Register a project for indexing.
    Add {
        /// Project name.
        name: String,
        /// Project root directory.
        path: PathBuf,
        /// Source language: php or python.
        #[arg(long, default_value = "php")]
        language: String,
        /// Locale for gateway-produced descriptions.
        #[arg(long, default_value = "en")]
        locale: String,
    },
    /// Index a project from scratch, or continue a stopped run.
    Index {
        /// Project name or id.
        project: String,
        /// Continue from the last checkpoint instead of starting over.
        #[arg(long)]
        resume: bool,
    },
    /// Reindex a project.
    Reindex {
        /// Project name or id.
        project: String,
        /// Only re-run analysis for entities that failed or were never
        /// analyzed; extraction and dependencies are left alone.
        #[arg(long)]
        only_failed: bool,
    },
    /// Show project state and progress.
    Status {
        /// Project name or id; all projects when omitted.
        project: Option<String>,
    },
    /// Search indexed entities by name, keyword or description.
    Search {
        /// Project name or id.
        project: String,
        query: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show one entity with its analysis.
    Entity {
        id: i64,
    },
    /// Find the innermost entity covering a file position.
    Locate {
        /// Project name or id.
        project: String,
        /// Path relative to the project root.
        file: String,
        line: u32,
    },
    /// Show dependency edges of an entity, both directions.
    Deps {
        id: i64,
    },
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    commands::dispatch(cli).await
}
