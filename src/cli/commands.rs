use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::analysis::HttpAnalysisGateway;
use crate::config::IndexerConfig;
use crate::indexer::Orchestrator;
use crate::store::{Project, SqliteStore};

use super::{Cli, Commands};

pub async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let store = Arc::new(SqliteStore::open(&cli.db)?);
    let config = IndexerConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Add {
            name,
            path,
            language,
            locale,
        } => {
            let root = path.canonicalize()?;
            let project = store.create_project(&name, &root, &language, &locale)?;
            println!(
                "project {} ({}) registered at {}",
                project.name,
                project.id,
                project.root_path.display()
            );
        }
        Commands::Index { project, resume } => {
            let project = resolve_project(&store, &project)?;
            let orchestrator = build_orchestrator(store.clone(), config);
            let cancel = CancellationToken::new();
            let outcome = with_progress(
                &orchestrator,
                &cancel,
                orchestrator.index_project(project.id, resume, false, &cancel),
            )
            .await?;
            println!(
                "{}: {} files, {} entities, {} failed analyses",
                outcome.state, outcome.indexed_files, outcome.total_entities, outcome.failed_entities
            );
        }
        Commands::Reindex {
            project,
            only_failed,
        } => {
            let project = resolve_project(&store, &project)?;
            let orchestrator = build_orchestrator(store.clone(), config);
            let cancel = CancellationToken::new();
            let outcome = if only_failed {
                with_progress(
                    &orchestrator,
                    &cancel,
                    orchestrator.reindex_failed(project.id, &cancel),
                )
                .await?
            } else {
                with_progress(
                    &orchestrator,
                    &cancel,
                    orchestrator.index_project(project.id, false, true, &cancel),
                )
                .await?
            };
            println!(
                "{}: {} entities, {} failed analyses",
                outcome.state, outcome.total_entities, outcome.failed_entities
            );
        }
        Commands::Status { project } => {
            let projects = match project {
                Some(p) => vec![resolve_project(&store, &p)?],
                None => store.list_projects()?,
            };
            for p in projects {
                print_status(&store, &p)?;
            }
        }
        Commands::Search {
            project,
            query,
            limit,
        } => {
            let project = resolve_project(&store, &project)?;
            let hits = store.search(project.id, &query, limit)?;
            if hits.is_empty() {
                println!("no matches");
            }
            for hit in hits {
                println!(
                    "#{:<6} {:<9} {}  {}:{}",
                    hit.entity_id, hit.kind, hit.full_qualified_name, hit.rel_path, hit.start_line
                );
                if let Some(description) = hit.description {
                    println!("        {description}");
                }
            }
        }
        Commands::Entity { id } => {
            print_entity(&store, id)?;
        }
        Commands::Locate {
            project,
            file,
            line,
        } => {
            let project = resolve_project(&store, &project)?;
            match store.find_entity_at(project.id, &file, line)? {
                Some(entity) => print_entity(&store, entity.id)?,
                None => println!("no entity covers {file}:{line}"),
            }
        }
        Commands::Deps { id } => {
            let entity = store.get_entity(id)?;
            println!("dependencies of {}:", entity.full_qualified_name);
            for edge in store.dependencies_of(id)? {
                let target = match edge.depends_on_entity_id {
                    Some(target_id) => format!(
                        "#{} {}",
                        target_id,
                        store.get_entity(target_id)?.full_qualified_name
                    ),
                    None => "(unresolved)".to_string(),
                };
                let marker = if edge.low_confidence { " ?" } else { "" };
                println!("  {} {} -> {}{}", edge.kind, edge.depends_on_name, target, marker);
            }
            println!("depended on by:");
            for edge in store.dependents_of(id)? {
                let source = store.get_entity(edge.entity_id)?;
                println!("  {} ({} {})", source.full_qualified_name, edge.kind, edge.depends_on_name);
            }
        }
    }
    Ok(())
}

fn print_entity(store: &SqliteStore, id: i64) -> anyhow::Result<()> {
    let entity = store.get_entity(id)?;
    let rel_path = store.entity_file_rel_path(id)?;
    println!("#{} {} {}", entity.id, entity.kind, entity.full_qualified_name);
    println!(
        "  {}:{}-{}  visibility {}",
        rel_path,
        entity.start_line,
        entity.end_line,
        entity.visibility.as_str()
    );
    if entity.analysis_failed {
        println!("  last analysis failed");
    }
    if let Some(analysis) = store.get_analysis(id)? {
        println!(
            "  complexity {}  cyclomatic {}  cognitive {}  loc {}",
            analysis.complexity,
            analysis.cyclomatic,
            analysis.cognitive,
            analysis.lines_of_code
        );
        if let Some(explanation) = analysis.complexity_explanation {
            println!("  {explanation}");
        }
        if let Some(description) = analysis.description {
            println!("  {description}");
        }
        if !analysis.design_patterns.is_empty() {
            println!("  patterns: {}", analysis.design_patterns.join(", "));
        }
        if let Some(role) = analysis.ddd_role {
            println!("  ddd role: {role}");
        }
        if let Some(role) = analysis.mvc_role {
            println!("  mvc role: {role}");
        }
        if let Some(score) = analysis.testability_score {
            println!("  testability {score}/100");
            for issue in &analysis.testability_issues {
                println!("    - {issue}");
            }
        }
        if analysis.is_god_object {
            println!("  smell: god object");
        }
        if analysis.long_parameter_list {
            println!("  smell: long parameter list");
        }
        if analysis.has_n_plus_one {
            println!("  smell: possible N+1 query");
        }
        if analysis.has_feature_envy {
            println!("  smell: feature envy");
        }
        for issue in analysis.security_issues {
            println!("  security (line {}): {}", issue.line, issue.detail);
        }
    } else {
        println!("  not analyzed yet");
    }
    Ok(())
}

/// Accepts a project id or a project name.
fn resolve_project(store: &SqliteStore, key: &str) -> crate::error::Result<Project> {
    if let Ok(id) = key.parse::<i64>() {
        return store.get_project(id);
    }
    store.get_project_by_name(key)
}

fn build_orchestrator(
    store: Arc<SqliteStore>,
    config: IndexerConfig,
) -> Orchestrator<HttpAnalysisGateway> {
    let gateway = config
        .analysis_endpoint
        .clone()
        .map(HttpAnalysisGateway::new);
    Orchestrator::new(store, config, gateway)
}

/// Runs an orchestrator operation with a progress bar and Ctrl-C wired to
/// graceful cancellation.
async fn with_progress<Fut>(
    orchestrator: &Orchestrator<HttpAnalysisGateway>,
    cancel: &CancellationToken,
    fut: Fut,
) -> anyhow::Result<crate::indexer::IndexOutcome>
where
    Fut: std::future::Future<Output = crate::error::Result<crate::indexer::IndexOutcome>>,
{
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("stop requested, finishing current file");
            ctrl_c_cancel.cancel();
        }
    });

    let progress = orchestrator.progress();
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{bar:30} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    let bar_handle = bar.clone();
    let render = tokio::spawn(async move {
        loop {
            let snap = progress.snapshot();
            bar_handle.set_length(snap.total_files);
            bar_handle.set_position(snap.processed_files);
            if let Some(current) = snap.current_file {
                bar_handle.set_message(current);
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    });

    let result = fut.await;
    render.abort();
    bar.finish_and_clear();
    Ok(result?)
}

fn print_status(store: &SqliteStore, project: &Project) -> anyhow::Result<()> {
    println!(
        "{} (#{}) [{}] {}",
        project.name,
        project.id,
        project.language,
        project.state
    );
    println!(
        "  {}/{} files, {} entities",
        project.indexed_files, project.total_files, project.total_entities
    );
    let failed = store.entities_with_failed_analysis(project.id)?;
    let unanalyzed = store.entities_without_analysis(project.id)?;
    if project.total_entities > 0 {
        let analyzed = project.total_entities.saturating_sub(unanalyzed);
        println!(
            "  analyzed {}/{} ({:.0}%), {} failed",
            analyzed,
            project.total_entities,
            analyzed as f64 * 100.0 / project.total_entities as f64,
            failed
        );
    }
    if project.tokens_used > 0 {
        println!("  {} analysis tokens used", project.tokens_used);
    }
    if let Some(current) = &project.current_file_path {
        println!("  current: {current}");
    }
    if let Some(cursor) = &project.last_indexed_file_path {
        println!("  checkpoint: {cursor}");
    }
    if let Some(message) = &project.status_message {
        println!("  {message}");
    }
    Ok(())
}
