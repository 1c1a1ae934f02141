//! Run execution and graph validation: `taskforge run`, `taskforge validate`.

use anyhow::{Context, Result};
use console::style;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use taskforge::audit::{AuditLogger, RunConfig};
use taskforge::config::Config;
use taskforge::dag::{RunContext, RunOptions, RunSummary, Scheduler, TaskEvent, TaskGraph};
use taskforge::errors::{OrchestratorError, StateError};
use taskforge::generator::CommandGenerator;
use taskforge::orchestrator::FileStateStore;
use taskforge::resilience::CircuitBreaker;
use taskforge::review::{CommandReviewer, ReviewPanel, Reviewer};
use taskforge::task::TaskGraphFile;
use taskforge::ui::{TaskUI, UiMode};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::super::Cli;

/// Exit code for a run interrupted with Ctrl-C.
const EXIT_CANCELLED: u8 = 130;

/// Arguments of `taskforge run`.
#[derive(Debug, Clone)]
pub struct RunArgs {
    pub graph: Option<PathBuf>,
    pub project: Option<String>,
    pub resume: bool,
    pub force: bool,
    pub max_parallel: Option<usize>,
    pub skip: Vec<String>,
    pub ui: String,
}

fn load_graph(path: &Path) -> Result<(TaskGraphFile, TaskGraph)> {
    let file = TaskGraphFile::load(path)?;
    let graph = TaskGraph::build(file.tasks.clone())
        .with_context(|| format!("Invalid task graph in {}", path.display()))?;
    Ok((file, graph))
}

fn exit_code(summary: &RunSummary) -> ExitCode {
    if summary.cancelled {
        ExitCode::from(EXIT_CANCELLED)
    } else if summary.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

pub async fn cmd_run(cli: &Cli, project_dir: PathBuf, args: RunArgs) -> Result<ExitCode> {
    let config = Config::new(project_dir, cli.verbose, args.max_parallel, args.graph.clone())?;
    config.ensure_directories()?;
    let settings = config.settings();
    let mode = UiMode::parse(&args.ui);

    for warning in settings.validate() {
        tracing::warn!("config: {}", warning);
        if mode == UiMode::Full {
            eprintln!("{} {}", style("warning:").yellow(), warning);
        }
    }

    let (graph_file, graph) = load_graph(&config.graph_file)?;
    let project_id = config.project_id(args.project.as_deref(), Some(&graph_file));

    let generator = Arc::new(CommandGenerator::new(
        settings.toml.generator_config(&config.project_dir),
    ));
    let reviewers: Vec<Arc<dyn Reviewer>> = settings
        .toml
        .reviewer_configs(&config.project_dir)
        .into_iter()
        .map(|c| Arc::new(CommandReviewer::new(c)) as Arc<dyn Reviewer>)
        .collect();
    let panel = ReviewPanel::new(reviewers, settings.toml.panel_config());
    let reviewer_ids = panel.reviewer_ids();

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nCancelling run, waiting for in-flight tasks...");
                cancel.cancel();
            }
        })
    };

    let (tx, mut rx) = mpsc::channel::<TaskEvent>(256);
    let ui = TaskUI::new(graph.len(), mode, cli.verbose);
    ui.print_graph_analysis(&graph.compute_waves());
    let ui_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            ui.handle_event(&event);
        }
    });

    let ctx = RunContext::new(
        Arc::new(FileStateStore::new(&config.state_dir)),
        generator,
    )
    .with_panel(panel)
    .with_breaker(Arc::new(CircuitBreaker::new(settings.toml.breaker_config())))
    .with_config(settings.scheduler_config())
    .with_events(tx)
    .with_cancellation(cancel);

    let options = RunOptions {
        resume: args.resume,
        force: args.force,
        max_parallel: args.max_parallel,
        skip: args.skip.clone(),
    };

    let mut audit = AuditLogger::new(&config.audit_dir);
    audit.start_run(RunConfig {
        project_id: project_id.clone(),
        graph_file: config.graph_file.clone(),
        project_dir: config.project_dir.clone(),
        resume: options.resume,
        force: options.force,
        max_parallel: settings.max_parallel(),
        skip: options.skip.clone(),
        generator_backend: settings.toml.generator.backend.clone(),
        reviewers: reviewer_ids,
    })?;

    tracing::info!(
        project_id = %project_id,
        graph = %config.graph_file.display(),
        tasks = graph.len(),
        "starting run"
    );

    let result = {
        let scheduler = Scheduler::new(ctx);
        scheduler.run(&project_id, &graph, &options).await
    };
    // Every event sender is gone once the scheduler is dropped
    ui_task.await.ok();
    ctrl_c.abort();

    match result {
        Ok(summary) => {
            let code = exit_code(&summary);
            // The run itself is done; a lost audit record must not change its outcome
            match audit.finish_run(summary) {
                Ok(record) => {
                    tracing::info!(audit = %record.display(), "run recorded");
                    if cli.verbose && mode != UiMode::Json {
                        println!("Audit record: {}", record.display());
                    }
                }
                Err(e) => tracing::warn!(error = %format!("{:#}", e), "failed to record finished run"),
            }
            Ok(code)
        }
        Err(e) => {
            if let Err(audit_err) = audit.fail_run(&e.to_string()) {
                tracing::warn!(error = %audit_err, "failed to record aborted run");
            }
            match &e {
                OrchestratorError::State(state) if state.is_corruption() => {
                    eprintln!(
                        "{} recorded state for '{}' is unreadable. Run again with --force to discard it.",
                        style("error:").red().bold(),
                        project_id
                    );
                }
                OrchestratorError::State(StateError::ProjectExists { .. }) => {
                    eprintln!(
                        "{} project '{}' has already run. Use --resume to continue or --force to start over.",
                        style("error:").red().bold(),
                        project_id
                    );
                }
                _ => {}
            }
            Err(e.into())
        }
    }
}

pub fn cmd_validate(project_dir: &Path, graph: Option<PathBuf>) -> Result<()> {
    let config = Config::new(project_dir.to_path_buf(), false, None, graph)?;
    let (graph_file, graph) = load_graph(&config.graph_file)?;

    println!();
    println!("Task graph: {}", config.graph_file.display());
    if let Some(project) = &graph_file.project {
        println!("Project:    {}", project);
    }
    println!(
        "{} tasks, {} roots, {} leaves",
        graph.len(),
        graph.root_tasks().len(),
        graph.leaf_tasks().len()
    );
    println!();

    for (i, wave) in graph.compute_waves().iter().enumerate() {
        println!("  Wave {}: {}", i, wave.join(", "));
    }
    println!();
    println!("{}", style("Task graph is valid.").green());
    Ok(())
}

