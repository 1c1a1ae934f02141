//! Project state inspection: status, checkpoints, restore, and run history.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;

use taskforge::audit::AuditLogger;
use taskforge::config::Config;
use taskforge::orchestrator::{FileStateStore, StateStore};
use taskforge::task::{TaskGraphFile, TaskStatus};

/// Resolve the project id, using the default task graph when it exists.
fn resolve_project(config: &Config, project: Option<&str>) -> String {
    let graph = if project.is_none() && config.graph_file.exists() {
        TaskGraphFile::load(&config.graph_file).ok()
    } else {
        None
    };
    config.project_id(project, graph.as_ref())
}

fn open_store(project_dir: &Path, project: Option<&str>) -> Result<(FileStateStore, String)> {
    let config = Config::without_graph(project_dir.to_path_buf(), false)?;
    let project_id = resolve_project(&config, project);
    Ok((FileStateStore::new(&config.state_dir), project_id))
}

fn styled_status(status: TaskStatus) -> console::StyledObject<TaskStatus> {
    match status {
        TaskStatus::Succeeded => style(status).green(),
        TaskStatus::Failed | TaskStatus::Blocked => style(status).red(),
        TaskStatus::Running => style(status).cyan(),
        TaskStatus::Skipped => style(status).yellow(),
        TaskStatus::Pending => style(status).dim(),
    }
}

pub fn cmd_status(project_dir: &Path, project: Option<&str>) -> Result<()> {
    let (store, project_id) = open_store(project_dir, project)?;

    println!();
    println!("Project: {}", style(&project_id).bold());
    println!();

    if !store.exists(&project_id)? {
        println!("No recorded state. Run 'taskforge run' to start.");
        println!();
        return Ok(());
    }

    let state = store
        .load(&project_id)
        .with_context(|| format!("Failed to load state for '{}'", project_id))?;

    println!("{:<24} {:<10} Files", "Task", "Status");
    println!("{:<24} {:<10} -----", "-".repeat(24), "-".repeat(10));
    for (task_id, status) in &state.statuses {
        let files = state.artifacts.get(task_id).map(|f| f.len()).unwrap_or(0);
        println!(
            "{:<24} {:<10} {}",
            task_id,
            styled_status(*status),
            if files > 0 { files.to_string() } else { String::new() }
        );
    }
    println!();

    let total = state.statuses.len();
    println!(
        "{}/{} succeeded, {} failed, {} blocked, {} skipped, {} pending",
        state.count(TaskStatus::Succeeded),
        total,
        state.count(TaskStatus::Failed),
        state.count(TaskStatus::Blocked),
        state.count(TaskStatus::Skipped),
        state.count(TaskStatus::Pending) + state.count(TaskStatus::Running),
    );
    if let Some(checkpoint) = state.latest_checkpoint() {
        println!(
            "Latest checkpoint: #{} ({}) at {}",
            checkpoint.sequence,
            checkpoint.stage,
            checkpoint.timestamp.format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!();
    Ok(())
}

pub fn cmd_checkpoints(project_dir: &Path, project: Option<&str>) -> Result<()> {
    let (store, project_id) = open_store(project_dir, project)?;
    let state = store
        .load(&project_id)
        .with_context(|| format!("Failed to load state for '{}'", project_id))?;

    println!();
    println!("Checkpoints for {}", style(&project_id).bold());
    println!();
    println!("{:>6}  {:<19}  {:<14} Task", "Seq", "Timestamp", "Stage");
    for checkpoint in &state.checkpoints {
        println!(
            "{:>6}  {:<19}  {:<14} {}",
            checkpoint.sequence,
            checkpoint.timestamp.format("%Y-%m-%d %H:%M:%S"),
            checkpoint.stage,
            checkpoint.task_id.as_deref().unwrap_or("-")
        );
    }
    println!();
    Ok(())
}

pub fn cmd_restore(project_dir: &Path, sequence: u64, project: Option<&str>) -> Result<()> {
    let (store, project_id) = open_store(project_dir, project)?;
    let state = store
        .restore(&project_id, sequence)
        .with_context(|| format!("Failed to restore '{}' to checkpoint {}", project_id, sequence))?;

    tracing::info!(project_id = %project_id, sequence, "project restored");

    let latest = state.latest_checkpoint().map(|c| c.sequence).unwrap_or(0);
    println!();
    println!(
        "Restored {} to checkpoint #{} (recorded as #{}).",
        style(&project_id).bold(),
        sequence,
        latest
    );
    println!(
        "{} succeeded, {} pending. Run 'taskforge run --resume' to continue.",
        state.count(TaskStatus::Succeeded),
        state.count(TaskStatus::Pending)
    );
    println!();
    Ok(())
}

pub fn cmd_runs(project_dir: &Path) -> Result<()> {
    let config = Config::without_graph(project_dir.to_path_buf(), false)?;
    let logger = AuditLogger::new(&config.audit_dir);
    let runs = logger.list_runs()?;

    println!();
    if runs.is_empty() {
        println!("No recorded runs.");
        println!();
        return Ok(());
    }

    for path in runs {
        match logger.load_run(&path) {
            Ok(run) => {
                let outcome = match (&run.summary, &run.error) {
                    (Some(summary), _) if summary.cancelled => style("cancelled".to_string()).yellow(),
                    (Some(summary), _) if summary.has_failures() => style(format!(
                        "{}/{} succeeded",
                        summary.succeeded, summary.total
                    ))
                    .red(),
                    (Some(summary), _) => {
                        style(format!("{}/{} succeeded", summary.succeeded, summary.total)).green()
                    }
                    (None, Some(error)) => style(format!("aborted: {}", error)).red(),
                    (None, None) => style("incomplete".to_string()).dim(),
                };
                println!(
                    "{}  {:<20} {}",
                    run.started_at.format("%Y-%m-%d %H:%M:%S"),
                    run.config.project_id,
                    outcome
                );
            }
            Err(e) => println!("{}  {}", path.display(), style(format!("unreadable: {}", e)).red()),
        }
    }
    println!();
    Ok(())
}
