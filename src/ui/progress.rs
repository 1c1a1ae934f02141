//! Run progress UI.
//!
//! Renders scheduler events in one of three modes:
//! - `full`: progress bars per in-flight task plus an overall bar
//! - `minimal`: one line per finished task
//! - `json`: every event as a JSON line, for machine consumption

use crate::dag::{RunSummary, TaskEvent};
use crate::task::TaskStatus;
use crate::ui::icons::{
    BLOCKER, CHECK, CIRCUIT, CLOCK, CROSS, RETRY, REVIEW, RUNNING, SKIP, SPARKLE, WAVE,
};
use console::{Term, style};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Output mode for the run UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UiMode {
    /// Rich terminal UI with progress bars
    #[default]
    Full,
    /// Single-line status updates
    Minimal,
    /// JSON-formatted events
    Json,
}

impl std::str::FromStr for UiMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "minimal" => Self::Minimal,
            _ => Self::Full,
        })
    }
}

impl UiMode {
    /// Parse UI mode from string, falling back to `Full`.
    pub fn parse(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}

fn bar_style(template: &str, chars: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars(chars)
}

/// Run progress UI.
///
/// Events are handled sequentially from a single consumer task; the bar map
/// lock is held only for map updates.
pub struct TaskUI {
    mode: UiMode,
    multi: MultiProgress,
    header_bar: ProgressBar,
    task_bars: Mutex<HashMap<String, ProgressBar>>,
    total_tasks: usize,
    verbose: bool,
    term: Term,
}

impl TaskUI {
    pub fn new(total_tasks: usize, mode: UiMode, verbose: bool) -> Self {
        let multi = MultiProgress::new();
        let header_bar = multi.add(ProgressBar::new(total_tasks as u64));
        header_bar.set_style(bar_style(
            "{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}",
            "█▓▒░",
        ));
        header_bar.set_prefix("Tasks");
        header_bar.set_message("Starting...");
        if mode != UiMode::Full {
            header_bar.set_draw_target(indicatif::ProgressDrawTarget::hidden());
        }

        Self {
            mode,
            multi,
            header_bar,
            task_bars: Mutex::new(HashMap::new()),
            total_tasks,
            verbose,
            term: Term::stdout(),
        }
    }

    pub fn mode(&self) -> UiMode {
        self.mode
    }

    fn bars(&self) -> MutexGuard<'_, HashMap<String, ProgressBar>> {
        self.task_bars.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn println(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Handle a scheduler event.
    pub fn handle_event(&self, event: &TaskEvent) {
        match self.mode {
            UiMode::Json => self.handle_json(event),
            UiMode::Minimal => self.handle_minimal(event),
            UiMode::Full => self.handle_full(event),
        }
    }

    fn handle_json(&self, event: &TaskEvent) {
        if let Ok(json) = serde_json::to_string(event) {
            let _ = writeln!(&self.term, "{}", json);
        }
    }

    fn handle_minimal(&self, event: &TaskEvent) {
        match event {
            TaskEvent::TaskFinished {
                task_id,
                status,
                error,
                ..
            } => {
                if status.is_success() {
                    let _ = writeln!(&self.term, "✓ {}", task_id);
                } else {
                    let _ = writeln!(
                        &self.term,
                        "✗ {} ({})",
                        task_id,
                        error.as_deref().unwrap_or("failed")
                    );
                }
            }
            TaskEvent::TaskBlocked { task_id, blocked_by } => {
                let _ = writeln!(&self.term, "- {} (blocked by {})", task_id, blocked_by.join(", "));
            }
            TaskEvent::RunCompleted { summary } => {
                let _ = writeln!(
                    &self.term,
                    "Done: {}/{} {}",
                    summary.succeeded,
                    summary.total,
                    if summary.all_success() { "✓" } else { "✗" }
                );
            }
            _ => {}
        }
    }

    fn handle_full(&self, event: &TaskEvent) {
        match event {
            TaskEvent::RunStarted {
                project_id,
                total,
                pending,
                resumed,
            } => self.on_run_started(project_id, *total, *pending, *resumed),
            TaskEvent::TaskStarted { task_id, .. } => self.on_task_started(task_id),
            TaskEvent::AttemptStarted {
                task_id,
                attempt,
                max_attempts,
            } => {
                if let Some(bar) = self.bars().get(task_id) {
                    bar.set_message(format!(
                        "{}attempt {}/{}",
                        RUNNING,
                        style(attempt).cyan(),
                        max_attempts
                    ));
                }
            }
            TaskEvent::AttemptFailed {
                task_id,
                attempt,
                error,
                will_retry,
            } => {
                if *will_retry {
                    self.println(format!(
                        "    {}{} attempt {} failed, retrying: {}",
                        RETRY,
                        style(task_id).yellow(),
                        attempt,
                        style(error).dim()
                    ));
                } else if self.verbose {
                    self.println(format!(
                        "    {}{} attempt {} failed: {}",
                        CROSS,
                        style(task_id).yellow(),
                        attempt,
                        style(error).dim()
                    ));
                }
            }
            TaskEvent::CircuitOpen {
                task_id,
                backend,
                retry_after_ms,
            } => {
                if let Some(bar) = self.bars().get(task_id) {
                    bar.set_message(format!(
                        "{}circuit open for {} ({})",
                        CIRCUIT,
                        backend,
                        format_duration(Duration::from_millis(*retry_after_ms))
                    ));
                }
            }
            TaskEvent::ReviewStarted {
                task_id, reviewers, ..
            } => {
                if let Some(bar) = self.bars().get(task_id) {
                    bar.set_message(format!("{}reviewing ({} reviewers)", REVIEW, reviewers));
                }
            }
            TaskEvent::ReviewCompleted {
                task_id,
                attempt,
                approvals,
                total,
                threshold,
                approved,
            } => self.on_review_completed(task_id, *attempt, *approvals, *total, *threshold, *approved),
            TaskEvent::TaskBlocked { task_id, blocked_by } => {
                self.header_bar.inc(1);
                self.println(format!(
                    "  {}Task {} blocked by {}",
                    BLOCKER,
                    style(task_id).yellow(),
                    style(blocked_by.join(", ")).dim()
                ));
            }
            TaskEvent::TaskFinished {
                task_id,
                status,
                attempts,
                error,
            } => self.on_task_finished(task_id, *status, *attempts, error.as_deref()),
            TaskEvent::RunCompleted { summary } => self.on_run_completed(summary),
        }
    }

    fn on_run_started(&self, project_id: &str, total: usize, pending: usize, resumed: usize) {
        self.header_bar.set_position(resumed as u64);
        self.header_bar
            .set_message(format!("{} ({} pending)", project_id, pending));
        if resumed > 0 {
            self.println(format!(
                "{}Resuming {}: {} of {} tasks already succeeded",
                RETRY,
                style(project_id).bold(),
                style(resumed).green(),
                total
            ));
        }
    }

    fn on_task_started(&self, task_id: &str) {
        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("  {prefix:.bold} {spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_prefix(format!("[{}]", task_id));
        bar.set_message(format!("{}starting", RUNNING));
        bar.enable_steady_tick(Duration::from_millis(100));
        self.bars().insert(task_id.to_string(), bar);

        if self.verbose {
            self.println(format!("  {} Task {} dispatched", style("▶").cyan(), style(task_id).yellow()));
        }
    }

    fn on_review_completed(
        &self,
        task_id: &str,
        attempt: u32,
        approvals: usize,
        total: usize,
        threshold: usize,
        approved: bool,
    ) {
        let (emoji, verdict) = if approved {
            (CHECK, style("APPROVED").green())
        } else {
            (CROSS, style("REJECTED").red())
        };
        self.println(format!(
            "    {}Review for {} (attempt {}): {} {}/{} approvals, threshold {}",
            emoji, task_id, attempt, verdict, approvals, total, threshold
        ));
    }

    fn on_task_finished(&self, task_id: &str, status: TaskStatus, attempts: u32, error: Option<&str>) {
        if let Some(bar) = self.bars().remove(task_id) {
            bar.finish_and_clear();
        }
        self.header_bar.inc(1);

        if status.is_success() {
            self.println(format!(
                "  {}Task {} {} ({} attempt{})",
                SPARKLE,
                style(task_id).green().bold(),
                style("succeeded").green(),
                attempts,
                if attempts == 1 { "" } else { "s" }
            ));
        } else {
            self.println(format!(
                "  {}Task {} {}: {}",
                CROSS,
                style(task_id).red().bold(),
                style(status).red(),
                error.unwrap_or("unknown error")
            ));
        }
    }

    fn on_run_completed(&self, summary: &RunSummary) {
        for (_, bar) in self.bars().drain() {
            bar.finish_and_clear();
        }
        self.header_bar.finish_and_clear();

        let rule = style("═".repeat(60)).cyan().to_string();
        self.println("");
        self.println(&rule);
        if summary.cancelled {
            self.println(format!("{}Run {}", BLOCKER, style("CANCELLED").yellow().bold()));
        } else if summary.all_success() {
            self.println(format!("{}Run {} {}", SPARKLE, style("COMPLETE").green().bold(), SPARKLE));
        } else {
            self.println(format!("{}Run {}", CROSS, style("INCOMPLETE").red().bold()));
        }
        self.println(&rule);
        self.println("");

        self.println(format!(
            "{} Tasks: {}/{} succeeded",
            CLOCK,
            style(summary.succeeded).green().bold(),
            summary.total
        ));
        if summary.failed > 0 {
            self.println(format!("     {} failed", style(summary.failed).red().bold()));
        }
        if summary.blocked > 0 {
            self.println(format!("     {} blocked", style(summary.blocked).red()));
        }
        if summary.skipped > 0 {
            self.println(format!("     {}{} skipped", SKIP, style(summary.skipped).yellow()));
        }
        if summary.pending > 0 {
            self.println(format!("     {} left pending", style(summary.pending).yellow()));
        }
        self.println(format!(
            "     Attempts: {}, duration: {}",
            summary.total_attempts(),
            style(format_duration(summary.duration)).cyan()
        ));

        let failures = summary.failure_reasons();
        if !failures.is_empty() {
            self.println("");
            self.println(format!("{}", style("Failures:").underlined()));
            for (task_id, reason) in failures {
                self.println(format!("  {} {}: {}", style("✗").red(), task_id, reason));
            }
        }

        if self.verbose {
            self.println("");
            self.println(format!("{}", style("Task breakdown:").underlined()));
            for result in summary.results.values() {
                let marker = if result.status.is_success() {
                    style("✓").green()
                } else {
                    style("✗").red()
                };
                self.println(format!(
                    "  {} {} - {}, {} attempts, {}{}",
                    marker,
                    result.task_id,
                    result.status,
                    result.attempts_made(),
                    format_duration(result.duration),
                    if result.resumed { " (resumed)" } else { "" }
                ));
            }
        }
        self.println("");
    }

    /// Print the graph's execution waves before a run.
    pub fn print_graph_analysis(&self, waves: &[Vec<String>]) {
        if self.mode != UiMode::Full {
            return;
        }

        self.println(format!("\n{} Task graph", style("═".repeat(60)).cyan()));
        self.println(format!(
            "  {} tasks in {} waves",
            style(self.total_tasks).yellow().bold(),
            style(waves.len()).yellow().bold()
        ));
        self.println("");
        for (i, wave) in waves.iter().enumerate() {
            let parallel = if wave.len() > 1 {
                format!(" {}", style("(parallel)").dim())
            } else {
                String::new()
            };
            self.println(format!(
                "  {}Wave {}: [{}]{}",
                WAVE,
                style(i).cyan(),
                style(wave.join(", ")).yellow(),
                parallel
            ));
        }
        self.println("");
    }
}

/// Format a duration for display.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs > 0 {
        format!("{}s", secs)
    } else {
        format!("{}ms", d.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ui_mode_parse() {
        assert_eq!(UiMode::parse("json"), UiMode::Json);
        assert_eq!(UiMode::parse("JSON"), UiMode::Json);
        assert_eq!(UiMode::parse("minimal"), UiMode::Minimal);
        assert_eq!(UiMode::parse("full"), UiMode::Full);
        assert_eq!(UiMode::parse("anything_else"), UiMode::Full);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::ZERO), "0ms");
        assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 1m 1s");
    }

    #[test]
    fn test_task_ui_tracks_bars() {
        let ui = TaskUI::new(2, UiMode::Full, false);
        ui.handle_event(&TaskEvent::TaskStarted {
            task_id: "a".into(),
            running: 1,
        });
        assert!(ui.bars().contains_key("a"));

        ui.handle_event(&TaskEvent::TaskFinished {
            task_id: "a".into(),
            status: TaskStatus::Succeeded,
            attempts: 1,
            error: None,
        });
        assert!(ui.bars().is_empty());
        assert_eq!(ui.header_bar.position(), 1);
    }

    #[test]
    fn test_task_event_json_shape() {
        let event = TaskEvent::TaskBlocked {
            task_id: "d".into(),
            blocked_by: vec!["b".into()],
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"task_blocked\""));
        assert!(json.contains("\"blocked_by\":[\"b\"]"));
    }
}
