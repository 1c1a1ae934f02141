//! Execution results for a scheduler run.
//!
//! This module provides types for tracking what happened to each task during
//! a run, and the overall run summary returned to the caller.

use crate::review::{Finding, ReviewDecision};
use crate::task::{FileMap, TaskStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

/// How a single attempt ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    GenerationFailed { reason: String },
    TimedOut,
    ReviewRejected { approvals: usize, total: usize },
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::GenerationFailed { reason } => write!(f, "generation failed: {}", reason),
            Self::TimedOut => write!(f, "timed out"),
            Self::ReviewRejected { approvals, total } => {
                write!(f, "review rejected ({}/{} approvals)", approvals, total)
            }
        }
    }
}

/// One attempt at a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt number
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

/// Blocking findings from one review, kept even when a later attempt succeeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetainedFindings {
    pub attempt: u32,
    pub approvals: usize,
    pub total_reviewers: usize,
    pub findings: Vec<Finding>,
}

/// Outcome of one task in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub attempts: Vec<AttemptRecord>,
    /// Accepted files (succeeded tasks only)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub files: FileMap,
    /// Why the task did not succeed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Final review decision, if the task reached review
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<ReviewDecision>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub review_history: Vec<RetainedFindings>,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Succeeded in an earlier run and was not re-dispatched
    #[serde(default)]
    pub resumed: bool,
}

impl TaskResult {
    /// Create a result with no attempts.
    pub fn new(task_id: &str, status: TaskStatus) -> Self {
        Self {
            task_id: task_id.to_string(),
            status,
            attempts: Vec::new(),
            files: FileMap::new(),
            error: None,
            review: None,
            review_history: Vec::new(),
            duration: Duration::ZERO,
            resumed: false,
        }
    }

    /// Set the error message.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Mark as carried over from a previous run.
    pub fn resumed(mut self) -> Self {
        self.resumed = true;
        self
    }

    /// Number of generator calls made.
    pub fn attempts_made(&self) -> u32 {
        self.attempts.len() as u32
    }
}

/// Summary of a scheduler run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub project_id: String,
    /// Tasks in the graph
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub blocked: usize,
    pub skipped: usize,
    /// Tasks left pending (only after cancellation)
    pub pending: usize,
    pub cancelled: bool,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Results for each task, keyed by task id
    #[serde(default)]
    pub results: BTreeMap<String, TaskResult>,
}

impl RunSummary {
    /// Create a new empty summary.
    pub fn new(project_id: &str, total: usize) -> Self {
        Self {
            project_id: project_id.to_string(),
            total,
            ..Default::default()
        }
    }

    /// Add a task result to the summary.
    pub fn add_result(&mut self, result: TaskResult) {
        match result.status {
            TaskStatus::Succeeded => self.succeeded += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::Blocked => self.blocked += 1,
            TaskStatus::Skipped => self.skipped += 1,
            TaskStatus::Pending | TaskStatus::Running => self.pending += 1,
        }
        self.results.insert(result.task_id.clone(), result);
    }

    /// Check if every task succeeded.
    pub fn all_success(&self) -> bool {
        !self.cancelled && self.succeeded == self.total
    }

    /// Check if any task failed or was blocked.
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.blocked > 0
    }

    /// Tasks that did not succeed, with their reasons, in id order.
    pub fn failure_reasons(&self) -> Vec<(&str, &str)> {
        self.results
            .values()
            .filter(|r| matches!(r.status, TaskStatus::Failed | TaskStatus::Blocked))
            .map(|r| (r.task_id.as_str(), r.error.as_deref().unwrap_or("unknown")))
            .collect()
    }

    /// Total generator calls across all tasks.
    pub fn total_attempts(&self) -> u32 {
        self.results.values().map(TaskResult::attempts_made).sum()
    }

    /// Get completion percentage.
    pub fn completion_percentage(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.succeeded as f64 / self.total as f64) * 100.0
    }
}

/// Tracks execution timing.
pub struct ExecutionTimer {
    start: Instant,
}

impl ExecutionTimer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed time since start.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Serde helpers for Duration serialization as milliseconds.
pub mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
