//! Task definition, task status, and JSON graph file loading.
//!
//! This module provides:
//! - `Task` struct representing a single unit of generation work
//! - `TaskStatus` lifecycle enum (the status itself lives in the state store)
//! - `TaskGraphFile` representing the on-disk task graph format

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Files produced for a task, keyed by relative path.
pub type FileMap = BTreeMap<String, String>;

/// Authoritative status of every task in a project, keyed by task id.
pub type StatusMap = BTreeMap<String, TaskStatus>;

/// A unit of work handed to the generator.
///
/// Tasks are immutable once a graph is built; their status is tracked by the
/// state store, never on the task itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// Unique id, stable across resumes
    pub id: String,
    /// Short human-readable title
    pub title: String,
    /// What the generator should produce
    #[serde(default)]
    pub description: String,
    /// Ids of tasks that must succeed before this one is ready
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Tie-break among simultaneously-ready tasks (higher first)
    #[serde(default)]
    pub priority: i32,
}

impl Task {
    /// Create a new task with no dependencies and default priority.
    pub fn new(id: &str, title: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            dependencies: Vec::new(),
            priority: 0,
        }
    }

    /// Set the dependencies of this task.
    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    /// Set the priority of this task.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// The specification text passed to the generator.
    pub fn specification(&self) -> String {
        if self.description.is_empty() {
            self.title.clone()
        } else {
            format!("{}\n\n{}", self.title, self.description)
        }
    }
}

/// Lifecycle status of a task within a project run.
///
/// `Pending → Running → {Succeeded, Failed}` and `Pending → {Blocked, Skipped}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for dependencies or a worker slot
    #[default]
    Pending,
    /// Dispatched to a worker
    Running,
    /// Generated and approved by the review panel
    Succeeded,
    /// Retry budget exhausted
    Failed,
    /// A dependency failed permanently; never attempted
    Blocked,
    /// Excluded from the run by the operator
    Skipped,
}

impl TaskStatus {
    /// Check if the status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Blocked | Self::Skipped
        )
    }

    /// Check if the status is a terminal success.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Check if dependents of a task in this status can never become ready.
    pub fn blocks_dependents(&self) -> bool {
        matches!(self, Self::Failed | Self::Blocked | Self::Skipped)
    }

    /// Check if a resumed run puts a task in this status back to pending.
    pub fn is_retryable_on_resume(&self) -> bool {
        matches!(self, Self::Running | Self::Failed | Self::Blocked)
    }

    /// Check if a direct transition from `self` to `next` is legal.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Blocked)
                | (Pending, Skipped)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Pending)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
            Self::Skipped => "skipped",
        };
        f.pad(s)
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "blocked" => Ok(Self::Blocked),
            "skipped" => Ok(Self::Skipped),
            _ => anyhow::bail!(
                "Invalid task status '{}'. Valid values: pending, running, succeeded, failed, blocked, skipped",
                s
            ),
        }
    }
}

/// The on-disk task graph format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskGraphFile {
    /// Project id the graph belongs to (optional; CLI may override)
    #[serde(default)]
    pub project: Option<String>,
    /// Tasks in insertion order
    pub tasks: Vec<Task>,
}

impl TaskGraphFile {
    /// Load a task graph from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read task graph file: {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse task graph JSON: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_task_builder() {
        let task = Task::new("api", "HTTP API", "Expose endpoints")
            .with_dependencies(["models", "db"])
            .with_priority(3);
        assert_eq!(task.dependencies, vec!["models", "db"]);
        assert_eq!(task.priority, 3);
        assert_eq!(task.specification(), "HTTP API\n\nExpose endpoints");
    }

    #[test]
    fn test_specification_without_description() {
        let task = Task::new("a", "Only a title", "");
        assert_eq!(task.specification(), "Only a title");
    }

    #[test]
    fn test_status_terminal_states() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Succeeded.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Blocked.is_terminal());
        assert!(TaskStatus::Skipped.is_terminal());
    }

    #[test]
    fn test_status_reset_on_resume() {
        assert!(TaskStatus::Running.is_retryable_on_resume());
        assert!(TaskStatus::Failed.is_retryable_on_resume());
        assert!(TaskStatus::Blocked.is_retryable_on_resume());
        assert!(!TaskStatus::Skipped.is_retryable_on_resume());
        assert!(!TaskStatus::Succeeded.is_retryable_on_resume());
        assert!(!TaskStatus::Pending.is_retryable_on_resume());
    }

    #[test]
    fn test_status_transitions() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Succeeded));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Succeeded));
        assert!(!TaskStatus::Succeeded.can_transition_to(TaskStatus::Running));
        assert!(!TaskStatus::Blocked.can_transition_to(TaskStatus::Running));
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Succeeded,
            TaskStatus::Failed,
            TaskStatus::Blocked,
            TaskStatus::Skipped,
        ] {
            let parsed: TaskStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("done".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_graph_file_load_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        std::fs::write(
            &path,
            r#"{"project": "shop", "tasks": [{"id": "a", "title": "A"}, {"id": "b", "title": "B", "dependencies": ["a"], "priority": 2}]}"#,
        )
        .unwrap();

        let file = TaskGraphFile::load(&path).unwrap();
        assert_eq!(file.project.as_deref(), Some("shop"));
        assert_eq!(file.tasks.len(), 2);
        assert!(file.tasks[0].dependencies.is_empty());
        assert_eq!(file.tasks[0].priority, 0);
        assert_eq!(file.tasks[1].dependencies, vec!["a"]);
    }

    #[test]
    fn test_graph_file_load_invalid_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        std::fs::write(&path, "not json").unwrap();
        let err = TaskGraphFile::load(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse task graph JSON"));
    }
}
