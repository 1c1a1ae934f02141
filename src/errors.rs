//! Typed error hierarchy for the taskforge orchestrator.
//!
//! Four top-level enums cover the subsystems:
//! - `GraphError`: task graph construction failures (fatal, run never starts)
//! - `StateError`: state store failures (conflicts, missing projects, corruption)
//! - `TaskError`: per-task attempt failures (absorbed into task status)
//! - `OrchestratorError`: run-level failures surfaced by the scheduler

use crate::task::TaskStatus;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors from building a task graph.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Cycle detected in task dependencies: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("Unknown dependency '{dependency}' in task '{task}': no task with that id exists")]
    UnknownDependency { task: String, dependency: String },

    #[error("Duplicate task id: {id}")]
    DuplicateTask { id: String },
}

/// Errors from the state store.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("No state recorded for project '{project_id}'")]
    NotFound { project_id: String },

    #[error("Project '{project_id}' already has recorded state; use resume or force")]
    ProjectExists { project_id: String },

    #[error("Conflict on task '{task_id}': expected {expected}, found {actual}")]
    Conflict {
        task_id: String,
        expected: TaskStatus,
        actual: TaskStatus,
    },

    #[error("Illegal transition for task '{task_id}': {from} -> {to}")]
    IllegalTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Task '{task_id}' is not part of project '{project_id}'")]
    UnknownTask { project_id: String, task_id: String },

    #[error("Checkpoint {sequence} not found for project '{project_id}'")]
    CheckpointNotFound { project_id: String, sequence: u64 },

    #[error("Corrupt checkpoint data at {path}: {source}")]
    CheckpointCorruption {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("State I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to lock state at {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize state for project '{project_id}': {source}")]
    Serialize {
        project_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("State store call did not complete: {message}")]
    Interrupted { message: String },
}

impl StateError {
    /// Check if this is an optimistic-concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Check if this error means persisted state could not be parsed.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::CheckpointCorruption { .. })
    }
}

/// Errors from a single task attempt.
///
/// These never abort a run; the scheduler folds them into task status.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TaskError {
    #[error("Generation failed on attempt {attempt}: {message}")]
    Generation { attempt: u32, message: String },

    #[error("Review rejected on attempt {attempt}: {approvals}/{total} approvals (threshold {threshold})")]
    ReviewRejected {
        attempt: u32,
        approvals: usize,
        total: usize,
        threshold: usize,
    },

    #[error("Circuit open for backend '{backend}'")]
    CircuitOpen { backend: String },

    #[error("Generation timed out after {:?} on attempt {attempt}", .after)]
    Timeout { attempt: u32, after: Duration },

    #[error("Task cancelled")]
    Cancelled,
}

impl TaskError {
    /// Whether the failure consumes one unit of the task's retry budget.
    pub fn counts_against_budget(&self) -> bool {
        !matches!(self, Self::CircuitOpen { .. } | Self::Cancelled)
    }
}

/// Run-level errors from the scheduler.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_error_cycle_renders_path() {
        let err = GraphError::Cycle {
            path: vec!["a".into(), "c".into(), "b".into(), "a".into()],
        };
        assert_eq!(
            err.to_string(),
            "Cycle detected in task dependencies: a -> c -> b -> a"
        );
    }

    #[test]
    fn state_error_conflict_carries_statuses() {
        let err = StateError::Conflict {
            task_id: "t1".to_string(),
            expected: TaskStatus::Pending,
            actual: TaskStatus::Running,
        };
        assert!(err.is_conflict());
        assert!(!err.is_corruption());
        let msg = err.to_string();
        assert!(msg.contains("pending"));
        assert!(msg.contains("running"));
    }

    #[test]
    fn state_error_corruption_is_detectable() {
        let source = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err = StateError::CheckpointCorruption {
            path: PathBuf::from("/tmp/p.json"),
            source,
        };
        assert!(err.is_corruption());
        assert!(err.to_string().contains("/tmp/p.json"));
    }

    #[test]
    fn task_error_budget_accounting() {
        assert!(
            TaskError::Generation {
                attempt: 1,
                message: "boom".into()
            }
            .counts_against_budget()
        );
        assert!(
            TaskError::ReviewRejected {
                attempt: 1,
                approvals: 6,
                total: 12,
                threshold: 8
            }
            .counts_against_budget()
        );
        assert!(
            !TaskError::CircuitOpen {
                backend: "agent".into()
            }
            .counts_against_budget()
        );
        assert!(!TaskError::Cancelled.counts_against_budget());
    }

    #[test]
    fn orchestrator_error_converts_from_graph_error() {
        let err: OrchestratorError = GraphError::DuplicateTask { id: "x".into() }.into();
        match err {
            OrchestratorError::Graph(GraphError::DuplicateTask { id }) => assert_eq!(id, "x"),
            other => panic!("Expected Graph(DuplicateTask), got {other:?}"),
        }
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&GraphError::DuplicateTask { id: "x".into() });
        assert_std_error(&StateError::NotFound {
            project_id: "p".into(),
        });
        assert_std_error(&TaskError::Cancelled);
    }
}
