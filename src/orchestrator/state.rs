//! Project state: the authoritative status map, accepted artifacts, and the
//! append-only checkpoint log.
//!
//! Every mutation goes through a method here so both store implementations
//! share the same transition rules.

use crate::errors::StateError;
use crate::task::{FileMap, StatusMap, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Stage recorded when a project is created from a graph.
pub const STAGE_CREATED: &str = "created";
/// Stage recorded when an existing project is reconciled for a resumed run.
pub const STAGE_RESUMED: &str = "resumed";

/// Immutable snapshot of the status map, appended on every transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Strictly increasing within a project
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    /// What produced the checkpoint ("created", "running", "restored:4", ...)
    pub stage: String,
    /// Task touched by the transition, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Full copy of the status map after the change
    pub statuses: StatusMap,
}

/// Durable record of one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectState {
    pub project_id: String,
    pub statuses: StatusMap,
    /// Files of succeeded tasks, keyed by task id
    #[serde(default)]
    pub artifacts: BTreeMap<String, FileMap>,
    #[serde(default)]
    pub checkpoints: Vec<Checkpoint>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectState {
    /// Create a fresh state with every task pending.
    pub fn new<I, S>(project_id: &str, task_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let now = Utc::now();
        let statuses = task_ids
            .into_iter()
            .map(|id| (id.into(), TaskStatus::Pending))
            .collect();

        let mut state = Self {
            project_id: project_id.to_string(),
            statuses,
            artifacts: BTreeMap::new(),
            checkpoints: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        state.record_checkpoint(STAGE_CREATED, None);
        state
    }

    /// Get the status of a task.
    pub fn status(&self, task_id: &str) -> Option<TaskStatus> {
        self.statuses.get(task_id).copied()
    }

    /// Get the most recent checkpoint.
    pub fn latest_checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoints.last()
    }

    /// Get a checkpoint by sequence number.
    pub fn checkpoint(&self, sequence: u64) -> Option<&Checkpoint> {
        self.checkpoints.iter().find(|c| c.sequence == sequence)
    }

    /// Count tasks in the given status.
    pub fn count(&self, status: TaskStatus) -> usize {
        self.statuses.values().filter(|&&s| s == status).count()
    }

    fn next_sequence(&self) -> u64 {
        self.checkpoints.last().map_or(1, |c| c.sequence + 1)
    }

    /// Append a checkpoint of the current status map.
    pub fn record_checkpoint(&mut self, stage: &str, task_id: Option<&str>) -> Checkpoint {
        let checkpoint = Checkpoint {
            sequence: self.next_sequence(),
            timestamp: Utc::now(),
            stage: stage.to_string(),
            task_id: task_id.map(str::to_string),
            statuses: self.statuses.clone(),
        };
        self.updated_at = checkpoint.timestamp;
        self.checkpoints.push(checkpoint.clone());
        checkpoint
    }

    /// Move a task from `expected` to `new_status`.
    ///
    /// Fails without touching the state when the task is unknown, its current
    /// status differs from `expected`, or the move is not a legal lifecycle
    /// step. Artifacts, when given, replace whatever the task had before.
    pub fn apply_transition(
        &mut self,
        task_id: &str,
        expected: TaskStatus,
        new_status: TaskStatus,
        artifacts: Option<FileMap>,
    ) -> Result<Checkpoint, StateError> {
        let actual = self
            .status(task_id)
            .ok_or_else(|| StateError::UnknownTask {
                project_id: self.project_id.clone(),
                task_id: task_id.to_string(),
            })?;

        if actual != expected {
            return Err(StateError::Conflict {
                task_id: task_id.to_string(),
                expected,
                actual,
            });
        }

        if !expected.can_transition_to(new_status) {
            return Err(StateError::IllegalTransition {
                task_id: task_id.to_string(),
                from: expected,
                to: new_status,
            });
        }

        self.statuses.insert(task_id.to_string(), new_status);
        if let Some(files) = artifacts {
            self.artifacts.insert(task_id.to_string(), files);
        }

        Ok(self.record_checkpoint(&new_status.to_string(), Some(task_id)))
    }

    /// Align the state with the current graph before a resumed run.
    ///
    /// Tasks new to the graph start pending. Tasks left running by a crashed
    /// run, and tasks that failed or were blocked, go back to pending so the
    /// resumed run gets another go at them. Skipped tasks stay skipped.
    /// Returns the ids that were reset.
    pub fn reconcile(&mut self, task_ids: &[String]) -> Vec<String> {
        for id in task_ids {
            self.statuses.entry(id.clone()).or_default();
        }

        let reset: Vec<String> = self
            .statuses
            .iter()
            .filter(|(_, status)| status.is_retryable_on_resume())
            .map(|(id, _)| id.clone())
            .collect();
        for id in &reset {
            self.statuses.insert(id.clone(), TaskStatus::Pending);
        }

        self.record_checkpoint(STAGE_RESUMED, None);
        reset
    }

    /// Reset the status map to the one recorded at `sequence`.
    ///
    /// The log is not truncated; a new `restored:<sequence>` checkpoint is
    /// appended. Artifacts of tasks no longer succeeded are dropped.
    pub fn restore_to(&mut self, sequence: u64) -> Result<Checkpoint, StateError> {
        let snapshot = self
            .checkpoint(sequence)
            .map(|c| c.statuses.clone())
            .ok_or_else(|| StateError::CheckpointNotFound {
                project_id: self.project_id.clone(),
                sequence,
            })?;

        self.statuses = snapshot;
        let statuses = &self.statuses;
        self.artifacts
            .retain(|id, _| statuses.get(id).is_some_and(TaskStatus::is_success));

        Ok(self.record_checkpoint(&format!("restored:{}", sequence), None))
    }
}
