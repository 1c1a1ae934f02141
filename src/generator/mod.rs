//! The generator port: the opaque, possibly slow, possibly failing call that
//! turns a task specification into files.
//!
//! The scheduler only ever sees `GeneratorPort`. One adapter per backend:
//! - `CommandGenerator` spawns an external process speaking JSON on stdio

mod command;

pub use command::{CommandGenerator, CommandGeneratorConfig};

use crate::review::Finding;
use crate::task::FileMap;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Everything a backend needs to produce one task's files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub task_id: String,
    pub specification: String,
    #[serde(default)]
    pub project_context: String,
    #[serde(default)]
    pub tech_stack: Vec<String>,
    /// Accepted files of each direct dependency, keyed by task id
    #[serde(default)]
    pub dependencies_context: BTreeMap<String, FileMap>,
    /// 1-based attempt number, so a backend can vary its approach
    #[serde(default = "default_attempt")]
    pub attempt: u32,
    /// Blocking findings from the review that rejected the previous attempt
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub review_feedback: Vec<Finding>,
}

fn default_attempt() -> u32 {
    1
}

/// What a backend produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub task_id: String,
    pub success: bool,
    #[serde(default)]
    pub files: FileMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(with = "crate::dag::duration_serde", default)]
    pub duration: Duration,
}

impl GenerationResult {
    /// Create a successful result.
    pub fn success(task_id: &str, files: FileMap) -> Self {
        Self {
            task_id: task_id.to_string(),
            success: true,
            files,
            error: None,
            duration: Duration::ZERO,
        }
    }

    /// Create a failed result.
    pub fn failure(task_id: &str, error: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            success: false,
            files: FileMap::new(),
            error: Some(error.to_string()),
            duration: Duration::ZERO,
        }
    }

    /// Set the measured duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}

/// A code-producing backend.
///
/// Calls must be safe to retry: the scheduler may invoke `generate` several
/// times for the same task.
#[async_trait]
pub trait GeneratorPort: Send + Sync {
    /// Identifies the backend for circuit breaking and logs.
    fn backend_id(&self) -> &str;

    /// Produce files for one task.
    ///
    /// `Err` and `Ok` with `success == false` are both generation failures.
    async fn generate(&self, request: GenerationRequest) -> anyhow::Result<GenerationResult>;
}
