//! Generator adapter that runs an external command.
//!
//! The request is written to the child's stdin as JSON. The child answers on
//! stdout with `{"success": bool, "files": {path: content}, "error": string?}`,
//! optionally surrounded by other output.

use super::{GenerationRequest, GenerationResult, GeneratorPort};
use crate::task::FileMap;
use crate::util::{extract_json_object, run_command};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Default ceiling on a single generator process.
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 600;

/// Configuration for a command-backed generator.
#[derive(Debug, Clone)]
pub struct CommandGeneratorConfig {
    /// Backend id used for circuit breaking
    pub backend: String,
    /// Program to spawn
    pub command: String,
    /// Arguments passed to the program
    pub args: Vec<String>,
    /// Working directory for the child
    pub working_dir: Option<PathBuf>,
    /// Hard limit on the child process; the scheduler applies its own
    /// per-task timeout on top of this
    pub timeout: Duration,
}

impl CommandGeneratorConfig {
    pub fn new(backend: &str, command: &str) -> Self {
        Self {
            backend: backend.to_string(),
            command: command.to_string(),
            args: Vec::new(),
            working_dir: None,
            timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    success: bool,
    #[serde(default)]
    files: FileMap,
    #[serde(default)]
    error: Option<String>,
}

/// Runs one process per generation request.
pub struct CommandGenerator {
    config: CommandGeneratorConfig,
}

impl CommandGenerator {
    pub fn new(config: CommandGeneratorConfig) -> Self {
        Self { config }
    }
}

/// Parse a generator's stdout into a result for `task_id`.
fn parse_generator_output(task_id: &str, output: &str) -> Result<GenerationResult> {
    let json = extract_json_object(output)
        .with_context(|| format!("No JSON object in generator output for task '{}'", task_id))?;
    let wire: WireResponse = serde_json::from_str(json)
        .with_context(|| format!("Malformed generator response for task '{}'", task_id))?;

    Ok(if wire.success {
        GenerationResult::success(task_id, wire.files)
    } else {
        GenerationResult::failure(
            task_id,
            wire.error.as_deref().unwrap_or("generator reported failure"),
        )
    })
}

#[async_trait]
impl GeneratorPort for CommandGenerator {
    fn backend_id(&self) -> &str {
        &self.config.backend
    }

    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResult> {
        let start = Instant::now();
        let input = serde_json::to_string(&request).context("Failed to encode generation request")?;

        tracing::debug!(
            task_id = %request.task_id,
            attempt = request.attempt,
            command = %self.config.command,
            "spawning generator"
        );

        let output = run_command(
            &self.config.command,
            &self.config.args,
            self.config.working_dir.as_deref(),
            &input,
            self.config.timeout,
        )
        .await?;

        Ok(parse_generator_output(&request.task_id, &output)?.with_duration(start.elapsed()))
    }
}
