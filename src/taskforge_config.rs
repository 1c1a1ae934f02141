//! Unified configuration for taskforge.
//!
//! Settings live in `.taskforge/taskforge.toml`. Every section is optional
//! and falls back to defaults. Values are layered file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [project]
//! name = "shop"
//! context = "Monolithic web shop"
//! tech_stack = ["rust", "axum", "postgres"]
//!
//! [scheduler]
//! max_parallel = 4
//! generation_timeout_secs = 600
//! cancel_grace_secs = 10
//!
//! [retry]
//! max_attempts = 3
//! base_delay_ms = 1000
//! max_delay_ms = 30000
//! multiplier = 2.0
//! jitter = 0.2
//!
//! [circuit_breaker]
//! failure_threshold = 5
//! cooldown_secs = 60
//!
//! [generator]
//! backend = "agent-cli"
//! command = "agent"
//! args = ["generate"]
//!
//! [review]
//! threshold = 2
//! aggregate_timeout_secs = 300
//! reviewer_timeout_secs = 120
//! blocking_severity = "warning"
//!
//! [[review.reviewers]]
//! id = "security"
//! command = "agent"
//! args = ["review", "--focus", "security"]
//!
//! [logging]
//! level = "info"
//! json = false
//! file = true
//! ```

use crate::dag::SchedulerConfig;
use crate::generator::CommandGeneratorConfig;
use crate::resilience::{CircuitBreakerConfig, RetryPolicy};
use crate::review::{CommandReviewerConfig, FindingSeverity, PanelConfig, default_threshold};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the configuration directory inside a project.
pub const CONFIG_DIR: &str = ".taskforge";
/// Name of the configuration file inside [`CONFIG_DIR`].
pub const CONFIG_FILE: &str = "taskforge.toml";

/// Overrides `[scheduler] max_parallel`.
pub const ENV_MAX_PARALLEL: &str = "TASKFORGE_MAX_PARALLEL";
/// Overrides `[generator] command`.
pub const ENV_GENERATOR_CMD: &str = "TASKFORGE_GENERATOR_CMD";

/// Project-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectSection {
    /// Project id (optional, defaults to the graph file's project or directory name)
    #[serde(default)]
    pub name: Option<String>,
    /// Description passed to the generator and reviewers
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub tech_stack: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSection {
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    #[serde(default = "default_generation_timeout_secs")]
    pub generation_timeout_secs: u64,
    #[serde(default = "default_cancel_grace_secs")]
    pub cancel_grace_secs: u64,
}

fn default_max_parallel() -> usize {
    4
}

fn default_generation_timeout_secs() -> u64 {
    600
}

fn default_cancel_grace_secs() -> u64 {
    10
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            generation_timeout_secs: default_generation_timeout_secs(),
            cancel_grace_secs: default_cancel_grace_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Fraction of the delay applied as random jitter, 0.0 to 1.0
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.2
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSection {
    /// Consecutive failures that open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_secs() -> u64 {
    60
}

impl Default for CircuitBreakerSection {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

/// Generation backend invoked as a child process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorSection {
    /// Backend identity; the circuit breaker tracks failures per backend
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Command to run (default: "agent")
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_backend() -> String {
    "agent-cli".to_string()
}

impl Default for GeneratorSection {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            command: None,
            args: Vec::new(),
        }
    }
}

/// One reviewer in `[[review.reviewers]]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewerSection {
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewSection {
    /// Approvals required; unset means two thirds of the panel, rounded up
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<usize>,
    #[serde(default = "default_aggregate_timeout_secs")]
    pub aggregate_timeout_secs: u64,
    #[serde(default = "default_reviewer_timeout_secs")]
    pub reviewer_timeout_secs: u64,
    #[serde(default)]
    pub blocking_severity: FindingSeverity,
    #[serde(default)]
    pub reviewers: Vec<ReviewerSection>,
}

fn default_aggregate_timeout_secs() -> u64 {
    300
}

fn default_reviewer_timeout_secs() -> u64 {
    120
}

impl Default for ReviewSection {
    fn default() -> Self {
        Self {
            threshold: None,
            aggregate_timeout_secs: default_aggregate_timeout_secs(),
            reviewer_timeout_secs: default_reviewer_timeout_secs(),
            blocking_severity: FindingSeverity::default(),
            reviewers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
    /// Also write a daily rolling log under `.taskforge/logs`
    #[serde(default = "default_log_file")]
    pub file: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> bool {
    true
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file: default_log_file(),
        }
    }
}

/// The complete taskforge.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskforgeToml {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSection,
    #[serde(default)]
    pub generator: GeneratorSection,
    #[serde(default)]
    pub review: ReviewSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl TaskforgeToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse taskforge.toml")?;
        config.check_numbers()?;
        Ok(config)
    }

    /// Reject floating-point settings no retry policy can use.
    fn check_numbers(&self) -> Result<()> {
        for (key, value) in [
            ("retry.jitter", self.retry.jitter),
            ("retry.multiplier", self.retry.multiplier),
        ] {
            if !value.is_finite() {
                anyhow::bail!(
                    "Invalid taskforge.toml: {} must be a finite number, got {}",
                    key,
                    value
                );
            }
        }
        Ok(())
    }

    /// Load `taskforge.toml` from a config directory.
    /// Returns default configuration if the file doesn't exist.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize taskforge.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Generator command; the environment overrides the file.
    pub fn generator_cmd(&self) -> String {
        std::env::var(ENV_GENERATOR_CMD)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.generator.command.clone())
            .unwrap_or_else(|| "agent".to_string())
    }

    /// Max parallelism; the environment overrides the file.
    pub fn max_parallel(&self) -> usize {
        std::env::var(ENV_MAX_PARALLEL)
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(self.scheduler.max_parallel)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            multiplier: self.retry.multiplier,
            jitter: self.retry.jitter.clamp(0.0, 1.0),
        }
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_breaker.failure_threshold.max(1),
            cooldown: Duration::from_secs(self.circuit_breaker.cooldown_secs),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::default()
            .with_max_parallel(self.max_parallel())
            .with_generation_timeout(Duration::from_secs(self.scheduler.generation_timeout_secs))
            .with_cancel_grace(Duration::from_secs(self.scheduler.cancel_grace_secs))
            .with_retry(self.retry_policy())
            .with_project(&self.project.context, self.project.tech_stack.clone())
    }

    pub fn panel_config(&self) -> PanelConfig {
        let config = PanelConfig::default()
            .with_aggregate_timeout(Duration::from_secs(self.review.aggregate_timeout_secs))
            .with_reviewer_timeout(Duration::from_secs(self.review.reviewer_timeout_secs))
            .with_blocking_severity(self.review.blocking_severity);
        match self.review.threshold {
            Some(threshold) => config.with_threshold(threshold),
            None => config,
        }
    }

    /// Command generator settings, run from `working_dir`.
    pub fn generator_config(&self, working_dir: &Path) -> CommandGeneratorConfig {
        CommandGeneratorConfig::new(&self.generator.backend, &self.generator_cmd())
            .with_args(self.generator.args.clone())
            .with_working_dir(working_dir.to_path_buf())
            .with_timeout(Duration::from_secs(self.scheduler.generation_timeout_secs))
    }

    /// One command reviewer per `[[review.reviewers]]` entry.
    pub fn reviewer_configs(&self, working_dir: &Path) -> Vec<CommandReviewerConfig> {
        self.review
            .reviewers
            .iter()
            .map(|r| {
                CommandReviewerConfig::new(&r.id, &r.command)
                    .with_args(r.args.clone())
                    .with_working_dir(working_dir.to_path_buf())
                    .with_timeout(Duration::from_secs(self.review.reviewer_timeout_secs))
            })
            .collect()
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.scheduler.max_parallel == 0 {
            warnings.push("scheduler.max_parallel is 0; at least one task always runs".to_string());
        }

        if self.retry.max_attempts == 0 {
            warnings.push("retry.max_attempts is 0; tasks fail without a generator call".to_string());
        }

        if !(0.0..=1.0).contains(&self.retry.jitter) {
            warnings.push(format!(
                "retry.jitter {} is outside 0.0..=1.0 and will be clamped",
                self.retry.jitter
            ));
        }

        if self.retry.multiplier < 1.0 {
            warnings.push(format!(
                "retry.multiplier {} shrinks delays between attempts",
                self.retry.multiplier
            ));
        }

        let panel = self.review.reviewers.len();
        if let Some(threshold) = self.review.threshold {
            if threshold > panel {
                warnings.push(format!(
                    "review.threshold {} exceeds panel size {}; every review will be rejected",
                    threshold, panel
                ));
            } else if threshold == 0 && panel > 0 {
                warnings.push("review.threshold is 0; every review will be approved".to_string());
            }
        }

        let mut seen = std::collections::HashSet::new();
        for reviewer in &self.review.reviewers {
            if !seen.insert(reviewer.id.as_str()) {
                warnings.push(format!("Duplicate reviewer id '{}'", reviewer.id));
            }
        }

        warnings
    }

    /// Approvals the panel will need.
    pub fn effective_threshold(&self) -> usize {
        self.review
            .threshold
            .unwrap_or_else(|| default_threshold(self.review.reviewers.len()))
    }
}

/// Unified configuration combining taskforge.toml with CLI settings.
#[derive(Debug, Clone)]
pub struct TaskforgeConfig {
    /// Path to the project directory
    pub project_dir: PathBuf,
    /// Path to the .taskforge directory
    pub config_dir: PathBuf,
    /// Parsed taskforge.toml
    pub toml: TaskforgeToml,
    /// CLI override: verbose mode
    pub verbose: bool,
    /// CLI override for max parallelism
    pub cli_max_parallel: Option<usize>,
}

impl TaskforgeConfig {
    /// Create a config from a project directory.
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let config_dir = project_dir.join(CONFIG_DIR);
        let toml = TaskforgeToml::load_or_default(&config_dir)?;

        Ok(Self {
            project_dir,
            config_dir,
            toml,
            verbose: false,
            cli_max_parallel: None,
        })
    }

    /// Create a config with CLI overrides.
    pub fn with_cli_args(
        project_dir: PathBuf,
        verbose: bool,
        max_parallel: Option<usize>,
    ) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.verbose = verbose;
        config.cli_max_parallel = max_parallel;
        Ok(config)
    }

    /// Max parallelism (CLI → env → file).
    pub fn max_parallel(&self) -> usize {
        self.cli_max_parallel
            .unwrap_or_else(|| self.toml.max_parallel())
            .max(1)
    }

    /// Scheduler settings with CLI overrides applied.
    pub fn scheduler_config(&self) -> SchedulerConfig {
        self.toml
            .scheduler_config()
            .with_max_parallel(self.max_parallel())
    }

    /// Log filter used when `RUST_LOG` is unset.
    pub fn log_level(&self) -> &str {
        if self.verbose {
            "debug"
        } else {
            &self.toml.logging.level
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.config_dir.join("state")
    }

    pub fn audit_dir(&self) -> PathBuf {
        self.config_dir.join("audit")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.config_dir.join("logs")
    }

    /// Validate configuration and return warnings.
    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}
