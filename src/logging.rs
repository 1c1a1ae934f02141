//! Tracing subscriber setup for the binary.
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to the caller. Console output goes to stderr so it never interleaves with
//! JSON UI output on stdout.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// File name prefix of the daily rolling log.
pub const LOG_FILE_PREFIX: &str = "taskforge.log";

#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines on the console
    pub json: bool,
    /// Most verbose level shown on the console
    pub console_level: LevelFilter,
    /// Directory for the daily rolling log file
    pub file_dir: Option<PathBuf>,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            console_level: LevelFilter::WARN,
            file_dir: None,
        }
    }
}

impl LogOptions {
    /// Console shows everything the filter lets through.
    pub fn verbose(mut self) -> Self {
        self.console_level = LevelFilter::TRACE;
        self
    }
}

/// Build the env filter: `RUST_LOG` wins over the configured level.
pub fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the life of the process.
pub fn init(options: &LogOptions) -> Result<Option<WorkerGuard>> {
    let console = if options.json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(options.console_level)
            .boxed()
    } else {
        fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(options.console_level)
            .boxed()
    };

    let (file, guard) = match &options.file_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .with(env_filter(&options.level))
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_keep_console_quiet() {
        let options = LogOptions::default();
        assert_eq!(options.console_level, LevelFilter::WARN);
        assert_eq!(options.verbose().console_level, LevelFilter::TRACE);
    }
}
