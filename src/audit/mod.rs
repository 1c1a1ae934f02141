//! Per-run audit records.
//!
//! Each scheduler run leaves one JSON document under `.taskforge/audit/runs/`
//! with the options it ran with and the full run summary.

mod logger;

pub use logger::AuditLogger;

use crate::dag::RunSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRun {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub config: RunConfig,
    /// Set when the run finishes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<RunSummary>,
    /// Set when the run aborted before producing a summary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditRun {
    pub fn new(config: RunConfig) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            ended_at: None,
            config,
            summary: None,
            error: None,
        }
    }

    pub fn finish(&mut self) {
        self.ended_at = Some(Utc::now());
    }

    /// Wall-clock time between start and finish.
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        self.ended_at.map(|end| end - self.started_at)
    }
}

/// Options a run was started with.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    pub project_id: String,
    pub graph_file: PathBuf,
    pub project_dir: PathBuf,
    pub resume: bool,
    pub force: bool,
    pub max_parallel: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip: Vec<String>,
    pub generator_backend: String,
    #[serde(default)]
    pub reviewers: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_run_serialization_roundtrip() {
        let mut run = AuditRun::new(RunConfig {
            project_id: "shop".into(),
            graph_file: PathBuf::from("tasks.json"),
            max_parallel: 4,
            generator_backend: "agent-cli".into(),
            reviewers: vec!["security".into()],
            ..Default::default()
        });
        run.summary = Some(RunSummary::new("shop", 3));
        run.finish();

        let json = serde_json::to_string(&run).unwrap();
        let parsed: AuditRun = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.run_id, run.run_id);
        assert_eq!(parsed.config.project_id, "shop");
        assert_eq!(parsed.summary.unwrap().total, 3);
        assert!(parsed.error.is_none());
        assert!(run.elapsed().is_some());
    }
}
