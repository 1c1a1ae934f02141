//! The reviewer capability and its command-backed adapter.

use crate::review::findings::{FindingSeverity, ReviewerFinding, ReviewerVerdict};
use crate::task::FileMap;
use crate::util::{extract_json_object, run_command};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default ceiling on a single reviewer process.
const DEFAULT_REVIEW_TIMEOUT_SECS: u64 = 120;

/// What every reviewer on a panel receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub task_id: String,
    /// The task's specification text
    pub specification: String,
    pub files: FileMap,
    /// Project context shared with the generator
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub attempt: u32,
}

/// An independent reviewer.
#[async_trait]
pub trait Reviewer: Send + Sync {
    /// Stable identifier used to attribute findings.
    fn id(&self) -> &str;

    /// Assess a task's files. `Err` counts as a non-approval.
    async fn assess(&self, request: &ReviewRequest) -> Result<ReviewerVerdict>;
}

/// Configuration for a command-backed reviewer.
#[derive(Debug, Clone)]
pub struct CommandReviewerConfig {
    pub id: String,
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub timeout: Duration,
}

impl CommandReviewerConfig {
    pub fn new(id: &str, command: &str) -> Self {
        Self {
            id: id.to_string(),
            command: command.to_string(),
            args: Vec::new(),
            working_dir: None,
            timeout: Duration::from_secs(DEFAULT_REVIEW_TIMEOUT_SECS),
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

/// Reviewer that runs an external command per assessment.
///
/// The request goes to stdin as JSON; stdout must contain
/// `{"approve": bool, "findings": [{"severity", "message"}]}`.
pub struct CommandReviewer {
    config: CommandReviewerConfig,
}

impl CommandReviewer {
    pub fn new(config: CommandReviewerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Reviewer for CommandReviewer {
    fn id(&self) -> &str {
        &self.config.id
    }

    async fn assess(&self, request: &ReviewRequest) -> Result<ReviewerVerdict> {
        let input = serde_json::to_string(request).context("Failed to encode review request")?;
        let output = run_command(
            &self.config.command,
            &self.config.args,
            self.config.working_dir.as_deref(),
            &input,
            self.config.timeout,
        )
        .await
        .with_context(|| format!("Reviewer '{}' failed", self.config.id))?;

        Ok(parse_review_output(&self.config.id, &output))
    }
}

/// Parse reviewer output into a verdict.
///
/// Output that cannot be parsed is a rejection carrying one error finding;
/// silence never counts as approval.
pub fn parse_review_output(reviewer_id: &str, output: &str) -> ReviewerVerdict {
    let parsed = extract_json_object(output)
        .and_then(|json| serde_json::from_str::<serde_json::Value>(json).ok());

    let Some(value) = parsed else {
        tracing::warn!(reviewer = reviewer_id, "review output could not be parsed");
        return ReviewerVerdict::reject().with_finding(
            FindingSeverity::Error,
            "Review output could not be parsed",
        );
    };

    let Some(approve) = value.get("approve").and_then(|v| v.as_bool()) else {
        tracing::warn!(reviewer = reviewer_id, "review output has no 'approve' field");
        return ReviewerVerdict::reject().with_finding(
            FindingSeverity::Error,
            "Review output did not contain an 'approve' decision",
        );
    };

    let findings = value
        .get("findings")
        .and_then(|v| v.as_array())
        .map(|items| items.iter().filter_map(parse_finding).collect())
        .unwrap_or_default();

    ReviewerVerdict { approve, findings }
}

/// Parse a single finding; unknown severities default to warning.
fn parse_finding(value: &serde_json::Value) -> Option<ReviewerFinding> {
    let message = value.get("message").and_then(|v| v.as_str())?;
    let severity = value
        .get("severity")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .unwrap_or_default();

    Some(ReviewerFinding {
        severity,
        message: message.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_approval_with_findings() {
        let out = r#"Looks fine overall.
{"approve": true, "findings": [{"severity": "info", "message": "naming"}, {"severity": "bogus", "message": "odd"}, {"severity": "error"}]}"#;
        let verdict = parse_review_output("style", out);

        assert!(verdict.approve);
        assert_eq!(verdict.findings.len(), 2);
        assert_eq!(verdict.findings[0].severity, FindingSeverity::Info);
        assert_eq!(verdict.findings[1].severity, FindingSeverity::Warning);
    }

    #[test]
    fn test_parse_garbage_is_rejection() {
        let verdict = parse_review_output("style", "I think it is good!");
        assert!(!verdict.approve);
        assert_eq!(verdict.findings[0].severity, FindingSeverity::Error);
    }

    #[test]
    fn test_parse_missing_decision_is_rejection() {
        let verdict = parse_review_output("style", r#"{"findings": []}"#);
        assert!(!verdict.approve);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_reviewer_round_trip() {
        let script = r#"cat > /dev/null; echo '{"approve": false, "findings": [{"severity": "error", "message": "no tests"}]}'"#;
        let reviewer = CommandReviewer::new(
            CommandReviewerConfig::new("tests", "sh")
                .with_args(vec!["-c".to_string(), script.to_string()]),
        );
        let request = ReviewRequest {
            task_id: "a".into(),
            specification: "spec".into(),
            files: FileMap::new(),
            context: String::new(),
            attempt: 1,
        };

        let verdict = reviewer.assess(&request).await.unwrap();
        assert_eq!(reviewer.id(), "tests");
        assert!(!verdict.approve);
        assert_eq!(verdict.findings[0].message, "no tests");
    }
}
