//! Review panel: N independent reviewers, one threshold vote.
//!
//! Every reviewer receives the same request and runs concurrently. A
//! reviewer that errors, exceeds its own timeout, or is still running when
//! the aggregate deadline passes counts as a non-approval without holding
//! up the others. Votes are reported in panel order, never completion order.

use crate::review::findings::{Finding, FindingSeverity, ReviewerFinding, ReviewerVerdict};
use crate::review::reviewer::{ReviewRequest, Reviewer};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default deadline for the whole panel.
const DEFAULT_AGGREGATE_TIMEOUT_SECS: u64 = 300;
/// Default deadline for one reviewer.
const DEFAULT_REVIEWER_TIMEOUT_SECS: u64 = 120;

/// Configuration for a review panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelConfig {
    /// Approvals required; `None` means two thirds of the panel, rounded up
    pub threshold: Option<usize>,
    /// Deadline for the whole panel
    pub aggregate_timeout: Duration,
    /// Deadline for each reviewer
    pub reviewer_timeout: Duration,
    /// Findings of rejecting reviewers at or above this severity are blocking
    pub blocking_severity: FindingSeverity,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            threshold: None,
            aggregate_timeout: Duration::from_secs(DEFAULT_AGGREGATE_TIMEOUT_SECS),
            reviewer_timeout: Duration::from_secs(DEFAULT_REVIEWER_TIMEOUT_SECS),
            blocking_severity: FindingSeverity::Warning,
        }
    }
}

impl PanelConfig {
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn with_aggregate_timeout(mut self, timeout: Duration) -> Self {
        self.aggregate_timeout = timeout;
        self
    }

    pub fn with_reviewer_timeout(mut self, timeout: Duration) -> Self {
        self.reviewer_timeout = timeout;
        self
    }

    pub fn with_blocking_severity(mut self, severity: FindingSeverity) -> Self {
        self.blocking_severity = severity;
        self
    }
}

/// Two thirds of the panel, rounded up (8 of 12).
pub fn default_threshold(reviewers: usize) -> usize {
    (2 * reviewers).div_ceil(3)
}

/// How one reviewer's vote resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VoteOutcome {
    Approved,
    Rejected,
    TimedOut,
    Errored { message: String },
}

impl VoteOutcome {
    pub fn is_approval(&self) -> bool {
        matches!(self, Self::Approved)
    }
}

impl fmt::Display for VoteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Errored { message } => write!(f, "errored: {}", message),
        }
    }
}

/// One reviewer's vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewVote {
    pub reviewer_id: String,
    #[serde(flatten)]
    pub outcome: VoteOutcome,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<ReviewerFinding>,
}

/// Aggregated panel decision for one task attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewDecision {
    pub task_id: String,
    pub approvals: usize,
    pub total_reviewers: usize,
    pub threshold: usize,
    pub approved: bool,
    /// Findings of non-approving reviewers at or above the blocking severity
    pub blocking_findings: Vec<Finding>,
    /// Votes in panel order
    pub votes: Vec<ReviewVote>,
    #[serde(with = "crate::dag::duration_serde", default)]
    pub duration: Duration,
}

impl ReviewDecision {
    /// Build a decision from votes in panel order.
    pub fn from_votes(
        task_id: &str,
        votes: Vec<ReviewVote>,
        threshold: usize,
        blocking_severity: FindingSeverity,
    ) -> Self {
        let approvals = votes.iter().filter(|v| v.outcome.is_approval()).count();
        let total_reviewers = votes.len();

        let blocking_findings = votes
            .iter()
            .filter(|v| !v.outcome.is_approval())
            .flat_map(|v| {
                v.findings
                    .iter()
                    .filter(|f| f.severity.is_at_least(blocking_severity))
                    .map(|f| Finding::from_reviewer(&v.reviewer_id, f))
            })
            .collect();

        Self {
            task_id: task_id.to_string(),
            approvals,
            total_reviewers,
            threshold,
            // Nothing to gate on an empty panel
            approved: total_reviewers == 0 || approvals >= threshold,
            blocking_findings,
            votes,
            duration: Duration::ZERO,
        }
    }

    fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}

/// A fixed set of reviewers with a voting threshold.
#[derive(Clone)]
pub struct ReviewPanel {
    reviewers: Vec<Arc<dyn Reviewer>>,
    config: PanelConfig,
}

impl ReviewPanel {
    pub fn new(reviewers: Vec<Arc<dyn Reviewer>>, config: PanelConfig) -> Self {
        Self { reviewers, config }
    }

    /// A panel that approves everything.
    pub fn empty() -> Self {
        Self::new(Vec::new(), PanelConfig::default())
    }

    pub fn len(&self) -> usize {
        self.reviewers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reviewers.is_empty()
    }

    pub fn config(&self) -> &PanelConfig {
        &self.config
    }

    /// Reviewer ids in panel order.
    pub fn reviewer_ids(&self) -> Vec<String> {
        self.reviewers.iter().map(|r| r.id().to_string()).collect()
    }

    /// Approvals needed for this panel.
    pub fn threshold(&self) -> usize {
        self.config
            .threshold
            .unwrap_or_else(|| default_threshold(self.reviewers.len()))
    }

    /// Run every reviewer and aggregate their votes.
    pub async fn review(&self, request: &ReviewRequest) -> ReviewDecision {
        let start = Instant::now();
        let deadline = tokio::time::Instant::now() + self.config.aggregate_timeout;
        let reviewer_timeout = self.config.reviewer_timeout;

        let mut pending: FuturesUnordered<_> = self
            .reviewers
            .iter()
            .enumerate()
            .map(|(index, reviewer)| {
                let reviewer = Arc::clone(reviewer);
                async move {
                    let outcome =
                        tokio::time::timeout(reviewer_timeout, reviewer.assess(request)).await;
                    (index, outcome)
                }
            })
            .collect();

        let mut slots: Vec<Option<ReviewVote>> = vec![None; self.reviewers.len()];

        loop {
            match tokio::time::timeout_at(deadline, pending.next()).await {
                Ok(Some((index, outcome))) => {
                    let reviewer_id = self.reviewers[index].id();
                    slots[index] = Some(vote_from(reviewer_id, &request.task_id, outcome));
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        task_id = %request.task_id,
                        outstanding = pending.len(),
                        "review panel deadline reached"
                    );
                    break;
                }
            }
        }
        // Dropping the stream cancels reviewers still running
        drop(pending);

        let votes: Vec<ReviewVote> = slots
            .into_iter()
            .zip(&self.reviewers)
            .map(|(slot, reviewer)| {
                slot.unwrap_or_else(|| ReviewVote {
                    reviewer_id: reviewer.id().to_string(),
                    outcome: VoteOutcome::TimedOut,
                    findings: Vec::new(),
                })
            })
            .collect();

        let decision = ReviewDecision::from_votes(
            &request.task_id,
            votes,
            self.threshold(),
            self.config.blocking_severity,
        )
        .with_duration(start.elapsed());

        tracing::info!(
            task_id = %decision.task_id,
            approvals = decision.approvals,
            total = decision.total_reviewers,
            threshold = decision.threshold,
            approved = decision.approved,
            blocking = decision.blocking_findings.len(),
            "review decision"
        );

        decision
    }
}

fn vote_from(
    reviewer_id: &str,
    task_id: &str,
    outcome: Result<anyhow::Result<ReviewerVerdict>, tokio::time::error::Elapsed>,
) -> ReviewVote {
    let (outcome, findings) = match outcome {
        Ok(Ok(verdict)) => {
            let outcome = if verdict.approve {
                VoteOutcome::Approved
            } else {
                VoteOutcome::Rejected
            };
            (outcome, verdict.findings)
        }
        Ok(Err(e)) => {
            tracing::warn!(task_id, reviewer = reviewer_id, error = %e, "reviewer failed");
            (
                VoteOutcome::Errored {
                    message: format!("{:#}", e),
                },
                Vec::new(),
            )
        }
        Err(_) => {
            tracing::warn!(task_id, reviewer = reviewer_id, "reviewer timed out");
            (VoteOutcome::TimedOut, Vec::new())
        }
    };

    ReviewVote {
        reviewer_id: reviewer_id.to_string(),
        outcome,
        findings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::FileMap;
    use async_trait::async_trait;

    struct Fixed {
        id: String,
        approve: bool,
        delay: Duration,
        fail: bool,
    }

    impl Fixed {
        fn new(id: &str, approve: bool) -> Arc<dyn Reviewer> {
            Arc::new(Self {
                id: id.to_string(),
                approve,
                delay: Duration::ZERO,
                fail: false,
            })
        }

        fn slow(id: &str, delay: Duration) -> Arc<dyn Reviewer> {
            Arc::new(Self {
                id: id.to_string(),
                approve: true,
                delay,
                fail: false,
            })
        }

        fn failing(id: &str) -> Arc<dyn Reviewer> {
            Arc::new(Self {
                id: id.to_string(),
                approve: true,
                delay: Duration::ZERO,
                fail: true,
            })
        }
    }

    #[async_trait]
    impl Reviewer for Fixed {
        fn id(&self) -> &str {
            &self.id
        }

        async fn assess(&self, _request: &ReviewRequest) -> anyhow::Result<ReviewerVerdict> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                anyhow::bail!("backend unavailable");
            }
            Ok(if self.approve {
                ReviewerVerdict::approve().with_finding(FindingSeverity::Error, "ignored")
            } else {
                ReviewerVerdict::reject()
                    .with_finding(FindingSeverity::Warning, &format!("{} objects", self.id))
                    .with_finding(FindingSeverity::Info, "minor")
            })
        }
    }

    fn request() -> ReviewRequest {
        ReviewRequest {
            task_id: "t".into(),
            specification: "spec".into(),
            files: FileMap::new(),
            context: String::new(),
            attempt: 1,
        }
    }

    fn panel_of(approving: usize, total: usize) -> ReviewPanel {
        let reviewers = (0..total)
            .map(|i| Fixed::new(&format!("r{:02}", i), i < approving))
            .collect();
        ReviewPanel::new(reviewers, PanelConfig::default())
    }

    #[test]
    fn test_default_threshold() {
        assert_eq!(default_threshold(12), 8);
        assert_eq!(default_threshold(3), 2);
        assert_eq!(default_threshold(1), 1);
        assert_eq!(default_threshold(0), 0);
    }

    #[tokio::test]
    async fn test_eight_of_twelve_approves() {
        let decision = panel_of(8, 12).review(&request()).await;
        assert_eq!(decision.threshold, 8);
        assert_eq!(decision.approvals, 8);
        assert_eq!(decision.total_reviewers, 12);
        assert!(decision.approved);
    }

    #[tokio::test]
    async fn test_seven_of_twelve_rejects() {
        let decision = panel_of(7, 12).review(&request()).await;
        assert_eq!(decision.approvals, 7);
        assert!(!decision.approved);
    }

    #[tokio::test]
    async fn test_blocking_findings_come_from_rejecting_reviewers_in_order() {
        let decision = panel_of(1, 3).review(&request()).await;

        let reviewers: Vec<&str> = decision
            .blocking_findings
            .iter()
            .map(|f| f.reviewer_id.as_str())
            .collect();
        // Approver's error finding and the info findings are not blocking
        assert_eq!(reviewers, vec!["r01", "r02"]);
        assert!(decision
            .blocking_findings
            .iter()
            .all(|f| f.severity == FindingSeverity::Warning));
    }

    #[tokio::test]
    async fn test_empty_panel_approves() {
        let decision = ReviewPanel::empty().review(&request()).await;
        assert!(decision.approved);
        assert_eq!(decision.total_reviewers, 0);
    }

    #[tokio::test]
    async fn test_reviewer_error_counts_as_non_approval() {
        let panel = ReviewPanel::new(
            vec![Fixed::new("a", true), Fixed::failing("b")],
            PanelConfig::default(),
        );
        let decision = panel.review(&request()).await;

        assert_eq!(decision.approvals, 1);
        assert!(!decision.approved);
        assert!(matches!(
            decision.votes[1].outcome,
            VoteOutcome::Errored { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_reviewer_times_out_without_blocking_others() {
        let panel = ReviewPanel::new(
            vec![
                Fixed::slow("slow", Duration::from_secs(600)),
                Fixed::new("fast-1", true),
                Fixed::new("fast-2", true),
            ],
            PanelConfig::default().with_reviewer_timeout(Duration::from_secs(10)),
        );
        let decision = panel.review(&request()).await;

        assert_eq!(decision.votes[0].reviewer_id, "slow");
        assert_eq!(decision.votes[0].outcome, VoteOutcome::TimedOut);
        assert_eq!(decision.approvals, 2);
        assert!(decision.approved);
    }

    #[tokio::test(start_paused = true)]
    async fn test_aggregate_deadline_marks_outstanding_reviewers() {
        let panel = ReviewPanel::new(
            vec![
                Fixed::new("fast", true),
                Fixed::slow("slow", Duration::from_secs(60)),
            ],
            PanelConfig::default()
                .with_reviewer_timeout(Duration::from_secs(120))
                .with_aggregate_timeout(Duration::from_secs(30)),
        );
        let decision = panel.review(&request()).await;

        assert_eq!(decision.votes[0].outcome, VoteOutcome::Approved);
        assert_eq!(decision.votes[1].outcome, VoteOutcome::TimedOut);
        assert!(!decision.approved);
    }

    #[tokio::test]
    async fn test_explicit_threshold_overrides_default() {
        let reviewers = vec![
            Fixed::new("a", true),
            Fixed::new("b", false),
            Fixed::new("c", false),
        ];
        let panel = ReviewPanel::new(reviewers, PanelConfig::default().with_threshold(1));
        let decision = panel.review(&request()).await;
        assert_eq!(decision.threshold, 1);
        assert!(decision.approved);
    }
}
