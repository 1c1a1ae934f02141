//! Review panel gating generated work.
//!
//! Completed task output goes to a panel of independent reviewers. Their
//! votes are aggregated against a threshold into one approve/reject decision.
//!
//! ## Components
//!
//! - [`findings`]: severities, per-reviewer verdicts, attributed findings
//! - [`reviewer`]: the `Reviewer` capability and the command-backed adapter
//! - [`panel`]: concurrent dispatch, timeouts, and threshold voting
//!
//! ## Example
//!
//! ```
//! use taskforge::review::{PanelConfig, ReviewPanel, default_threshold};
//!
//! assert_eq!(default_threshold(12), 8);
//!
//! let panel = ReviewPanel::new(Vec::new(), PanelConfig::default());
//! assert!(panel.is_empty());
//! ```

pub mod findings;
pub mod panel;
pub mod reviewer;

pub use findings::{Finding, FindingSeverity, ReviewerFinding, ReviewerVerdict};
pub use panel::{
    PanelConfig, ReviewDecision, ReviewPanel, ReviewVote, VoteOutcome, default_threshold,
};
pub use reviewer::{
    CommandReviewer, CommandReviewerConfig, ReviewRequest, Reviewer, parse_review_output,
};
