//! Review findings types.
//!
//! ## Types
//!
//! - [`FindingSeverity`]: Severity classification for individual findings
//! - [`ReviewerFinding`]: A finding as reported by one reviewer
//! - [`ReviewerVerdict`]: One reviewer's vote plus its findings
//! - [`Finding`]: A finding attributed to the reviewer that raised it
//!
//! ## Example
//!
//! ```
//! use taskforge::review::{FindingSeverity, ReviewerVerdict};
//!
//! let verdict = ReviewerVerdict::reject()
//!     .with_finding(FindingSeverity::Error, "SQL built by string concatenation")
//!     .with_finding(FindingSeverity::Note, "Consider a query builder");
//!
//! assert!(!verdict.approve);
//! assert_eq!(verdict.findings_at_least(FindingSeverity::Warning).count(), 1);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity level for individual review findings.
///
/// Severities are ordered from most to least critical.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord,
)]
#[serde(rename_all = "lowercase")]
pub enum FindingSeverity {
    /// Correctness or security problem.
    Error,
    /// Should be addressed before the work is accepted.
    #[default]
    Warning,
    /// Informational observation.
    Info,
    /// Additional context, not an issue.
    Note,
}

impl FindingSeverity {
    /// Check if this severity is at or above `floor` (more or equally critical).
    ///
    /// ```
    /// use taskforge::review::FindingSeverity;
    ///
    /// assert!(FindingSeverity::Error.is_at_least(FindingSeverity::Warning));
    /// assert!(FindingSeverity::Warning.is_at_least(FindingSeverity::Warning));
    /// assert!(!FindingSeverity::Info.is_at_least(FindingSeverity::Warning));
    /// ```
    pub fn is_at_least(&self, floor: FindingSeverity) -> bool {
        *self <= floor
    }

    /// Get the emoji indicator for this severity.
    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Error => "🔴",
            Self::Warning => "🟡",
            Self::Info => "🔵",
            Self::Note => "⚪",
        }
    }
}

impl fmt::Display for FindingSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
            Self::Note => "note",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for FindingSeverity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warning" | "warn" => Ok(Self::Warning),
            "info" => Ok(Self::Info),
            "note" => Ok(Self::Note),
            _ => anyhow::bail!(
                "Invalid severity '{}'. Valid values: error, warning, info, note",
                s
            ),
        }
    }
}

/// A finding as reported by a reviewer, before attribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewerFinding {
    #[serde(default)]
    pub severity: FindingSeverity,
    pub message: String,
}

/// One reviewer's assessment of a task's files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewerVerdict {
    pub approve: bool,
    #[serde(default)]
    pub findings: Vec<ReviewerFinding>,
}

impl ReviewerVerdict {
    /// An approving verdict with no findings.
    pub fn approve() -> Self {
        Self {
            approve: true,
            findings: Vec::new(),
        }
    }

    /// A rejecting verdict with no findings.
    pub fn reject() -> Self {
        Self {
            approve: false,
            findings: Vec::new(),
        }
    }

    /// Add a finding.
    pub fn with_finding(mut self, severity: FindingSeverity, message: &str) -> Self {
        self.findings.push(ReviewerFinding {
            severity,
            message: message.to_string(),
        });
        self
    }

    /// Findings at or above `floor`.
    pub fn findings_at_least(
        &self,
        floor: FindingSeverity,
    ) -> impl Iterator<Item = &ReviewerFinding> {
        self.findings
            .iter()
            .filter(move |f| f.severity.is_at_least(floor))
    }
}

/// A finding attributed to the reviewer that raised it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub reviewer_id: String,
    pub severity: FindingSeverity,
    pub message: String,
}

impl Finding {
    pub fn new(reviewer_id: &str, severity: FindingSeverity, message: &str) -> Self {
        Self {
            reviewer_id: reviewer_id.to_string(),
            severity,
            message: message.to_string(),
        }
    }

    /// Attribute a reviewer's finding.
    pub fn from_reviewer(reviewer_id: &str, finding: &ReviewerFinding) -> Self {
        Self::new(reviewer_id, finding.severity, &finding.message)
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {}: {}",
            self.severity.emoji(),
            self.severity,
            self.reviewer_id,
            self.message
        )
    }
}
