//! Approval checkpoints: one per (intent, ring, attempt).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::decision::Decision;

/// Status of an approval checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Score at or below threshold; no human involved.
    AutoApproved,
    /// Waiting for a decision. Only a decision leaves this state.
    PendingApproval,
    Approved,
    Rejected { reason: String },
    ApprovedWithConditions { conditions: Vec<String> },
}

impl ApprovalStatus {
    /// Whether the ring may proceed to publishing.
    pub fn allows_proceed(&self) -> bool {
        matches!(
            self,
            Self::AutoApproved | Self::Approved | Self::ApprovedWithConditions { .. }
        )
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::PendingApproval)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::AutoApproved => "auto_approved",
            Self::PendingApproval => "pending_approval",
            Self::Approved => "approved",
            Self::Rejected { .. } => "rejected",
            Self::ApprovedWithConditions { .. } => "approved_with_conditions",
        }
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// What the approver is shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplainabilitySummary {
    /// Brief description of the action being gated.
    pub action_description: String,
    /// Score and the factors that drove it.
    pub changes_summary: String,
    /// Why this action was flagged for review (empty when auto-approved).
    pub flag_reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalCheckpoint {
    pub checkpoint_id: String,
    pub correlation_id: String,
    pub ring: String,
    pub attempt: u32,
    pub score: u8,
    pub model_version: String,
    /// Threshold in force when the checkpoint was opened
    pub threshold: u8,
    pub status: ApprovalStatus,
    pub explanation: ExplainabilitySummary,
    pub created_at: DateTime<Utc>,
    /// Written once
    pub decision: Option<Decision>,
    /// Set when a stalled checkpoint was escalated
    pub escalated_at: Option<DateTime<Utc>>,
}

impl ApprovalCheckpoint {
    pub fn is_pending(&self) -> bool {
        matches!(self.status, ApprovalStatus::PendingApproval)
    }
}
