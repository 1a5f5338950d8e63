//! Error types for the approval gate.

/// Errors produced when recording approval decisions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApprovalError {
    #[error("decision for {got} does not match checkpoint for {expected}")]
    DecisionMismatch { expected: String, got: String },

    #[error("decision targets attempt {got} of ring {ring}, current attempt is {expected}")]
    StaleDecision {
        ring: String,
        expected: u32,
        got: u32,
    },

    #[error("checkpoint {checkpoint_id} already has a decision")]
    AlreadyDecided { checkpoint_id: String },

    #[error("checkpoint {checkpoint_id} is {status}, not pending approval")]
    NotPending {
        checkpoint_id: String,
        status: String,
    },

    #[error("invalid decision: {0}")]
    InvalidDecision(String),
}

/// Result type for approval operations.
pub type ApprovalResult<T> = std::result::Result<T, ApprovalError>;
