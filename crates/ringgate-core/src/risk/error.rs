//! Error types for the risk engine.

/// Errors produced while scoring.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RiskError {
    /// One or more required inputs are absent; all of them are listed.
    #[error("incomplete evidence, missing: {}", missing.join(", "))]
    IncompleteEvidence { missing: Vec<String> },

    #[error("invalid evidence: {0}")]
    InvalidEvidence(String),

    #[error("invalid risk model: {0}")]
    InvalidModel(String),
}

/// Result type for risk operations.
pub type RiskResult<T> = std::result::Result<T, RiskError>;
