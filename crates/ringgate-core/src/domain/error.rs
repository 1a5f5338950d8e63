//! Error taxonomy for the rollout control plane.

use ringgate_state::StorageError;
use thiserror::Error;

use crate::approval::ApprovalError;
use crate::connector::{ConnectorError, ErrorClass};
use crate::risk::RiskError;

/// Errors surfaced by controller, reconciliation and configuration code.
#[derive(Error, Debug)]
pub enum RolloutError {
    /// Retryable execution-plane failure (attempts exhausted when surfaced here)
    #[error("transient failure on connector {connector}: {message}")]
    TransientConnector { connector: String, message: String },

    /// Non-retryable execution-plane failure
    #[error("permanent failure on connector {connector}: {message}")]
    PermanentConnector { connector: String, message: String },

    /// Execution plane refused the operation on policy grounds; hard stop
    #[error("policy violation on connector {connector}: {message}")]
    PolicyViolation { connector: String, message: String },

    /// Compare-and-swap lost twice in a row
    #[error("concurrent modification of {key}")]
    ConcurrentModification { key: String },

    #[error("deployment intent not found: {0}")]
    IntentNotFound(String),

    #[error("deployment intent already exists: {0}")]
    DuplicateIntent(String),

    #[error("unknown ring: {0}")]
    UnknownRing(String),

    #[error("unknown connector: {0}")]
    UnknownConnector(String),

    #[error("invalid transition for {correlation_id}: {from} -> {to}")]
    InvalidTransition {
        correlation_id: String,
        from: String,
        to: String,
    },

    /// The promotion driver task is gone
    #[error("promotion driver stopped")]
    DriverStopped,

    #[error("approval error: {0}")]
    Approval(#[from] ApprovalError),

    /// Includes `RiskError::IncompleteEvidence`
    #[error("risk error: {0}")]
    Risk(#[from] RiskError),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RolloutError {
    /// Classify a connector error raised by `connector`.
    pub fn from_connector(connector: &str, err: ConnectorError) -> Self {
        let connector = connector.to_string();
        let message = err.message;
        match err.class {
            ErrorClass::PolicyViolation => Self::PolicyViolation { connector, message },
            ErrorClass::Permanent => Self::PermanentConnector { connector, message },
            ErrorClass::Transient | ErrorClass::None => {
                Self::TransientConnector { connector, message }
            }
        }
    }

    /// Whether the error is the missing-evidence case of the risk engine.
    pub fn is_incomplete_evidence(&self) -> bool {
        matches!(self, Self::Risk(RiskError::IncompleteEvidence { .. }))
    }
}

impl From<StorageError> for RolloutError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::VersionConflict { key, .. } => Self::ConcurrentModification { key },
            other => Self::Storage(other.to_string()),
        }
    }
}

/// Result type for rollout operations.
pub type Result<T> = std::result::Result<T, RolloutError>;
