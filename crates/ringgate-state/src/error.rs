//! Error types for ringgate-state

use thiserror::Error;

/// Errors that can occur in the persistence layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// No record stored under the key
    #[error("record not found: {key}")]
    NotFound { key: String },

    /// Insert of a key that already exists
    #[error("record already exists: {key}")]
    AlreadyExists { key: String },

    /// Compare-and-swap lost against a concurrent writer
    #[error("version conflict on {key}: expected v{expected}, found v{actual}")]
    VersionConflict {
        key: String,
        expected: u64,
        actual: u64,
    },

    /// Digest string is not 64 lowercase hex chars
    #[error("invalid digest: {digest}")]
    InvalidDigest { digest: String },

    /// Serialization error
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Backend I/O or lock failure
    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl StorageError {
    /// Whether a fresh read and retry may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}
