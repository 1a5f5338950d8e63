//! Storage trait definitions for ringgate
//!
//! These traits define the two storage abstractions the control plane uses:
//! - `EvidenceStore`: append-only audit log (never updated, never deleted)
//! - `VersionedStore`: keyed records written through compare-and-swap
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! via the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl From<ContentDigest> for String {
    fn from(d: ContentDigest) -> Self {
        d.0
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// EvidenceStore: append-only audit log
// ---------------------------------------------------------------------------

/// Identifier assigned to an appended evidence event
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub String);

impl EventId {
    /// Generate a new random EventId
    pub fn new() -> Self {
        EventId(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single state-transition event submitted for the audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceEvent {
    /// Correlation id of the deployment intent this event belongs to
    pub correlation_id: String,
    /// Event kind (e.g. "ring.publishing", "drift.detected")
    pub kind: String,
    /// Event payload
    pub payload: serde_json::Value,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl EvidenceEvent {
    pub fn new(
        correlation_id: impl Into<String>,
        kind: impl Into<String>,
        payload: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            kind: kind.into(),
            payload,
            timestamp,
        }
    }
}

/// An event as persisted, with its store-assigned identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub event_id: EventId,
    /// Monotonic sequence number across the whole store
    pub seq: u64,
    pub event: EvidenceEvent,
}

/// Append-only evidence log.
///
/// Guarantees:
/// - `append` never rewrites or removes earlier records.
/// - `seq` is strictly increasing in append order.
/// - `events_for` returns a correlation id's events ordered by `seq`.
#[async_trait]
pub trait EvidenceStore: Send + Sync {
    /// Append an event, returning its id.
    async fn append(&self, event: EvidenceEvent) -> StorageResult<EventId>;

    /// All events for one correlation id, ordered by seq.
    async fn events_for(&self, correlation_id: &str) -> StorageResult<Vec<EvidenceRecord>>;

    /// Number of events stored.
    async fn len(&self) -> StorageResult<u64>;
}

// ---------------------------------------------------------------------------
// VersionedStore: optimistic-concurrency records
// ---------------------------------------------------------------------------

/// A record together with its version.
///
/// `version` starts at 1 on insert and increases by exactly one on each
/// successful compare-and-swap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub key: String,
    pub version: u64,
    pub value: T,
    pub updated_at: DateTime<Utc>,
}

/// Keyed record store with a single compare-and-swap write path.
///
/// Semantics:
/// - `insert` fails with `AlreadyExists` when the key is present.
/// - `compare_and_swap` succeeds only if the stored version equals
///   `expected_version`; otherwise it fails with `VersionConflict` and the
///   stored value is untouched.
/// - There is no delete.
#[async_trait]
pub trait VersionedStore<T>: Send + Sync
where
    T: Clone + Send + Sync + 'static,
{
    /// Insert a new record at version 1.
    async fn insert(&self, key: &str, value: T) -> StorageResult<Versioned<T>>;

    /// Fetch a record, if present.
    async fn get(&self, key: &str) -> StorageResult<Option<Versioned<T>>>;

    /// Replace the record if it is still at `expected_version`.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: u64,
        value: T,
    ) -> StorageResult<Versioned<T>>;

    /// All records, ordered by key.
    async fn list(&self) -> StorageResult<Vec<Versioned<T>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable_and_short() {
        let a = ContentDigest::from_bytes(b"pkg-1.0.0.msi");
        let b = ContentDigest::from_bytes(b"pkg-1.0.0.msi");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert_eq!(a.short().len(), 12);
    }

    #[test]
    fn digest_rejects_non_hex() {
        let err = ContentDigest::try_from("zz".repeat(32)).unwrap_err();
        assert!(matches!(err, StorageError::InvalidDigest { .. }));
    }

    #[test]
    fn digest_deserialize_validates() {
        let bad = serde_json::from_str::<ContentDigest>("\"not-a-digest\"");
        assert!(bad.is_err());

        let good = ContentDigest::from_bytes(b"x");
        let json = serde_json::to_string(&good).unwrap();
        let back: ContentDigest = serde_json::from_str(&json).unwrap();
        assert_eq!(good, back);
    }
}
