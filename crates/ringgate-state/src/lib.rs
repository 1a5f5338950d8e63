//! Ringgate-State: persistence contracts for the rollout control plane
//!
//! This crate owns every byte the control plane writes. It deliberately knows
//! nothing about rings, intents or connectors; it only offers the two storage
//! shapes the core needs.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: append-only audit trail and torn-write-free record updates.
//!
//! ## Key Components
//!
//! - `EvidenceStore`: append-only event log keyed by correlation id
//! - `VersionedStore`: record store with compare-and-swap on a version field
//! - `ContentDigest`: SHA-256 content address for artifacts and payloads
//! - `fakes`: in-memory implementations for tests and single-node runs
//! - `JsonlEvidenceStore`: newline-delimited JSON evidence log on disk

mod error;
pub mod fakes;
pub mod jsonl;
pub mod storage_traits;

pub use error::StorageError;
pub use jsonl::JsonlEvidenceStore;
pub use storage_traits::{
    ContentDigest, EventId, EvidenceEvent, EvidenceRecord, EvidenceStore, StorageResult,
    Versioned, VersionedStore,
};
