//! In-memory implementations of the storage traits
//!
//! Provides `MemoryEvidenceStore` and `MemoryVersionedStore` that satisfy the
//! trait contracts without any external dependencies. Used by tests and by
//! the daemon when no durable evidence path is configured.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::storage_traits::*;

fn lock<T>(m: &Mutex<T>) -> StorageResult<MutexGuard<'_, T>> {
    m.lock()
        .map_err(|_| StorageError::Backend("in-memory store lock poisoned".to_string()))
}

// ---------------------------------------------------------------------------
// MemoryEvidenceStore
// ---------------------------------------------------------------------------

/// In-memory evidence log backed by a `Vec<EvidenceRecord>`.
#[derive(Debug, Default)]
pub struct MemoryEvidenceStore {
    records: Mutex<Vec<EvidenceRecord>>,
}

impl MemoryEvidenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record in append order.
    pub fn all(&self) -> StorageResult<Vec<EvidenceRecord>> {
        Ok(lock(&self.records)?.clone())
    }

    /// Event kinds recorded for one correlation id, in append order.
    pub fn kinds_for(&self, correlation_id: &str) -> StorageResult<Vec<String>> {
        Ok(lock(&self.records)?
            .iter()
            .filter(|r| r.event.correlation_id == correlation_id)
            .map(|r| r.event.kind.clone())
            .collect())
    }
}

#[async_trait]
impl EvidenceStore for MemoryEvidenceStore {
    async fn append(&self, event: EvidenceEvent) -> StorageResult<EventId> {
        let mut records = lock(&self.records)?;
        let event_id = EventId::new();
        let seq = records.len() as u64 + 1;
        records.push(EvidenceRecord {
            event_id: event_id.clone(),
            seq,
            event,
        });
        Ok(event_id)
    }

    async fn events_for(&self, correlation_id: &str) -> StorageResult<Vec<EvidenceRecord>> {
        let records = lock(&self.records)?;
        Ok(records
            .iter()
            .filter(|r| r.event.correlation_id == correlation_id)
            .cloned()
            .collect())
    }

    async fn len(&self) -> StorageResult<u64> {
        Ok(lock(&self.records)?.len() as u64)
    }
}

// ---------------------------------------------------------------------------
// MemoryVersionedStore
// ---------------------------------------------------------------------------

/// In-memory versioned store backed by a `BTreeMap<key, Versioned<T>>`.
///
/// The whole compare-and-swap happens under one lock, so a write can never
/// interleave with another write to the same key.
#[derive(Debug)]
pub struct MemoryVersionedStore<T> {
    records: Mutex<BTreeMap<String, Versioned<T>>>,
}

impl<T> Default for MemoryVersionedStore<T> {
    fn default() -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
        }
    }
}

impl<T> MemoryVersionedStore<T> {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl<T> VersionedStore<T> for MemoryVersionedStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn insert(&self, key: &str, value: T) -> StorageResult<Versioned<T>> {
        let mut records = lock(&self.records)?;
        if records.contains_key(key) {
            return Err(StorageError::AlreadyExists {
                key: key.to_string(),
            });
        }
        let record = Versioned {
            key: key.to_string(),
            version: 1,
            value,
            updated_at: Utc::now(),
        };
        records.insert(key.to_string(), record.clone());
        Ok(record)
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Versioned<T>>> {
        Ok(lock(&self.records)?.get(key).cloned())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: u64,
        value: T,
    ) -> StorageResult<Versioned<T>> {
        let mut records = lock(&self.records)?;
        let current = records.get_mut(key).ok_or_else(|| StorageError::NotFound {
            key: key.to_string(),
        })?;
        if current.version != expected_version {
            return Err(StorageError::VersionConflict {
                key: key.to_string(),
                expected: expected_version,
                actual: current.version,
            });
        }
        current.version += 1;
        current.value = value;
        current.updated_at = Utc::now();
        Ok(current.clone())
    }

    async fn list(&self) -> StorageResult<Vec<Versioned<T>>> {
        Ok(lock(&self.records)?.values().cloned().collect())
    }
}
