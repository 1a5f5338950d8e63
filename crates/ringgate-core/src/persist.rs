//! Record stores shared by the controller and the reconciliation loop, and
//! the read-modify-CAS helper every writer goes through.

use std::sync::Arc;

use ringgate_state::fakes::MemoryVersionedStore;
use ringgate_state::{StorageError, Versioned, VersionedStore};
use tracing::debug;

use crate::domain::{DeploymentIntent, DriftRecord, Result, RolloutError};

/// Handles to the two record stores.
#[derive(Clone)]
pub struct Stores {
    pub intents: Arc<dyn VersionedStore<DeploymentIntent>>,
    pub drift: Arc<dyn VersionedStore<DriftRecord>>,
}

impl Stores {
    pub fn new(
        intents: Arc<dyn VersionedStore<DeploymentIntent>>,
        drift: Arc<dyn VersionedStore<DriftRecord>>,
    ) -> Self {
        Self { intents, drift }
    }

    /// Both stores in memory.
    pub fn in_memory() -> Self {
        Self {
            intents: Arc::new(MemoryVersionedStore::new()),
            drift: Arc::new(MemoryVersionedStore::new()),
        }
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}

/// Read `key`, apply `mutate` to a copy and compare-and-swap it back.
///
/// A lost race is retried once against a fresh read; the second loss
/// surfaces as `ConcurrentModification`. `mutate` may run twice and must
/// not have side effects beyond the value it is given.
pub async fn update_with_retry<T, R, F>(
    store: &dyn VersionedStore<T>,
    key: &str,
    mut mutate: F,
) -> Result<(Versioned<T>, R)>
where
    T: Clone + Send + Sync + 'static,
    F: FnMut(&mut T) -> Result<R>,
{
    let mut retried = false;
    loop {
        let current = store.get(key).await?.ok_or_else(|| StorageError::NotFound {
            key: key.to_string(),
        })?;
        let mut value = current.value.clone();
        let out = mutate(&mut value)?;
        match store.compare_and_swap(key, current.version, value).await {
            Ok(stored) => return Ok((stored, out)),
            Err(err) if err.is_conflict() && !retried => {
                debug!(
                    key,
                    version = current.version,
                    "version conflict; retrying with fresh read"
                );
                retried = true;
            }
            Err(err) if err.is_conflict() => {
                return Err(RolloutError::ConcurrentModification {
                    key: key.to_string(),
                })
            }
            Err(err) => return Err(err.into()),
        }
    }
}
