//! Per-intent serialization of transitions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per correlation id. Transitions of one intent queue up;
/// different intents never wait on each other.
#[derive(Debug, Default)]
pub struct IntentLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl IntentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, correlation_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Entries nobody holds or waits on are dropped.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(correlation_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Intents with a lock entry still tracked.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_intent_is_serialized() {
        let locks = Arc::new(IntentLocks::new());
        let guard = locks.acquire("dep-1").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.acquire("dep-1").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        // Another intent is not blocked.
        let _other = locks.acquire("dep-2").await;

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn released_locks_are_pruned() {
        let locks = IntentLocks::new();
        for n in 0..100 {
            let _g = locks.acquire(&format!("dep-{n}")).await;
        }
        // Only the entry being acquired survives each prune.
        assert_eq!(locks.len(), 1);

        let held = locks.acquire("dep-held").await;
        let _g = locks.acquire("dep-next").await;
        assert_eq!(locks.len(), 2);
        drop(held);
    }
}
