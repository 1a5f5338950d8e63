//! Per-key result journal that makes connector writes idempotent.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use super::types::{ConnectorOperationResult, ErrorClass, IdempotencyKey};

type Slot = Arc<tokio::sync::Mutex<Option<ConnectorOperationResult>>>;

/// Remembers the first conclusive result per idempotency key.
///
/// Calls with the same key are serialized on the key's slot; once a call
/// concludes (success, permanent or policy failure) every later call with
/// that key gets the recorded result without running the operation. A
/// transient outcome is not recorded because its effect on the plane is
/// unknown and the caller is expected to retry.
#[derive(Debug, Default)]
pub struct IdempotencyJournal {
    slots: Mutex<HashMap<IdempotencyKey, Slot>>,
}

impl IdempotencyJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn run_once<F, Fut>(&self, key: &IdempotencyKey, op: F) -> ConnectorOperationResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ConnectorOperationResult>,
    {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        let mut recorded = slot.lock().await;
        if let Some(result) = recorded.as_ref() {
            return result.clone();
        }
        let result = op().await;
        if result.error_class != ErrorClass::Transient {
            *recorded = Some(result.clone());
        }
        result
    }

    /// Number of keys with a recorded result (slots busy with an in-flight
    /// call are not counted).
    pub fn recorded(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .values()
            .filter(|slot| slot.try_lock().map(|r| r.is_some()).unwrap_or(false))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn second_call_replays_first_result() {
        let journal = IdempotencyJournal::new();
        let key = IdempotencyKey::derive("dep-1", "push", "sim");
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let result = journal
                .run_once(&key, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    ConnectorOperationResult::ok(&key, serde_json::json!({"n": 1}))
                })
                .await;
            assert!(result.success);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(journal.recorded(), 1);
    }

    #[tokio::test]
    async fn transient_result_is_not_recorded() {
        let journal = IdempotencyJournal::new();
        let key = IdempotencyKey::derive("dep-1", "push", "sim");

        let first = journal
            .run_once(&key, || async {
                ConnectorOperationResult::failed(&key, ErrorClass::Transient, "503")
            })
            .await;
        assert!(first.is_transient());

        let second = journal
            .run_once(&key, || async {
                ConnectorOperationResult::ok(&key, serde_json::Value::Null)
            })
            .await;
        assert!(second.success);
    }

    #[tokio::test]
    async fn permanent_failure_is_sticky() {
        let journal = IdempotencyJournal::new();
        let key = IdempotencyKey::derive("dep-1", "push", "sim");
        journal
            .run_once(&key, || async {
                ConnectorOperationResult::failed(&key, ErrorClass::Permanent, "bad package")
            })
            .await;
        let again = journal
            .run_once(&key, || async {
                ConnectorOperationResult::ok(&key, serde_json::Value::Null)
            })
            .await;
        assert_eq!(again.error_class, ErrorClass::Permanent);
    }
}
