//! Bounded, timed, retrying access to one connector, and the registry of
//! all configured connectors.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::instrument;

use super::retry::{call_with_retry, read_with_retry, Attempted, RetryPolicy};
use super::types::{
    ActualState, ComplianceStatus, ConnectorError, ConnectorOperationResult, ConnectorResult,
    ErrorClass, IdempotencyKey, PlaneIntent, Scope,
};
use super::Connector;
use crate::domain::{Result, RolloutError};
use crate::metrics::METRICS;

/// A connector plus its own worker pool and retry policy.
///
/// Each handle owns a separate semaphore, so a slow plane exhausts only its
/// own permits.
#[derive(Clone)]
pub struct ConnectorHandle {
    connector: Arc<dyn Connector>,
    permits: Arc<Semaphore>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for ConnectorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorHandle")
            .field("id", &self.connector.id())
            .field("available_permits", &self.permits.available_permits())
            .field("retry", &self.retry)
            .finish()
    }
}

impl ConnectorHandle {
    pub fn new(connector: Arc<dyn Connector>, max_concurrency: usize, retry: RetryPolicy) -> Self {
        Self {
            connector,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            retry,
        }
    }

    pub fn id(&self) -> &str {
        self.connector.id()
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    #[instrument(
        skip(self, intent),
        fields(connector = %self.id(), correlation_id = %intent.correlation_id)
    )]
    pub async fn push(
        &self,
        intent: &PlaneIntent,
        key: &IdempotencyKey,
    ) -> Attempted<ConnectorOperationResult> {
        METRICS.inc_pushes();
        let connector = &self.connector;
        let permits = &self.permits;
        call_with_retry(&self.retry, self.id(), "push_intent", key, || async move {
            let _permit = match permits.acquire().await {
                Ok(permit) => permit,
                Err(_) => {
                    return ConnectorOperationResult::failed(
                        key,
                        ErrorClass::Transient,
                        "connector worker pool closed",
                    )
                }
            };
            connector.push_intent(intent, key).await
        })
        .await
    }

    #[instrument(
        skip(self, intent),
        fields(connector = %self.id(), correlation_id = %intent.correlation_id)
    )]
    pub async fn rollback(
        &self,
        intent: &PlaneIntent,
        key: &IdempotencyKey,
    ) -> Attempted<ConnectorOperationResult> {
        let connector = &self.connector;
        let permits = &self.permits;
        call_with_retry(&self.retry, self.id(), "rollback", key, || async move {
            let _permit = match permits.acquire().await {
                Ok(permit) => permit,
                Err(_) => {
                    return ConnectorOperationResult::failed(
                        key,
                        ErrorClass::Transient,
                        "connector worker pool closed",
                    )
                }
            };
            connector.rollback(intent, key).await
        })
        .await
    }

    pub async fn sync_state(&self, scope: &Scope) -> ConnectorResult<ActualState> {
        let connector = &self.connector;
        let permits = &self.permits;
        read_with_retry(&self.retry, self.id(), "sync_state", || async move {
            let _permit = permits
                .acquire()
                .await
                .map_err(|_| ConnectorError::transient("connector worker pool closed"))?;
            connector.sync_state(scope).await
        })
        .await
        .value
    }

    pub async fn query_compliance(&self, scope: &Scope) -> ConnectorResult<ComplianceStatus> {
        let connector = &self.connector;
        let permits = &self.permits;
        read_with_retry(&self.retry, self.id(), "query_compliance", || async move {
            let _permit = permits
                .acquire()
                .await
                .map_err(|_| ConnectorError::transient("connector worker pool closed"))?;
            connector.query_compliance(scope).await
        })
        .await
        .value
    }

    /// A single timed health check, no retries.
    pub async fn test_connection(&self) -> ConnectorResult<bool> {
        let single = RetryPolicy {
            max_attempts: 1,
            ..self.retry.clone()
        };
        let connector = &self.connector;
        read_with_retry(&single, self.id(), "test_connection", || async move {
            connector.test_connection().await
        })
        .await
        .value
    }
}

/// All connectors by id.
#[derive(Debug, Clone, Default)]
pub struct ConnectorRegistry {
    handles: BTreeMap<String, ConnectorHandle>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle. Fails on a duplicate id.
    pub fn insert(&mut self, handle: ConnectorHandle) -> Result<()> {
        let id = handle.id().to_string();
        if self.handles.contains_key(&id) {
            return Err(RolloutError::InvalidConfig(format!(
                "duplicate connector id: {id}"
            )));
        }
        self.handles.insert(id, handle);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&ConnectorHandle> {
        self.handles.get(id)
    }

    pub fn require(&self, id: &str) -> Result<&ConnectorHandle> {
        self.get(id)
            .ok_or_else(|| RolloutError::UnknownConnector(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.handles.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConnectorHandle> {
        self.handles.values()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::SimulatedPlane;

    #[test]
    fn registry_rejects_duplicate_ids() {
        let mut registry = ConnectorRegistry::new();
        let plane = Arc::new(SimulatedPlane::new("sim", 10));
        registry
            .insert(ConnectorHandle::new(plane.clone(), 2, RetryPolicy::default()))
            .unwrap();
        let err = registry
            .insert(ConnectorHandle::new(plane, 2, RetryPolicy::default()))
            .unwrap_err();
        assert!(matches!(err, RolloutError::InvalidConfig(_)));
        assert!(matches!(
            registry.require("other"),
            Err(RolloutError::UnknownConnector(_))
        ));
    }
}
