//! Rollback executor: reverses a failed ring attempt on every connector that
//! accepted its push.
//!
//! Rollbacks run concurrently across connectors, each with the connector's
//! own retry policy. The SLA is observed, never enforced: a slow rollback is
//! reported as breached but keeps going until every connector has answered.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::connector::{
    ConnectorOperationResult, ConnectorRegistry, ErrorClass, IdempotencyKey, PlaneIntent,
};
use crate::domain::{DeploymentIntent, RingDefinition};
use crate::metrics::METRICS;
use crate::obs;

/// Default rollback SLA: four hours.
pub const DEFAULT_SLA: Duration = Duration::from_secs(4 * 60 * 60);

/// Rollback outcome on one connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorRollback {
    pub connector_id: String,
    pub idempotency_key: IdempotencyKey,
    pub result: ConnectorOperationResult,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackReport {
    pub correlation_id: String,
    pub ring: String,
    pub ring_index: usize,
    pub attempt: u32,
    pub outcomes: Vec<ConnectorRollback>,
    /// Every targeted connector confirmed the rollback
    pub complete: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub sla_secs: u64,
    pub sla_breached: bool,
}

impl RollbackReport {
    pub fn failed_connectors(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|o| !o.result.success)
            .map(|o| o.connector_id.as_str())
    }
}

fn in_flight_key(correlation_id: &str, ring: &str) -> String {
    format!("{correlation_id}/{ring}")
}

pub struct RollbackExecutor {
    registry: Arc<ConnectorRegistry>,
    sla: Duration,
    in_flight: Mutex<HashMap<String, Instant>>,
}

impl RollbackExecutor {
    pub fn new(registry: Arc<ConnectorRegistry>, sla: Duration) -> Self {
        Self {
            registry,
            sla,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn sla(&self) -> Duration {
        self.sla
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Roll back the latest attempt of `intent` at `ring_index`.
    ///
    /// Targets exactly the connectors whose push succeeded in that attempt.
    /// An attempt without successful pushes yields an empty, complete report.
    #[instrument(skip_all, fields(correlation_id = %intent.correlation_id(), ring = %ring.name))]
    pub async fn execute(
        &self,
        intent: &DeploymentIntent,
        ring_index: usize,
        ring: &RingDefinition,
    ) -> RollbackReport {
        let correlation_id = intent.correlation_id().as_str();
        let attempt = intent.progress_at(ring_index).and_then(|p| p.latest());
        let attempt_no = attempt.map(|a| a.attempt).unwrap_or(1);
        let targets: Vec<String> = attempt
            .map(|a| a.successful_pushes().map(|p| p.connector_id.clone()).collect())
            .unwrap_or_default();

        let plane_intent = PlaneIntent {
            correlation_id: correlation_id.to_string(),
            artifact: intent.artifact().clone(),
            scope: ring.scope(),
        };
        let operation = format!("rollback:{}:{attempt_no}", ring.name);

        let started_at = Utc::now();
        let started = Instant::now();
        let flight = in_flight_key(correlation_id, &ring.name);
        self.in_flight().insert(flight.clone(), started);

        let calls = targets.iter().map(|connector_id| {
            let key = IdempotencyKey::derive(correlation_id, &operation, connector_id);
            let plane_intent = &plane_intent;
            async move {
                let Some(handle) = self.registry.get(connector_id) else {
                    return ConnectorRollback {
                        connector_id: connector_id.clone(),
                        result: ConnectorOperationResult::failed(
                            &key,
                            ErrorClass::Permanent,
                            format!("unknown connector: {connector_id}"),
                        ),
                        idempotency_key: key,
                        attempts: 0,
                    };
                };
                METRICS.inc_rollbacks();
                let attempted = handle.rollback(plane_intent, &key).await;
                ConnectorRollback {
                    connector_id: connector_id.clone(),
                    idempotency_key: key,
                    result: attempted.value,
                    attempts: attempted.attempts,
                }
            }
        });
        let outcomes = join_all(calls).await;

        self.in_flight().remove(&flight);
        let elapsed = started.elapsed();
        let complete = outcomes.iter().all(|o| o.result.success);
        let sla_breached = elapsed > self.sla;
        let report = RollbackReport {
            correlation_id: correlation_id.to_string(),
            ring: ring.name.clone(),
            ring_index,
            attempt: attempt_no,
            outcomes,
            complete,
            started_at,
            finished_at: Utc::now(),
            elapsed_ms: elapsed.as_millis().min(u64::MAX as u128) as u64,
            sla_secs: self.sla.as_secs(),
            sla_breached,
        };
        if !complete {
            warn!(
                failed = ?report.failed_connectors().collect::<Vec<_>>(),
                "rollback incomplete; operator intervention required"
            );
        }
        obs::emit_rollback_finished(
            correlation_id,
            &ring.name,
            complete,
            report.elapsed_ms,
            sla_breached,
        );
        report
    }

    /// Elapsed time of a rollback still running for the intent's ring.
    pub fn in_flight_elapsed(&self, correlation_id: &str, ring: &str) -> Option<Duration> {
        self.in_flight()
            .get(&in_flight_key(correlation_id, ring))
            .map(Instant::elapsed)
    }

    /// Running rollbacks that have exceeded the SLA, as `correlation/ring`.
    pub fn breaching_sla(&self) -> Vec<String> {
        self.in_flight()
            .iter()
            .filter(|(_, started)| started.elapsed() > self.sla)
            .map(|(key, _)| key.clone())
            .collect()
    }
}

impl std::fmt::Debug for RollbackExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollbackExecutor")
            .field("sla", &self.sla)
            .field("in_flight", &self.in_flight().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{ConnectorHandle, RetryPolicy, SimulatedPlane};
    use crate::domain::{ArtifactRef, CorrelationId, PushRecord};
    use crate::risk::ArtifactEvidence;
    use ringgate_state::ContentDigest;

    fn ring() -> RingDefinition {
        RingDefinition {
            name: "canary".into(),
            success_threshold: 95,
            min_dwell_secs: 0,
            target_count: 10,
            scope_group: "grp-canary".into(),
            connectors: vec!["a".into(), "b".into()],
        }
    }

    fn intent_with_pushes(pushed: &[(&str, bool)]) -> DeploymentIntent {
        let now = Utc::now();
        let mut intent = DeploymentIntent::new(
            CorrelationId::new("dep-rb"),
            ArtifactRef::new("7zip", "23.01", ContentDigest::from_bytes(b"7zip")),
            vec!["canary".into()],
            ArtifactEvidence::default(),
            "tester",
            now,
        );
        intent.begin_attempt(0, now);
        let attempt = intent.current_attempt_mut().unwrap();
        for (id, ok) in pushed {
            let key = IdempotencyKey::derive("dep-rb", "push:canary:1", id);
            let result = if *ok {
                ConnectorOperationResult::ok(&key, serde_json::Value::Null)
            } else {
                ConnectorOperationResult::failed(&key, ErrorClass::Permanent, "no")
            };
            attempt.pushes.push(PushRecord {
                connector_id: id.to_string(),
                idempotency_key: key,
                result,
                attempts: 1,
                pushed_at: now,
            });
        }
        intent
    }

    fn registry(planes: &[Arc<SimulatedPlane>]) -> Arc<ConnectorRegistry> {
        let mut registry = ConnectorRegistry::new();
        for plane in planes {
            registry
                .insert(ConnectorHandle::new(
                    plane.clone(),
                    4,
                    RetryPolicy::single_attempt(),
                ))
                .unwrap();
        }
        Arc::new(registry)
    }

    #[tokio::test]
    async fn only_successful_pushes_are_rolled_back() {
        let a = Arc::new(SimulatedPlane::new("a", 10));
        let b = Arc::new(SimulatedPlane::new("b", 10));
        let executor = RollbackExecutor::new(registry(&[a.clone(), b.clone()]), DEFAULT_SLA);

        let report = executor
            .execute(&intent_with_pushes(&[("a", true), ("b", false)]), 0, &ring())
            .await;

        assert!(report.complete);
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].connector_id, "a");
        assert_eq!(a.rollback_executions(), 1);
        assert_eq!(b.rollback_executions(), 0);
        assert!(!report.sla_breached);
        assert!(executor.breaching_sla().is_empty());
    }

    #[tokio::test]
    async fn partial_failure_is_incomplete() {
        let a = Arc::new(SimulatedPlane::new("a", 10));
        let b = Arc::new(SimulatedPlane::new("b", 10));
        b.fail_next_rollbacks(ErrorClass::Permanent, 1);
        let executor = RollbackExecutor::new(registry(&[a.clone(), b.clone()]), DEFAULT_SLA);

        let report = executor
            .execute(&intent_with_pushes(&[("a", true), ("b", true)]), 0, &ring())
            .await;

        assert!(!report.complete);
        assert_eq!(report.failed_connectors().collect::<Vec<_>>(), vec!["b"]);
        assert_eq!(a.rollback_executions(), 1);
    }

    #[tokio::test]
    async fn no_pushes_yields_empty_complete_report() {
        let executor = RollbackExecutor::new(registry(&[]), DEFAULT_SLA);
        let report = executor.execute(&intent_with_pushes(&[]), 0, &ring()).await;
        assert!(report.complete);
        assert!(report.outcomes.is_empty());
    }

    #[tokio::test]
    async fn unknown_connector_counts_as_failure() {
        let executor = RollbackExecutor::new(registry(&[]), DEFAULT_SLA);
        let report = executor
            .execute(&intent_with_pushes(&[("gone", true)]), 0, &ring())
            .await;
        assert!(!report.complete);
        assert_eq!(report.outcomes[0].result.error_class, ErrorClass::Permanent);
    }

    #[tokio::test]
    async fn zero_sla_is_reported_as_breached() {
        let a = Arc::new(SimulatedPlane::new("a", 10));
        let executor = RollbackExecutor::new(registry(&[a]), Duration::ZERO);
        let report = executor
            .execute(&intent_with_pushes(&[("a", true)]), 0, &ring())
            .await;
        assert!(report.complete);
        assert!(report.sla_breached);
    }
}
