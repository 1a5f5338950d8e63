//! Desired state per (ring, connector), derived from deployment intents.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ringgate_state::VersionedStore;
use serde::{Deserialize, Serialize};

use crate::domain::{ArtifactRef, DeploymentIntent, Result};

/// An artifact that should be present on a connector's scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredApp {
    pub correlation_id: String,
    pub artifact: ArtifactRef,
    pub published_at: DateTime<Utc>,
}

/// Desired apps keyed by app name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesiredState {
    pub apps: BTreeMap<String, DesiredApp>,
}

/// Read-only view of what should be deployed where.
#[async_trait]
pub trait DesiredStateSource: Send + Sync {
    async fn desired_state(&self, ring: &str, connector_id: &str) -> Result<DesiredState>;
}

/// Desired state computed from stored intents.
///
/// An artifact is desired on a connector when the latest attempt at that
/// ring is observing or succeeded and its push to the connector succeeded.
/// When several intents publish the same app, the latest publication wins.
#[derive(Clone)]
pub struct IntentReader {
    intents: Arc<dyn VersionedStore<DeploymentIntent>>,
}

impl IntentReader {
    pub fn new(intents: Arc<dyn VersionedStore<DeploymentIntent>>) -> Self {
        Self { intents }
    }
}

#[async_trait]
impl DesiredStateSource for IntentReader {
    async fn desired_state(&self, ring: &str, connector_id: &str) -> Result<DesiredState> {
        let mut desired = DesiredState::default();
        for record in self.intents.list().await? {
            let intent = record.value;
            let Some(attempt) = intent
                .progress
                .iter()
                .find(|p| p.ring == ring)
                .and_then(|p| p.latest())
            else {
                continue;
            };
            if !attempt.phase.is_published() || !attempt.pushed_to(connector_id) {
                continue;
            }
            let Some(published_at) = attempt.published_at else {
                continue;
            };
            let candidate = DesiredApp {
                correlation_id: intent.correlation_id().to_string(),
                artifact: intent.artifact().clone(),
                published_at,
            };
            match desired.apps.get(&candidate.artifact.name) {
                Some(existing) if existing.published_at >= published_at => {}
                _ => {
                    desired
                        .apps
                        .insert(candidate.artifact.name.clone(), candidate);
                }
            }
        }
        Ok(desired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{ConnectorOperationResult, IdempotencyKey};
    use crate::domain::{CorrelationId, PushRecord};
    use crate::promotion::RingPhase;
    use crate::risk::ArtifactEvidence;
    use ringgate_state::fakes::MemoryVersionedStore;
    use ringgate_state::ContentDigest;

    fn published(id: &str, version: &str, phase: RingPhase, at: DateTime<Utc>) -> DeploymentIntent {
        let mut intent = DeploymentIntent::new(
            CorrelationId::new(id),
            ArtifactRef::new("7zip", version, ContentDigest::from_bytes(version.as_bytes())),
            vec!["canary".into()],
            ArtifactEvidence::default(),
            "tester",
            at,
        );
        intent.begin_attempt(0, at);
        let attempt = intent.current_attempt_mut().unwrap();
        attempt.phase = phase;
        attempt.published_at = Some(at);
        let key = IdempotencyKey::derive(id, "push:canary:1", "sim");
        attempt.pushes.push(PushRecord {
            connector_id: "sim".into(),
            idempotency_key: key.clone(),
            result: ConnectorOperationResult::ok(&key, serde_json::Value::Null),
            attempts: 1,
            pushed_at: at,
        });
        intent
    }

    #[tokio::test]
    async fn latest_publication_wins() {
        let store = Arc::new(MemoryVersionedStore::new());
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::minutes(5);
        store
            .insert("dep-old", published("dep-old", "22.0", RingPhase::Succeeded, t0))
            .await
            .unwrap();
        store
            .insert("dep-new", published("dep-new", "23.01", RingPhase::Observing, t1))
            .await
            .unwrap();
        let reader = IntentReader::new(store);

        let desired = reader.desired_state("canary", "sim").await.unwrap();
        assert_eq!(desired.apps["7zip"].artifact.version, "23.01");
        assert_eq!(desired.apps["7zip"].correlation_id, "dep-new");

        assert!(reader.desired_state("canary", "other").await.unwrap().apps.is_empty());
        assert!(reader.desired_state("pilot", "sim").await.unwrap().apps.is_empty());
    }

    #[tokio::test]
    async fn failed_attempts_are_not_desired() {
        let store = Arc::new(MemoryVersionedStore::new());
        store
            .insert("dep-1", published("dep-1", "23.01", RingPhase::Failed, Utc::now()))
            .await
            .unwrap();
        let reader = IntentReader::new(store);
        assert!(reader.desired_state("canary", "sim").await.unwrap().apps.is_empty());
    }
}
