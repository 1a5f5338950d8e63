//! In-memory execution plane with scripted faults.
//!
//! Behaves like a real plane from the controller's point of view: pushes
//! assign an app to a group, rollbacks remove it, compliance reports
//! installed/failed counts per app. Faults are queued per operation and
//! consumed one per call.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use ringgate_state::ContentDigest;
use serde_json::json;
use tracing::debug;

use super::journal::IdempotencyJournal;
use super::types::*;
use super::Connector;

#[derive(Debug, Clone)]
struct SimApp {
    version: String,
    digest: ContentDigest,
    installed: u32,
    failed: u32,
}

#[derive(Debug, Default)]
struct PlaneState {
    groups: HashMap<String, BTreeMap<String, SimApp>>,
    push_faults: VecDeque<ErrorClass>,
    rollback_faults: VecDeque<ErrorClass>,
    read_faults: VecDeque<ErrorClass>,
    /// Failed installs to report for (group, app) on the next push
    failure_plan: HashMap<(String, String), u32>,
    push_executions: u32,
    rollback_executions: u32,
    push_latency: Option<Duration>,
    unhealthy: bool,
}

pub struct SimulatedPlane {
    id: String,
    targets_per_group: u32,
    state: Mutex<PlaneState>,
    journal: IdempotencyJournal,
}

impl SimulatedPlane {
    pub fn new(id: impl Into<String>, targets_per_group: u32) -> Self {
        Self {
            id: id.into(),
            targets_per_group,
            state: Mutex::new(PlaneState::default()),
            journal: IdempotencyJournal::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, PlaneState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next `n` push calls with `class`.
    pub fn fail_next_pushes(&self, class: ErrorClass, n: usize) {
        self.state().push_faults.extend(std::iter::repeat(class).take(n));
    }

    pub fn fail_next_rollbacks(&self, class: ErrorClass, n: usize) {
        self.state()
            .rollback_faults
            .extend(std::iter::repeat(class).take(n));
    }

    /// Fail the next `n` sync/compliance reads with `class`.
    pub fn fail_next_reads(&self, class: ErrorClass, n: usize) {
        self.state().read_faults.extend(std::iter::repeat(class).take(n));
    }

    /// Report `failed` targets for `app` in `group`: applied to the app if
    /// it is already installed, otherwise to its next push.
    pub fn set_failed_targets(&self, group: &str, app: &str, failed: u32) {
        let failed = failed.min(self.targets_per_group);
        let targets = self.targets_per_group;
        let mut state = self.state();
        if let Some(entry) = state.groups.get_mut(group).and_then(|g| g.get_mut(app)) {
            entry.failed = failed;
            entry.installed = targets - failed;
        } else {
            state
                .failure_plan
                .insert((group.to_string(), app.to_string()), failed);
        }
    }

    /// Drop an app from a group behind the controller's back.
    pub fn remove_app(&self, group: &str, app: &str) {
        if let Some(apps) = self.state().groups.get_mut(group) {
            apps.remove(app);
        }
    }

    /// Install an app out of band.
    pub fn install_out_of_band(
        &self,
        group: &str,
        app: &str,
        version: &str,
        digest: ContentDigest,
    ) {
        let targets = self.targets_per_group;
        self.state().groups.entry(group.to_string()).or_default().insert(
            app.to_string(),
            SimApp {
                version: version.to_string(),
                digest,
                installed: targets,
                failed: 0,
            },
        );
    }

    pub fn set_push_latency(&self, latency: Duration) {
        self.state().push_latency = Some(latency);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.state().unhealthy = !healthy;
    }

    /// Pushes that actually changed plane state.
    pub fn push_executions(&self) -> u32 {
        self.state().push_executions
    }

    pub fn rollback_executions(&self) -> u32 {
        self.state().rollback_executions
    }

    pub fn has_app(&self, group: &str, app: &str) -> bool {
        self.state()
            .groups
            .get(group)
            .is_some_and(|apps| apps.contains_key(app))
    }

    fn take_read_fault(&self) -> ConnectorResult<()> {
        match self.state().read_faults.pop_front() {
            Some(class) => Err(ConnectorError::new(
                class,
                format!("{}: injected read fault", self.id),
            )),
            None => Ok(()),
        }
    }

    fn apply_push(&self, intent: &PlaneIntent, key: &IdempotencyKey) -> ConnectorOperationResult {
        let targets = self.targets_per_group;
        let mut state = self.state();
        if let Some(class) = state.push_faults.pop_front() {
            return ConnectorOperationResult::failed(
                key,
                class,
                format!("{}: injected {class} push fault", self.id),
            );
        }
        let plan_key = (intent.scope.group.clone(), intent.artifact.name.clone());
        let failed = state.failure_plan.remove(&plan_key).unwrap_or(0);
        state.push_executions += 1;
        state
            .groups
            .entry(intent.scope.group.clone())
            .or_default()
            .insert(
                intent.artifact.name.clone(),
                SimApp {
                    version: intent.artifact.version.clone(),
                    digest: intent.artifact.digest.clone(),
                    installed: targets - failed,
                    failed,
                },
            );
        debug!(
            plane = %self.id,
            group = %intent.scope.group,
            app = %intent.artifact.name,
            "simulated push applied"
        );
        ConnectorOperationResult::ok(
            key,
            json!({ "plane": self.id, "group": intent.scope.group, "assigned": targets }),
        )
    }

    fn apply_rollback(
        &self,
        intent: &PlaneIntent,
        key: &IdempotencyKey,
    ) -> ConnectorOperationResult {
        let mut state = self.state();
        if let Some(class) = state.rollback_faults.pop_front() {
            return ConnectorOperationResult::failed(
                key,
                class,
                format!("{}: injected {class} rollback fault", self.id),
            );
        }
        state.rollback_executions += 1;
        let removed = state
            .groups
            .get_mut(&intent.scope.group)
            .and_then(|apps| apps.remove(&intent.artifact.name))
            .is_some();
        ConnectorOperationResult::ok(key, json!({ "plane": self.id, "removed": removed }))
    }
}

#[async_trait]
impl Connector for SimulatedPlane {
    fn id(&self) -> &str {
        &self.id
    }

    async fn test_connection(&self) -> ConnectorResult<bool> {
        Ok(!self.state().unhealthy)
    }

    async fn sync_state(&self, scope: &Scope) -> ConnectorResult<ActualState> {
        self.take_read_fault()?;
        let state = self.state();
        let apps = state
            .groups
            .get(&scope.group)
            .map(|apps| {
                apps.iter()
                    .map(|(name, app)| {
                        (
                            name.clone(),
                            ObservedApp {
                                version: app.version.clone(),
                                digest: Some(app.digest.clone()),
                                targets: app.installed + app.failed,
                            },
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(ActualState { apps })
    }

    async fn push_intent(
        &self,
        intent: &PlaneIntent,
        key: &IdempotencyKey,
    ) -> ConnectorOperationResult {
        let latency = self.state().push_latency;
        self.journal
            .run_once(key, || async move {
                if let Some(latency) = latency {
                    tokio::time::sleep(latency).await;
                }
                self.apply_push(intent, key)
            })
            .await
    }

    async fn query_compliance(&self, scope: &Scope) -> ConnectorResult<ComplianceStatus> {
        self.take_read_fault()?;
        let state = self.state();
        let apps = state
            .groups
            .get(&scope.group)
            .map(|apps| {
                apps.iter()
                    .map(|(name, app)| {
                        (
                            name.clone(),
                            AppCompliance {
                                installed: app.installed,
                                failed: app.failed,
                                pending: 0,
                            },
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(ComplianceStatus { apps })
    }

    async fn rollback(
        &self,
        intent: &PlaneIntent,
        key: &IdempotencyKey,
    ) -> ConnectorOperationResult {
        self.journal
            .run_once(key, || async move { self.apply_rollback(intent, key) })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ArtifactRef;

    fn intent() -> PlaneIntent {
        PlaneIntent {
            correlation_id: "dep-1".into(),
            artifact: ArtifactRef::new("7zip", "23.01", ContentDigest::from_bytes(b"7zip")),
            scope: Scope::new("canary", "grp-canary"),
        }
    }

    #[tokio::test]
    async fn repeated_push_applies_once() {
        let plane = SimulatedPlane::new("sim", 20);
        let key = IdempotencyKey::derive("dep-1", "push:canary:1", "sim");
        let first = plane.push_intent(&intent(), &key).await;
        let second = plane.push_intent(&intent(), &key).await;

        assert!(first.success);
        assert_eq!(first, second);
        assert_eq!(plane.push_executions(), 1);
        assert!(plane.has_app("grp-canary", "7zip"));
    }

    #[tokio::test]
    async fn transient_fault_is_retryable_with_same_key() {
        let plane = SimulatedPlane::new("sim", 20);
        plane.fail_next_pushes(ErrorClass::Transient, 1);
        let key = IdempotencyKey::derive("dep-1", "push:canary:1", "sim");

        assert!(plane.push_intent(&intent(), &key).await.is_transient());
        assert!(plane.push_intent(&intent(), &key).await.success);
        assert_eq!(plane.push_executions(), 1);
    }

    #[tokio::test]
    async fn compliance_reflects_failure_plan() {
        let plane = SimulatedPlane::new("sim", 20);
        plane.set_failed_targets("grp-canary", "7zip", 5);
        let key = IdempotencyKey::derive("dep-1", "push:canary:1", "sim");
        plane.push_intent(&intent(), &key).await;

        let scope = Scope::new("canary", "grp-canary");
        let compliance = plane.query_compliance(&scope).await.unwrap();
        assert_eq!(compliance.app("7zip").and_then(|c| c.success_rate()), Some(75));
    }

    #[tokio::test]
    async fn rollback_removes_app() {
        let plane = SimulatedPlane::new("sim", 20);
        let push = IdempotencyKey::derive("dep-1", "push:canary:1", "sim");
        let undo = IdempotencyKey::derive("dep-1", "rollback:canary:1", "sim");
        plane.push_intent(&intent(), &push).await;

        let result = plane.rollback(&intent(), &undo).await;
        assert!(result.success);
        assert!(!plane.has_app("grp-canary", "7zip"));
        let state = plane
            .sync_state(&Scope::new("canary", "grp-canary"))
            .await
            .unwrap();
        assert!(state.apps.is_empty());
    }

    #[tokio::test]
    async fn read_fault_surfaces_class() {
        let plane = SimulatedPlane::new("sim", 20);
        plane.fail_next_reads(ErrorClass::Permanent, 1);
        let err = plane
            .sync_state(&Scope::new("canary", "grp-canary"))
            .await
            .unwrap_err();
        assert_eq!(err.class, ErrorClass::Permanent);
    }
}
