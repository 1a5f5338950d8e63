//! One reconciliation worker per (ring, connector) pair.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ringgate_state::{Versioned, VersionedStore};
use serde_json::json;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use super::board::{ComplianceBoard, ComplianceSnapshot};
use super::desired::DesiredStateSource;
use super::diff::{diff_states, Discrepancy};
use super::policy::DriftPolicy;
use crate::connector::{ConnectorHandle, ErrorClass, IdempotencyKey, PlaneIntent};
use crate::domain::{
    DriftClass, DriftRecord, RemediationStatus, Result, RingDefinition, RolloutError,
};
use crate::evidence::{
    EvidenceRecorder, DRIFT_DETECTED, DRIFT_ESCALATED, DRIFT_REMEDIATING, DRIFT_RESOLVED,
};
use crate::metrics::METRICS;
use crate::obs;
use crate::persist::update_with_retry;

/// Counts from one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub discrepancies: usize,
    pub created: usize,
    pub resolved: usize,
    pub remediated: usize,
    pub escalated: usize,
}

pub struct ReconcileWorker {
    ring: RingDefinition,
    handle: ConnectorHandle,
    desired: Arc<dyn DesiredStateSource>,
    drift: Arc<dyn VersionedStore<DriftRecord>>,
    board: Arc<ComplianceBoard>,
    recorder: EvidenceRecorder,
    policy: DriftPolicy,
}

impl ReconcileWorker {
    pub fn new(
        ring: RingDefinition,
        handle: ConnectorHandle,
        desired: Arc<dyn DesiredStateSource>,
        drift: Arc<dyn VersionedStore<DriftRecord>>,
        board: Arc<ComplianceBoard>,
        recorder: EvidenceRecorder,
        policy: DriftPolicy,
    ) -> Self {
        Self {
            ring,
            handle,
            desired,
            drift,
            board,
            recorder,
            policy,
        }
    }

    pub fn ring(&self) -> &str {
        &self.ring.name
    }

    pub fn connector_id(&self) -> &str {
        self.handle.id()
    }

    /// Tick every `interval` until `shutdown` flips to `true`. A failed
    /// tick is logged and skipped.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            ring = %self.ring.name,
            connector = %self.connector_id(),
            ?interval,
            "reconcile worker started"
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.tick(Utc::now()).await {
                        obs::emit_tick_error(&self.ring.name, self.connector_id(), &err);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(ring = %self.ring.name, connector = %self.connector_id(), "reconcile worker stopped");
    }

    /// One pass: observe, snapshot, diff, track drift, remediate.
    #[instrument(skip_all, fields(ring = %self.ring.name, connector = %self.connector_id()))]
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let scope = self.ring.scope();
        let connector_id = self.connector_id().to_string();
        let actual = self
            .handle
            .sync_state(&scope)
            .await
            .map_err(|e| RolloutError::from_connector(&connector_id, e))?;
        let compliance = self
            .handle
            .query_compliance(&scope)
            .await
            .map_err(|e| RolloutError::from_connector(&connector_id, e))?;
        self.board.publish(ComplianceSnapshot {
            connector_id: connector_id.clone(),
            scope: scope.clone(),
            taken_at: now,
            status: compliance,
        });

        let desired = self.desired.desired_state(&self.ring.name, &connector_id).await?;
        let discrepancies = diff_states(&desired, &actual);

        let mut active: HashMap<String, Versioned<DriftRecord>> = HashMap::new();
        let mut last_resolved: HashMap<String, (DateTime<Utc>, String)> = HashMap::new();
        for record in self.drift.list().await? {
            let drift = &record.value;
            if drift.scope != scope || drift.connector_id != connector_id {
                continue;
            }
            let fingerprint = drift.fingerprint();
            if drift.status.is_active() {
                active.insert(fingerprint, record);
            } else {
                let newer = last_resolved
                    .get(&fingerprint)
                    .map_or(true, |(at, _)| drift.detected_at > *at);
                if newer {
                    last_resolved.insert(fingerprint, (drift.detected_at, drift.drift_id.clone()));
                }
            }
        }

        let mut report = TickReport {
            discrepancies: discrepancies.len(),
            ..TickReport::default()
        };
        let mut seen = HashSet::new();
        for discrepancy in &discrepancies {
            let fingerprint = crate::domain::drift::fingerprint(
                &scope,
                &connector_id,
                &discrepancy.entity,
                discrepancy.class,
            );
            seen.insert(fingerprint.clone());
            let record = match active.get(&fingerprint) {
                Some(existing) => {
                    let (stored, _) =
                        update_with_retry(self.drift.as_ref(), &existing.key, |d| {
                            d.detected_at = now;
                            d.actual = discrepancy.actual.clone();
                            Ok(())
                        })
                        .await?;
                    stored.value
                }
                None => {
                    let supersedes = last_resolved.get(&fingerprint).map(|(_, id)| id.clone());
                    let created = self.open_record(discrepancy, supersedes, now).await?;
                    report.created += 1;
                    created
                }
            };
            match self.remediate(record, discrepancy, now).await? {
                Remediation::Pushed => report.remediated += 1,
                Remediation::Escalated => report.escalated += 1,
                Remediation::Skipped => {}
            }
        }

        for (fingerprint, record) in &active {
            if seen.contains(fingerprint) {
                continue;
            }
            self.resolve(record, now).await?;
            report.resolved += 1;
        }

        obs::emit_reconcile_tick(
            &self.ring.name,
            &connector_id,
            report.discrepancies,
            report.created,
            report.resolved,
        );
        Ok(report)
    }

    async fn open_record(
        &self,
        discrepancy: &Discrepancy,
        supersedes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<DriftRecord> {
        let mut record = DriftRecord::new(
            self.ring.scope(),
            self.connector_id(),
            discrepancy.entity.clone(),
            discrepancy.class,
            self.policy.severity_for(discrepancy.class),
            discrepancy.desired.clone(),
            discrepancy.actual.clone(),
            discrepancy.correlation_id.clone(),
            now,
        );
        record.supersedes = supersedes;
        self.drift.insert(&record.drift_id, record.clone()).await?;
        METRICS.inc_drift_detected();
        self.record_event(&record, DRIFT_DETECTED, now).await?;
        Ok(record)
    }

    async fn resolve(&self, record: &Versioned<DriftRecord>, now: DateTime<Utc>) -> Result<()> {
        let (stored, _) = update_with_retry(self.drift.as_ref(), &record.key, |d| {
            d.status = RemediationStatus::Resolved;
            Ok(())
        })
        .await?;
        self.record_event(&stored.value, DRIFT_RESOLVED, now).await
    }

    async fn escalate(&self, drift_id: &str, reason: String, now: DateTime<Utc>) -> Result<()> {
        warn!(drift_id, reason = %reason, "drift escalated");
        let (stored, _) = update_with_retry(self.drift.as_ref(), drift_id, |d| {
            d.status = RemediationStatus::Escalated;
            d.escalation_reason = Some(reason.clone());
            Ok(())
        })
        .await?;
        self.record_event(&stored.value, DRIFT_ESCALATED, now).await
    }

    async fn remediate(
        &self,
        record: DriftRecord,
        discrepancy: &Discrepancy,
        now: DateTime<Utc>,
    ) -> Result<Remediation> {
        if !matches!(
            record.status,
            RemediationStatus::Open | RemediationStatus::Remediating
        ) {
            return Ok(Remediation::Skipped);
        }
        if record.severity < self.policy.remediate_at {
            debug!(
                drift_id = %record.drift_id,
                severity = %record.severity,
                "below remediation threshold"
            );
            return Ok(Remediation::Skipped);
        }
        let desired_app = match (&record.classification, &discrepancy.desired_app) {
            (DriftClass::Unexpected, _) | (_, None) => {
                self.escalate(
                    &record.drift_id,
                    format!("{} present without a desired counterpart", record.entity),
                    now,
                )
                .await?;
                return Ok(Remediation::Escalated);
            }
            (_, Some(app)) => app,
        };
        if record.remediation_attempts >= self.policy.max_remediation_attempts {
            self.escalate(
                &record.drift_id,
                format!(
                    "remediation attempts exhausted ({})",
                    record.remediation_attempts
                ),
                now,
            )
            .await?;
            return Ok(Remediation::Escalated);
        }
        if let Some(last) = record.last_remediation_at {
            if now - last < self.policy.remediation_backoff() {
                return Ok(Remediation::Skipped);
            }
        }

        let (stored, attempt) = update_with_retry(self.drift.as_ref(), &record.drift_id, |d| {
            d.status = RemediationStatus::Remediating;
            d.remediation_attempts += 1;
            d.last_remediation_at = Some(now);
            Ok(d.remediation_attempts)
        })
        .await?;
        self.record_event(&stored.value, DRIFT_REMEDIATING, now).await?;

        let key = IdempotencyKey::derive(
            &desired_app.correlation_id,
            &format!("remediate:{}:{attempt}", record.drift_id),
            self.connector_id(),
        );
        let intent = PlaneIntent {
            correlation_id: desired_app.correlation_id.clone(),
            artifact: desired_app.artifact.clone(),
            scope: self.ring.scope(),
        };
        METRICS.inc_remediations();
        let result = self.handle.push(&intent, &key).await.value;
        match result.error_class {
            ErrorClass::None | ErrorClass::Transient => {
                if !result.success {
                    warn!(
                        drift_id = %record.drift_id,
                        attempt,
                        error = result.message.as_deref().unwrap_or(""),
                        "remediation push failed transiently; will retry after backoff"
                    );
                }
                Ok(Remediation::Pushed)
            }
            ErrorClass::Permanent | ErrorClass::PolicyViolation => {
                self.escalate(
                    &record.drift_id,
                    format!(
                        "remediation push failed ({}): {}",
                        result.error_class,
                        result.message.unwrap_or_default()
                    ),
                    now,
                )
                .await?;
                Ok(Remediation::Escalated)
            }
        }
    }

    async fn record_event(
        &self,
        record: &DriftRecord,
        kind: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        obs::emit_drift(
            &record.drift_id,
            &record.scope.ring,
            &record.connector_id,
            &record.classification.to_string(),
            &record.severity.to_string(),
            &record.status.to_string(),
        );
        let correlation_id = record
            .correlation_id
            .clone()
            .unwrap_or_else(|| record.drift_id.clone());
        self.recorder
            .record(
                &correlation_id,
                kind,
                json!({
                    "drift_id": record.drift_id,
                    "scope": record.scope,
                    "connector_id": record.connector_id,
                    "entity": record.entity,
                    "classification": record.classification,
                    "severity": record.severity,
                    "status": record.status,
                    "remediation_attempts": record.remediation_attempts,
                    "escalation_reason": record.escalation_reason,
                    "supersedes": record.supersedes,
                }),
                now,
            )
            .await?;
        Ok(())
    }
}

enum Remediation {
    Pushed,
    Escalated,
    Skipped,
}

impl std::fmt::Debug for ReconcileWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcileWorker")
            .field("ring", &self.ring.name)
            .field("connector", &self.connector_id())
            .field("policy", &self.policy)
            .finish()
    }
}
