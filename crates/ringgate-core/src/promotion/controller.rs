//! Promotion controller: moves each deployment intent through its ring
//! sequence.
//!
//! Every public operation takes the intent's lock, so transitions of one
//! intent are strictly serialized while different intents proceed
//! independently. Each transition is persisted through compare-and-swap and
//! recorded as exactly one evidence event.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use ringgate_state::StorageError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use super::locks::IntentLocks;
use super::state::{transition, RingPhase};
use crate::approval::{ApprovalGate, ApprovalPolicy, ApprovalStatus, Decision};
use crate::connector::{
    AppCompliance, ConnectorOperationResult, ConnectorRegistry, ErrorClass, IdempotencyKey,
    PlaneIntent,
};
use crate::domain::{
    ArtifactRef, CorrelationId, DeploymentIntent, DriftClass, DriftSeverity, FailureCause,
    FailureRecord, IntentStatus, PushRecord, RemediationStatus, Result, RingAttempt,
    RingCatalog, RingDefinition, RolloutError,
};
use crate::evidence::{self, EvidenceRecorder};
use crate::obs;
use crate::persist::{update_with_retry, Stores};
use crate::reconcile::{ComplianceBoard, IntentReader};
use crate::risk::{ArtifactEvidence, PriorRing, RingEvidence, RiskEvidence, RiskModel};
use crate::rollback::{RollbackExecutor, DEFAULT_SLA};

/// Tunables for the controller.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub approval: ApprovalPolicy,
    pub risk_model: RiskModel,
    /// Lowest severity of missing/unexpected drift that fails an observing
    /// ring. Escalated drift always fails it.
    pub drift_fail_at: DriftSeverity,
    pub rollback_sla: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            approval: ApprovalPolicy::default(),
            risk_model: RiskModel::v1(),
            drift_fail_at: DriftSeverity::Critical,
            rollback_sla: DEFAULT_SLA,
        }
    }
}

/// A new deployment request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitIntent {
    /// Generated when absent
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
    pub artifact: ArtifactRef,
    pub rings: Vec<String>,
    #[serde(default)]
    pub evidence: ArtifactEvidence,
    pub submitted_by: String,
}

fn is_observing(intent: &DeploymentIntent) -> bool {
    intent.status == IntentStatus::InProgress && intent.current_phase() == RingPhase::Observing
}

fn attempt_mut<'a>(
    intent: &'a mut DeploymentIntent,
    correlation_id: &str,
    to: RingPhase,
) -> Result<&'a mut RingAttempt> {
    intent
        .current_attempt_mut()
        .ok_or_else(|| RolloutError::InvalidTransition {
            correlation_id: correlation_id.to_string(),
            from: RingPhase::NotStarted.to_string(),
            to: to.to_string(),
        })
}

/// Failure cause and reason for a publish with at least one failed push.
/// Policy violations outrank permanent failures, which outrank exhausted
/// transient ones.
fn classify_push_failures(pushes: &[PushRecord]) -> Option<(FailureCause, String)> {
    let failed: Vec<&PushRecord> = pushes.iter().filter(|p| !p.result.success).collect();
    if failed.is_empty() {
        return None;
    }
    let any = |class: ErrorClass| failed.iter().any(|p| p.result.error_class == class);
    let cause = if any(ErrorClass::PolicyViolation) {
        FailureCause::PolicyViolation
    } else if any(ErrorClass::Permanent) {
        FailureCause::ConnectorPermanent
    } else {
        FailureCause::ConnectorTransient
    };
    let reason = failed
        .iter()
        .map(|p| {
            format!(
                "{}: {} after {} attempt(s): {}",
                p.connector_id,
                p.result.error_class,
                p.attempts,
                p.result.message.as_deref().unwrap_or("no message")
            )
        })
        .collect::<Vec<_>>()
        .join("; ");
    Some((cause, reason))
}

pub struct PromotionController {
    rings: RingCatalog,
    registry: Arc<ConnectorRegistry>,
    stores: Stores,
    board: Arc<ComplianceBoard>,
    recorder: EvidenceRecorder,
    gate: ApprovalGate,
    model: RiskModel,
    rollback: RollbackExecutor,
    locks: IntentLocks,
    drift_fail_at: DriftSeverity,
}

impl PromotionController {
    pub fn new(
        rings: RingCatalog,
        registry: Arc<ConnectorRegistry>,
        stores: Stores,
        board: Arc<ComplianceBoard>,
        recorder: EvidenceRecorder,
        settings: ControllerSettings,
    ) -> Self {
        let rollback = RollbackExecutor::new(registry.clone(), settings.rollback_sla);
        Self {
            rings,
            registry,
            stores,
            board,
            recorder,
            gate: ApprovalGate::new(settings.approval),
            model: settings.risk_model,
            rollback,
            locks: IntentLocks::new(),
            drift_fail_at: settings.drift_fail_at,
        }
    }

    pub fn rings(&self) -> &RingCatalog {
        &self.rings
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn rollback_executor(&self) -> &RollbackExecutor {
        &self.rollback
    }

    /// Desired-state view for the reconciliation loop.
    pub fn reader(&self) -> IntentReader {
        IntentReader::new(self.stores.intents.clone())
    }

    pub async fn get(&self, correlation_id: &str) -> Result<DeploymentIntent> {
        self.stores
            .intents
            .get(correlation_id)
            .await?
            .map(|v| v.value)
            .ok_or_else(|| RolloutError::IntentNotFound(correlation_id.to_string()))
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Accept a new intent and enter its first ring.
    ///
    /// Ring 0 is scored before anything is stored, so incomplete evidence
    /// rejects the submission outright.
    #[instrument(skip_all, fields(artifact = %request.artifact))]
    pub async fn submit(
        &self,
        request: SubmitIntent,
        now: DateTime<Utc>,
    ) -> Result<DeploymentIntent> {
        let first = self.validate_rings(&request.rings)?;
        let correlation_id = request
            .correlation_id
            .unwrap_or_else(CorrelationId::generate);
        let intent = DeploymentIntent::new(
            correlation_id.clone(),
            request.artifact,
            request.rings,
            request.evidence,
            request.submitted_by,
            now,
        );
        self.model
            .score(&self.evidence_for(&intent, 0, &first, PriorRing::FirstRing))?;

        let corr = correlation_id.as_str();
        let _guard = self.locks.acquire(corr).await;
        match self.stores.intents.insert(corr, intent.clone()).await {
            Ok(_) => {}
            Err(StorageError::AlreadyExists { .. }) => {
                return Err(RolloutError::DuplicateIntent(corr.to_string()))
            }
            Err(err) => return Err(err.into()),
        }
        obs::emit_intent_submitted(corr, &intent.artifact().to_string(), intent.rings.len());
        self.recorder
            .record(
                corr,
                evidence::INTENT_SUBMITTED,
                json!({
                    "artifact": intent.artifact(),
                    "rings": intent.rings,
                    "evidence": intent.artifact_evidence,
                    "submitted_by": intent.submitted_by,
                }),
                now,
            )
            .await?;
        self.enter_ring(corr, 0, PriorRing::FirstRing, now).await
    }

    /// Apply an approval decision to the intent's pending checkpoint.
    #[instrument(skip_all, fields(correlation_id = %decision.intent_id, ring = %decision.ring))]
    pub async fn record_decision(
        &self,
        decision: Decision,
        now: DateTime<Utc>,
    ) -> Result<DeploymentIntent> {
        let corr = decision.intent_id.clone();
        let _guard = self.locks.acquire(&corr).await;
        self.get(&corr).await?;

        let gate = &self.gate;
        let (_, status) = self
            .update(&corr, now, |intent| {
                let in_progress = intent.status == IntentStatus::InProgress;
                let phase = intent.current_phase();
                let attempt = attempt_mut(intent, &corr, RingPhase::Publishing)?;
                let checkpoint =
                    attempt
                        .approval
                        .as_mut()
                        .ok_or_else(|| RolloutError::InvalidTransition {
                            correlation_id: corr.clone(),
                            from: phase.to_string(),
                            to: "decided".into(),
                        })?;
                let awaiting = in_progress && phase == RingPhase::AwaitingApproval;
                if checkpoint.is_pending() && !awaiting {
                    return Err(RolloutError::InvalidTransition {
                        correlation_id: corr.clone(),
                        from: phase.to_string(),
                        to: "decided".into(),
                    });
                }
                Ok(gate.record_decision(checkpoint, decision.clone())?)
            })
            .await?;

        self.recorder
            .record(
                &corr,
                evidence::APPROVAL_DECIDED,
                json!({
                    "ring": decision.ring,
                    "attempt": decision.attempt,
                    "outcome": decision.outcome,
                    "approver": decision.approver,
                    "conditions": decision.conditions,
                    "reason": decision.reason,
                    "status": status.label(),
                }),
                now,
            )
            .await?;

        match status {
            ApprovalStatus::Rejected { reason } => {
                self.fail_ring(&corr, FailureCause::Rejected, reason, now).await
            }
            s if s.allows_proceed() => self.publish(&corr, now).await,
            _ => self.get(&corr).await,
        }
    }

    /// Evaluate an observing ring against the latest compliance snapshots
    /// and drift records.
    #[instrument(skip(self))]
    pub async fn observe(
        &self,
        correlation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<DeploymentIntent> {
        let _guard = self.locks.acquire(correlation_id).await;
        let intent = self.get(correlation_id).await?;
        if !is_observing(&intent) {
            return Ok(intent);
        }
        let ring = self.ring_at(&intent, intent.current_ring)?;
        let Some(published_at) = intent.current_attempt().and_then(|a| a.published_at) else {
            return Ok(intent);
        };

        if let Some(reason) = self.blocking_drift(&intent, &ring).await? {
            return self
                .fail_ring(correlation_id, FailureCause::DriftEscalated, reason, now)
                .await;
        }
        if now < published_at + ring.min_dwell() {
            return Ok(intent);
        }
        let Some(rate) = self.measured_rate(&intent, &ring, published_at) else {
            debug!(ring = %ring.name, "no compliance snapshot since publication yet");
            return Ok(intent);
        };

        if rate < ring.success_threshold {
            self.update(correlation_id, now, |intent| {
                let attempt = attempt_mut(intent, correlation_id, RingPhase::Failed)?;
                attempt.observed_success_rate = Some(rate);
                Ok(())
            })
            .await?;
            let reason = format!(
                "success rate {rate}% below threshold {}% on ring {}",
                ring.success_threshold, ring.name
            );
            return self
                .fail_ring(correlation_id, FailureCause::BelowThreshold, reason, now)
                .await;
        }

        let (intent, attempt_no) = self
            .update(correlation_id, now, |intent| {
                let last = intent.current_ring + 1 >= intent.rings.len();
                let attempt = attempt_mut(intent, correlation_id, RingPhase::Succeeded)?;
                transition(correlation_id, &mut attempt.phase, RingPhase::Succeeded)?;
                attempt.observed_success_rate = Some(rate);
                let attempt_no = attempt.attempt;
                if last {
                    intent.status = IntentStatus::Completed;
                }
                Ok(attempt_no)
            })
            .await?;
        obs::emit_ring_transition(correlation_id, &ring.name, "observing", "succeeded");
        self.recorder
            .record(
                correlation_id,
                evidence::RING_SUCCEEDED,
                json!({
                    "ring": ring.name,
                    "attempt": attempt_no,
                    "success_rate": rate,
                    "threshold": ring.success_threshold,
                }),
                now,
            )
            .await?;

        if intent.status == IntentStatus::Completed {
            info!(correlation_id, "rollout completed");
            self.recorder
                .record(
                    correlation_id,
                    evidence::INTENT_COMPLETED,
                    json!({ "rings": intent.rings }),
                    now,
                )
                .await?;
            return Ok(intent);
        }
        self.enter_ring(
            correlation_id,
            intent.current_ring + 1,
            PriorRing::Measured { success_rate: rate },
            now,
        )
        .await
    }

    /// Observe every intent currently in `Observing`. Failures are logged
    /// per intent and do not stop the sweep.
    pub async fn observe_all(&self, now: DateTime<Utc>) -> Result<Vec<DeploymentIntent>> {
        let mut observed = Vec::new();
        for record in self.stores.intents.list().await? {
            let intent = record.value;
            if !is_observing(&intent) {
                continue;
            }
            let corr = intent.correlation_id().as_str();
            match self.observe(corr, now).await {
                Ok(intent) => observed.push(intent),
                Err(err) => warn!(correlation_id = corr, error = %err, "observation failed"),
            }
        }
        Ok(observed)
    }

    /// Fail the current ring and roll it back. Waits for any in-flight
    /// transition of the same intent. A cancelled intent cannot be
    /// re-submitted.
    #[instrument(skip(self, reason))]
    pub async fn cancel(
        &self,
        correlation_id: &str,
        operator: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<DeploymentIntent> {
        let _guard = self.locks.acquire(correlation_id).await;
        let intent = self.get(correlation_id).await?;
        if intent.status.is_terminal() {
            return Err(RolloutError::InvalidTransition {
                correlation_id: correlation_id.to_string(),
                from: intent.status.to_string(),
                to: "cancelled".into(),
            });
        }
        self.recorder
            .record(
                correlation_id,
                evidence::INTENT_CANCELLED,
                json!({
                    "operator": operator,
                    "reason": reason,
                    "ring": intent.current_ring_name(),
                    "phase": intent.current_phase(),
                }),
                now,
            )
            .await?;
        self.fail_ring(
            correlation_id,
            FailureCause::Cancelled,
            format!("cancelled by {operator}: {reason}"),
            now,
        )
        .await
    }

    /// Re-submit a failed intent at its current ring: new attempt, new
    /// score, new approval checkpoint. Earlier decisions are never reused.
    #[instrument(skip(self, evidence))]
    pub async fn resubmit(
        &self,
        correlation_id: &str,
        evidence: Option<ArtifactEvidence>,
        submitted_by: &str,
        now: DateTime<Utc>,
    ) -> Result<DeploymentIntent> {
        let _guard = self.locks.acquire(correlation_id).await;
        let intent = self.get(correlation_id).await?;
        let refused = |from: String| RolloutError::InvalidTransition {
            correlation_id: correlation_id.to_string(),
            from,
            to: "resubmitted".into(),
        };
        if !matches!(intent.status, IntentStatus::Failed | IntentStatus::RolledBack) {
            return Err(refused(intent.status.to_string()));
        }
        let cancelled = intent
            .current_attempt()
            .and_then(|a| a.failure.as_ref())
            .is_some_and(|f| f.cause == FailureCause::Cancelled);
        if cancelled {
            return Err(refused("cancelled".into()));
        }

        let index = intent.current_ring;
        let ring = self.ring_at(&intent, index)?;
        let prior = self.prior_for(&intent, index)?;
        let mut candidate = intent.clone();
        if let Some(evidence) = &evidence {
            candidate.artifact_evidence = evidence.clone();
        }
        self.model.score(&self.evidence_for(&candidate, index, &ring, prior))?;

        self.update(correlation_id, now, |intent| {
            intent.status = IntentStatus::InProgress;
            if let Some(evidence) = &evidence {
                intent.artifact_evidence = evidence.clone();
            }
            Ok(())
        })
        .await?;
        self.recorder
            .record(
                correlation_id,
                evidence::INTENT_RESUBMITTED,
                json!({
                    "ring": ring.name,
                    "submitted_by": submitted_by,
                    "evidence": candidate.artifact_evidence,
                }),
                now,
            )
            .await?;
        self.enter_ring(correlation_id, index, prior, now).await
    }

    /// Escalate pending approvals older than the policy window. Returns the
    /// correlation ids escalated.
    pub async fn escalate_stalled(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let mut escalated = Vec::new();
        for record in self.stores.intents.list().await? {
            let stalled = record.value.status == IntentStatus::InProgress
                && record
                    .value
                    .current_attempt()
                    .and_then(|a| a.approval.as_ref())
                    .is_some_and(|cp| self.gate.is_stalled(cp, now));
            if !stalled {
                continue;
            }
            let corr = record.key.as_str();
            let _guard = self.locks.acquire(corr).await;
            let gate = &self.gate;
            let (_, checkpoint) = self
                .update(corr, now, |intent| {
                    let attempt = attempt_mut(intent, corr, RingPhase::AwaitingApproval)?;
                    let Some(cp) = attempt.approval.as_mut() else {
                        return Ok(None);
                    };
                    if !gate.is_stalled(cp, now) {
                        return Ok(None);
                    }
                    gate.escalate(cp, now);
                    Ok(Some(cp.clone()))
                })
                .await?;
            let Some(checkpoint) = checkpoint else {
                continue;
            };
            self.recorder
                .record(
                    corr,
                    evidence::APPROVAL_ESCALATED,
                    json!({
                        "ring": checkpoint.ring,
                        "attempt": checkpoint.attempt,
                        "checkpoint_id": checkpoint.checkpoint_id,
                        "pending_since": checkpoint.created_at,
                        "score": checkpoint.score,
                    }),
                    now,
                )
                .await?;
            escalated.push(corr.to_string());
        }
        Ok(escalated)
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Start a new attempt at ring `index`: score, open the approval
    /// checkpoint and publish straight away when it auto-approves.
    async fn enter_ring(
        &self,
        correlation_id: &str,
        index: usize,
        prior: PriorRing,
        now: DateTime<Utc>,
    ) -> Result<DeploymentIntent> {
        let intent = self.get(correlation_id).await?;
        let ring = self.ring_at(&intent, index)?;
        let attempt_no = intent
            .progress_at(index)
            .map_or(1, |p| p.attempts.len() as u32 + 1);
        let scored = self
            .model
            .score(&self.evidence_for(&intent, index, &ring, prior));
        let checkpoint = scored.as_ref().ok().map(|assessment| {
            self.gate.open(
                correlation_id,
                &ring.name,
                attempt_no,
                assessment,
                format!("publish {} to ring {}", intent.artifact(), ring.name),
                now,
            )
        });

        let (intent, _) = self
            .update(correlation_id, now, |intent| {
                intent.current_ring = index;
                intent.begin_attempt(index, now);
                let attempt = attempt_mut(intent, correlation_id, RingPhase::AwaitingApproval)?;
                transition(correlation_id, &mut attempt.phase, RingPhase::AwaitingApproval)?;
                attempt.assessment = scored.as_ref().ok().cloned();
                attempt.approval = checkpoint.clone();
                Ok(())
            })
            .await?;
        obs::emit_ring_transition(correlation_id, &ring.name, "not_started", "awaiting_approval");
        self.recorder
            .record(
                correlation_id,
                evidence::RING_AWAITING_APPROVAL,
                json!({
                    "ring": ring.name,
                    "attempt": attempt_no,
                    "assessment": scored.as_ref().ok(),
                    "approval": checkpoint.as_ref().map(|cp| cp.status.label()),
                    "explanation": checkpoint.as_ref().map(|cp| &cp.explanation),
                }),
                now,
            )
            .await?;

        match (scored, checkpoint) {
            (Err(err), _) => {
                let cause = FailureCause::IncompleteEvidence;
                self.fail_ring(correlation_id, cause, err.to_string(), now).await
            }
            (Ok(_), Some(cp)) if cp.status.allows_proceed() => {
                self.publish(correlation_id, now).await
            }
            _ => Ok(intent),
        }
    }

    /// Push the artifact to every connector of the current ring
    /// concurrently.
    async fn publish(&self, correlation_id: &str, now: DateTime<Utc>) -> Result<DeploymentIntent> {
        let (intent, attempt_no) = self
            .update(correlation_id, now, |intent| {
                let attempt = attempt_mut(intent, correlation_id, RingPhase::Publishing)?;
                transition(correlation_id, &mut attempt.phase, RingPhase::Publishing)?;
                Ok(attempt.attempt)
            })
            .await?;
        let ring = self.ring_at(&intent, intent.current_ring)?;
        obs::emit_ring_transition(correlation_id, &ring.name, "awaiting_approval", "publishing");
        self.recorder
            .record(
                correlation_id,
                evidence::RING_PUBLISHING,
                json!({
                    "ring": ring.name,
                    "attempt": attempt_no,
                    "connectors": ring.connectors,
                }),
                now,
            )
            .await?;

        let plane_intent = PlaneIntent {
            correlation_id: correlation_id.to_string(),
            artifact: intent.artifact().clone(),
            scope: ring.scope(),
        };
        let operation = format!("push:{}:{attempt_no}", ring.name);
        let pushes = join_all(ring.connectors.iter().map(|connector_id| {
            let key = IdempotencyKey::derive(correlation_id, &operation, connector_id);
            let plane_intent = &plane_intent;
            async move {
                let (result, attempts) = match self.registry.get(connector_id) {
                    Some(handle) => {
                        let attempted = handle.push(plane_intent, &key).await;
                        (attempted.value, attempted.attempts)
                    }
                    None => (
                        ConnectorOperationResult::failed(
                            &key,
                            ErrorClass::Permanent,
                            format!("unknown connector: {connector_id}"),
                        ),
                        0,
                    ),
                };
                PushRecord {
                    connector_id: connector_id.clone(),
                    idempotency_key: key,
                    result,
                    attempts,
                    pushed_at: now,
                }
            }
        }))
        .await;
        for push in &pushes {
            obs::emit_push_result(
                correlation_id,
                &ring.name,
                &push.connector_id,
                push.result.success,
                &push.result.error_class.to_string(),
                push.attempts,
            );
        }

        let failure = classify_push_failures(&pushes);
        let published = failure.is_none();
        let (intent, _) = self
            .update(correlation_id, now, |intent| {
                let attempt = attempt_mut(intent, correlation_id, RingPhase::Observing)?;
                attempt.pushes = pushes.clone();
                if published {
                    transition(correlation_id, &mut attempt.phase, RingPhase::Observing)?;
                    attempt.published_at = Some(now);
                }
                Ok(())
            })
            .await?;

        match failure {
            None => {
                obs::emit_ring_transition(correlation_id, &ring.name, "publishing", "observing");
                self.recorder
                    .record(
                        correlation_id,
                        evidence::RING_OBSERVING,
                        json!({
                            "ring": ring.name,
                            "attempt": attempt_no,
                            "pushes": pushes,
                            "min_dwell_secs": ring.min_dwell_secs,
                            "success_threshold": ring.success_threshold,
                        }),
                        now,
                    )
                    .await?;
                Ok(intent)
            }
            Some((cause, reason)) => self.fail_ring(correlation_id, cause, reason, now).await,
        }
    }

    /// Mark the current ring failed and run its rollback exactly once.
    async fn fail_ring(
        &self,
        correlation_id: &str,
        cause: FailureCause,
        reason: String,
        now: DateTime<Utc>,
    ) -> Result<DeploymentIntent> {
        let (intent, (from, attempt_no)) = self
            .update(correlation_id, now, |intent| {
                intent.status = IntentStatus::Failed;
                let attempt = attempt_mut(intent, correlation_id, RingPhase::Failed)?;
                let from = attempt.phase;
                transition(correlation_id, &mut attempt.phase, RingPhase::Failed)?;
                attempt.failure = Some(FailureRecord {
                    cause,
                    reason: reason.clone(),
                    correlation_id: correlation_id.to_string(),
                    failed_at: now,
                });
                Ok((from, attempt.attempt))
            })
            .await?;
        let index = intent.current_ring;
        let ring = self.ring_at(&intent, index)?;
        obs::emit_ring_failed(correlation_id, &ring.name, cause.as_str(), &reason);
        self.recorder
            .record(
                correlation_id,
                evidence::RING_FAILED,
                json!({
                    "ring": ring.name,
                    "attempt": attempt_no,
                    "from": from,
                    "cause": cause,
                    "reason": reason,
                }),
                now,
            )
            .await?;

        let report = self.rollback.execute(&intent, index, &ring).await;
        let payload = serde_json::to_value(&report)?;
        let reverted = report.complete && !report.outcomes.is_empty();
        let complete = report.complete;
        let (intent, status) = self
            .update(correlation_id, now, |intent| {
                let attempt = attempt_mut(intent, correlation_id, RingPhase::RolledBack)?;
                attempt.rollback = Some(report.clone());
                if reverted {
                    transition(correlation_id, &mut attempt.phase, RingPhase::RolledBack)?;
                    intent.status = IntentStatus::RolledBack;
                } else if !complete {
                    intent.status = IntentStatus::RollbackIncomplete;
                }
                Ok(intent.status)
            })
            .await?;

        let kind = if complete {
            evidence::ROLLBACK_COMPLETED
        } else {
            evidence::ROLLBACK_INCOMPLETE
        };
        self.recorder.record(correlation_id, kind, payload, now).await?;
        match status {
            IntentStatus::RolledBack => {
                obs::emit_ring_transition(correlation_id, &ring.name, "failed", "rolled_back");
                self.recorder
                    .record(
                        correlation_id,
                        evidence::INTENT_ROLLED_BACK,
                        json!({ "ring": ring.name, "attempt": attempt_no }),
                        now,
                    )
                    .await?;
            }
            IntentStatus::RollbackIncomplete => {
                self.recorder
                    .record(
                        correlation_id,
                        evidence::INTENT_ROLLBACK_INCOMPLETE,
                        json!({
                            "ring": ring.name,
                            "attempt": attempt_no,
                            "failed_connectors": report.failed_connectors().collect::<Vec<_>>(),
                        }),
                        now,
                    )
                    .await?;
            }
            _ => {}
        }
        Ok(intent)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn update<R>(
        &self,
        correlation_id: &str,
        now: DateTime<Utc>,
        mut mutate: impl FnMut(&mut DeploymentIntent) -> Result<R>,
    ) -> Result<(DeploymentIntent, R)> {
        let store = self.stores.intents.as_ref();
        let (stored, out) = update_with_retry(store, correlation_id, |intent| {
            let out = mutate(intent)?;
            intent.updated_at = now;
            Ok(out)
        })
        .await?;
        Ok((stored.value, out))
    }

    fn validate_rings(&self, rings: &[String]) -> Result<RingDefinition> {
        let mut seen = std::collections::HashSet::new();
        for name in rings {
            self.rings.require(name)?;
            if !seen.insert(name.as_str()) {
                return Err(RolloutError::InvalidConfig(format!(
                    "ring {name} appears twice in the intent"
                )));
            }
        }
        let first = rings
            .first()
            .ok_or_else(|| RolloutError::InvalidConfig("intent targets no rings".into()))?;
        Ok(self.rings.require(first)?.clone())
    }

    fn ring_at(&self, intent: &DeploymentIntent, index: usize) -> Result<RingDefinition> {
        let name = intent
            .rings
            .get(index)
            .ok_or_else(|| RolloutError::UnknownRing(format!("#{index}")))?;
        Ok(self.rings.require(name)?.clone())
    }

    fn evidence_for(
        &self,
        intent: &DeploymentIntent,
        index: usize,
        ring: &RingDefinition,
        prior: PriorRing,
    ) -> RiskEvidence {
        RiskEvidence::new(
            intent.artifact_evidence.clone(),
            RingEvidence {
                ring_index: Some(index),
                ring_count: Some(intent.rings.len()),
                target_count: Some(ring.target_count),
                prior_ring: Some(prior),
            },
        )
    }

    /// Prior-ring evidence for (re-)entering ring `index`.
    fn prior_for(&self, intent: &DeploymentIntent, index: usize) -> Result<PriorRing> {
        if index == 0 {
            return Ok(PriorRing::FirstRing);
        }
        intent
            .progress_at(index - 1)
            .and_then(|p| p.latest())
            .and_then(|a| a.observed_success_rate)
            .map(|success_rate| PriorRing::Measured { success_rate })
            .ok_or_else(|| {
                RolloutError::Risk(crate::risk::RiskError::IncompleteEvidence {
                    missing: vec!["prior_ring".into()],
                })
            })
    }

    /// Aggregate success rate for the intent's app across the ring's
    /// connectors, using only snapshots taken after publication.
    ///
    /// A connector whose snapshot does not list the app counts as its share
    /// of the ring's targets with nothing installed. `None` until every
    /// connector has reported since publication.
    fn measured_rate(
        &self,
        intent: &DeploymentIntent,
        ring: &RingDefinition,
        published_at: DateTime<Utc>,
    ) -> Option<u8> {
        let mut total = AppCompliance::default();
        for connector_id in &ring.connectors {
            let snapshot = self.board.get(&ring.name, connector_id)?;
            if snapshot.taken_at < published_at {
                return None;
            }
            match snapshot.app(&intent.artifact().name) {
                Some(app) => total.merge(app),
                None => {
                    debug!(
                        ring = %ring.name,
                        connector = %connector_id,
                        "app absent from snapshot"
                    );
                    total.merge(&AppCompliance {
                        pending: ring.connector_share(),
                        ..AppCompliance::default()
                    });
                }
            }
        }
        total.success_rate()
    }

    /// Reason to fail the observing ring because of drift, if any.
    async fn blocking_drift(
        &self,
        intent: &DeploymentIntent,
        ring: &RingDefinition,
    ) -> Result<Option<String>> {
        let corr = intent.correlation_id().as_str();
        let app = intent.artifact().name.as_str();
        let mut reasons = Vec::new();
        for record in self.stores.drift.list().await? {
            let drift = record.value;
            if drift.scope.ring != ring.name
                || !ring.connectors.contains(&drift.connector_id)
                || !drift.status.is_active()
            {
                continue;
            }
            let ours = drift.correlation_id.as_deref() == Some(corr)
                || (drift.classification == DriftClass::Unexpected && drift.entity.id == app);
            if !ours {
                continue;
            }
            let severe = matches!(
                drift.classification,
                DriftClass::Missing | DriftClass::Unexpected
            ) && drift.severity >= self.drift_fail_at;
            if drift.status == RemediationStatus::Escalated || severe {
                reasons.push(format!(
                    "{} drift {} on {} ({}, {})",
                    drift.classification,
                    drift.drift_id,
                    drift.connector_id,
                    drift.severity,
                    drift.status
                ));
            }
        }
        Ok((!reasons.is_empty()).then(|| reasons.join("; ")))
    }
}

impl std::fmt::Debug for PromotionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromotionController")
            .field("rings", &self.rings.len())
            .field("connectors", &self.registry.len())
            .field("model", &self.model.version())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{ConnectorOperationResult, IdempotencyKey};

    fn push(id: &str, class: ErrorClass) -> PushRecord {
        let key = IdempotencyKey::derive("dep-1", "push:canary:1", id);
        let result = if class == ErrorClass::None {
            ConnectorOperationResult::ok(&key, serde_json::Value::Null)
        } else {
            ConnectorOperationResult::failed(&key, class, "boom")
        };
        PushRecord {
            connector_id: id.into(),
            idempotency_key: key,
            result,
            attempts: 1,
            pushed_at: Utc::now(),
        }
    }

    #[test]
    fn all_successful_pushes_have_no_failure() {
        assert!(classify_push_failures(&[push("a", ErrorClass::None)]).is_none());
    }

    #[test]
    fn policy_violation_outranks_other_failures() {
        let (cause, reason) = classify_push_failures(&[
            push("a", ErrorClass::Transient),
            push("b", ErrorClass::PolicyViolation),
            push("c", ErrorClass::Permanent),
        ])
        .unwrap();
        assert_eq!(cause, FailureCause::PolicyViolation);
        assert!(reason.contains("a: transient"));
        assert!(reason.contains("b: policy_violation"));
    }

    #[test]
    fn exhausted_transients_are_their_own_cause() {
        let (cause, _) = classify_push_failures(&[
            push("a", ErrorClass::None),
            push("b", ErrorClass::Transient),
        ])
        .unwrap();
        assert_eq!(cause, FailureCause::ConnectorTransient);
    }

    #[test]
    fn submit_request_parses_with_defaults() {
        let request: SubmitIntent = serde_json::from_value(json!({
            "artifact": {
                "name": "7zip",
                "version": "23.01",
                "digest": ringgate_state::ContentDigest::from_bytes(b"7zip"),
            },
            "rings": ["canary"],
            "submitted_by": "release-bot",
        }))
        .unwrap();
        assert!(request.correlation_id.is_none());
        assert_eq!(request.evidence, ArtifactEvidence::default());
    }
}
