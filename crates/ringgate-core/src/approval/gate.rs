//! The approval gate: opens checkpoints and applies decisions.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::checkpoint::{ApprovalCheckpoint, ApprovalStatus, ExplainabilitySummary};
use super::decision::{Decision, DecisionOutcome};
use super::error::{ApprovalError, ApprovalResult};
use super::policy::ApprovalPolicy;
use crate::domain::window;
use crate::risk::RiskAssessment;

#[derive(Debug, Clone, Default)]
pub struct ApprovalGate {
    policy: ApprovalPolicy,
}

impl ApprovalGate {
    pub fn new(policy: ApprovalPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ApprovalPolicy {
        &self.policy
    }

    /// Open the checkpoint for a ring entry. The initial status is decided
    /// by the score alone.
    pub fn open(
        &self,
        correlation_id: &str,
        ring: &str,
        attempt: u32,
        assessment: &RiskAssessment,
        action_description: impl Into<String>,
        now: DateTime<Utc>,
    ) -> ApprovalCheckpoint {
        let threshold = self.policy.auto_approve_threshold;
        let auto = self.policy.auto_approves(assessment.score);
        let top = assessment
            .top_factors(3)
            .into_iter()
            .map(|(name, value)| format!("{name}={value:.1}"))
            .collect::<Vec<_>>()
            .join(", ");
        let explanation = ExplainabilitySummary {
            action_description: action_description.into(),
            changes_summary: format!(
                "risk score {} ({}) under {}; top factors: {top}",
                assessment.score, assessment.tier, assessment.model_version
            ),
            flag_reason: if auto {
                String::new()
            } else {
                format!("score {} exceeds auto-approve threshold {threshold}", assessment.score)
            },
        };
        let status = if auto {
            ApprovalStatus::AutoApproved
        } else {
            ApprovalStatus::PendingApproval
        };
        info!(
            correlation_id,
            ring,
            attempt,
            score = assessment.score,
            threshold,
            status = status.label(),
            "approval checkpoint opened"
        );
        ApprovalCheckpoint {
            checkpoint_id: format!("cp-{}", uuid::Uuid::new_v4()),
            correlation_id: correlation_id.to_string(),
            ring: ring.to_string(),
            attempt,
            score: assessment.score,
            model_version: assessment.model_version.clone(),
            threshold,
            status,
            explanation,
            created_at: now,
            decision: None,
            escalated_at: None,
        }
    }

    /// Apply a human decision to a pending checkpoint.
    ///
    /// # Errors
    ///
    /// - `DecisionMismatch` if the decision names another intent or ring.
    /// - `StaleDecision` if it targets another attempt (for example a
    ///   rejection from before a re-submission).
    /// - `AlreadyDecided` / `NotPending` if the checkpoint is not waiting.
    /// - `InvalidDecision` for conditional approval without conditions.
    pub fn record_decision(
        &self,
        checkpoint: &mut ApprovalCheckpoint,
        decision: Decision,
    ) -> ApprovalResult<ApprovalStatus> {
        if decision.intent_id != checkpoint.correlation_id || decision.ring != checkpoint.ring {
            return Err(ApprovalError::DecisionMismatch {
                expected: format!("{}/{}", checkpoint.correlation_id, checkpoint.ring),
                got: format!("{}/{}", decision.intent_id, decision.ring),
            });
        }
        if decision.attempt != checkpoint.attempt {
            return Err(ApprovalError::StaleDecision {
                ring: checkpoint.ring.clone(),
                expected: checkpoint.attempt,
                got: decision.attempt,
            });
        }
        if checkpoint.decision.is_some() {
            return Err(ApprovalError::AlreadyDecided {
                checkpoint_id: checkpoint.checkpoint_id.clone(),
            });
        }
        if !checkpoint.is_pending() {
            return Err(ApprovalError::NotPending {
                checkpoint_id: checkpoint.checkpoint_id.clone(),
                status: checkpoint.status.to_string(),
            });
        }

        let status = match decision.outcome {
            DecisionOutcome::Approved => ApprovalStatus::Approved,
            DecisionOutcome::Rejected => ApprovalStatus::Rejected {
                reason: decision
                    .reason
                    .clone()
                    .unwrap_or_else(|| format!("rejected by {}", decision.approver)),
            },
            DecisionOutcome::ApprovedWithConditions => {
                if decision.conditions.is_empty() {
                    return Err(ApprovalError::InvalidDecision(
                        "approved_with_conditions requires at least one condition".into(),
                    ));
                }
                ApprovalStatus::ApprovedWithConditions {
                    conditions: decision.conditions.clone(),
                }
            }
        };

        info!(
            correlation_id = %checkpoint.correlation_id,
            ring = %checkpoint.ring,
            approver = %decision.approver,
            status = status.label(),
            "approval decision recorded"
        );
        checkpoint.status = status.clone();
        checkpoint.decision = Some(decision);
        Ok(status)
    }

    /// Pending, not yet escalated, and older than the escalation window.
    pub fn is_stalled(&self, checkpoint: &ApprovalCheckpoint, now: DateTime<Utc>) -> bool {
        let Some(secs) = self.policy.escalate_after_secs else {
            return false;
        };
        checkpoint.is_pending()
            && checkpoint.escalated_at.is_none()
            && now - checkpoint.created_at >= window(secs)
    }

    /// Mark a stalled checkpoint as escalated. The status stays pending.
    pub fn escalate(&self, checkpoint: &mut ApprovalCheckpoint, now: DateTime<Utc>) {
        warn!(
            correlation_id = %checkpoint.correlation_id,
            ring = %checkpoint.ring,
            pending_secs = (now - checkpoint.created_at).num_seconds(),
            "approval stalled; escalating"
        );
        checkpoint.escalated_at = Some(now);
    }
}
