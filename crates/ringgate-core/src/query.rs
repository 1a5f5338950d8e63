//! Read-only operator view over intents, drift and rollbacks.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::approval::ApprovalStatus;
use crate::domain::{
    DeploymentIntent, DriftClass, DriftRecord, FailureRecord, IntentStatus, RemediationStatus,
    Result, RolloutError,
};
use crate::persist::Stores;
use crate::promotion::RingPhase;
use crate::rollback::RollbackReport;

/// Everything an operator needs to know about one intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentView {
    pub correlation_id: String,
    pub artifact: String,
    pub status: IntentStatus,
    pub current_ring: Option<String>,
    pub phase: RingPhase,
    pub attempt: Option<u32>,
    pub score: Option<u8>,
    pub factors: BTreeMap<String, f64>,
    pub model_version: Option<String>,
    pub approval: Option<ApprovalStatus>,
    pub observed_success_rate: Option<u8>,
    /// Latest failure at the current ring
    pub failure: Option<FailureRecord>,
    /// Active drift attributed to this intent, across all rings
    pub open_drift: Vec<DriftRecord>,
    /// Every rollback ever run for this intent, oldest first
    pub rollbacks: Vec<RollbackReport>,
    pub updated_at: DateTime<Utc>,
}

impl IntentView {
    pub fn new(intent: &DeploymentIntent, drift: &[DriftRecord]) -> Self {
        let attempt = intent.current_attempt();
        let assessment = attempt.and_then(|a| a.assessment.as_ref());
        let app = intent.artifact().name.as_str();
        let corr = intent.correlation_id().as_str();

        let open_drift = drift
            .iter()
            .filter(|d| d.status.is_active())
            .filter(|d| {
                d.correlation_id.as_deref() == Some(corr)
                    || (d.classification == DriftClass::Unexpected
                        && d.entity.id == app
                        && intent.rings.contains(&d.scope.ring))
            })
            .cloned()
            .collect();

        let rollbacks = intent
            .progress
            .iter()
            .flat_map(|p| p.attempts.iter())
            .filter_map(|a| a.rollback.clone())
            .collect();

        Self {
            correlation_id: corr.to_string(),
            artifact: intent.artifact().to_string(),
            status: intent.status,
            current_ring: intent.current_ring_name().map(str::to_string),
            phase: intent.current_phase(),
            attempt: attempt.map(|a| a.attempt),
            score: assessment.map(|a| a.score),
            factors: assessment.map(|a| a.factors.clone()).unwrap_or_default(),
            model_version: assessment.map(|a| a.model_version.clone()),
            approval: attempt
                .and_then(|a| a.approval.as_ref())
                .map(|c| c.status.clone()),
            observed_success_rate: attempt.and_then(|a| a.observed_success_rate),
            failure: attempt.and_then(|a| a.failure.clone()),
            open_drift,
            rollbacks,
            updated_at: intent.updated_at,
        }
    }

    /// Waiting on a human: pending approval, incomplete rollback or
    /// escalated drift.
    pub fn needs_attention(&self) -> bool {
        let awaiting = self.phase == RingPhase::AwaitingApproval
            && matches!(self.approval, Some(ApprovalStatus::PendingApproval));
        self.status == IntentStatus::RollbackIncomplete
            || awaiting
            || self
                .open_drift
                .iter()
                .any(|d| d.status == RemediationStatus::Escalated)
    }
}

#[derive(Clone, Debug)]
pub struct RolloutQuery {
    stores: Stores,
}

impl RolloutQuery {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    async fn drift_records(&self) -> Result<Vec<DriftRecord>> {
        Ok(self
            .stores
            .drift
            .list()
            .await?
            .into_iter()
            .map(|v| v.value)
            .collect())
    }

    pub async fn intent(&self, correlation_id: &str) -> Result<IntentView> {
        let intent = self
            .stores
            .intents
            .get(correlation_id)
            .await?
            .ok_or_else(|| RolloutError::IntentNotFound(correlation_id.to_string()))?;
        let drift = self.drift_records().await?;
        Ok(IntentView::new(&intent.value, &drift))
    }

    /// All intents, optionally restricted to one status, ordered by
    /// correlation id.
    pub async fn intents(&self, status: Option<IntentStatus>) -> Result<Vec<IntentView>> {
        let drift = self.drift_records().await?;
        Ok(self
            .stores
            .intents
            .list()
            .await?
            .iter()
            .filter(|v| status.map_or(true, |s| v.value.status == s))
            .map(|v| IntentView::new(&v.value, &drift))
            .collect())
    }

    /// Intents blocked on an approver.
    pub async fn pending_approvals(&self) -> Result<Vec<IntentView>> {
        let views = self.intents(Some(IntentStatus::InProgress)).await?;
        Ok(views
            .into_iter()
            .filter(|v| {
                v.phase == RingPhase::AwaitingApproval
                    && matches!(v.approval, Some(ApprovalStatus::PendingApproval))
            })
            .collect())
    }

    /// Active drift records, optionally for one ring.
    pub async fn open_drift(&self, ring: Option<&str>) -> Result<Vec<DriftRecord>> {
        Ok(self
            .drift_records()
            .await?
            .into_iter()
            .filter(|d| d.status.is_active())
            .filter(|d| ring.map_or(true, |r| d.scope.ring == r))
            .collect())
    }
}
