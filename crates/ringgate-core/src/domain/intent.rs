//! DeploymentIntent: the unit of work moved through the ring sequence.

use chrono::{DateTime, Utc};
use ringgate_state::ContentDigest;
use serde::{Deserialize, Serialize};

use crate::approval::ApprovalCheckpoint;
use crate::connector::{ConnectorOperationResult, IdempotencyKey};
use crate::promotion::RingPhase;
use crate::risk::{ArtifactEvidence, RiskAssessment};
use crate::rollback::RollbackReport;

/// Globally unique identifier of a deployment intent.
///
/// Doubles as the root of every idempotency key derived for the intent, so
/// it must never change once the intent exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Random `dep-<uuid>` identifier.
    pub fn generate() -> Self {
        Self(format!("dep-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable reference to the packaged artifact being rolled out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Application name as known to the execution planes
    pub name: String,
    pub version: String,
    /// SHA-256 of the artifact content
    pub digest: ContentDigest,
}

impl ArtifactRef {
    pub fn new(name: impl Into<String>, version: impl Into<String>, digest: ContentDigest) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            digest,
        }
    }
}

impl std::fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{} ({})", self.name, self.version, self.digest.short())
    }
}

/// Overall status of an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    InProgress,
    /// Final ring succeeded
    Completed,
    /// Current ring failed; nothing needed rolling back
    Failed,
    /// Current ring failed and its rollback completed on every connector
    RolledBack,
    /// Rollback partially failed; operator intervention required
    RollbackIncomplete,
}

impl IntentStatus {
    /// Statuses from which no further automatic transition happens.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

impl std::fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
            Self::RollbackIncomplete => "rollback_incomplete",
        };
        write!(f, "{s}")
    }
}

/// Why a ring attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    Rejected,
    /// Transient connector failure that exhausted its retry budget
    ConnectorTransient,
    ConnectorPermanent,
    PolicyViolation,
    BelowThreshold,
    DriftEscalated,
    Cancelled,
    IncompleteEvidence,
}

impl FailureCause {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rejected => "rejected",
            Self::ConnectorTransient => "connector_transient",
            Self::ConnectorPermanent => "connector_permanent",
            Self::PolicyViolation => "policy_violation",
            Self::BelowThreshold => "below_threshold",
            Self::DriftEscalated => "drift_escalated",
            Self::Cancelled => "cancelled",
            Self::IncompleteEvidence => "incomplete_evidence",
        }
    }
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human-readable failure record kept on the attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub cause: FailureCause,
    pub reason: String,
    pub correlation_id: String,
    pub failed_at: DateTime<Utc>,
}

/// Outcome of one `PushIntent` against one connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRecord {
    pub connector_id: String,
    pub idempotency_key: IdempotencyKey,
    pub result: ConnectorOperationResult,
    /// Calls made, retries included
    pub attempts: u32,
    pub pushed_at: DateTime<Utc>,
}

/// One pass of an intent through a ring. A re-submission adds a new attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RingAttempt {
    pub attempt: u32,
    pub phase: RingPhase,
    pub assessment: Option<RiskAssessment>,
    pub approval: Option<ApprovalCheckpoint>,
    pub pushes: Vec<PushRecord>,
    pub entered_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub observed_success_rate: Option<u8>,
    pub failure: Option<FailureRecord>,
    pub rollback: Option<RollbackReport>,
}

impl RingAttempt {
    pub fn new(attempt: u32, now: DateTime<Utc>) -> Self {
        Self {
            attempt,
            phase: RingPhase::NotStarted,
            assessment: None,
            approval: None,
            pushes: Vec::new(),
            entered_at: now,
            published_at: None,
            observed_success_rate: None,
            failure: None,
            rollback: None,
        }
    }

    /// Pushes the execution plane acknowledged.
    pub fn successful_pushes(&self) -> impl Iterator<Item = &PushRecord> {
        self.pushes.iter().filter(|p| p.result.success)
    }

    pub fn pushed_to(&self, connector_id: &str) -> bool {
        self.successful_pushes().any(|p| p.connector_id == connector_id)
    }
}

/// Every attempt of an intent at one ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RingProgress {
    pub ring: String,
    pub index: usize,
    pub attempts: Vec<RingAttempt>,
}

impl RingProgress {
    pub fn latest(&self) -> Option<&RingAttempt> {
        self.attempts.last()
    }

    pub fn latest_mut(&mut self) -> Option<&mut RingAttempt> {
        self.attempts.last_mut()
    }
}

/// A request to roll one artifact through an ordered ring sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentIntent {
    correlation_id: CorrelationId,
    artifact: ArtifactRef,
    /// Target ring names, in promotion order
    pub rings: Vec<String>,
    /// Index into `rings`; only ever increases
    pub current_ring: usize,
    pub status: IntentStatus,
    pub progress: Vec<RingProgress>,
    /// Submitter evidence, re-used for every ring's score
    pub artifact_evidence: ArtifactEvidence,
    pub submitted_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeploymentIntent {
    pub fn new(
        correlation_id: CorrelationId,
        artifact: ArtifactRef,
        rings: Vec<String>,
        artifact_evidence: ArtifactEvidence,
        submitted_by: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            correlation_id,
            artifact,
            rings,
            current_ring: 0,
            status: IntentStatus::InProgress,
            progress: Vec::new(),
            artifact_evidence,
            submitted_by: submitted_by.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn artifact(&self) -> &ArtifactRef {
        &self.artifact
    }

    pub fn current_ring_name(&self) -> Option<&str> {
        self.rings.get(self.current_ring).map(String::as_str)
    }

    pub fn progress_at(&self, index: usize) -> Option<&RingProgress> {
        self.progress.iter().find(|p| p.index == index)
    }

    pub fn current_progress(&self) -> Option<&RingProgress> {
        self.progress_at(self.current_ring)
    }

    pub fn current_attempt(&self) -> Option<&RingAttempt> {
        self.current_progress().and_then(RingProgress::latest)
    }

    pub fn current_attempt_mut(&mut self) -> Option<&mut RingAttempt> {
        let index = self.current_ring;
        self.progress
            .iter_mut()
            .find(|p| p.index == index)
            .and_then(RingProgress::latest_mut)
    }

    /// Phase of the latest attempt at the current ring.
    pub fn current_phase(&self) -> RingPhase {
        self.current_attempt()
            .map(|a| a.phase)
            .unwrap_or(RingPhase::NotStarted)
    }

    pub fn risk_score(&self) -> Option<u8> {
        self.current_attempt()
            .and_then(|a| a.assessment.as_ref())
            .map(|a| a.score)
    }

    /// Start a fresh attempt at ring `index`, creating its progress entry on
    /// first entry. Returns the new attempt number.
    pub(crate) fn begin_attempt(&mut self, index: usize, now: DateTime<Utc>) -> u32 {
        let ring = self.rings.get(index).cloned().unwrap_or_default();
        let progress = match self.progress.iter_mut().position(|p| p.index == index) {
            Some(pos) => &mut self.progress[pos],
            None => {
                self.progress.push(RingProgress {
                    ring,
                    index,
                    attempts: Vec::new(),
                });
                let last = self.progress.len() - 1;
                &mut self.progress[last]
            }
        };
        let attempt = progress.attempts.len() as u32 + 1;
        progress.attempts.push(RingAttempt::new(attempt, now));
        attempt
    }
}
