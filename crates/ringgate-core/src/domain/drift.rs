//! Drift records: observed divergence between desired and actual state.
//!
//! Records are owned by the reconciliation loop. They are never deleted; a
//! recurrence after resolution creates a new record that `supersedes` the
//! old one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::connector::Scope;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftClass {
    /// Desired entity absent from the execution plane
    Missing,
    /// Entity present on the plane with no desired counterpart
    Unexpected,
    /// Entity present with a different version or digest
    VersionMismatch,
}

impl std::fmt::Display for DriftClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Missing => "missing",
            Self::Unexpected => "unexpected",
            Self::VersionMismatch => "version_mismatch",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for DriftSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationStatus {
    Open,
    Remediating,
    Resolved,
    /// Handed to a human; no further automatic action
    Escalated,
}

impl RemediationStatus {
    /// Still describes a live discrepancy.
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Resolved)
    }
}

impl std::fmt::Display for RemediationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::Remediating => "remediating",
            Self::Resolved => "resolved",
            Self::Escalated => "escalated",
        };
        write!(f, "{s}")
    }
}

/// The execution-plane entity a drift record is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: String,
    pub id: String,
}

impl EntityRef {
    pub fn app(name: impl Into<String>) -> Self {
        Self {
            kind: "app".into(),
            id: name.into(),
        }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftRecord {
    pub drift_id: String,
    pub scope: Scope,
    pub connector_id: String,
    pub entity: EntityRef,
    pub desired: serde_json::Value,
    pub actual: serde_json::Value,
    pub classification: DriftClass,
    pub severity: DriftSeverity,
    /// Intent whose desired state is violated, when known
    pub correlation_id: Option<String>,
    pub first_detected_at: DateTime<Utc>,
    /// Last time a tick observed the discrepancy
    pub detected_at: DateTime<Utc>,
    pub status: RemediationStatus,
    pub remediation_attempts: u32,
    pub last_remediation_at: Option<DateTime<Utc>>,
    /// Earlier resolved record for the same discrepancy
    pub supersedes: Option<String>,
    pub escalation_reason: Option<String>,
}

impl DriftRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scope: Scope,
        connector_id: impl Into<String>,
        entity: EntityRef,
        classification: DriftClass,
        severity: DriftSeverity,
        desired: serde_json::Value,
        actual: serde_json::Value,
        correlation_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            drift_id: format!("drift-{}", uuid::Uuid::new_v4()),
            scope,
            connector_id: connector_id.into(),
            entity,
            desired,
            actual,
            classification,
            severity,
            correlation_id,
            first_detected_at: now,
            detected_at: now,
            status: RemediationStatus::Open,
            remediation_attempts: 0,
            last_remediation_at: None,
            supersedes: None,
            escalation_reason: None,
        }
    }

    /// Dedup key: scope + connector + entity + classification.
    pub fn fingerprint(&self) -> String {
        fingerprint(
            &self.scope,
            &self.connector_id,
            &self.entity,
            self.classification,
        )
    }
}

pub fn fingerprint(
    scope: &Scope,
    connector_id: &str,
    entity: &EntityRef,
    classification: DriftClass,
) -> String {
    format!(
        "{}/{}/{}/{}/{}",
        scope.ring, scope.group, connector_id, entity, classification
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_ignores_detection_time() {
        let scope = Scope::new("canary", "grp-canary");
        let a = DriftRecord::new(
            scope.clone(),
            "sim",
            EntityRef::app("7zip"),
            DriftClass::Missing,
            DriftSeverity::High,
            serde_json::json!({}),
            serde_json::Value::Null,
            None,
            Utc::now(),
        );
        let mut b = a.clone();
        b.drift_id = "drift-other".into();
        b.detected_at = Utc::now() + chrono::Duration::minutes(5);
        assert_eq!(a.fingerprint(), b.fingerprint());

        b.classification = DriftClass::VersionMismatch;
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn severity_is_ordered() {
        assert!(DriftSeverity::Low < DriftSeverity::Medium);
        assert!(DriftSeverity::High < DriftSeverity::Critical);
    }

    #[test]
    fn resolved_is_not_active() {
        assert!(RemediationStatus::Open.is_active());
        assert!(RemediationStatus::Escalated.is_active());
        assert!(!RemediationStatus::Resolved.is_active());
    }
}
