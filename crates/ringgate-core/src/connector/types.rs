//! Wire-level types shared by every connector.

use std::collections::BTreeMap;

use ringgate_state::ContentDigest;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::ArtifactRef;

/// Classification of a connector failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    None,
    /// May succeed on retry
    Transient,
    /// Will not succeed on retry
    Permanent,
    /// The plane refused on policy grounds; hard stop
    PolicyViolation,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient)
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::PolicyViolation => "policy_violation",
        };
        write!(f, "{s}")
    }
}

/// Error from a read operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{class} connector error: {message}")]
pub struct ConnectorError {
    pub class: ErrorClass,
    pub message: String,
}

impl ConnectorError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Permanent, message)
    }

    pub fn policy(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::PolicyViolation, message)
    }
}

/// Result type for connector read operations.
pub type ConnectorResult<T> = std::result::Result<T, ConnectorError>;

/// Deterministic key identifying one logical write to one plane.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// SHA-256 over correlation id, operation and target, hex encoded.
    pub fn derive(correlation_id: &str, operation: &str, target: &str) -> Self {
        let mut hasher = Sha256::new();
        for part in [correlation_id, operation, target] {
            hasher.update(part.as_bytes());
            hasher.update([0x1f]);
        }
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of a state-changing connector operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorOperationResult {
    pub success: bool,
    pub error_class: ErrorClass,
    pub message: Option<String>,
    pub idempotency_key: IdempotencyKey,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl ConnectorOperationResult {
    pub fn ok(key: &IdempotencyKey, payload: serde_json::Value) -> Self {
        Self {
            success: true,
            error_class: ErrorClass::None,
            message: None,
            idempotency_key: key.clone(),
            payload,
        }
    }

    pub fn failed(key: &IdempotencyKey, class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_class: class,
            message: Some(message.into()),
            idempotency_key: key.clone(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn from_error(key: &IdempotencyKey, err: ConnectorError) -> Self {
        Self::failed(key, err.class, err.message)
    }

    pub fn is_transient(&self) -> bool {
        !self.success && self.error_class == ErrorClass::Transient
    }
}

/// Ring plus the plane-side group that realises it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Scope {
    pub ring: String,
    pub group: String,
}

impl Scope {
    pub fn new(ring: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            ring: ring.into(),
            group: group.into(),
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.ring, self.group)
    }
}

/// What a connector is asked to deploy or withdraw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaneIntent {
    pub correlation_id: String,
    pub artifact: ArtifactRef,
    pub scope: Scope,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedApp {
    pub version: String,
    #[serde(default)]
    pub digest: Option<ContentDigest>,
    /// Targets the app is assigned to
    #[serde(default)]
    pub targets: u32,
}

/// Deployed apps in one scope, keyed by app name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActualState {
    #[serde(default)]
    pub apps: BTreeMap<String, ObservedApp>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppCompliance {
    #[serde(default)]
    pub installed: u32,
    #[serde(default)]
    pub failed: u32,
    #[serde(default)]
    pub pending: u32,
}

impl AppCompliance {
    pub fn total(&self) -> u64 {
        u64::from(self.installed) + u64::from(self.failed) + u64::from(self.pending)
    }

    /// Installed share in whole percent, rounded down. `None` with no targets.
    pub fn success_rate(&self) -> Option<u8> {
        let total = self.total();
        if total == 0 {
            return None;
        }
        Some((u64::from(self.installed) * 100 / total) as u8)
    }

    pub fn merge(&mut self, other: &AppCompliance) {
        self.installed = self.installed.saturating_add(other.installed);
        self.failed = self.failed.saturating_add(other.failed);
        self.pending = self.pending.saturating_add(other.pending);
    }
}

/// Per-app install outcomes in one scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceStatus {
    #[serde(default)]
    pub apps: BTreeMap<String, AppCompliance>,
}

impl ComplianceStatus {
    pub fn app(&self, name: &str) -> Option<&AppCompliance> {
        self.apps.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_key_is_deterministic() {
        let a = IdempotencyKey::derive("dep-1", "push:canary:1", "intune");
        let b = IdempotencyKey::derive("dep-1", "push:canary:1", "intune");
        let c = IdempotencyKey::derive("dep-1", "push:canary:2", "intune");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn key_parts_are_delimited() {
        let a = IdempotencyKey::derive("dep-1", "ab", "c");
        let b = IdempotencyKey::derive("dep-1", "a", "bc");
        assert_ne!(a, b);
    }

    #[test]
    fn success_rate_rounds_down() {
        let c = AppCompliance {
            installed: 199,
            failed: 1,
            pending: 0,
        };
        assert_eq!(c.success_rate(), Some(99));
        assert_eq!(AppCompliance::default().success_rate(), None);
    }

    #[test]
    fn error_class_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorClass::PolicyViolation).unwrap();
        assert_eq!(json, "\"policy_violation\"");
    }
}
