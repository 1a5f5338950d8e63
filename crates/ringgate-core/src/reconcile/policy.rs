//! Drift severity and remediation policy.

use serde::{Deserialize, Serialize};

use crate::domain::{window, DriftClass, DriftSeverity};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftPolicy {
    /// Lowest severity that is remediated; anything below is only logged.
    pub remediate_at: DriftSeverity,
    /// Lowest severity of missing/unexpected drift that fails an observing
    /// ring.
    pub fail_ring_at: DriftSeverity,
    /// At most one remediation per record within this window.
    pub remediation_backoff_secs: u64,
    /// Remediations per record before it is escalated.
    pub max_remediation_attempts: u32,
    pub missing: DriftSeverity,
    pub unexpected: DriftSeverity,
    pub version_mismatch: DriftSeverity,
}

impl Default for DriftPolicy {
    fn default() -> Self {
        Self {
            remediate_at: DriftSeverity::Medium,
            fail_ring_at: DriftSeverity::Critical,
            remediation_backoff_secs: 900,
            max_remediation_attempts: 3,
            missing: DriftSeverity::High,
            unexpected: DriftSeverity::High,
            version_mismatch: DriftSeverity::Medium,
        }
    }
}

impl DriftPolicy {
    pub fn severity_for(&self, class: DriftClass) -> DriftSeverity {
        match class {
            DriftClass::Missing => self.missing,
            DriftClass::Unexpected => self.unexpected,
            DriftClass::VersionMismatch => self.version_mismatch,
        }
    }

    pub fn remediation_backoff(&self) -> chrono::Duration {
        window(self.remediation_backoff_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let policy: DriftPolicy = toml::from_str("version_mismatch = \"low\"").unwrap();
        assert_eq!(policy.severity_for(DriftClass::VersionMismatch), DriftSeverity::Low);
        assert_eq!(policy.severity_for(DriftClass::Missing), DriftSeverity::High);
        assert_eq!(policy.max_remediation_attempts, 3);
    }
}
