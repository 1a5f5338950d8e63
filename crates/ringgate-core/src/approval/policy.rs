//! Approval policy: the auto-approve threshold and escalation timing.

use serde::{Deserialize, Serialize};

fn default_threshold() -> u8 {
    50
}

fn default_escalate_after() -> Option<u64> {
    Some(24 * 3600)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalPolicy {
    /// Scores at or below this value are auto-approved.
    #[serde(default = "default_threshold")]
    pub auto_approve_threshold: u8,
    /// Pending checkpoints older than this are escalated. `None` disables
    /// escalation.
    #[serde(default = "default_escalate_after")]
    pub escalate_after_secs: Option<u64>,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            auto_approve_threshold: default_threshold(),
            escalate_after_secs: default_escalate_after(),
        }
    }
}

impl ApprovalPolicy {
    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.auto_approve_threshold = threshold;
        self
    }

    pub fn with_escalation(mut self, secs: Option<u64>) -> Self {
        self.escalate_after_secs = secs;
        self
    }

    pub fn auto_approves(&self, score: u8) -> bool {
        score <= self.auto_approve_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_inclusive() {
        let policy = ApprovalPolicy::default();
        assert!(policy.auto_approves(50));
        assert!(!policy.auto_approves(51));
    }

    #[test]
    fn defaults_from_empty_toml() {
        let policy: ApprovalPolicy = toml::from_str("").unwrap();
        assert_eq!(policy, ApprovalPolicy::default());
    }
}
