//! Human approval decisions delivered by the approval workflow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    Approved,
    Rejected,
    ApprovedWithConditions,
}

/// An external decision on a pending checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// Correlation id of the intent
    pub intent_id: String,
    pub ring: String,
    /// Ring attempt the decision was made for
    #[serde(default = "first_attempt")]
    pub attempt: u32,
    pub outcome: DecisionOutcome,
    #[serde(default)]
    pub conditions: Vec<String>,
    pub approver: String,
    #[serde(default)]
    pub reason: Option<String>,
    pub decided_at: DateTime<Utc>,
}

fn first_attempt() -> u32 {
    1
}

impl Decision {
    pub fn new(
        intent_id: impl Into<String>,
        ring: impl Into<String>,
        outcome: DecisionOutcome,
        approver: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            intent_id: intent_id.into(),
            ring: ring.into(),
            attempt: 1,
            outcome,
            conditions: Vec::new(),
            approver: approver.into(),
            reason: None,
            decided_at: now,
        }
    }

    pub fn for_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_conditions(mut self, conditions: Vec<String>) -> Self {
        self.conditions = conditions;
        self
    }
}
