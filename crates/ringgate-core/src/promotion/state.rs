//! Ring phase state machine.

use serde::{Deserialize, Serialize};

use crate::domain::{Result, RolloutError};

/// Phase of one ring attempt.
///
/// ```text
/// NotStarted -> AwaitingApproval -> Publishing -> Observing -> Succeeded
///                     |                 |             |           |
///                     +-----------------+------> Failed <---------+ (cancel)
///                                                  |
///                                              RolledBack
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RingPhase {
    NotStarted,
    AwaitingApproval,
    Publishing,
    Observing,
    Succeeded,
    Failed,
    /// Failed and fully reverted on every connector that was pushed to
    RolledBack,
}

impl RingPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Publishing => "publishing",
            Self::Observing => "observing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
        }
    }

    pub fn can_transition_to(self, next: RingPhase) -> bool {
        use RingPhase::*;
        matches!(
            (self, next),
            (NotStarted, AwaitingApproval)
                | (AwaitingApproval, Publishing)
                | (AwaitingApproval, Failed)
                | (Publishing, Observing)
                | (Publishing, Failed)
                | (Observing, Succeeded)
                | (Observing, Failed)
                | (Succeeded, Failed)
                | (Failed, RolledBack)
        )
    }

    /// Phases an intent can no longer leave without a re-submission.
    pub fn is_final(self) -> bool {
        matches!(self, Self::Failed | Self::RolledBack)
    }

    /// Phases in which the artifact is (or may be) installed on the ring.
    pub fn is_published(self) -> bool {
        matches!(self, Self::Observing | Self::Succeeded)
    }
}

impl std::fmt::Display for RingPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Move `phase` to `next`, or fail with `InvalidTransition`.
pub fn transition(correlation_id: &str, phase: &mut RingPhase, next: RingPhase) -> Result<()> {
    if !phase.can_transition_to(next) {
        return Err(RolloutError::InvalidTransition {
            correlation_id: correlation_id.to_string(),
            from: phase.to_string(),
            to: next.to_string(),
        });
    }
    *phase = next;
    Ok(())
}
