//! Approval gate consulted at every ring entry.
//!
//! - Scores at or below the policy threshold are auto-approved.
//! - Anything above waits for a human decision; there is no timeout
//!   approval, stalled checkpoints are escalated instead.
//! - A decision is written once and never overwritten. Re-submission after a
//!   rejection opens a new checkpoint that needs its own decision.

pub mod checkpoint;
pub mod decision;
pub mod error;
pub mod gate;
pub mod policy;

pub use checkpoint::{ApprovalCheckpoint, ApprovalStatus, ExplainabilitySummary};
pub use decision::{Decision, DecisionOutcome};
pub use error::{ApprovalError, ApprovalResult};
pub use gate::ApprovalGate;
pub use policy::ApprovalPolicy;
