//! Reconciliation loop: periodic desired-vs-actual comparison per
//! (ring, connector), drift tracking and bounded remediation.
//!
//! The loop owns drift records and compliance snapshots. It reads intents
//! only through `DesiredStateSource`; the promotion controller reads its
//! output only through the `ComplianceBoard` and the drift store.

pub mod board;
pub mod desired;
pub mod diff;
pub mod policy;
pub mod worker;

pub use board::{ComplianceBoard, ComplianceSnapshot};
pub use desired::{DesiredApp, DesiredState, DesiredStateSource, IntentReader};
pub use diff::{diff_states, Discrepancy};
pub use policy::DriftPolicy;
pub use worker::{ReconcileWorker, TickReport};
