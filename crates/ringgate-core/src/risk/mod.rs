//! Deterministic risk scoring.
//!
//! A pure function of the evidence and the model version: the same
//! `RiskEvidence` scored by the same `RiskModel` always yields the same score
//! and factor breakdown. Missing evidence is an error, never a default.

pub mod error;
pub mod evidence;
pub mod model;
pub mod rubric;
pub mod tier;

pub use error::{RiskError, RiskResult};
pub use evidence::{
    ArtifactEvidence, ChangeKind, PriorRing, RingEvidence, RiskEvidence, VulnerabilityCounts,
};
pub use model::{RiskAssessment, RiskFactor, RiskModel, MODEL_V1};
pub use tier::RiskTier;
