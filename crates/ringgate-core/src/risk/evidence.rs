//! Evidence consumed by the risk engine.
//!
//! Every input is optional on the wire so that an absent value can be
//! reported instead of silently defaulted.

use serde::{Deserialize, Serialize};

use super::error::{RiskError, RiskResult};

/// Kind of change the artifact makes on a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    ConfigChange,
    Update,
    NewInstall,
    Uninstall,
    /// Runs with elevated privileges (drivers, agents, security tooling)
    Privileged,
}

/// Open vulnerability counts from the artifact scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VulnerabilityCounts {
    #[serde(default)]
    pub critical: u32,
    #[serde(default)]
    pub high: u32,
    #[serde(default)]
    pub medium: u32,
}

/// Evidence supplied with the deployment intent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEvidence {
    #[serde(default)]
    pub change_kind: Option<ChangeKind>,
    #[serde(default)]
    pub vulnerabilities: Option<VulnerabilityCounts>,
    #[serde(default)]
    pub signature_verified: Option<bool>,
}

/// Observed outcome of the previous ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PriorRing {
    /// No ring precedes this one
    FirstRing,
    Measured { success_rate: u8 },
}

/// Evidence the controller derives from ring position and history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingEvidence {
    #[serde(default)]
    pub ring_index: Option<usize>,
    #[serde(default)]
    pub ring_count: Option<usize>,
    #[serde(default)]
    pub target_count: Option<u32>,
    #[serde(default)]
    pub prior_ring: Option<PriorRing>,
}

/// Full input to one scoring call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskEvidence {
    pub artifact: ArtifactEvidence,
    pub ring: RingEvidence,
}

/// Evidence with every input present and validated.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CompleteEvidence {
    pub change_kind: ChangeKind,
    pub vulnerabilities: VulnerabilityCounts,
    pub signature_verified: bool,
    pub ring_index: usize,
    pub ring_count: usize,
    pub target_count: u32,
    pub prior_ring: PriorRing,
}

impl RiskEvidence {
    pub fn new(artifact: ArtifactEvidence, ring: RingEvidence) -> Self {
        Self { artifact, ring }
    }

    /// Names of every absent input, in a fixed order.
    pub fn missing(&self) -> Vec<String> {
        let checks = [
            ("change_kind", self.artifact.change_kind.is_none()),
            ("vulnerabilities", self.artifact.vulnerabilities.is_none()),
            ("signature_verified", self.artifact.signature_verified.is_none()),
            ("ring_index", self.ring.ring_index.is_none()),
            ("ring_count", self.ring.ring_count.is_none()),
            ("target_count", self.ring.target_count.is_none()),
            ("prior_ring", self.ring.prior_ring.is_none()),
        ];
        checks
            .iter()
            .filter(|(_, absent)| *absent)
            .map(|(name, _)| name.to_string())
            .collect()
    }

    pub(crate) fn complete(&self) -> RiskResult<CompleteEvidence> {
        let missing = self.missing();
        let (
            Some(change_kind),
            Some(vulnerabilities),
            Some(signature_verified),
            Some(ring_index),
            Some(ring_count),
            Some(target_count),
            Some(prior_ring),
        ) = (
            self.artifact.change_kind,
            self.artifact.vulnerabilities,
            self.artifact.signature_verified,
            self.ring.ring_index,
            self.ring.ring_count,
            self.ring.target_count,
            self.ring.prior_ring,
        )
        else {
            return Err(RiskError::IncompleteEvidence { missing });
        };

        if ring_count == 0 || ring_index >= ring_count {
            return Err(RiskError::InvalidEvidence(format!(
                "ring index {ring_index} out of range for {ring_count} rings"
            )));
        }
        match prior_ring {
            PriorRing::FirstRing if ring_index > 0 => {
                return Err(RiskError::InvalidEvidence(format!(
                    "ring {ring_index} requires the measured success rate of ring {}",
                    ring_index - 1
                )));
            }
            PriorRing::Measured { .. } if ring_index == 0 => {
                return Err(RiskError::InvalidEvidence(
                    "first ring cannot carry a prior-ring measurement".into(),
                ));
            }
            PriorRing::Measured { success_rate } if success_rate > 100 => {
                return Err(RiskError::InvalidEvidence(format!(
                    "success rate {success_rate} exceeds 100"
                )));
            }
            _ => {}
        }

        Ok(CompleteEvidence {
            change_kind,
            vulnerabilities,
            signature_verified,
            ring_index,
            ring_count,
            target_count,
            prior_ring,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_evidence_lists_every_input() {
        let missing = RiskEvidence::default().missing();
        assert_eq!(missing.len(), 7);
        assert_eq!(missing[0], "change_kind");
        assert_eq!(missing[6], "prior_ring");
    }

    #[test]
    fn later_ring_needs_measurement() {
        let evidence = RiskEvidence {
            artifact: ArtifactEvidence {
                change_kind: Some(ChangeKind::Update),
                vulnerabilities: Some(VulnerabilityCounts::default()),
                signature_verified: Some(true),
            },
            ring: RingEvidence {
                ring_index: Some(1),
                ring_count: Some(3),
                target_count: Some(10),
                prior_ring: Some(PriorRing::FirstRing),
            },
        };
        assert!(matches!(
            evidence.complete(),
            Err(RiskError::InvalidEvidence(_))
        ));
    }

    #[test]
    fn prior_ring_tagged_serde() {
        let json = serde_json::to_value(PriorRing::Measured { success_rate: 97 }).unwrap();
        assert_eq!(json["kind"], "measured");
        assert_eq!(json["success_rate"], 97);
    }
}
