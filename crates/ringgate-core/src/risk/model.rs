//! Versioned weighted-sum risk model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::error::{RiskError, RiskResult};
use super::evidence::RiskEvidence;
use super::rubric;
use super::tier::RiskTier;

/// Identifier of the built-in model.
pub const MODEL_V1: &str = "ringgate-risk/v1";

const WEIGHT_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFactor {
    BlastRadius,
    ChangeKind,
    Vulnerabilities,
    Signature,
    PriorRing,
    Exposure,
}

impl RiskFactor {
    pub const ALL: [RiskFactor; 6] = [
        RiskFactor::BlastRadius,
        RiskFactor::ChangeKind,
        RiskFactor::Vulnerabilities,
        RiskFactor::Signature,
        RiskFactor::PriorRing,
        RiskFactor::Exposure,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BlastRadius => "blast_radius",
            Self::ChangeKind => "change_kind",
            Self::Vulnerabilities => "vulnerabilities",
            Self::Signature => "signature",
            Self::PriorRing => "prior_ring",
            Self::Exposure => "exposure",
        }
    }
}

/// Result of scoring one intent at one ring entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// 0-100
    pub score: u8,
    /// Weighted contribution of each factor; they sum to the unrounded score.
    pub factors: BTreeMap<String, f64>,
    pub model_version: String,
    pub tier: RiskTier,
}

impl RiskAssessment {
    /// Factors ordered by contribution, largest first.
    pub fn top_factors(&self, n: usize) -> Vec<(&str, f64)> {
        let mut factors: Vec<(&str, f64)> = self
            .factors
            .iter()
            .map(|(name, value)| (name.as_str(), *value))
            .collect();
        factors.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        factors.truncate(n);
        factors
    }
}

/// Weights over the fixed factor set. Weights sum to 1.0, so the score stays
/// within 0-100 when every factor does.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskModel {
    version: String,
    weights: BTreeMap<RiskFactor, f64>,
}

impl RiskModel {
    /// The built-in model.
    pub fn v1() -> Self {
        let weights = BTreeMap::from([
            (RiskFactor::BlastRadius, 0.20),
            (RiskFactor::ChangeKind, 0.15),
            (RiskFactor::Vulnerabilities, 0.25),
            (RiskFactor::Signature, 0.10),
            (RiskFactor::PriorRing, 0.20),
            (RiskFactor::Exposure, 0.10),
        ]);
        Self {
            version: MODEL_V1.to_string(),
            weights,
        }
    }

    /// Custom model. Every factor needs a weight in 0..=1 and the weights
    /// must sum to 1.0.
    pub fn new(
        version: impl Into<String>,
        weights: BTreeMap<RiskFactor, f64>,
    ) -> RiskResult<Self> {
        let version = version.into();
        if version.trim().is_empty() {
            return Err(RiskError::InvalidModel("empty model version".into()));
        }
        for factor in RiskFactor::ALL {
            match weights.get(&factor) {
                None => {
                    return Err(RiskError::InvalidModel(format!(
                        "no weight for factor {}",
                        factor.as_str()
                    )))
                }
                Some(w) if !(0.0..=1.0).contains(w) => {
                    return Err(RiskError::InvalidModel(format!(
                        "weight {w} for {} outside 0..=1",
                        factor.as_str()
                    )))
                }
                Some(_) => {}
            }
        }
        let total: f64 = weights.values().sum();
        if (total - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(RiskError::InvalidModel(format!(
                "weights sum to {total}, expected 1.0"
            )));
        }
        Ok(Self { version, weights })
    }

    /// Look up a built-in model by version string.
    pub fn for_version(version: &str) -> RiskResult<Self> {
        match version {
            MODEL_V1 => Ok(Self::v1()),
            other => Err(RiskError::InvalidModel(format!(
                "unknown model version: {other}"
            ))),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn weight(&self, factor: RiskFactor) -> f64 {
        self.weights.get(&factor).copied().unwrap_or(0.0)
    }

    /// Score the evidence. Pure: no clock, no I/O, no randomness.
    pub fn score(&self, evidence: &RiskEvidence) -> RiskResult<RiskAssessment> {
        let e = evidence.complete()?;

        let normalized = [
            (RiskFactor::BlastRadius, rubric::blast_radius(e.target_count)),
            (RiskFactor::ChangeKind, rubric::change_kind(e.change_kind)),
            (
                RiskFactor::Vulnerabilities,
                rubric::vulnerabilities(e.vulnerabilities),
            ),
            (RiskFactor::Signature, rubric::signature(e.signature_verified)),
            (RiskFactor::PriorRing, rubric::prior_ring(e.prior_ring)),
            (
                RiskFactor::Exposure,
                rubric::exposure(e.ring_index, e.ring_count),
            ),
        ];

        let mut factors = BTreeMap::new();
        let mut total = 0.0;
        for (factor, value) in normalized {
            let contribution = self.weight(factor) * value;
            total += contribution;
            factors.insert(factor.as_str().to_string(), contribution);
        }

        let score = total.round().clamp(0.0, 100.0) as u8;
        Ok(RiskAssessment {
            score,
            factors,
            model_version: self.version.clone(),
            tier: RiskTier::from_score(score),
        })
    }
}

impl Default for RiskModel {
    fn default() -> Self {
        Self::v1()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::evidence::*;

    fn canary_only(artifact: ArtifactEvidence, targets: u32) -> RiskEvidence {
        RiskEvidence {
            artifact,
            ring: RingEvidence {
                ring_index: Some(0),
                ring_count: Some(1),
                target_count: Some(targets),
                prior_ring: Some(PriorRing::FirstRing),
            },
        }
    }

    #[test]
    fn v1_weights_sum_to_one() {
        let model = RiskModel::v1();
        let total: f64 = RiskFactor::ALL.iter().map(|f| model.weight(*f)).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn low_risk_update_scores_35() {
        let evidence = canary_only(
            ArtifactEvidence {
                change_kind: Some(ChangeKind::Update),
                vulnerabilities: Some(VulnerabilityCounts {
                    critical: 0,
                    high: 0,
                    medium: 3,
                }),
                signature_verified: Some(true),
            },
            100,
        );
        let assessment = RiskModel::v1().score(&evidence).unwrap();
        assert_eq!(assessment.score, 35);
        assert_eq!(assessment.tier, RiskTier::Medium);
        assert_eq!(assessment.model_version, MODEL_V1);
        assert_eq!(assessment.factors.len(), 6);
    }

    #[test]
    fn unsigned_uninstall_scores_72() {
        let evidence = canary_only(
            ArtifactEvidence {
                change_kind: Some(ChangeKind::Uninstall),
                vulnerabilities: Some(VulnerabilityCounts {
                    critical: 1,
                    high: 0,
                    medium: 3,
                }),
                signature_verified: Some(false),
            },
            5_000,
        );
        assert_eq!(RiskModel::v1().score(&evidence).unwrap().score, 72);
    }

    #[test]
    fn scoring_is_pure() {
        let evidence = canary_only(
            ArtifactEvidence {
                change_kind: Some(ChangeKind::NewInstall),
                vulnerabilities: Some(VulnerabilityCounts::default()),
                signature_verified: Some(true),
            },
            42,
        );
        let model = RiskModel::v1();
        let first = model.score(&evidence).unwrap();

        let reloaded: RiskEvidence =
            serde_json::from_str(&serde_json::to_string(&evidence).unwrap()).unwrap();
        let second = RiskModel::for_version(MODEL_V1).unwrap().score(&reloaded).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn incomplete_evidence_names_all_gaps() {
        let evidence = RiskEvidence {
            artifact: ArtifactEvidence {
                change_kind: Some(ChangeKind::Update),
                ..Default::default()
            },
            ring: RingEvidence::default(),
        };
        let err = RiskModel::v1().score(&evidence).unwrap_err();
        match err {
            RiskError::IncompleteEvidence { missing } => {
                assert!(missing.contains(&"vulnerabilities".to_string()));
                assert!(missing.contains(&"signature_verified".to_string()));
                assert!(missing.contains(&"prior_ring".to_string()));
                assert!(!missing.contains(&"change_kind".to_string()));
            }
            other => panic!("expected IncompleteEvidence, got {other:?}"),
        }
    }

    #[test]
    fn model_rejects_bad_weights() {
        let mut weights: BTreeMap<RiskFactor, f64> =
            RiskFactor::ALL.iter().map(|f| (*f, 0.2)).collect();
        assert!(RiskModel::new("custom", weights.clone()).is_err());

        weights.remove(&RiskFactor::Exposure);
        let err = RiskModel::new("custom", weights).unwrap_err();
        assert!(err.to_string().contains("exposure"));

        assert!(RiskModel::for_version("ringgate-risk/v0").is_err());
    }

    #[test]
    fn top_factors_orders_by_contribution() {
        let evidence = canary_only(
            ArtifactEvidence {
                change_kind: Some(ChangeKind::Privileged),
                vulnerabilities: Some(VulnerabilityCounts {
                    critical: 2,
                    high: 0,
                    medium: 0,
                }),
                signature_verified: Some(true),
            },
            5,
        );
        let assessment = RiskModel::v1().score(&evidence).unwrap();
        let top = assessment.top_factors(2);
        assert_eq!(top[0].0, "vulnerabilities");
        assert_eq!(top.len(), 2);
    }
}
