//! Ring definitions loaded from configuration.

use serde::{Deserialize, Serialize};

use crate::connector::Scope;
use crate::domain::error::{Result, RolloutError};
use crate::domain::window::{check_window, window};

fn default_threshold() -> u8 {
    95
}

fn default_dwell() -> u64 {
    3600
}

/// A deployment cohort (Lab, Canary, Pilot, Broad ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingDefinition {
    pub name: String,
    /// Minimum success rate (0-100) required to leave Observing
    #[serde(default = "default_threshold")]
    pub success_threshold: u8,
    /// Minimum observation time after publication
    #[serde(default = "default_dwell")]
    pub min_dwell_secs: u64,
    /// Cohort size; feeds the blast-radius factor
    #[serde(default)]
    pub target_count: u32,
    /// Group identifier understood by the execution planes
    pub scope_group: String,
    /// Connector ids that serve this ring
    pub connectors: Vec<String>,
}

impl RingDefinition {
    pub fn scope(&self) -> Scope {
        Scope::new(&self.name, &self.scope_group)
    }

    pub fn min_dwell(&self) -> chrono::Duration {
        window(self.min_dwell_secs)
    }

    /// Targets attributed to each connector when one cannot report a count.
    pub fn connector_share(&self) -> u32 {
        let connectors = u32::try_from(self.connectors.len()).unwrap_or(u32::MAX).max(1);
        self.target_count.div_ceil(connectors).max(1)
    }
}

/// Immutable, ordered set of ring definitions.
#[derive(Debug, Clone, Default)]
pub struct RingCatalog {
    rings: Vec<RingDefinition>,
}

impl RingCatalog {
    /// Build a catalog, rejecting duplicate names and out-of-range thresholds.
    pub fn new(rings: Vec<RingDefinition>) -> Result<Self> {
        let mut seen = std::collections::HashSet::new();
        for ring in &rings {
            if !seen.insert(ring.name.as_str()) {
                return Err(RolloutError::InvalidConfig(format!(
                    "duplicate ring name: {}",
                    ring.name
                )));
            }
            if ring.success_threshold > 100 {
                return Err(RolloutError::InvalidConfig(format!(
                    "ring {}: success_threshold {} exceeds 100",
                    ring.name, ring.success_threshold
                )));
            }
            check_window(&format!("ring {} min_dwell_secs", ring.name), ring.min_dwell_secs)?;
            if ring.connectors.is_empty() {
                return Err(RolloutError::InvalidConfig(format!(
                    "ring {} has no connectors",
                    ring.name
                )));
            }
        }
        Ok(Self { rings })
    }

    pub fn get(&self, name: &str) -> Option<&RingDefinition> {
        self.rings.iter().find(|r| r.name == name)
    }

    pub fn require(&self, name: &str) -> Result<&RingDefinition> {
        self.get(name)
            .ok_or_else(|| RolloutError::UnknownRing(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &RingDefinition> {
        self.rings.iter()
    }

    pub fn len(&self) -> usize {
        self.rings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rings.is_empty()
    }
}
