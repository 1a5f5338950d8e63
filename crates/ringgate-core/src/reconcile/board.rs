//! Latest compliance snapshot per (ring, connector).

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::connector::{AppCompliance, ComplianceStatus, Scope};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceSnapshot {
    pub connector_id: String,
    pub scope: Scope,
    pub taken_at: DateTime<Utc>,
    pub status: ComplianceStatus,
}

impl ComplianceSnapshot {
    pub fn app(&self, name: &str) -> Option<&AppCompliance> {
        self.status.app(name)
    }
}

/// Written by reconciliation workers, read by the promotion controller.
#[derive(Debug, Default)]
pub struct ComplianceBoard {
    snapshots: RwLock<BTreeMap<(String, String), ComplianceSnapshot>>,
}

impl ComplianceBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot for the scope's ring and connector. An older
    /// snapshot never replaces a newer one.
    pub fn publish(&self, snapshot: ComplianceSnapshot) {
        let key = (snapshot.scope.ring.clone(), snapshot.connector_id.clone());
        let mut snapshots = self.snapshots.write().unwrap_or_else(PoisonError::into_inner);
        match snapshots.get(&key) {
            Some(existing) if existing.taken_at > snapshot.taken_at => {}
            _ => {
                snapshots.insert(key, snapshot);
            }
        }
    }

    pub fn get(&self, ring: &str, connector_id: &str) -> Option<ComplianceSnapshot> {
        self.snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(ring.to_string(), connector_id.to_string()))
            .cloned()
    }

    pub fn all(&self) -> Vec<ComplianceSnapshot> {
        self.snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}
