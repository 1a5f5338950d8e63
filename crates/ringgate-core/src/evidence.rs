//! Evidence trail: one append per state transition, with a copy of the
//! security-relevant kinds forwarded to telemetry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ringgate_state::{EventId, EvidenceEvent, EvidenceStore};

use crate::domain::Result;
use crate::export::{TelemetryEvent, TelemetryExporter};

pub const INTENT_SUBMITTED: &str = "intent.submitted";
pub const INTENT_COMPLETED: &str = "intent.completed";
pub const INTENT_ROLLED_BACK: &str = "intent.rolled_back";
pub const INTENT_ROLLBACK_INCOMPLETE: &str = "intent.rollback_incomplete";
pub const INTENT_CANCELLED: &str = "intent.cancelled";
pub const INTENT_RESUBMITTED: &str = "intent.resubmitted";
pub const RING_AWAITING_APPROVAL: &str = "ring.awaiting_approval";
pub const RING_PUBLISHING: &str = "ring.publishing";
pub const RING_OBSERVING: &str = "ring.observing";
pub const RING_SUCCEEDED: &str = "ring.succeeded";
pub const RING_FAILED: &str = "ring.failed";
pub const APPROVAL_DECIDED: &str = "approval.decided";
pub const APPROVAL_ESCALATED: &str = "approval.escalated";
pub const ROLLBACK_COMPLETED: &str = "rollback.completed";
pub const ROLLBACK_INCOMPLETE: &str = "rollback.incomplete";
pub const DRIFT_DETECTED: &str = "drift.detected";
pub const DRIFT_REMEDIATING: &str = "drift.remediating";
pub const DRIFT_RESOLVED: &str = "drift.resolved";
pub const DRIFT_ESCALATED: &str = "drift.escalated";

/// Kinds that are also sent to the SIEM.
pub fn is_forwarded(kind: &str) -> bool {
    (kind.starts_with("drift.") && kind != DRIFT_REMEDIATING)
        || kind == RING_FAILED
        || kind == INTENT_ROLLED_BACK
        || kind == INTENT_ROLLBACK_INCOMPLETE
        || kind.starts_with("rollback.")
}

#[derive(Clone)]
pub struct EvidenceRecorder {
    store: Arc<dyn EvidenceStore>,
    exporter: Arc<TelemetryExporter>,
}

impl EvidenceRecorder {
    pub fn new(store: Arc<dyn EvidenceStore>, exporter: Arc<TelemetryExporter>) -> Self {
        Self { store, exporter }
    }

    pub fn store(&self) -> &Arc<dyn EvidenceStore> {
        &self.store
    }

    pub fn exporter(&self) -> &Arc<TelemetryExporter> {
        &self.exporter
    }

    /// Append one event. Drift events use the drift id as correlation id
    /// when no intent is known.
    pub async fn record(
        &self,
        correlation_id: &str,
        kind: &str,
        payload: serde_json::Value,
        at: DateTime<Utc>,
    ) -> Result<EventId> {
        let event = EvidenceEvent::new(correlation_id, kind, payload, at);
        let forwarded = is_forwarded(kind).then(|| TelemetryEvent {
            correlation_id: event.correlation_id.clone(),
            kind: event.kind.clone(),
            payload: event.payload.clone(),
            timestamp: event.timestamp,
        });
        let id = self.store.append(event).await?;
        if let Some(telemetry) = forwarded {
            self.exporter.forward(telemetry);
        }
        Ok(id)
    }
}

impl std::fmt::Debug for EvidenceRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvidenceRecorder")
            .field("telemetry_pending", &self.exporter.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringgate_state::fakes::MemoryEvidenceStore;

    #[test]
    fn forwarding_selection() {
        assert!(is_forwarded(DRIFT_DETECTED));
        assert!(is_forwarded(DRIFT_ESCALATED));
        assert!(is_forwarded(RING_FAILED));
        assert!(is_forwarded(ROLLBACK_INCOMPLETE));
        assert!(is_forwarded(INTENT_ROLLED_BACK));
        assert!(is_forwarded(INTENT_ROLLBACK_INCOMPLETE));
        assert!(!is_forwarded(INTENT_COMPLETED));
        assert!(!is_forwarded(INTENT_CANCELLED));
        assert!(!is_forwarded(DRIFT_REMEDIATING));
        assert!(!is_forwarded(RING_PUBLISHING));
        assert!(!is_forwarded(APPROVAL_DECIDED));
    }

    #[tokio::test]
    async fn record_appends_and_forwards_selected_kinds() {
        let store = Arc::new(MemoryEvidenceStore::new());
        let exporter = Arc::new(TelemetryExporter::new(8));
        let recorder = EvidenceRecorder::new(store.clone(), exporter.clone());
        let now = Utc::now();

        recorder
            .record("dep-1", RING_PUBLISHING, serde_json::json!({}), now)
            .await
            .unwrap();
        recorder
            .record("dep-1", RING_FAILED, serde_json::json!({"cause": "rejected"}), now)
            .await
            .unwrap();

        assert_eq!(
            store.kinds_for("dep-1").unwrap(),
            vec![RING_PUBLISHING, RING_FAILED]
        );
        let forwarded = exporter.drain(10);
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].kind, RING_FAILED);
    }
}
