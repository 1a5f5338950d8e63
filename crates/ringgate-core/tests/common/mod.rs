//! Shared fixtures: a controller wired to simulated planes and in-memory
//! stores.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use ringgate_core::approval::{Decision, DecisionOutcome};
use ringgate_core::connector::{ConnectorHandle, ConnectorRegistry, RetryPolicy, SimulatedPlane};
use ringgate_core::domain::{ArtifactRef, CorrelationId, DeploymentIntent, RingDefinition};
use ringgate_core::evidence::EvidenceRecorder;
use ringgate_core::export::TelemetryExporter;
use ringgate_core::persist::Stores;
use ringgate_core::promotion::{ControllerSettings, PromotionController, SubmitIntent};
use ringgate_core::reconcile::{ComplianceBoard, DriftPolicy, ReconcileWorker, TickReport};
use ringgate_core::risk::{ArtifactEvidence, ChangeKind, VulnerabilityCounts};
use ringgate_core::RingCatalog;
use ringgate_state::fakes::MemoryEvidenceStore;
use ringgate_state::ContentDigest;

pub const TARGETS_PER_GROUP: u32 = 20;

pub fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-02T09:00:00Z")
        .expect("parse timestamp")
        .with_timezone(&Utc)
}

pub fn at(secs: i64) -> DateTime<Utc> {
    t0() + Duration::seconds(secs)
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        backoff_base_ms: 1,
        backoff_cap_ms: 4,
        call_timeout_ms: 2_000,
    }
}

pub fn ring(name: &str, target_count: u32, connectors: &[&str]) -> RingDefinition {
    RingDefinition {
        name: name.into(),
        success_threshold: 95,
        min_dwell_secs: 60,
        target_count,
        scope_group: format!("grp-{name}"),
        connectors: connectors.iter().map(|c| c.to_string()).collect(),
    }
}

pub fn artifact() -> ArtifactRef {
    ArtifactRef::new("7zip", "23.01", ContentDigest::from_bytes(b"7zip-23.01.msi"))
}

/// Signed update with three medium findings.
pub fn low_risk_evidence() -> ArtifactEvidence {
    ArtifactEvidence {
        change_kind: Some(ChangeKind::Update),
        vulnerabilities: Some(VulnerabilityCounts {
            critical: 0,
            high: 0,
            medium: 3,
        }),
        signature_verified: Some(true),
    }
}

/// Unsigned uninstall with one critical finding.
pub fn high_risk_evidence() -> ArtifactEvidence {
    ArtifactEvidence {
        change_kind: Some(ChangeKind::Uninstall),
        vulnerabilities: Some(VulnerabilityCounts {
            critical: 1,
            high: 0,
            medium: 3,
        }),
        signature_verified: Some(false),
    }
}

pub fn submit_request(corr: &str, rings: &[&str], evidence: ArtifactEvidence) -> SubmitIntent {
    SubmitIntent {
        correlation_id: Some(CorrelationId::new(corr)),
        artifact: artifact(),
        rings: rings.iter().map(|r| r.to_string()).collect(),
        evidence,
        submitted_by: "release-bot".into(),
    }
}

pub fn decision(corr: &str, ring: &str, outcome: DecisionOutcome, now: DateTime<Utc>) -> Decision {
    Decision::new(corr, ring, outcome, "cab-approver", now)
}

pub struct Harness {
    pub controller: Arc<PromotionController>,
    pub planes: BTreeMap<String, Arc<SimulatedPlane>>,
    pub registry: Arc<ConnectorRegistry>,
    pub stores: Stores,
    pub board: Arc<ComplianceBoard>,
    pub evidence: Arc<MemoryEvidenceStore>,
    pub recorder: EvidenceRecorder,
    pub exporter: Arc<TelemetryExporter>,
    pub rings: Vec<RingDefinition>,
    pub drift_policy: DriftPolicy,
}

impl Harness {
    pub fn new(rings: Vec<RingDefinition>) -> Self {
        Self::with(rings, fast_retry(), ControllerSettings::default())
    }

    pub fn with(
        rings: Vec<RingDefinition>,
        retry: RetryPolicy,
        settings: ControllerSettings,
    ) -> Self {
        let mut planes = BTreeMap::new();
        let mut registry = ConnectorRegistry::new();
        for id in rings.iter().flat_map(|r| r.connectors.iter()) {
            if planes.contains_key(id) {
                continue;
            }
            let plane = Arc::new(SimulatedPlane::new(id.clone(), TARGETS_PER_GROUP));
            registry
                .insert(ConnectorHandle::new(plane.clone(), 4, retry.clone()))
                .expect("register plane");
            planes.insert(id.clone(), plane);
        }
        let registry = Arc::new(registry);
        let stores = Stores::in_memory();
        let board = Arc::new(ComplianceBoard::new());
        let evidence = Arc::new(MemoryEvidenceStore::new());
        let exporter = Arc::new(TelemetryExporter::new(1_000));
        let recorder = EvidenceRecorder::new(evidence.clone(), exporter.clone());
        let catalog = RingCatalog::new(rings.clone()).expect("ring catalog");
        let controller = Arc::new(PromotionController::new(
            catalog,
            registry.clone(),
            stores.clone(),
            board.clone(),
            recorder.clone(),
            settings,
        ));
        Self {
            controller,
            planes,
            registry,
            stores,
            board,
            evidence,
            recorder,
            exporter,
            rings,
            drift_policy: DriftPolicy::default(),
        }
    }

    pub fn plane(&self, id: &str) -> &Arc<SimulatedPlane> {
        self.planes.get(id).expect("plane configured")
    }

    pub fn ring(&self, name: &str) -> &RingDefinition {
        self.rings
            .iter()
            .find(|r| r.name == name)
            .expect("ring configured")
    }

    pub fn worker(&self, ring: &str, connector: &str) -> ReconcileWorker {
        ReconcileWorker::new(
            self.ring(ring).clone(),
            self.registry.require(connector).expect("connector").clone(),
            Arc::new(self.controller.reader()),
            self.stores.drift.clone(),
            self.board.clone(),
            self.recorder.clone(),
            self.drift_policy.clone(),
        )
    }

    /// One reconciliation tick for every connector of `ring`.
    pub async fn reconcile(&self, ring: &str, now: DateTime<Utc>) -> Vec<TickReport> {
        let mut reports = Vec::new();
        for connector in &self.ring(ring).connectors {
            let report = self
                .worker(ring, connector)
                .tick(now)
                .await
                .expect("reconcile tick");
            reports.push(report);
        }
        reports
    }

    pub async fn intent(&self, corr: &str) -> DeploymentIntent {
        self.controller.get(corr).await.expect("intent stored")
    }

    pub fn kinds(&self, corr: &str) -> Vec<String> {
        self.evidence.kinds_for(corr).expect("evidence kinds")
    }
}
