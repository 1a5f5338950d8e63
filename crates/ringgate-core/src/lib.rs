//! ringgate core library
//!
//! Risk-gated, ring-by-ring promotion of deployment artifacts across
//! heterogeneous execution planes, with drift reconciliation and rollback.

pub mod approval;
pub mod config;
pub mod connector;
pub mod domain;
pub mod evidence;
pub mod export;
pub mod metrics;
pub mod obs;
pub mod persist;
pub mod promotion;
pub mod query;
pub mod reconcile;
pub mod risk;
pub mod rollback;
pub mod telemetry;

pub use approval::{
    ApprovalCheckpoint, ApprovalError, ApprovalGate, ApprovalPolicy, ApprovalStatus, Decision,
    DecisionOutcome,
};
pub use config::{ConnectorConfig, RolloutConfig};
pub use connector::{
    Connector, ConnectorError, ConnectorHandle, ConnectorOperationResult, ConnectorRegistry,
    CredentialResolver, EnvCredentialResolver, ErrorClass, IdempotencyKey, RetryPolicy,
    SimulatedPlane,
};
pub use domain::{
    ArtifactRef, CorrelationId, DeploymentIntent, DriftClass, DriftRecord, DriftSeverity,
    FailureCause, IntentStatus, RemediationStatus, Result, RingCatalog, RingDefinition,
    RolloutError,
};
pub use evidence::EvidenceRecorder;
pub use export::{spawn_exporter, TelemetryEvent, TelemetryExporter, TelemetrySink, TracingSink};
pub use metrics::METRICS;
pub use persist::Stores;
pub use promotion::{
    ControllerSettings, DriverHandle, PromotionController, PromotionDriver, RingPhase,
    SubmitIntent,
};
pub use query::{IntentView, RolloutQuery};
pub use reconcile::{ComplianceBoard, DriftPolicy, IntentReader, ReconcileWorker, TickReport};
pub use risk::{ArtifactEvidence, RiskAssessment, RiskEvidence, RiskModel, MODEL_V1};
pub use rollback::{RollbackExecutor, RollbackReport};
pub use telemetry::{init_tracing, LogFormat};
