//! Domain model: deployment intents, ring definitions and drift records.

pub mod drift;
pub mod error;
pub mod intent;
pub mod ring;
pub mod window;

pub use drift::{DriftClass, DriftRecord, DriftSeverity, EntityRef, RemediationStatus};
pub use error::{Result, RolloutError};
pub use intent::{
    ArtifactRef, CorrelationId, DeploymentIntent, FailureCause, FailureRecord, IntentStatus,
    PushRecord, RingAttempt, RingProgress,
};
pub use ring::{RingCatalog, RingDefinition};
pub use window::{check_window, window, MAX_WINDOW_SECS};
