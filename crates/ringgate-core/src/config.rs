//! Daemon configuration, loaded from a single TOML file.
//!
//! Every section is optional and falls back to the defaults documented on
//! its fields. Only `rings` and `connectors` have no useful default.
//!
//! ```toml
//! [approval]
//! auto_approve_threshold = 50
//!
//! [[connectors]]
//! kind = "rest"
//! id = "intune"
//! base_url = "https://mdm.example.com/api/"
//! credential = "intune"
//!
//! [[rings]]
//! name = "canary"
//! scope_group = "grp-canary"
//! connectors = ["intune"]
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::approval::ApprovalPolicy;
use crate::connector::{
    CommandPlaneConnector, Connector, ConnectorHandle, ConnectorRegistry, CredentialRef,
    CredentialResolver, RestPlaneConnector, RetryPolicy, SimulatedPlane,
};
use crate::domain::{check_window, Result, RingCatalog, RingDefinition, RolloutError};
use crate::promotion::ControllerSettings;
use crate::reconcile::DriftPolicy;
use crate::risk::{RiskModel, MODEL_V1};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RolloutConfig {
    #[serde(default)]
    pub approval: ApprovalPolicy,

    #[serde(default)]
    pub risk: RiskConfig,

    /// Default retry policy for connectors that do not set their own.
    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub reconcile: ReconcileConfig,

    #[serde(default)]
    pub rollback: RollbackConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub evidence: EvidenceConfig,

    /// Rings in promotion order.
    #[serde(default)]
    pub rings: Vec<RingDefinition>,

    #[serde(default)]
    pub connectors: Vec<ConnectorConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Built-in scoring model to use.
    #[serde(default = "default_model_version")]
    pub model_version: String,
}

fn default_model_version() -> String {
    MODEL_V1.to_owned()
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            model_version: default_model_version(),
        }
    }
}

/// Reconciliation and observation cadence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Seconds between reconciliation ticks of one (ring, connector) worker.
    #[serde(default = "default_reconcile_interval_secs")]
    pub interval_secs: u64,

    /// Seconds between observation sweeps over observing rings.
    #[serde(default = "default_observe_interval_secs")]
    pub observe_interval_secs: u64,

    #[serde(default)]
    pub drift: DriftPolicy,
}

const fn default_reconcile_interval_secs() -> u64 {
    300
}

const fn default_observe_interval_secs() -> u64 {
    60
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_reconcile_interval_secs(),
            observe_interval_secs: default_observe_interval_secs(),
            drift: DriftPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackConfig {
    /// Time allowed for a rollback to complete before it is reported as an
    /// SLA breach.
    #[serde(default = "default_rollback_sla_secs")]
    pub sla_secs: u64,
}

const fn default_rollback_sla_secs() -> u64 {
    4 * 3600
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            sla_secs: default_rollback_sla_secs(),
        }
    }
}

/// SIEM forwarding buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Events held before the oldest is dropped.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

const fn default_buffer_capacity() -> usize {
    10_000
}

const fn default_flush_interval_ms() -> u64 {
    1_000
}

const fn default_batch_size() -> usize {
    100
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            flush_interval_ms: default_flush_interval_ms(),
            batch_size: default_batch_size(),
        }
    }
}

impl TelemetryConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceConfig {
    /// JSONL evidence log. Evidence is kept in memory when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

const fn default_max_concurrency() -> usize {
    8
}

const fn default_targets_per_group() -> u32 {
    100
}

/// One execution plane, selected by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConnectorConfig {
    /// In-process plane, for dry runs and tests.
    Simulated {
        id: String,
        #[serde(default = "default_targets_per_group")]
        targets_per_group: u32,
        #[serde(default = "default_max_concurrency")]
        max_concurrency: usize,
        #[serde(default)]
        retry: Option<RetryPolicy>,
    },
    /// MDM platform with a JSON REST API.
    Rest {
        id: String,
        base_url: String,
        #[serde(default)]
        credential: Option<String>,
        #[serde(default = "default_max_concurrency")]
        max_concurrency: usize,
        #[serde(default)]
        retry: Option<RetryPolicy>,
    },
    /// Config-management system driven through a CLI.
    Command {
        id: String,
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        credential: Option<String>,
        #[serde(default = "default_max_concurrency")]
        max_concurrency: usize,
        #[serde(default)]
        retry: Option<RetryPolicy>,
    },
}

impl ConnectorConfig {
    pub fn id(&self) -> &str {
        match self {
            Self::Simulated { id, .. } | Self::Rest { id, .. } | Self::Command { id, .. } => id,
        }
    }

    fn max_concurrency(&self) -> usize {
        match self {
            Self::Simulated { max_concurrency, .. }
            | Self::Rest { max_concurrency, .. }
            | Self::Command { max_concurrency, .. } => *max_concurrency,
        }
    }

    fn retry(&self) -> Option<&RetryPolicy> {
        match self {
            Self::Simulated { retry, .. }
            | Self::Rest { retry, .. }
            | Self::Command { retry, .. } => retry.as_ref(),
        }
    }

    fn build(&self, resolver: &Arc<dyn CredentialResolver>) -> Result<Arc<dyn Connector>> {
        let connector: Arc<dyn Connector> = match self {
            Self::Simulated {
                id,
                targets_per_group,
                ..
            } => Arc::new(SimulatedPlane::new(id.clone(), *targets_per_group)),
            Self::Rest {
                id,
                base_url,
                credential,
                ..
            } => Arc::new(
                RestPlaneConnector::new(
                    id.clone(),
                    base_url,
                    credential.as_deref().map(CredentialRef::new),
                    resolver.clone(),
                )
                .map_err(|e| RolloutError::InvalidConfig(e.message))?,
            ),
            Self::Command {
                id,
                program,
                args,
                credential,
                ..
            } => Arc::new(CommandPlaneConnector::new(
                id.clone(),
                program.clone(),
                args.clone(),
                credential.as_deref().map(CredentialRef::new),
                resolver.clone(),
            )),
        };
        Ok(connector)
    }
}

impl RolloutConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| RolloutError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw).map_err(|err| match err {
            RolloutError::InvalidConfig(msg) => {
                RolloutError::InvalidConfig(format!("{}: {msg}", path.as_ref().display()))
            }
            other => other,
        })
    }

    /// Cross-section checks that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.rings.is_empty() {
            return Err(RolloutError::InvalidConfig("no rings configured".into()));
        }
        let mut ids = HashSet::new();
        for connector in &self.connectors {
            if !ids.insert(connector.id()) {
                return Err(RolloutError::InvalidConfig(format!(
                    "duplicate connector id: {}",
                    connector.id()
                )));
            }
        }
        // Names, thresholds and empty connector lists.
        RingCatalog::new(self.rings.clone())?;
        for ring in &self.rings {
            if let Some(missing) = ring.connectors.iter().find(|c| !ids.contains(c.as_str())) {
                return Err(RolloutError::InvalidConfig(format!(
                    "ring {} references unknown connector {missing}",
                    ring.name
                )));
            }
        }
        if self.approval.auto_approve_threshold > 100 {
            return Err(RolloutError::InvalidConfig(format!(
                "auto_approve_threshold {} exceeds 100",
                self.approval.auto_approve_threshold
            )));
        }
        if self.telemetry.buffer_capacity == 0 || self.telemetry.batch_size == 0 {
            return Err(RolloutError::InvalidConfig(
                "telemetry buffer_capacity and batch_size must be positive".into(),
            ));
        }
        let windows = [
            ("approval.escalate_after_secs", self.approval.escalate_after_secs.unwrap_or(0)),
            ("reconcile.interval_secs", self.reconcile.interval_secs),
            ("reconcile.observe_interval_secs", self.reconcile.observe_interval_secs),
            (
                "reconcile.drift.remediation_backoff_secs",
                self.reconcile.drift.remediation_backoff_secs,
            ),
            ("rollback.sla_secs", self.rollback.sla_secs),
            ("telemetry.flush_interval_ms", self.telemetry.flush_interval_ms / 1_000),
            ("retry.backoff_cap_ms", self.retry.backoff_cap_ms / 1_000),
            ("retry.call_timeout_ms", self.retry.call_timeout_ms / 1_000),
        ];
        for (name, secs) in windows {
            check_window(name, secs)?;
        }
        for connector in &self.connectors {
            if let Some(retry) = connector.retry() {
                let id = connector.id();
                check_window(
                    &format!("{id} retry.backoff_cap_ms"),
                    retry.backoff_cap_ms / 1_000,
                )?;
                check_window(
                    &format!("{id} retry.call_timeout_ms"),
                    retry.call_timeout_ms / 1_000,
                )?;
            }
        }
        RiskModel::for_version(&self.risk.model_version)?;
        Ok(())
    }

    pub fn ring_catalog(&self) -> Result<RingCatalog> {
        RingCatalog::new(self.rings.clone())
    }

    pub fn controller_settings(&self) -> Result<ControllerSettings> {
        Ok(ControllerSettings {
            approval: self.approval.clone(),
            risk_model: RiskModel::for_version(&self.risk.model_version)?,
            drift_fail_at: self.reconcile.drift.fail_ring_at,
            rollback_sla: Duration::from_secs(self.rollback.sla_secs),
        })
    }

    pub fn drift_policy(&self) -> DriftPolicy {
        self.reconcile.drift.clone()
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile.interval_secs.max(1))
    }

    pub fn observe_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile.observe_interval_secs.max(1))
    }

    /// Instantiate every configured connector behind its own handle.
    pub fn build_registry(
        &self,
        resolver: Arc<dyn CredentialResolver>,
    ) -> Result<ConnectorRegistry> {
        let mut registry = ConnectorRegistry::new();
        for entry in &self.connectors {
            let connector = entry.build(&resolver)?;
            let retry = entry.retry().unwrap_or(&self.retry).clone();
            registry.insert(ConnectorHandle::new(connector, entry.max_concurrency(), retry))?;
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::StaticCredentialResolver;
    use crate::domain::DriftSeverity;
    use std::io::Write;

    const SAMPLE: &str = r#"
        [approval]
        auto_approve_threshold = 40

        [retry]
        max_attempts = 3

        [reconcile]
        interval_secs = 120

        [reconcile.drift]
        remediation_backoff_secs = 60
        fail_ring_at = "high"

        [[connectors]]
        kind = "simulated"
        id = "sim"
        targets_per_group = 20

        [[connectors]]
        kind = "command"
        id = "ansible"
        program = "ansible-plane"
        args = ["--inventory", "prod"]
        max_concurrency = 2
        retry = { max_attempts = 1 }

        [[rings]]
        name = "canary"
        scope_group = "grp-canary"
        target_count = 100
        connectors = ["sim"]

        [[rings]]
        name = "broad"
        scope_group = "grp-broad"
        success_threshold = 98
        connectors = ["sim", "ansible"]
    "#;

    #[test]
    fn parses_sections_and_defaults() {
        let config = RolloutConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.approval.auto_approve_threshold, 40);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.backoff_base_ms, RetryPolicy::default().backoff_base_ms);
        assert_eq!(config.reconcile_interval(), Duration::from_secs(120));
        assert_eq!(config.observe_interval(), Duration::from_secs(60));
        assert_eq!(config.reconcile.drift.remediation_backoff_secs, 60);
        assert_eq!(config.rollback.sla_secs, 14_400);
        assert_eq!(config.telemetry.buffer_capacity, 10_000);
        assert_eq!(config.risk.model_version, MODEL_V1);
        assert!(config.evidence.path.is_none());

        assert_eq!(config.rings[0].success_threshold, 95);
        assert_eq!(config.rings[1].success_threshold, 98);

        let settings = config.controller_settings().unwrap();
        assert_eq!(settings.drift_fail_at, DriftSeverity::High);
        assert_eq!(settings.rollback_sla, Duration::from_secs(14_400));
    }

    #[test]
    fn builds_registry_with_per_connector_retry() {
        let config = RolloutConfig::from_toml_str(SAMPLE).unwrap();
        let registry = config
            .build_registry(Arc::new(StaticCredentialResolver::new()))
            .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.require("sim").unwrap().retry_policy().max_attempts, 3);
        assert_eq!(registry.require("ansible").unwrap().retry_policy().max_attempts, 1);
    }

    #[test]
    fn rejects_unknown_connector_reference() {
        let raw = r#"
            [[connectors]]
            kind = "simulated"
            id = "sim"

            [[rings]]
            name = "canary"
            scope_group = "grp-canary"
            connectors = ["intune"]
        "#;
        let err = RolloutConfig::from_toml_str(raw).unwrap_err();
        assert!(err.to_string().contains("unknown connector intune"), "{err}");
    }

    #[test]
    fn rejects_duplicate_ring_names_and_empty_rings() {
        let raw = r#"
            [[connectors]]
            kind = "simulated"
            id = "sim"

            [[rings]]
            name = "canary"
            scope_group = "a"
            connectors = ["sim"]

            [[rings]]
            name = "canary"
            scope_group = "b"
            connectors = ["sim"]
        "#;
        assert!(matches!(
            RolloutConfig::from_toml_str(raw),
            Err(RolloutError::InvalidConfig(_))
        ));
        assert!(matches!(
            RolloutConfig::from_toml_str(""),
            Err(RolloutError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_unknown_model_version() {
        let raw = format!("[risk]\nmodel_version = \"bogus\"\n{SAMPLE}");
        assert!(RolloutConfig::from_toml_str(&raw).is_err());
    }

    #[test]
    fn rejects_windows_that_overflow_timestamps() {
        let raw = SAMPLE.replace(
            "target_count = 100",
            "target_count = 100\n        min_dwell_secs = 20000000000000000",
        );
        let err = RolloutConfig::from_toml_str(&raw).unwrap_err();
        assert!(err.to_string().contains("min_dwell_secs"), "{err}");

        let mut config = RolloutConfig::from_toml_str(SAMPLE).unwrap();
        config.reconcile.drift.remediation_backoff_secs = u64::MAX;
        assert!(matches!(config.validate(), Err(RolloutError::InvalidConfig(_))));
        config.reconcile.drift.remediation_backoff_secs = 60;
        config.approval.escalate_after_secs = Some(u64::MAX);
        assert!(config.validate().is_err());
        config.approval.escalate_after_secs = None;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_base_url_is_a_config_error() {
        let raw = r#"
            [[connectors]]
            kind = "rest"
            id = "intune"
            base_url = "not a url"

            [[rings]]
            name = "canary"
            scope_group = "grp-canary"
            connectors = ["intune"]
        "#;
        let config = RolloutConfig::from_toml_str(raw).unwrap();
        let err = config
            .build_registry(Arc::new(StaticCredentialResolver::new()))
            .unwrap_err();
        assert!(matches!(err, RolloutError::InvalidConfig(_)));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = RolloutConfig::from_file(file.path()).unwrap();
        assert_eq!(config.ring_catalog().unwrap().len(), 2);

        let err = RolloutConfig::from_file("/nonexistent/ringgate.toml").unwrap_err();
        assert!(matches!(err, RolloutError::Io(_)));
    }
}
