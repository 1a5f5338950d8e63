//! Uniform interface over execution planes (MDM and config-management
//! systems).
//!
//! Every connector implements the same five operations. Errors are
//! classified once, here at the boundary, into `ErrorClass`; nothing
//! upstream inspects vendor-specific error shapes.

pub mod command;
pub mod credentials;
pub mod handle;
pub mod journal;
pub mod rest;
pub mod retry;
pub mod simulated;
pub mod types;

use async_trait::async_trait;

pub use command::CommandPlaneConnector;
pub use credentials::{
    CredentialRef, CredentialResolver, EnvCredentialResolver, Secret, StaticCredentialResolver,
};
pub use handle::{ConnectorHandle, ConnectorRegistry};
pub use journal::IdempotencyJournal;
pub use rest::RestPlaneConnector;
pub use retry::{Attempted, RetryPolicy};
pub use simulated::SimulatedPlane;
pub use types::{
    ActualState, AppCompliance, ComplianceStatus, ConnectorError, ConnectorOperationResult,
    ConnectorResult, ErrorClass, IdempotencyKey, ObservedApp, PlaneIntent, Scope,
};

/// An execution plane.
///
/// `push_intent` and `rollback` must be idempotent per `IdempotencyKey`: a
/// repeated call with the same key returns the first call's result without
/// applying the change twice.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Stable identifier, referenced by ring definitions.
    fn id(&self) -> &str;

    /// Reachability and credential check.
    async fn test_connection(&self) -> ConnectorResult<bool>;

    /// What the plane currently has deployed in `scope`.
    async fn sync_state(&self, scope: &Scope) -> ConnectorResult<ActualState>;

    async fn push_intent(
        &self,
        intent: &PlaneIntent,
        key: &IdempotencyKey,
    ) -> ConnectorOperationResult;

    async fn query_compliance(&self, scope: &Scope) -> ConnectorResult<ComplianceStatus>;

    async fn rollback(&self, intent: &PlaneIntent, key: &IdempotencyKey)
        -> ConnectorOperationResult;
}
