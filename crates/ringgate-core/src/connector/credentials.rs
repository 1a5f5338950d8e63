//! Credential references resolved through a vault-style resolver.
//!
//! Connectors store only the name of a credential. The secret itself is
//! fetched per call and never logged.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::types::{ConnectorError, ConnectorResult};

/// Name of a credential held by the vault.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialRef(String);

impl CredentialRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

/// A resolved secret. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// A missing credential is a permanent error: retrying will not help.
    async fn resolve(&self, reference: &CredentialRef) -> ConnectorResult<Secret>;
}

/// Reads `<prefix><NAME>` from the process environment, with the name
/// upper-cased and non-alphanumerics replaced by `_`.
#[derive(Debug, Clone)]
pub struct EnvCredentialResolver {
    prefix: String,
}

impl EnvCredentialResolver {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn variable_for(&self, reference: &CredentialRef) -> String {
        let name: String = reference
            .name()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}{}", self.prefix, name)
    }
}

impl Default for EnvCredentialResolver {
    fn default() -> Self {
        Self::new("RINGGATE_CRED_")
    }
}

#[async_trait]
impl CredentialResolver for EnvCredentialResolver {
    async fn resolve(&self, reference: &CredentialRef) -> ConnectorResult<Secret> {
        let var = self.variable_for(reference);
        std::env::var(&var).map(Secret::new).map_err(|_| {
            ConnectorError::permanent(format!(
                "credential {} not available (expected in {var})",
                reference.name()
            ))
        })
    }
}

/// Fixed in-memory secrets.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialResolver {
    secrets: HashMap<String, Secret>,
}

impl StaticCredentialResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(name.into(), Secret::new(value));
        self
    }
}

#[async_trait]
impl CredentialResolver for StaticCredentialResolver {
    async fn resolve(&self, reference: &CredentialRef) -> ConnectorResult<Secret> {
        self.secrets.get(reference.name()).cloned().ok_or_else(|| {
            ConnectorError::permanent(format!("unknown credential {}", reference.name()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::ErrorClass;

    #[test]
    fn secret_debug_is_redacted() {
        let secret = Secret::new("hunter2");
        assert_eq!(format!("{secret:?}"), "Secret(***)");
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    fn env_variable_name_is_normalized() {
        let resolver = EnvCredentialResolver::default();
        assert_eq!(
            resolver.variable_for(&CredentialRef::new("intune-prod.token")),
            "RINGGATE_CRED_INTUNE_PROD_TOKEN"
        );
    }

    #[tokio::test]
    async fn static_resolver_missing_is_permanent() {
        let resolver = StaticCredentialResolver::new().with_secret("intune", "t0k3n");
        let secret = resolver.resolve(&CredentialRef::new("intune")).await.unwrap();
        assert_eq!(secret.expose(), "t0k3n");

        let err = resolver
            .resolve(&CredentialRef::new("jamf"))
            .await
            .unwrap_err();
        assert_eq!(err.class, ErrorClass::Permanent);
    }
}
