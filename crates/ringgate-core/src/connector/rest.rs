//! Connector for MDM platforms that expose a JSON REST API.
//!
//! Endpoints, relative to the configured base URL:
//!
//! | operation          | request                                   |
//! |--------------------|-------------------------------------------|
//! | `test_connection`  | `GET  v1/health`                          |
//! | `sync_state`       | `GET  v1/groups/{group}/apps`             |
//! | `query_compliance` | `GET  v1/groups/{group}/compliance`       |
//! | `push_intent`      | `POST v1/deployments`                     |
//! | `rollback`         | `POST v1/deployments/rollback`            |
//!
//! Writes carry the idempotency key in the `Idempotency-Key` header so the
//! platform can deduplicate on its side as well.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::credentials::{CredentialRef, CredentialResolver};
use super::journal::IdempotencyJournal;
use super::types::*;
use super::Connector;

const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Map an HTTP status onto an error class.
pub fn classify_status(status: StatusCode) -> ErrorClass {
    if status.is_success() {
        return ErrorClass::None;
    }
    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => ErrorClass::Transient,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorClass::PolicyViolation,
        s if s.is_server_error() => ErrorClass::Transient,
        _ => ErrorClass::Permanent,
    }
}

fn classify_transport(err: &reqwest::Error) -> ErrorClass {
    if err.is_builder() || err.is_decode() || err.is_redirect() {
        ErrorClass::Permanent
    } else {
        ErrorClass::Transient
    }
}

pub struct RestPlaneConnector {
    id: String,
    base_url: Url,
    credential: Option<CredentialRef>,
    resolver: Arc<dyn CredentialResolver>,
    client: reqwest::Client,
    journal: IdempotencyJournal,
}

impl RestPlaneConnector {
    pub fn new(
        id: impl Into<String>,
        base_url: &str,
        credential: Option<CredentialRef>,
        resolver: Arc<dyn CredentialResolver>,
    ) -> ConnectorResult<Self> {
        let id = id.into();
        let base_url = Url::parse(base_url)
            .map_err(|e| ConnectorError::permanent(format!("{id}: invalid base url: {e}")))?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("ringgate/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ConnectorError::permanent(format!("{id}: http client: {e}")))?;
        Ok(Self {
            id,
            base_url,
            credential,
            resolver,
            client,
            journal: IdempotencyJournal::new(),
        })
    }

    pub fn endpoint(&self, segments: &[&str]) -> ConnectorResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                ConnectorError::permanent(format!("{}: base url cannot be a base", self.id))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn authorize(&self, request: RequestBuilder) -> ConnectorResult<RequestBuilder> {
        match &self.credential {
            Some(reference) => {
                let secret = self.resolver.resolve(reference).await?;
                Ok(request.bearer_auth(secret.expose()))
            }
            None => Ok(request),
        }
    }

    async fn send(&self, request: RequestBuilder) -> ConnectorResult<reqwest::Response> {
        let request = self.authorize(request).await?;
        let response = request.send().await.map_err(|e| {
            ConnectorError::new(classify_transport(&e), format!("{}: {e}", self.id))
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let body = body.chars().take(256).collect::<String>();
        Err(ConnectorError::new(
            classify_status(status),
            format!("{}: HTTP {status}: {body}", self.id),
        ))
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> ConnectorResult<T> {
        let url = self.endpoint(segments)?;
        let response = self.send(self.client.get(url)).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ConnectorError::permanent(format!("{}: malformed response: {e}", self.id)))
    }

    async fn post_intent(
        &self,
        segments: &[&str],
        intent: &PlaneIntent,
        key: &IdempotencyKey,
    ) -> ConnectorResult<serde_json::Value> {
        let url = self.endpoint(segments)?;
        debug!(connector = %self.id, %url, key = %key, "posting intent");
        let request = self
            .client
            .post(url)
            .header(IDEMPOTENCY_HEADER, key.as_str())
            .json(intent);
        let response = self.send(request).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| ConnectorError::transient(format!("{}: reading body: {e}", self.id)))?;
        if body.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_slice(&body).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(&body).into_owned())
        }))
    }

    async fn write(
        &self,
        segments: &[&str],
        intent: &PlaneIntent,
        key: &IdempotencyKey,
    ) -> ConnectorOperationResult {
        self.journal
            .run_once(key, || async move {
                match self.post_intent(segments, intent, key).await {
                    Ok(payload) => ConnectorOperationResult::ok(key, payload),
                    Err(err) => ConnectorOperationResult::from_error(key, err),
                }
            })
            .await
    }
}

#[async_trait]
impl Connector for RestPlaneConnector {
    fn id(&self) -> &str {
        &self.id
    }

    async fn test_connection(&self) -> ConnectorResult<bool> {
        let url = self.endpoint(&["v1", "health"])?;
        match self.send(self.client.get(url)).await {
            Ok(_) => Ok(true),
            Err(err) if err.class == ErrorClass::Transient => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn sync_state(&self, scope: &Scope) -> ConnectorResult<ActualState> {
        self.get_json(&["v1", "groups", scope.group.as_str(), "apps"]).await
    }

    async fn push_intent(
        &self,
        intent: &PlaneIntent,
        key: &IdempotencyKey,
    ) -> ConnectorOperationResult {
        self.write(&["v1", "deployments"], intent, key).await
    }

    async fn query_compliance(&self, scope: &Scope) -> ConnectorResult<ComplianceStatus> {
        self.get_json(&["v1", "groups", scope.group.as_str(), "compliance"])
            .await
    }

    async fn rollback(
        &self,
        intent: &PlaneIntent,
        key: &IdempotencyKey,
    ) -> ConnectorOperationResult {
        self.write(&["v1", "deployments", "rollback"], intent, key)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::StaticCredentialResolver;
    use crate::domain::ArtifactRef;
    use ringgate_state::ContentDigest;

    fn connector(base: &str) -> RestPlaneConnector {
        RestPlaneConnector::new(
            "intune",
            base,
            Some(CredentialRef::new("intune")),
            Arc::new(StaticCredentialResolver::new().with_secret("intune", "t0k3n")),
        )
        .unwrap()
    }

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(StatusCode::OK), ErrorClass::None);
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), ErrorClass::Transient);
        assert_eq!(classify_status(StatusCode::REQUEST_TIMEOUT), ErrorClass::Transient);
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), ErrorClass::Transient);
        assert_eq!(classify_status(StatusCode::SERVICE_UNAVAILABLE), ErrorClass::Transient);
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), ErrorClass::PolicyViolation);
        assert_eq!(classify_status(StatusCode::FORBIDDEN), ErrorClass::PolicyViolation);
        assert_eq!(classify_status(StatusCode::BAD_REQUEST), ErrorClass::Permanent);
        assert_eq!(classify_status(StatusCode::CONFLICT), ErrorClass::Permanent);
    }

    #[test]
    fn endpoint_appends_encoded_segments() {
        let c = connector("https://mdm.example.com/api/");
        let url = c.endpoint(&["v1", "groups", "pilot users", "apps"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://mdm.example.com/api/v1/groups/pilot%20users/apps"
        );
    }

    #[test]
    fn invalid_base_url_is_permanent() {
        let err = RestPlaneConnector::new(
            "intune",
            "not a url",
            None,
            Arc::new(StaticCredentialResolver::new()),
        )
        .err()
        .unwrap();
        assert_eq!(err.class, ErrorClass::Permanent);
    }

    #[tokio::test]
    async fn missing_credential_fails_push_permanently() {
        let c = RestPlaneConnector::new(
            "intune",
            "http://127.0.0.1:9/",
            Some(CredentialRef::new("absent")),
            Arc::new(StaticCredentialResolver::new()),
        )
        .unwrap();
        let intent = PlaneIntent {
            correlation_id: "dep-1".into(),
            artifact: ArtifactRef::new("7zip", "23.01", ContentDigest::from_bytes(b"7zip")),
            scope: Scope::new("canary", "grp-canary"),
        };
        let key = IdempotencyKey::derive("dep-1", "push:canary:1", "intune");
        let result = c.push_intent(&intent, &key).await;
        assert!(!result.success);
        assert_eq!(result.error_class, ErrorClass::Permanent);
        assert_eq!(result.idempotency_key, key);
    }
}
