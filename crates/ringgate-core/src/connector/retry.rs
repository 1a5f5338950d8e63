//! Timeout and capped exponential backoff around connector calls.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::types::{ConnectorError, ConnectorOperationResult, ConnectorResult, ErrorClass};
use super::types::IdempotencyKey;
use crate::metrics::METRICS;

/// Retry configuration applied to every call on one connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total calls including the first (minimum 1).
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each attempt.
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    /// Wall-clock limit for a single call. Expiry counts as transient.
    pub call_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base_ms: 500,
            backoff_cap_ms: 30_000,
            call_timeout_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// No retries, same timeout.
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff after the given 1-based attempt failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        let ms = self.backoff_base_ms.saturating_mul(factor).min(self.backoff_cap_ms);
        Duration::from_millis(ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// A value together with the number of calls it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// Run a state-changing call, retrying transient failures only.
pub async fn call_with_retry<F, Fut>(
    policy: &RetryPolicy,
    connector_id: &str,
    operation: &str,
    key: &IdempotencyKey,
    call: F,
) -> Attempted<ConnectorOperationResult>
where
    F: Fn() -> Fut,
    Fut: Future<Output = ConnectorOperationResult>,
{
    let max = policy.attempts();
    let mut attempt = 1;
    loop {
        let result = match tokio::time::timeout(policy.call_timeout(), call()).await {
            Ok(result) => result,
            Err(_) => ConnectorOperationResult::failed(
                key,
                ErrorClass::Transient,
                format!("{operation} timed out after {}ms", policy.call_timeout_ms),
            ),
        };
        if !result.is_transient() || attempt >= max {
            return Attempted {
                value: result,
                attempts: attempt,
            };
        }
        let delay = policy.delay_after(attempt);
        warn!(
            connector = connector_id,
            operation,
            attempt,
            max_attempts = max,
            delay_ms = delay.as_millis() as u64,
            error = result.message.as_deref().unwrap_or(""),
            "transient connector failure; retrying"
        );
        METRICS.inc_push_retries();
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Run a read call with the same timeout and retry rules.
pub async fn read_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    connector_id: &str,
    operation: &str,
    call: F,
) -> Attempted<ConnectorResult<T>>
where
    F: Fn() -> Fut,
    Fut: Future<Output = ConnectorResult<T>>,
{
    let max = policy.attempts();
    let mut attempt = 1;
    loop {
        let result = match tokio::time::timeout(policy.call_timeout(), call()).await {
            Ok(result) => result,
            Err(_) => Err(ConnectorError::transient(format!(
                "{operation} timed out after {}ms",
                policy.call_timeout_ms
            ))),
        };
        match &result {
            Err(err) if err.class.is_retryable() && attempt < max => {
                let delay = policy.delay_after(attempt);
                warn!(
                    connector = connector_id,
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient connector read failure; retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            _ => {
                return Attempted {
                    value: result,
                    attempts: attempt,
                }
            }
        }
    }
}
