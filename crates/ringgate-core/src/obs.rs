//! Structured observability hooks for rollout lifecycle events.
//!
//! - Intent-scoped tracing spans via the `IntentSpan` RAII guard
//! - Emission functions for ring transitions, pushes, rollbacks, drift and
//!   reconciliation ticks
//!
//! Events are emitted at `info!` (failures at `warn!`); filter with
//! `RINGGATE_LOG`.

use tracing::{info, warn};

/// RAII guard that enters a span tagged with the intent's correlation id.
pub struct IntentSpan {
    _span: tracing::span::EnteredSpan,
}

impl IntentSpan {
    pub fn enter(correlation_id: &str) -> Self {
        let span = tracing::info_span!("ringgate.intent", correlation_id = %correlation_id);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_intent_submitted(correlation_id: &str, artifact: &str, rings: usize) {
    info!(
        event = "intent.submitted",
        correlation_id = %correlation_id,
        artifact = %artifact,
        rings
    );
}

pub fn emit_ring_transition(correlation_id: &str, ring: &str, from: &str, to: &str) {
    info!(
        event = "ring.transition",
        correlation_id = %correlation_id,
        ring = %ring,
        from = %from,
        to = %to,
    );
}

pub fn emit_push_result(
    correlation_id: &str,
    ring: &str,
    connector: &str,
    success: bool,
    error_class: &str,
    attempts: u32,
) {
    if success {
        info!(
            event = "ring.push",
            correlation_id = %correlation_id,
            ring = %ring,
            connector = %connector,
            attempts,
            success,
        );
    } else {
        warn!(
            event = "ring.push",
            correlation_id = %correlation_id,
            ring = %ring,
            connector = %connector,
            attempts,
            success,
            error_class = %error_class,
        );
    }
}

pub fn emit_ring_failed(correlation_id: &str, ring: &str, cause: &str, reason: &str) {
    warn!(
        event = "ring.failed",
        correlation_id = %correlation_id,
        ring = %ring,
        cause = %cause,
        reason = %reason,
    );
}

pub fn emit_rollback_finished(
    correlation_id: &str,
    ring: &str,
    complete: bool,
    elapsed_ms: u64,
    sla_breached: bool,
) {
    if complete && !sla_breached {
        info!(
            event = "rollback.finished",
            correlation_id = %correlation_id,
            ring = %ring,
            complete,
            elapsed_ms,
        );
    } else {
        warn!(
            event = "rollback.finished",
            correlation_id = %correlation_id,
            ring = %ring,
            complete,
            elapsed_ms,
            sla_breached,
        );
    }
}

pub fn emit_drift(
    drift_id: &str,
    ring: &str,
    connector: &str,
    class: &str,
    severity: &str,
    status: &str,
) {
    info!(
        event = "drift.status",
        drift_id = %drift_id,
        ring = %ring,
        connector = %connector,
        classification = %class,
        severity = %severity,
        status = %status,
    );
}

pub fn emit_reconcile_tick(
    ring: &str,
    connector: &str,
    discrepancies: usize,
    created: usize,
    resolved: usize,
) {
    info!(
        event = "reconcile.tick",
        ring = %ring,
        connector = %connector,
        discrepancies,
        created,
        resolved,
    );
}

pub fn emit_tick_error(ring: &str, connector: &str, error: &dyn std::fmt::Display) {
    warn!(event = "reconcile.tick_error", ring = %ring, connector = %connector, error = %error);
}
