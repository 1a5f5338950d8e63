//! Global atomic counters for the rollout control plane.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single `tracing::info!`
//! event; the daemon does so on every observation tick.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    pushes: AtomicU64,
    push_retries: AtomicU64,
    rollbacks: AtomicU64,
    drift_detected: AtomicU64,
    remediations: AtomicU64,
    telemetry_dropped: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            pushes: AtomicU64::new(0),
            push_retries: AtomicU64::new(0),
            rollbacks: AtomicU64::new(0),
            drift_detected: AtomicU64::new(0),
            remediations: AtomicU64::new(0),
            telemetry_dropped: AtomicU64::new(0),
        }
    }

    /// One `PushIntent` issued through a connector handle (retries not
    /// counted).
    pub fn inc_pushes(&self) {
        self.pushes.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "pushes", "counter incremented");
    }

    /// Retries of any connector write after a transient failure.
    pub fn inc_push_retries(&self) {
        self.push_retries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "push_retries", "counter incremented");
    }

    pub fn inc_rollbacks(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "rollbacks", "counter incremented");
    }

    pub fn inc_drift_detected(&self) {
        self.drift_detected.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "drift_detected", "counter incremented");
    }

    pub fn inc_remediations(&self) {
        self.remediations.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "remediations", "counter incremented");
    }

    pub fn inc_telemetry_dropped(&self) {
        self.telemetry_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            pushes = self.pushes(),
            push_retries = self.push_retries(),
            rollbacks = self.rollbacks(),
            drift_detected = self.drift_detected(),
            remediations = self.remediations(),
            telemetry_dropped = self.telemetry_dropped(),
        );
    }

    pub fn pushes(&self) -> u64 {
        self.pushes.load(Ordering::Relaxed)
    }

    pub fn push_retries(&self) -> u64 {
        self.push_retries.load(Ordering::Relaxed)
    }

    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::Relaxed)
    }

    pub fn drift_detected(&self) -> u64 {
        self.drift_detected.load(Ordering::Relaxed)
    }

    pub fn remediations(&self) -> u64 {
        self.remediations.load(Ordering::Relaxed)
    }

    pub fn telemetry_dropped(&self) -> u64 {
        self.telemetry_dropped.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        for counter in [
            &self.pushes,
            &self.push_retries,
            &self.rollbacks,
            &self.drift_detected,
            &self.remediations,
            &self.telemetry_dropped,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
