//! Best-effort forwarding of selected events to a telemetry/SIEM sink.
//!
//! `forward` never blocks the control plane: events go into a bounded
//! buffer and the oldest entry is dropped (and counted) when it is full. A
//! background task drains the buffer into a `TelemetrySink`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::domain::Result;
use crate::metrics::METRICS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub correlation_id: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn send(&self, batch: Vec<TelemetryEvent>) -> Result<()>;
}

/// Emits each event as a structured `tracing` record under the
/// `ringgate::siem` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl TelemetrySink for TracingSink {
    async fn send(&self, batch: Vec<TelemetryEvent>) -> Result<()> {
        for event in batch {
            info!(
                target: "ringgate::siem",
                correlation_id = %event.correlation_id,
                kind = %event.kind,
                timestamp = %event.timestamp,
                payload = %event.payload,
            );
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct TelemetryExporter {
    buffer: Mutex<VecDeque<TelemetryEvent>>,
    capacity: usize,
    dropped: AtomicU64,
    notify: Notify,
}

impl TelemetryExporter {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    fn buffer(&self) -> MutexGuard<'_, VecDeque<TelemetryEvent>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue an event without waiting.
    pub fn forward(&self, event: TelemetryEvent) {
        {
            let mut buffer = self.buffer();
            if buffer.len() >= self.capacity {
                buffer.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
                METRICS.inc_telemetry_dropped();
            }
            buffer.push_back(event);
        }
        self.notify.notify_one();
    }

    /// Take up to `max` queued events, oldest first.
    pub fn drain(&self, max: usize) -> Vec<TelemetryEvent> {
        let mut buffer = self.buffer();
        let n = max.min(buffer.len());
        buffer.drain(..n).collect()
    }

    pub fn pending(&self) -> usize {
        self.buffer().len()
    }

    /// Events discarded because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Drain `exporter` into `sink` until `shutdown` flips to `true`.
///
/// Wakes on every `forward` and at least every `flush_interval`. Sink errors
/// are logged and the batch is discarded.
pub fn spawn_exporter(
    exporter: Arc<TelemetryExporter>,
    sink: Arc<dyn TelemetrySink>,
    batch_size: usize,
    flush_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let stopping = tokio::select! {
                _ = exporter.notify.notified() => false,
                _ = tokio::time::sleep(flush_interval) => false,
                changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
            };
            loop {
                let batch = exporter.drain(batch_size.max(1));
                if batch.is_empty() {
                    break;
                }
                let n = batch.len();
                if let Err(err) = sink.send(batch).await {
                    warn!(error = %err, events = n, "telemetry sink rejected batch; dropping");
                }
            }
            if stopping {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(n: u32) -> TelemetryEvent {
        TelemetryEvent {
            correlation_id: format!("dep-{n}"),
            kind: "ring.failed".into(),
            payload: serde_json::json!({ "n": n }),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn overflow_drops_oldest() {
        let exporter = TelemetryExporter::new(2);
        exporter.forward(event(1));
        exporter.forward(event(2));
        exporter.forward(event(3));

        assert_eq!(exporter.dropped(), 1);
        let ids: Vec<String> = exporter.drain(10).into_iter().map(|e| e.correlation_id).collect();
        assert_eq!(ids, vec!["dep-2", "dep-3"]);
        assert_eq!(exporter.pending(), 0);
    }

    struct Collect(Mutex<Vec<TelemetryEvent>>);

    #[async_trait]
    impl TelemetrySink for Collect {
        async fn send(&self, batch: Vec<TelemetryEvent>) -> Result<()> {
            self.0.lock().unwrap().extend(batch);
            Ok(())
        }
    }

    #[tokio::test]
    async fn background_task_drains_until_shutdown() {
        let exporter = Arc::new(TelemetryExporter::new(16));
        let sink = Arc::new(Collect(Mutex::new(Vec::new())));
        let (tx, rx) = watch::channel(false);
        let task = spawn_exporter(
            exporter.clone(),
            sink.clone(),
            4,
            Duration::from_millis(10),
            rx,
        );

        for n in 0..6 {
            exporter.forward(event(n));
        }
        tx.send(true).unwrap();
        task.await.unwrap();

        assert_eq!(sink.0.lock().unwrap().len(), 6);
        assert_eq!(exporter.pending(), 0);
    }
}
