//! Event-driven executor around the controller.
//!
//! Requests for one intent are queued on that intent's own channel and
//! handled in order by a dedicated task; a periodic tick sweeps observing
//! intents and stalled approvals.
//!
//! An intent's task lives only while it has requests outstanding. The next
//! request after it drains starts a fresh one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::controller::{PromotionController, SubmitIntent};
use crate::approval::Decision;
use crate::domain::{CorrelationId, DeploymentIntent, Result, RolloutError};
use crate::metrics::METRICS;
use crate::risk::ArtifactEvidence;

const QUEUE_DEPTH: usize = 64;

type Reply = oneshot::Sender<Result<DeploymentIntent>>;

/// Requests accepted by the driver.
#[derive(Debug)]
pub enum ControllerEvent {
    Submit {
        request: SubmitIntent,
        reply: Reply,
    },
    Decision {
        decision: Decision,
        reply: Reply,
    },
    Cancel {
        correlation_id: String,
        operator: String,
        reason: String,
        reply: Reply,
    },
    Resubmit {
        correlation_id: String,
        evidence: Option<ArtifactEvidence>,
        submitted_by: String,
        reply: Reply,
    },
    /// Run an observation sweep now
    ObservationTick,
}

impl ControllerEvent {
    fn correlation_id(&self) -> Option<&str> {
        match self {
            Self::Submit { request, .. } => request.correlation_id.as_ref().map(|c| c.as_str()),
            Self::Decision { decision, .. } => Some(&decision.intent_id),
            Self::Cancel { correlation_id, .. } | Self::Resubmit { correlation_id, .. } => {
                Some(correlation_id)
            }
            Self::ObservationTick => None,
        }
    }
}

/// Cloneable front door to a running driver.
#[derive(Debug, Clone)]
pub struct DriverHandle {
    tx: mpsc::Sender<ControllerEvent>,
    live: Arc<AtomicUsize>,
}

impl DriverHandle {
    async fn request(
        &self,
        build: impl FnOnce(Reply) -> ControllerEvent,
    ) -> Result<DeploymentIntent> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| RolloutError::DriverStopped)?;
        rx.await.map_err(|_| RolloutError::DriverStopped)?
    }

    pub async fn submit(&self, request: SubmitIntent) -> Result<DeploymentIntent> {
        self.request(|reply| ControllerEvent::Submit { request, reply })
            .await
    }

    pub async fn decide(&self, decision: Decision) -> Result<DeploymentIntent> {
        self.request(|reply| ControllerEvent::Decision { decision, reply })
            .await
    }

    pub async fn cancel(
        &self,
        correlation_id: impl Into<String>,
        operator: impl Into<String>,
        reason: impl Into<String>,
    ) -> Result<DeploymentIntent> {
        let (correlation_id, operator, reason) =
            (correlation_id.into(), operator.into(), reason.into());
        self.request(|reply| ControllerEvent::Cancel {
            correlation_id,
            operator,
            reason,
            reply,
        })
        .await
    }

    pub async fn resubmit(
        &self,
        correlation_id: impl Into<String>,
        evidence: Option<ArtifactEvidence>,
        submitted_by: impl Into<String>,
    ) -> Result<DeploymentIntent> {
        let (correlation_id, submitted_by) = (correlation_id.into(), submitted_by.into());
        self.request(|reply| ControllerEvent::Resubmit {
            correlation_id,
            evidence,
            submitted_by,
            reply,
        })
        .await
    }

    /// Per-intent tasks currently running.
    pub fn active_workers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Ask for an observation sweep without waiting for it.
    pub async fn notify(&self) -> Result<()> {
        self.tx
            .send(ControllerEvent::ObservationTick)
            .await
            .map_err(|_| RolloutError::DriverStopped)
    }
}

pub struct PromotionDriver;

impl PromotionDriver {
    /// Start the driver. It runs until `shutdown` flips to `true` or every
    /// handle is dropped.
    pub fn spawn(
        controller: Arc<PromotionController>,
        observe_interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> (DriverHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let live = Arc::new(AtomicUsize::new(0));
        let task = tokio::spawn(run(controller, rx, observe_interval, shutdown, live.clone()));
        (DriverHandle { tx, live }, task)
    }
}

/// Queue of one intent's task and the requests it has not finished yet.
struct IntentWorker {
    tx: mpsc::Sender<ControllerEvent>,
    outstanding: usize,
}

async fn run(
    controller: Arc<PromotionController>,
    mut rx: mpsc::Receiver<ControllerEvent>,
    observe_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    live: Arc<AtomicUsize>,
) {
    let mut workers: HashMap<String, IntentWorker> = HashMap::new();
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<String>();
    let mut sweep: Option<JoinHandle<()>> = None;
    let mut ticker = tokio::time::interval(observe_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(?observe_interval, "promotion driver started");

    loop {
        let event = tokio::select! {
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
            _ = ticker.tick() => ControllerEvent::ObservationTick,
            Some(done) = done_rx.recv() => {
                let drained = workers.get_mut(&done).is_some_and(|w| {
                    w.outstanding = w.outstanding.saturating_sub(1);
                    w.outstanding == 0
                });
                if drained {
                    // Dropping the sender lets the task finish.
                    workers.remove(&done);
                }
                continue;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };

        let event = match event {
            ControllerEvent::ObservationTick => {
                if sweep.as_ref().is_some_and(|s| !s.is_finished()) {
                    debug!("previous observation sweep still running; skipping");
                } else {
                    sweep = Some(tokio::spawn(observation_sweep(controller.clone())));
                }
                continue;
            }
            ControllerEvent::Submit { mut request, reply } if request.correlation_id.is_none() => {
                request.correlation_id = Some(CorrelationId::generate());
                ControllerEvent::Submit { request, reply }
            }
            other => other,
        };

        let Some(correlation_id) = event.correlation_id().map(str::to_string) else {
            continue;
        };
        let worker = workers.entry(correlation_id.clone()).or_insert_with(|| IntentWorker {
            tx: spawn_worker(
                controller.clone(),
                correlation_id.clone(),
                done_tx.clone(),
                live.clone(),
            ),
            outstanding: 0,
        });
        worker.outstanding += 1;
        if let Err(mpsc::error::SendError(event)) = worker.tx.send(event).await {
            warn!(correlation_id, "intent worker gone; dropping request");
            workers.remove(&correlation_id);
            reply_stopped(event);
        }
    }

    drop(workers);
    if let Some(sweep) = sweep {
        sweep.await.ok();
    }
    info!("promotion driver stopped");
}

fn spawn_worker(
    controller: Arc<PromotionController>,
    correlation_id: String,
    done: mpsc::UnboundedSender<String>,
    live: Arc<AtomicUsize>,
) -> mpsc::Sender<ControllerEvent> {
    let (tx, mut rx) = mpsc::channel::<ControllerEvent>(QUEUE_DEPTH);
    live.fetch_add(1, Ordering::SeqCst);
    tokio::spawn(async move {
        debug!(correlation_id, "intent worker started");
        while let Some(event) = rx.recv().await {
            handle(&controller, event).await;
            // The driver may already be gone during shutdown.
            done.send(correlation_id.clone()).ok();
        }
        live.fetch_sub(1, Ordering::SeqCst);
        debug!(correlation_id, "intent worker stopped");
    });
    tx
}

async fn handle(controller: &PromotionController, event: ControllerEvent) {
    let now = Utc::now();
    let (reply, result) = match event {
        ControllerEvent::Submit { request, reply } => {
            (reply, controller.submit(request, now).await)
        }
        ControllerEvent::Decision { decision, reply } => {
            (reply, controller.record_decision(decision, now).await)
        }
        ControllerEvent::Cancel {
            correlation_id,
            operator,
            reason,
            reply,
        } => (
            reply,
            controller
                .cancel(&correlation_id, &operator, &reason, now)
                .await,
        ),
        ControllerEvent::Resubmit {
            correlation_id,
            evidence,
            submitted_by,
            reply,
        } => (
            reply,
            controller
                .resubmit(&correlation_id, evidence, &submitted_by, now)
                .await,
        ),
        ControllerEvent::ObservationTick => return,
    };
    if let Err(err) = &result {
        warn!(error = %err, "controller request failed");
    }
    // The requester may have given up waiting.
    reply.send(result).ok();
}

fn reply_stopped(event: ControllerEvent) {
    let reply = match event {
        ControllerEvent::Submit { reply, .. }
        | ControllerEvent::Decision { reply, .. }
        | ControllerEvent::Cancel { reply, .. }
        | ControllerEvent::Resubmit { reply, .. } => reply,
        ControllerEvent::ObservationTick => return,
    };
    reply.send(Err(RolloutError::DriverStopped)).ok();
}

async fn observation_sweep(controller: Arc<PromotionController>) {
    let now = Utc::now();
    match controller.observe_all(now).await {
        Ok(observed) => debug!(observed = observed.len(), "observation sweep done"),
        Err(err) => warn!(error = %err, "observation sweep failed"),
    }
    match controller.escalate_stalled(now).await {
        Ok(escalated) if !escalated.is_empty() => {
            info!(count = escalated.len(), "stalled approvals escalated")
        }
        Ok(_) => {}
        Err(err) => warn!(error = %err, "approval escalation sweep failed"),
    }
    METRICS.flush();
}
