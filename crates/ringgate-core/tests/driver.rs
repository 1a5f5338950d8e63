mod common;

use std::time::Duration;

use chrono::Utc;
use common::*;
use ringgate_core::approval::DecisionOutcome;
use ringgate_core::domain::{IntentStatus, RolloutError};
use ringgate_core::promotion::{PromotionDriver, RingPhase};
use tokio::sync::watch;

fn instant_ring(name: &str, target_count: u32) -> ringgate_core::RingDefinition {
    let mut ring = ring(name, target_count, &["sim"]);
    ring.min_dwell_secs = 0;
    ring
}

#[tokio::test]
async fn driver_runs_an_intent_to_completion() {
    let h = Harness::new(vec![instant_ring("canary", 100)]);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (driver, task) =
        PromotionDriver::spawn(h.controller.clone(), Duration::from_secs(3_600), shutdown_rx);

    let mut request = submit_request("unused", &["canary"], low_risk_evidence());
    request.correlation_id = None;
    let intent = driver.submit(request).await.expect("submit");
    let corr = intent.correlation_id().to_string();
    assert!(!corr.is_empty());
    assert_eq!(intent.current_phase(), RingPhase::Observing);

    h.reconcile("canary", Utc::now()).await;
    driver.notify().await.expect("notify");

    let mut status = IntentStatus::InProgress;
    for _ in 0..200 {
        status = h.intent(&corr).await.status;
        if status == IntentStatus::Completed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, IntentStatus::Completed);

    shutdown_tx.send(true).expect("signal shutdown");
    task.await.expect("driver task");
    let after = driver
        .submit(submit_request("late", &["canary"], low_risk_evidence()))
        .await;
    assert!(matches!(after, Err(RolloutError::DriverStopped)));
}

#[tokio::test]
async fn driver_serializes_requests_per_intent() {
    let h = Harness::new(vec![instant_ring("canary", 5_000)]);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let (driver, _task) =
        PromotionDriver::spawn(h.controller.clone(), Duration::from_secs(3_600), shutdown_rx);

    let intent = driver
        .submit(submit_request("dep-q", &["canary"], high_risk_evidence()))
        .await
        .expect("submit");
    assert_eq!(intent.current_phase(), RingPhase::AwaitingApproval);

    let approve = driver.clone();
    let cancel = driver.clone();
    let (approved, cancelled) = tokio::join!(
        approve.decide(decision("dep-q", "canary", DecisionOutcome::Approved, Utc::now())),
        cancel.cancel("dep-q", "oncall", "change freeze"),
    );

    // Whichever ran first, the second saw its result, never a torn state.
    let final_intent = h.intent("dep-q").await;
    match (approved, cancelled) {
        (Ok(_), Ok(_)) => {
            assert_eq!(final_intent.status, IntentStatus::RolledBack);
            assert_eq!(h.plane("sim").rollback_executions(), 1);
        }
        (Err(_), Ok(_)) => {
            assert_eq!(final_intent.status, IntentStatus::Failed);
            assert_eq!(h.plane("sim").push_executions(), 0);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

async fn wait_for_idle(driver: &ringgate_core::DriverHandle) -> usize {
    for _ in 0..200 {
        if driver.active_workers() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    driver.active_workers()
}

#[tokio::test]
async fn idle_intent_workers_exit() {
    let h = Harness::new(vec![instant_ring("canary", 5_000)]);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let (driver, _task) =
        PromotionDriver::spawn(h.controller.clone(), Duration::from_secs(3_600), shutdown_rx);

    for n in 0..50 {
        let corr = format!("dep-{n}");
        driver
            .submit(submit_request(&corr, &["canary"], high_risk_evidence()))
            .await
            .expect("submit");
        driver
            .cancel(corr.as_str(), "oncall", "batch withdrawn")
            .await
            .expect("cancel");
    }
    assert_eq!(wait_for_idle(&driver).await, 0);

    // A drained intent gets a fresh worker on its next request.
    let intent = driver
        .submit(submit_request("dep-late", &["canary"], high_risk_evidence()))
        .await
        .expect("submit");
    assert_eq!(intent.current_phase(), RingPhase::AwaitingApproval);
    assert_eq!(wait_for_idle(&driver).await, 0);

    let approved = driver
        .decide(decision("dep-late", "canary", DecisionOutcome::Approved, Utc::now()))
        .await
        .expect("decide");
    assert_eq!(approved.current_phase(), RingPhase::Observing);
    assert_eq!(wait_for_idle(&driver).await, 0);
    assert_eq!(h.intent("dep-0").await.status, IntentStatus::Failed);
}
