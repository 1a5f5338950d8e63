//! ringgated - rollout control plane daemon
//!
//! Loads a TOML config, then runs the promotion driver, one reconciliation
//! worker per ring and connector, and the SIEM exporter until interrupted.
//! Intent files passed with `--intent` are submitted once everything is up;
//! later submissions, approval decisions, cancels and resubmissions arrive
//! through the `--inbox` directory.

mod inbox;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use ringgate_core::obs::IntentSpan;
use ringgate_core::{
    init_tracing, spawn_exporter, ComplianceBoard, ConnectorRegistry, CredentialResolver,
    DriverHandle, EnvCredentialResolver, EvidenceRecorder, LogFormat, PromotionController,
    PromotionDriver, ReconcileWorker, RolloutConfig, Stores, SubmitIntent, TelemetryExporter,
    TracingSink, METRICS,
};
use ringgate_state::fakes::MemoryEvidenceStore;
use ringgate_state::{EvidenceStore, JsonlEvidenceStore};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Level};

#[derive(Parser, Debug)]
#[command(name = "ringgated")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Progressive ring rollout daemon", long_about = None)]
struct Cli {
    /// Path to the TOML configuration
    #[arg(short, long, env = "RINGGATE_CONFIG", default_value = "ringgate.toml")]
    config: PathBuf,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json_logs: bool,

    /// Default level when RINGGATE_LOG / RUST_LOG are unset
    #[arg(long, default_value = "info")]
    log_level: Level,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,

    /// Deployment intent (JSON) to submit at startup; repeatable
    #[arg(long = "intent", value_name = "FILE")]
    intents: Vec<PathBuf>,

    /// Directory polled for operator command files
    #[arg(long, env = "RINGGATE_INBOX", value_name = "DIR")]
    inbox: Option<PathBuf>,

    /// Seconds between inbox polls
    #[arg(long, default_value_t = 5)]
    inbox_poll_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    init_tracing(format, cli.log_level);

    let config = RolloutConfig::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    info!(
        config = %cli.config.display(),
        rings = config.rings.len(),
        connectors = config.connectors.len(),
        "configuration loaded"
    );
    if cli.check {
        println!("{}: ok", cli.config.display());
        return Ok(());
    }

    let inbox = cli.inbox.map(|dir| (dir, Duration::from_secs(cli.inbox_poll_secs.max(1))));
    run(config, &cli.intents, inbox).await
}

async fn open_evidence(config: &RolloutConfig) -> Result<Arc<dyn EvidenceStore>> {
    match &config.evidence.path {
        Some(path) => {
            let store = JsonlEvidenceStore::open(path)
                .await
                .with_context(|| format!("opening evidence log {}", path.display()))?;
            info!(path = %path.display(), "evidence log opened");
            Ok(Arc::new(store))
        }
        None => {
            warn!("no evidence path configured; evidence is kept in memory only");
            Ok(Arc::new(MemoryEvidenceStore::new()))
        }
    }
}

async fn read_intent(path: &Path) -> Result<SubmitIntent> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading intent {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing intent {}", path.display()))
}

async fn submit_all(driver: &DriverHandle, paths: &[PathBuf]) {
    for path in paths {
        let request = match read_intent(path).await {
            Ok(request) => request,
            Err(err) => {
                error!(error = %format!("{err:#}"), "skipping intent");
                continue;
            }
        };
        match driver.submit(request).await {
            Ok(intent) => {
                let _span = IntentSpan::enter(intent.correlation_id().as_str());
                info!(
                    artifact = %intent.artifact(),
                    phase = ?intent.current_phase(),
                    score = ?intent.risk_score(),
                    "intent submitted"
                );
            }
            Err(err) => error!(path = %path.display(), error = %err, "intent rejected"),
        }
    }
}

/// Shared pieces wired together from the configuration.
struct ControlPlane {
    registry: Arc<ConnectorRegistry>,
    stores: Stores,
    board: Arc<ComplianceBoard>,
    recorder: EvidenceRecorder,
    controller: Arc<PromotionController>,
}

fn assemble(
    config: &RolloutConfig,
    evidence: Arc<dyn EvidenceStore>,
    exporter: Arc<TelemetryExporter>,
) -> Result<ControlPlane> {
    let resolver: Arc<dyn CredentialResolver> = Arc::new(EnvCredentialResolver::default());
    let registry = Arc::new(config.build_registry(resolver)?);
    let recorder = EvidenceRecorder::new(evidence, exporter);
    let stores = Stores::in_memory();
    let board = Arc::new(ComplianceBoard::new());
    let controller = Arc::new(PromotionController::new(
        config.ring_catalog()?,
        registry.clone(),
        stores.clone(),
        board.clone(),
        recorder.clone(),
        config.controller_settings()?,
    ));
    Ok(ControlPlane {
        registry,
        stores,
        board,
        recorder,
        controller,
    })
}

async fn run(
    config: RolloutConfig,
    intents: &[PathBuf],
    inbox: Option<(PathBuf, Duration)>,
) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let exporter = Arc::new(TelemetryExporter::new(config.telemetry.buffer_capacity));
    let mut tasks: Vec<JoinHandle<()>> = vec![spawn_exporter(
        exporter.clone(),
        Arc::new(TracingSink),
        config.telemetry.batch_size,
        config.telemetry.flush_interval(),
        shutdown_rx.clone(),
    )];

    let ControlPlane {
        registry,
        stores,
        board,
        recorder,
        controller,
    } = assemble(&config, open_evidence(&config).await?, exporter)?;

    let reader = Arc::new(controller.reader());
    let interval = config.reconcile_interval();
    for ring in &config.rings {
        for connector in &ring.connectors {
            let worker = ReconcileWorker::new(
                ring.clone(),
                registry.require(connector)?.clone(),
                reader.clone(),
                stores.drift.clone(),
                board.clone(),
                recorder.clone(),
                config.drift_policy(),
            );
            let shutdown = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                worker.run(interval, shutdown).await;
            }));
        }
    }

    let (driver, driver_task) =
        PromotionDriver::spawn(controller, config.observe_interval(), shutdown_rx.clone());
    tasks.push(driver_task);
    info!(workers = tasks.len() - 2, "ringgated running");

    submit_all(&driver, intents).await;
    if let Some((dir, poll)) = inbox {
        tasks.push(tokio::spawn(inbox::watch_inbox(
            dir,
            driver.clone(),
            poll,
            shutdown_rx.clone(),
        )));
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);
    for task in tasks {
        if let Err(err) = task.await {
            warn!(error = %err, "task ended abnormally");
        }
    }
    METRICS.flush();
    info!("ringgated stopped");
    Ok(())
}
