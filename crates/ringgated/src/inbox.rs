//! Operator command inbox.
//!
//! Each `*.json` file dropped into the inbox directory holds one command.
//! Writers should create the file under another name and rename it into
//! place. Handled files are renamed to `<name>.json.done`, or
//! `<name>.json.failed` when the command could not be read or was refused.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use ringgate_core::obs::IntentSpan;
use ringgate_core::{ArtifactEvidence, Decision, DeploymentIntent, DriverHandle, SubmitIntent};
use serde::Deserialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// One operator request, tagged by `command`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum OperatorCommand {
    Submit(SubmitIntent),
    Decide(Decision),
    Cancel {
        correlation_id: String,
        operator: String,
        reason: String,
    },
    Resubmit {
        correlation_id: String,
        #[serde(default)]
        evidence: Option<ArtifactEvidence>,
        submitted_by: String,
    },
}

impl OperatorCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Submit(_) => "submit",
            Self::Decide(_) => "decide",
            Self::Cancel { .. } => "cancel",
            Self::Resubmit { .. } => "resubmit",
        }
    }

    pub async fn apply(self, driver: &DriverHandle) -> ringgate_core::Result<DeploymentIntent> {
        match self {
            Self::Submit(request) => driver.submit(request).await,
            Self::Decide(decision) => driver.decide(decision).await,
            Self::Cancel {
                correlation_id,
                operator,
                reason,
            } => driver.cancel(correlation_id, operator, reason).await,
            Self::Resubmit {
                correlation_id,
                evidence,
                submitted_by,
            } => driver.resubmit(correlation_id, evidence, submitted_by).await,
        }
    }
}

pub async fn read_command(path: &Path) -> Result<OperatorCommand> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading command {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing command {}", path.display()))
}

fn handled_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

async fn pending_commands(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("listing inbox {}", dir.display()))?;
    let mut pending = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            pending.push(path);
        }
    }
    pending.sort();
    Ok(pending)
}

/// Apply every pending command once, in file-name order. Returns how many
/// files were handled.
pub async fn drain_inbox(dir: &Path, driver: &DriverHandle) -> Result<usize> {
    let pending = pending_commands(dir).await?;
    for path in &pending {
        let outcome = match read_command(path).await {
            Ok(command) => {
                let name = command.name();
                command
                    .apply(driver)
                    .await
                    .map(|intent| (name, intent))
                    .with_context(|| format!("{name} from {}", path.display()))
            }
            Err(err) => Err(err),
        };
        let suffix = match outcome {
            Ok((name, intent)) => {
                let _span = IntentSpan::enter(intent.correlation_id().as_str());
                info!(
                    command = name,
                    status = ?intent.status,
                    phase = ?intent.current_phase(),
                    "operator command applied"
                );
                "done"
            }
            Err(err) => {
                error!(error = %format!("{err:#}"), "operator command refused");
                "failed"
            }
        };
        let target = handled_path(path, suffix);
        tokio::fs::rename(path, &target)
            .await
            .with_context(|| format!("moving {} to {}", path.display(), target.display()))?;
    }
    Ok(pending.len())
}

/// Poll `dir` until shutdown.
pub async fn watch_inbox(
    dir: PathBuf,
    driver: DriverHandle,
    poll: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Err(err) = tokio::fs::create_dir_all(&dir).await {
        error!(inbox = %dir.display(), error = %err, "cannot create inbox; commands disabled");
        return;
    }
    info!(inbox = %dir.display(), ?poll, "watching operator inbox");
    let mut ticker = tokio::time::interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => match drain_inbox(&dir, &driver).await {
                Ok(0) => {}
                Ok(handled) => debug!(handled, "inbox drained"),
                Err(err) => warn!(error = %format!("{err:#}"), "inbox pass failed"),
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("inbox watcher stopped");
}
