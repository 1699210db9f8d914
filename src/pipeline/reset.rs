//! Operator-invoked recovery flows, applied before the driver starts.

use crate::ledger::keys::{RESEED_RESET_KEYS, SNAPSHOT_RESET_KEYS};
use crate::ledger::CompletionLedger;
use crate::process::{ContainerStatus, ProcessSupervisor, SupervisorError};
use crate::runtime::layout::SnapshotLayout;
use anyhow::{Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

const TARGET: &str = "orchestrator";

/// Forgets the current snapshot: every orchestrator marker and commitment,
/// the snapshot directories and every derived file.
///
/// Markers go first so that an interrupted reset never leaves a marker whose
/// artifact is already gone.
pub fn reset_snapshot(ledger: &CompletionLedger, layout: &SnapshotLayout) -> Result<()> {
    tracing::warn!(
        target: TARGET,
        root = %layout.root().display(),
        "new snapshot requested; clearing markers, commitments and artifacts"
    );
    ledger.reset(SNAPSHOT_RESET_KEYS)?;

    for dir in layout.snapshot_dirs() {
        remove_dir(&dir)?;
    }
    for file in layout.derived_files() {
        remove_file(&file)?;
    }
    Ok(())
}

/// Clears the daemons' reseed markers and bounces both containers so that
/// they reseed on start-up.
pub async fn reset_reseed(
    ledger: &CompletionLedger,
    supervisor: &ProcessSupervisor,
    containers: &[String],
) -> Result<()> {
    tracing::warn!(target: TARGET, "reseed requested; clearing reseed markers");
    ledger.reset(RESEED_RESET_KEYS)?;

    for container in containers {
        match supervisor.status(container).await? {
            ContainerStatus::Running => {
                tracing::info!(target: TARGET, container = %container, "restarting container for reseed");
                supervisor.restart(container).await?;
            }
            ContainerStatus::Stopped => {
                tracing::info!(target: TARGET, container = %container, "starting container for reseed");
                supervisor.ensure_running(container).await?;
            }
            ContainerStatus::NotFound => {
                return Err(SupervisorError::NotFound {
                    name: container.clone(),
                }
                .into())
            }
        }
    }
    Ok(())
}

fn remove_dir(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => {
            tracing::info!(target: TARGET, path = %path.display(), "removed directory");
            Ok(())
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("failed to remove {}", path.display())),
    }
}

fn remove_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            tracing::info!(target: TARGET, path = %path.display(), "removed file");
            Ok(())
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("failed to remove {}", path.display())),
    }
}
