use crate::gate::view::MainchainView;
use crate::gate::{GateFacts, GateObservation, GateState, GateThresholds};
use crate::ledger::keys::{
    MAINCHAIN_DUMP_COMPLETE, MAINCHAIN_RESEED_COMPLETE, MAINCHAIN_SIDECHAIN_BALANCE,
    MAINCHAIN_SNAPSHOT_HASH, MAINCHAIN_SNAPSHOT_TRIGGER,
};
use crate::ledger::CompletionLedger;
use crate::pipeline::error::is_transient;
use crate::pipeline::stage::StageProgress;
use crate::process::ProcessSupervisor;
use crate::runtime::config::SnapshotTarget;
use anyhow::{Context, Result};
use bitcoin::Amount;
use std::path::PathBuf;
use std::sync::Arc;

const TARGET: &str = "orchestrator::mainchain";
/// Verification progress above which the daemon counts as synced.
const SYNCED_PROGRESS: f64 = 0.99999;
/// While syncing, heights are only reported this close to the snapshot.
const NEAR_SNAPSHOT_WINDOW: u64 = 7;

#[derive(Debug, Clone)]
pub struct MainchainGateSettings {
    pub container: String,
    pub target: SnapshotTarget,
    /// Sidechains whose locked balance is summed into the balance commitment.
    pub sidechain_ids: Vec<String>,
    /// Dump the daemon writes once triggered.
    pub artifact: PathBuf,
    pub debug: bool,
}

pub struct MainchainGate {
    view: Arc<dyn MainchainView>,
    supervisor: ProcessSupervisor,
    ledger: CompletionLedger,
    settings: MainchainGateSettings,
}

impl MainchainGate {
    pub fn new(
        view: Arc<dyn MainchainView>,
        supervisor: ProcessSupervisor,
        ledger: CompletionLedger,
        settings: MainchainGateSettings,
    ) -> Self {
        Self {
            view,
            supervisor,
            ledger,
            settings,
        }
    }

    fn thresholds(&self) -> GateThresholds {
        GateThresholds {
            capture_height: self.settings.target.snapshot_height(),
            confirmation_height: self.settings.target.confirmation_height(),
        }
    }

    fn facts(&self) -> Result<GateFacts> {
        Ok(GateFacts {
            commitment_recorded: self.ledger.is_complete(MAINCHAIN_SNAPSHOT_HASH)?
                && self.ledger.is_complete(MAINCHAIN_SIDECHAIN_BALANCE)?,
            trigger_sent: self.ledger.is_complete(MAINCHAIN_SNAPSHOT_TRIGGER)?,
            artifact_ready: self.artifact_ready()?,
        })
    }

    fn artifact_ready(&self) -> Result<bool> {
        Ok(self.ledger.is_complete(MAINCHAIN_DUMP_COMPLETE)? && self.settings.artifact.is_file())
    }

    pub async fn poll(&self) -> Result<StageProgress> {
        let container = self.settings.container.as_str();
        let thresholds = self.thresholds();
        let facts = self.facts()?;
        let mut state = GateState::resume(&facts);
        let mut observation = GateObservation {
            height: 0,
            commitment_recorded: facts.commitment_recorded,
            trigger_sent: facts.trigger_sent,
            artifact_ready: facts.artifact_ready,
        };

        if state != GateState::SnapshotComplete {
            self.supervisor.ensure_running(container).await?;

            if !self.ledger.is_complete(MAINCHAIN_RESEED_COMPLETE)? {
                tracing::info!(target: TARGET, container, "waiting for the daemon to complete reseeding");
                return Ok(StageProgress::waiting());
            }
        }

        let mut report_distance = true;
        if matches!(state, GateState::Syncing | GateState::AwaitingConfirmation) {
            let status = match self.view.sync_status().await {
                Ok(status) => status,
                Err(err) if is_transient(&err) => {
                    tracing::info!(target: TARGET, container, error = %err, "waiting for RPC to be ready");
                    return Ok(StageProgress::waiting());
                }
                Err(err) => return Err(err),
            };
            observation.height = status.height;
            report_distance = status.verification_progress > SYNCED_PROGRESS
                || status.height + NEAR_SNAPSHOT_WINDOW >= thresholds.capture_height;
        }

        loop {
            let next = state.next(&observation, &thresholds);
            match state {
                GateState::Syncing | GateState::AwaitingConfirmation if next == state => {
                    let remaining = state.distance(&observation, &thresholds);
                    tracing::info!(
                        target: TARGET,
                        container,
                        state = %state,
                        height = observation.height,
                        snapshot_height = thresholds.capture_height,
                        confirmation_height = thresholds.confirmation_height,
                        remaining = remaining.unwrap_or_default(),
                        "waiting for mainchain height"
                    );
                    return Ok(StageProgress::Waiting {
                        distance: remaining.filter(|_| report_distance),
                    });
                }
                GateState::HeightReached => {
                    self.capture_commitments().await?;
                    observation.commitment_recorded = true;
                }
                GateState::Confirmed => {
                    self.confirm_and_trigger().await?;
                    observation.trigger_sent = true;
                    observation.artifact_ready = self.artifact_ready()?;
                }
                GateState::Snapshotting if next == state => {
                    tracing::info!(target: TARGET, container, "waiting for the daemon to finish the snapshot");
                    return Ok(StageProgress::waiting_for(0));
                }
                GateState::SnapshotComplete => {
                    tracing::info!(
                        target: TARGET,
                        container,
                        artifact = %self.settings.artifact.display(),
                        "mainchain snapshot written"
                    );
                    if !self.settings.debug {
                        self.supervisor.ensure_stopped(container).await?;
                    }
                    return Ok(StageProgress::complete());
                }
                _ => {}
            }
            state = state.next(&observation, &thresholds);
        }
    }

    async fn capture_commitments(&self) -> Result<()> {
        let height = self.settings.target.snapshot_height();
        let hash = self.view.block_hash(height).await?;

        let mut balance = Amount::ZERO;
        for sidechain_id in &self.settings.sidechain_ids {
            let locked = self.view.sidechain_balance(sidechain_id).await?;
            balance = balance
                .checked_add(locked)
                .context("sidechain balance sum overflows")?;
        }

        tracing::info!(
            target: TARGET,
            height,
            hash = %hash,
            balance_sat = balance.to_sat(),
            "snapshot height reached; capturing commitments"
        );
        // Only the hash is write-once. The balance is rewritten ahead of it,
        // so a removed hash marker recaptures both.
        let hash = hash.to_string();
        let hash_recorded = self.ledger.is_complete(MAINCHAIN_SNAPSHOT_HASH)?;
        if hash_recorded {
            self.ledger.verify_commitment(MAINCHAIN_SNAPSHOT_HASH, &hash)?;
        }
        self.ledger
            .replace(MAINCHAIN_SIDECHAIN_BALANCE, &balance.to_sat().to_string())?;
        if !hash_recorded {
            self.ledger.mark_complete(MAINCHAIN_SNAPSHOT_HASH, Some(&hash))?;
        }
        Ok(())
    }

    async fn confirm_and_trigger(&self) -> Result<()> {
        let target = self.settings.target;
        let block = self.view.block_at(target.snapshot_height()).await?;
        let hash = block.hash.to_string();
        self.ledger.verify_commitment(MAINCHAIN_SNAPSHOT_HASH, &hash)?;

        tracing::info!(
            target: TARGET,
            height = target.snapshot_height(),
            hash = %hash,
            depth = target.confirmation_depth(),
            "snapshot block confirmed; triggering snapshot"
        );
        self.ledger
            .mark_complete(MAINCHAIN_SNAPSHOT_TRIGGER, Some(&hash))?;
        self.supervisor.restart(&self.settings.container).await
    }
}
