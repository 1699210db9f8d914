use crate::gate::view::SidechainView;
use crate::gate::{GateFacts, GateObservation, GateState, GateThresholds};
use crate::ledger::keys::{
    MAINCHAIN_SNAPSHOT_HASH, SIDECHAIN_RESEED_COMPLETE, SIDECHAIN_SNAPSHOT_BLOCK_ID,
    SIDECHAIN_SNAPSHOT_TRIGGER,
};
use crate::ledger::CompletionLedger;
use crate::pipeline::error::is_transient;
use crate::pipeline::stage::StageProgress;
use crate::process::ProcessSupervisor;
use crate::runtime::config::SnapshotTarget;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

const TARGET: &str = "orchestrator::sidechain";

/// Payload of the sidechain trigger marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidechainTrigger {
    pub block_id: String,
    pub height: u64,
}

#[derive(Debug, Clone)]
pub struct SidechainGateSettings {
    pub container: String,
    pub target: SnapshotTarget,
    /// Dump the node writes when asked.
    pub artifact: PathBuf,
}

/// Gate over the sidechain's view of mainchain references. The sidechain
/// sees a mainchain block `reference_delay` blocks after the mainchain does,
/// so confirmation is reached at `confirmation_height - reference_delay`.
pub struct SidechainGate {
    view: Arc<dyn SidechainView>,
    supervisor: ProcessSupervisor,
    ledger: CompletionLedger,
    settings: SidechainGateSettings,
}

impl SidechainGate {
    pub fn new(
        view: Arc<dyn SidechainView>,
        supervisor: ProcessSupervisor,
        ledger: CompletionLedger,
        settings: SidechainGateSettings,
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
            confirmation_height: self.settings.target.reference_target(),
        }
    }

    fn facts(&self) -> Result<GateFacts> {
        let trigger_sent = self.ledger.is_complete(SIDECHAIN_SNAPSHOT_TRIGGER)?;
        Ok(GateFacts {
            commitment_recorded: self.ledger.is_complete(SIDECHAIN_SNAPSHOT_BLOCK_ID)?,
            trigger_sent,
            artifact_ready: trigger_sent && self.settings.artifact.is_file(),
        })
    }

    pub async fn poll(&self) -> Result<StageProgress> {
        let container = self.settings.container.as_str();

        if !self.ledger.is_complete(MAINCHAIN_SNAPSHOT_HASH)? {
            tracing::info!(target: TARGET, "waiting for the mainchain snapshot hash");
            return Ok(StageProgress::waiting());
        }

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

            if !self.ledger.is_complete(SIDECHAIN_RESEED_COMPLETE)? {
                tracing::info!(target: TARGET, container, "waiting for the node to complete reseeding");
                return Ok(StageProgress::waiting());
            }

            if let Err(err) = self.view.block_number().await {
                if is_transient(&err) {
                    tracing::info!(target: TARGET, container, error = %err, "waiting for RPC to be ready");
                    return Ok(StageProgress::waiting());
                }
                return Err(err);
            }
        }

        if matches!(state, GateState::Syncing | GateState::AwaitingConfirmation) {
            observation.height = self.view.best_reference_height().await?;
        }

        let mut dump_issued = false;
        loop {
            let next = state.next(&observation, &thresholds);
            match state {
                GateState::Syncing if next == state => {
                    let remaining = state.distance(&observation, &thresholds);
                    tracing::info!(
                        target: TARGET,
                        container,
                        reference_height = observation.height,
                        snapshot_height = thresholds.capture_height,
                        reference_target = thresholds.confirmation_height,
                        "waiting for the snapshot reference"
                    );
                    return Ok(StageProgress::Waiting {
                        distance: remaining,
                    });
                }
                GateState::AwaitingConfirmation if next == state => {
                    self.log_confirmation_progress(&observation, &thresholds)
                        .await?;
                    return Ok(StageProgress::Waiting {
                        distance: state.distance(&observation, &thresholds),
                    });
                }
                GateState::HeightReached => {
                    self.capture_commitment().await?;
                    observation.commitment_recorded = true;
                }
                GateState::Confirmed => {
                    let trigger = self.confirm().await?;
                    self.write_trigger(&trigger)?;
                    observation.trigger_sent = true;
                    self.dump(&trigger).await?;
                    dump_issued = true;
                    observation.artifact_ready = self.settings.artifact.is_file();
                }
                GateState::Snapshotting if next == state => {
                    if dump_issued {
                        tracing::warn!(
                            target: TARGET,
                            container,
                            artifact = %self.settings.artifact.display(),
                            "dump acknowledged but the artifact is missing"
                        );
                        return Ok(StageProgress::waiting_for(0));
                    }
                    let trigger = self.read_trigger()?;
                    tracing::info!(target: TARGET, container, block_id = %trigger.block_id, "re-issuing dump");
                    self.dump(&trigger).await?;
                    dump_issued = true;
                    observation.artifact_ready = self.settings.artifact.is_file();
                }
                GateState::SnapshotComplete => {
                    let trigger = self.read_trigger()?;
                    tracing::info!(
                        target: TARGET,
                        container,
                        height = trigger.height,
                        artifact = %self.settings.artifact.display(),
                        "sidechain snapshot written"
                    );
                    return Ok(StageProgress::complete_with(trigger.height.to_string()));
                }
                _ => {}
            }
            state = state.next(&observation, &thresholds);
        }
    }

    async fn capture_commitment(&self) -> Result<()> {
        let height = self.settings.target.snapshot_height();
        let reference = self.view.reference_at(height).await?;
        self.ledger
            .verify_commitment(MAINCHAIN_SNAPSHOT_HASH, &reference.mainchain_hash)?;

        tracing::info!(
            target: TARGET,
            mainchain_height = height,
            block_id = %reference.sidechain_block_id,
            "snapshot reference reached; capturing sidechain block"
        );
        self.ledger
            .commit(SIDECHAIN_SNAPSHOT_BLOCK_ID, &reference.sidechain_block_id)
    }

    async fn confirm(&self) -> Result<SidechainTrigger> {
        let target = self.settings.target;
        let reference = self.view.reference_at(target.snapshot_height()).await?;
        self.ledger
            .verify_commitment(MAINCHAIN_SNAPSHOT_HASH, &reference.mainchain_hash)?;
        self.ledger
            .verify_commitment(SIDECHAIN_SNAPSHOT_BLOCK_ID, &reference.sidechain_block_id)?;

        let height = self
            .view
            .block_height_by_id(&reference.sidechain_block_id)
            .await?;
        tracing::info!(
            target: TARGET,
            height,
            block_id = %reference.sidechain_block_id,
            reference_depth = target.confirmation_depth() - target.reference_delay(),
            "sidechain snapshot block confirmed"
        );

        Ok(SidechainTrigger {
            block_id: reference.sidechain_block_id,
            height,
        })
    }

    fn write_trigger(&self, trigger: &SidechainTrigger) -> Result<()> {
        if let Some(dir) = self.settings.artifact.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let payload = serde_json::to_string(trigger).context("failed to encode trigger")?;
        self.ledger
            .mark_complete(SIDECHAIN_SNAPSHOT_TRIGGER, Some(&payload))
    }

    fn read_trigger(&self) -> Result<SidechainTrigger> {
        let path = self.ledger.path_for(SIDECHAIN_SNAPSHOT_TRIGGER);
        let payload = self
            .ledger
            .read_payload(SIDECHAIN_SNAPSHOT_TRIGGER)?
            .with_context(|| format!("trigger {} has no payload", path.display()))?;
        serde_json::from_str(&payload)
            .with_context(|| format!("trigger {} is malformed; remove it to retrigger", path.display()))
    }

    async fn dump(&self, trigger: &SidechainTrigger) -> Result<()> {
        tracing::info!(
            target: TARGET,
            block_id = %trigger.block_id,
            height = trigger.height,
            artifact = %self.settings.artifact.display(),
            "requesting sidechain dump"
        );
        self.view
            .dump(&trigger.block_id, &self.settings.artifact)
            .await
    }

    async fn log_confirmation_progress(
        &self,
        observation: &GateObservation,
        thresholds: &GateThresholds,
    ) -> Result<()> {
        let block_id = self
            .ledger
            .read_payload(SIDECHAIN_SNAPSHOT_BLOCK_ID)?
            .context("sidechain block commitment vanished")?;
        let snapshot_height = self.view.block_height_by_id(&block_id).await?;
        let best_height = self.view.best_block_height().await?;

        tracing::info!(
            target: TARGET,
            container = %self.settings.container,
            snapshot_height,
            best_height,
            reference_height = observation.height,
            remaining = thresholds
                .confirmation_height
                .saturating_sub(observation.height),
            "waiting for reference confirmations"
        );
        Ok(())
    }
}
