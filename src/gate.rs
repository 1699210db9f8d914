//! Confirmation gates: per-chain state machines that decide when a snapshot
//! height is safe to act on.
//!
//! The state is never cached between polls. Each poll re-derives it from the
//! completion ledger with [`GateState::resume`] and then advances it with the
//! pure [`GateState::next`], performing the side effect attached to each
//! transition (capture, reassert, trigger) before moving on.

pub mod mainchain;
pub mod sidechain;
pub mod view;

use std::fmt;

pub use mainchain::{MainchainGate, MainchainGateSettings};
pub use sidechain::{SidechainGate, SidechainGateSettings, SidechainTrigger};
pub use view::{BlockReference, BlockSummary, MainchainView, SidechainView, SyncStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Syncing,
    HeightReached,
    AwaitingConfirmation,
    Confirmed,
    Snapshotting,
    SnapshotComplete,
}

/// Heights at which a gate acts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateThresholds {
    /// Height at which the commitment is captured.
    pub capture_height: u64,
    /// Height at which the captured commitment counts as confirmed.
    pub confirmation_height: u64,
}

/// What the gate knows during a single poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GateObservation {
    pub height: u64,
    pub commitment_recorded: bool,
    pub trigger_sent: bool,
    pub artifact_ready: bool,
}

/// Durable facts read from the ledger at the start of a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GateFacts {
    pub commitment_recorded: bool,
    pub trigger_sent: bool,
    pub artifact_ready: bool,
}

impl GateState {
    pub fn resume(facts: &GateFacts) -> Self {
        if facts.trigger_sent && facts.artifact_ready {
            GateState::SnapshotComplete
        } else if facts.trigger_sent {
            GateState::Snapshotting
        } else if facts.commitment_recorded {
            GateState::AwaitingConfirmation
        } else {
            GateState::Syncing
        }
    }

    pub fn next(self, observation: &GateObservation, thresholds: &GateThresholds) -> Self {
        match self {
            GateState::Syncing if observation.height >= thresholds.capture_height => {
                GateState::HeightReached
            }
            GateState::HeightReached if observation.commitment_recorded => {
                GateState::AwaitingConfirmation
            }
            GateState::AwaitingConfirmation
                if observation.height >= thresholds.confirmation_height =>
            {
                GateState::Confirmed
            }
            GateState::Confirmed if observation.trigger_sent => GateState::Snapshotting,
            GateState::Snapshotting if observation.artifact_ready => GateState::SnapshotComplete,
            state => state,
        }
    }

    /// Blocks left before the next height-driven transition, if one applies.
    pub fn distance(self, observation: &GateObservation, thresholds: &GateThresholds) -> Option<u64> {
        match self {
            GateState::Syncing => Some(thresholds.capture_height.saturating_sub(observation.height)),
            GateState::AwaitingConfirmation => Some(
                thresholds
                    .confirmation_height
                    .saturating_sub(observation.height),
            ),
            GateState::HeightReached | GateState::Confirmed | GateState::Snapshotting => Some(0),
            GateState::SnapshotComplete => None,
        }
    }
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            GateState::Syncing => "syncing",
            GateState::HeightReached => "height-reached",
            GateState::AwaitingConfirmation => "awaiting-confirmation",
            GateState::Confirmed => "confirmed",
            GateState::Snapshotting => "snapshotting",
            GateState::SnapshotComplete => "snapshot-complete",
        };
        f.write_str(label)
    }
}
