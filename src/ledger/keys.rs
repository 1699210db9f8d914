//! Names of every marker persisted in the state directory.
//!
//! Some markers are written by the chain daemons themselves (reseed and dump
//! completion); the orchestrator only ever reads those. Everything else is
//! owned by the orchestrator and is subject to the new-snapshot reset.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MarkerKey(&'static str);

impl MarkerKey {
    pub const fn new(file_name: &'static str) -> Self {
        Self(file_name)
    }

    /// File name of the marker inside the state directory.
    pub fn file_name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for MarkerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

// Written by the daemons.
pub const MAINCHAIN_RESEED_COMPLETE: MarkerKey = MarkerKey::new(".zend_reseed_complete");
pub const SIDECHAIN_RESEED_COMPLETE: MarkerKey = MarkerKey::new(".evmapp_reseed_complete");
pub const MAINCHAIN_DUMP_COMPLETE: MarkerKey = MarkerKey::new(".zend_snapshot_complete");

// Commitments.
pub const MAINCHAIN_SNAPSHOT_HASH: MarkerKey =
    MarkerKey::new(".orchestrator_zend_snapshot_hash");
pub const MAINCHAIN_SIDECHAIN_BALANCE: MarkerKey = MarkerKey::new(".zend_snapshot_scid_balance");
pub const SIDECHAIN_SNAPSHOT_BLOCK_ID: MarkerKey =
    MarkerKey::new(".orchestrator_evmapp_snapshot_block_id");

// Snapshot triggers. The mainchain daemon reads its trigger on start-up.
pub const MAINCHAIN_SNAPSHOT_TRIGGER: MarkerKey = MarkerKey::new(".zend_snapshot_block_hash");
pub const SIDECHAIN_SNAPSHOT_TRIGGER: MarkerKey = MarkerKey::new(".evmapp_snapshot_requested");

// Stage completion.
pub const MAINCHAIN_SNAPSHOT_COMPLETE: MarkerKey =
    MarkerKey::new(".orchestrator_zend_snapshot_complete");
pub const SIDECHAIN_SNAPSHOT_COMPLETE: MarkerKey = MarkerKey::new(".evmapp_snapshot_complete");
pub const SIDECHAIN_STAKES_COMPLETE: MarkerKey = MarkerKey::new(".evmapp_stakes_complete");
pub const MAINCHAIN_TRANSFORM_COMPLETE: MarkerKey = MarkerKey::new(".zend_to_horizen_complete");
pub const SIDECHAIN_TRANSFORM_COMPLETE: MarkerKey = MarkerKey::new(".setup_eon2_json_complete");
pub const CHECK_SIDECHAIN_ADDRESSES_COMPLETE: MarkerKey =
    MarkerKey::new(".check_addresses_balance_from_eon_complete");
pub const CHECK_MAINCHAIN_ADDRESSES_COMPLETE: MarkerKey =
    MarkerKey::new(".check_addresses_balance_from_zend_complete");
pub const CHECK_MAINCHAIN_TOTAL_COMPLETE: MarkerKey =
    MarkerKey::new(".check_total_balance_from_zend_complete");
pub const MAINCHAIN_MIGRATION_HASH_COMPLETE: MarkerKey =
    MarkerKey::new(".migrationhash_zend_complete");
pub const SIDECHAIN_MIGRATION_HASH_COMPLETE: MarkerKey =
    MarkerKey::new(".migrationhash_evmapp_complete");

/// Markers cleared by a new-snapshot reset, in the order they are removed.
pub const SNAPSHOT_RESET_KEYS: &[MarkerKey] = &[
    MAINCHAIN_SNAPSHOT_TRIGGER,
    MAINCHAIN_DUMP_COMPLETE,
    MAINCHAIN_SIDECHAIN_BALANCE,
    MAINCHAIN_SNAPSHOT_HASH,
    MAINCHAIN_SNAPSHOT_COMPLETE,
    SIDECHAIN_SNAPSHOT_BLOCK_ID,
    SIDECHAIN_SNAPSHOT_TRIGGER,
    SIDECHAIN_SNAPSHOT_COMPLETE,
    SIDECHAIN_STAKES_COMPLETE,
    MAINCHAIN_TRANSFORM_COMPLETE,
    SIDECHAIN_TRANSFORM_COMPLETE,
    CHECK_SIDECHAIN_ADDRESSES_COMPLETE,
    CHECK_MAINCHAIN_ADDRESSES_COMPLETE,
    CHECK_MAINCHAIN_TOTAL_COMPLETE,
    MAINCHAIN_MIGRATION_HASH_COMPLETE,
    SIDECHAIN_MIGRATION_HASH_COMPLETE,
];

/// Markers cleared by a reseed reset.
pub const RESEED_RESET_KEYS: &[MarkerKey] = &[MAINCHAIN_RESEED_COMPLETE, SIDECHAIN_RESEED_COMPLETE];
