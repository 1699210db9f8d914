//! Read-only views of the two chains as seen by the confirmation gates.
//!
//! The RPC clients in [`crate::rpc`] implement these; tests substitute
//! scripted fakes.

use anyhow::Result;
use bitcoin::{Amount, BlockHash};
use futures::future::BoxFuture;
use std::path::Path;

/// Mainchain progress as reported by `getblockchaininfo` and `getblockcount`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncStatus {
    pub height: u64,
    pub verification_progress: f64,
}

/// Verbose block summary returned by `getblock`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSummary {
    pub hash: BlockHash,
    pub height: u64,
    pub confirmations: i64,
}

/// Sidechain block that carries the reference to a given mainchain block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockReference {
    pub mainchain_hash: String,
    pub sidechain_block_id: String,
}

pub trait MainchainView: Send + Sync {
    fn sync_status(&self) -> BoxFuture<'_, Result<SyncStatus>>;

    fn block_hash(&self, height: u64) -> BoxFuture<'_, Result<BlockHash>>;

    fn block_at(&self, height: u64) -> BoxFuture<'_, Result<BlockSummary>>;

    fn sidechain_balance<'a>(&'a self, sidechain_id: &'a str) -> BoxFuture<'a, Result<Amount>>;
}

pub trait SidechainView: Send + Sync {
    /// Current sidechain height via the Ethereum JSON-RPC surface. Succeeds
    /// once the node accepts RPC traffic.
    fn block_number(&self) -> BoxFuture<'_, Result<u64>>;

    fn best_reference_height(&self) -> BoxFuture<'_, Result<u64>>;

    fn reference_at(&self, mainchain_height: u64) -> BoxFuture<'_, Result<BlockReference>>;

    fn block_height_by_id<'a>(&'a self, block_id: &'a str) -> BoxFuture<'a, Result<u64>>;

    fn best_block_height(&self) -> BoxFuture<'_, Result<u64>>;

    /// Asks the node to dump its state at `block_id` into `destination`.
    /// Re-issuing the dump overwrites the previous artifact.
    fn dump<'a>(&'a self, block_id: &'a str, destination: &'a Path) -> BoxFuture<'a, Result<()>>;
}
