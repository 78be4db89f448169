//! The stream request contract shared by the engine and chain adapters.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Block, BlockRef};

/// How many recent block refs a fork signal carries for re-anchoring.
pub const FORK_SIGNAL_DEPTH: usize = 10;

// ─── StreamRequest ────────────────────────────────────────────────────────────

/// A consumer's resume point.
///
/// `parent_hash`, when given, must match the hash of block `from - 1` as known
/// to the engine; otherwise the engine reports a fork instead of resuming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamRequest {
    /// First block to stream (inclusive).
    pub from: u64,
    /// Optional last block (inclusive); `None` = keep following the chain.
    pub to: Option<u64>,
    /// Expected hash of block `from - 1`.
    pub parent_hash: Option<String>,
}

impl StreamRequest {
    /// Request an unbounded stream starting at `from`.
    pub fn from_block(from: u64) -> Self {
        Self { from, to: None, parent_hash: None }
    }

    /// Set the end block (inclusive).
    pub fn to_block(mut self, to: u64) -> Self {
        self.to = Some(to);
        self
    }

    /// Anchor the request on the hash of block `from - 1`.
    pub fn parent_hash(mut self, hash: impl Into<String>) -> Self {
        self.parent_hash = Some(hash.into());
        self
    }
}

// ─── ForkSignal ───────────────────────────────────────────────────────────────

/// First-class fork notification — not an error path.
///
/// Carries the last [`FORK_SIGNAL_DEPTH`] blocks the engine actually has at or
/// near the requested point, most recent first, so the caller can pick a new
/// anchor without restarting the whole pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForkSignal {
    /// Known blocks around the requested position, most recent first.
    pub prev_blocks: Vec<BlockRef>,
}

impl ForkSignal {
    /// Build a signal from a window slice in ascending order.
    pub fn from_ascending<'a>(blocks: impl IntoIterator<Item = &'a Block>) -> Self {
        let mut prev_blocks: Vec<BlockRef> = blocks.into_iter().map(Block::block_ref).collect();
        prev_blocks.reverse();
        prev_blocks.truncate(FORK_SIGNAL_DEPTH);
        Self { prev_blocks }
    }
}

impl std::fmt::Display for ForkSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.prev_blocks.first() {
            Some(head) => write!(f, "base block mismatch, head is {head}"),
            None => write!(f, "base block mismatch"),
        }
    }
}

// ─── BlockSource ──────────────────────────────────────────────────────────────

/// Errors a block source can report.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Transport failed and retries were exhausted.
    #[error("source RPC failed: {0}")]
    Rpc(String),

    /// Archive or object storage failed.
    #[error("source storage failed: {0}")]
    Storage(String),

    /// The source returned data that violates its own contract.
    #[error("source returned inconsistent data: {0}")]
    Inconsistent(String),

    /// A requested block does not exist (yet).
    #[error("block {0} not available")]
    NotAvailable(u64),
}

/// Byte-level block fetcher supplied by each chain adapter.
///
/// Implementations wrap a node endpoint (via `chainstream-rpc`) or a remote
/// archive; the engine supplies continuity guarantees on top.
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Fetch the blocks at the given heights, in the given order.
    async fn get_block_batch(&self, heights: &[u64]) -> Result<Vec<Block>, SourceError>;

    /// Highest block number the chain guarantees will not be rolled back.
    async fn get_finalized_height(&self) -> Result<u64, SourceError>;
}
