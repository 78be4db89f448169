//! Fork-aware in-memory window over the most recently seen blocks.
//!
//! The window owns an ordered, gap-free run of blocks plus a finalized
//! watermark. Blocks at or below the watermark are immutable history; blocks
//! above it may still be rolled back. Finality is an index, not a per-block
//! flag, so rollback legality is a single comparison.
//!
//! The window is never serialized — durability comes solely from the chunk
//! files written by the archive layer once a range is finalized.

use crate::error::ContinuityError;
use crate::request::ForkSignal;
use crate::types::{Block, BlockRef};

/// Result of [`ChainWindow::query`].
///
/// A fork is a first-class outcome here, not an error: the signal carries the
/// recovery data the caller needs to re-anchor.
#[derive(Debug)]
pub enum QueryResult {
    /// Consecutive blocks starting at the requested position. Empty means the
    /// caller is caught up with the window head.
    Blocks(Vec<Block>),
    /// The requested base does not match what the window knows.
    Forked(ForkSignal),
}

/// Bounded, fork-aware buffer of recent blocks.
///
/// Created from one known-good base block; grows via [`push`](Self::push) and
/// [`finalize`](Self::finalize), shrinks via [`compact`](Self::compact).
/// Never empty, never mutated concurrently — the engine serializes all calls.
pub struct ChainWindow {
    /// Ascending by number, no gaps.
    blocks: Vec<Block>,
    /// Index of the highest finalized block. `0 <= finalized_head < blocks.len()`.
    finalized_head: usize,
    /// Compaction target for the window length.
    max_size: usize,
}

impl ChainWindow {
    /// Create a window holding `base` as its (finalized) first block.
    pub fn new(base: Block, max_size: usize) -> Self {
        Self {
            blocks: vec![base],
            finalized_head: 0,
            max_size,
        }
    }

    fn last(&self) -> &Block {
        self.blocks.last().expect("window is never empty")
    }

    /// Number of the first block in the window.
    pub fn first_number(&self) -> u64 {
        self.blocks[0].number
    }

    /// The current head block.
    pub fn head(&self) -> &Block {
        self.last()
    }

    /// The block at the finalized watermark.
    pub fn finalized_block(&self) -> &Block {
        &self.blocks[self.finalized_head]
    }

    /// Number of the highest finalized block.
    pub fn finalized_number(&self) -> u64 {
        self.blocks[self.finalized_head].number
    }

    /// Number of blocks in the window.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Always `false` — the window holds at least its base block.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Refs of every block in the window, ascending by number.
    pub fn refs(&self) -> Vec<BlockRef> {
        self.blocks.iter().map(Block::block_ref).collect()
    }

    fn position_of(&self, number: u64) -> Result<usize, usize> {
        self.blocks.binary_search_by_key(&number, |b| b.number)
    }

    /// Append a block, or perform a rollback if its height is already known.
    ///
    /// A block above the head must chain from it (`BrokenChain` otherwise —
    /// fatal, the caller must resync). A block at an existing height replaces
    /// that block and truncates everything above it, provided the position is
    /// above the finalized head (`FinalityViolation` otherwise) and the block
    /// chains from its predecessor.
    pub fn push(&mut self, block: Block) -> Result<(), ContinuityError> {
        let head = self.last();
        if block.number > head.number {
            if !block.extends(head) {
                return Err(ContinuityError::BrokenChain {
                    number: block.number,
                    hash: block.hash,
                    parent_number: block.parent_number,
                    parent_hash: block.parent_hash,
                    expected_number: head.number,
                    expected_hash: head.hash.clone(),
                });
            }
            self.blocks.push(block);
            return Ok(());
        }

        // Rollback path.
        let pos = match self.position_of(block.number) {
            Ok(pos) => pos,
            // Below the window start — everything there is finalized history.
            Err(_) => {
                return Err(ContinuityError::FinalityViolation {
                    number: block.number,
                    finalized_number: self.finalized_number(),
                })
            }
        };
        if pos <= self.finalized_head {
            return Err(ContinuityError::FinalityViolation {
                number: block.number,
                finalized_number: self.finalized_number(),
            });
        }
        let prev = &self.blocks[pos - 1];
        if !block.extends(prev) {
            return Err(ContinuityError::BrokenChain {
                number: block.number,
                hash: block.hash,
                parent_number: block.parent_number,
                parent_hash: block.parent_hash,
                expected_number: prev.number,
                expected_hash: prev.hash.clone(),
            });
        }
        tracing::warn!(
            at = block.number,
            new_hash = %block.hash,
            dropped = self.blocks.len() - pos,
            "rollback: truncating window"
        );
        self.blocks.truncate(pos);
        self.blocks.push(block);
        Ok(())
    }

    /// Advance the finalized watermark to `number` if the stored hash matches.
    ///
    /// Returns `false` when `number` is outside the window or the hash differs
    /// (a fork at that height — the caller must not treat it as finalized).
    /// The watermark never moves backward.
    pub fn finalize(&mut self, number: u64, hash: &str) -> bool {
        if number < self.first_number() || number > self.last().number {
            return false;
        }
        match self.position_of(number) {
            Ok(pos) if self.blocks[pos].hash == hash => {
                self.finalized_head = self.finalized_head.max(pos);
                true
            }
            _ => false,
        }
    }

    /// Return up to `limit` consecutive blocks starting at `from`.
    ///
    /// `base_hash`, when given, must equal the parent hash of block `from`
    /// (i.e. the hash of block `from - 1`). `from == head + 1` with a matching
    /// head hash yields an empty batch: the caller is caught up. Any mismatch
    /// yields [`QueryResult::Forked`] with recent refs for re-anchoring.
    pub fn query(&self, limit: usize, from: u64, base_hash: Option<&str>) -> QueryResult {
        match self.position_of(from) {
            Ok(pos) => {
                let anchored = match base_hash {
                    None => true,
                    Some(hash) => self.blocks[pos].parent_hash == hash,
                };
                if anchored {
                    let end = (pos + limit).min(self.blocks.len());
                    return QueryResult::Blocks(self.blocks[pos..end].to_vec());
                }
            }
            Err(_) => {
                let head = self.last();
                if from == head.number + 1 {
                    // An absent anchor cannot mismatch.
                    let caught_up = base_hash.map_or(true, |hash| hash == head.hash);
                    if caught_up {
                        return QueryResult::Blocks(Vec::new());
                    }
                }
            }
        }
        QueryResult::Forked(ForkSignal::from_ascending(&self.blocks))
    }

    /// Trim the finalized prefix down to `max_size` entries.
    ///
    /// Only blocks strictly below the finalized head are discarded. Returns
    /// `false` without discarding anything when the unfinalized tail alone
    /// exceeds `max_size` — the caller must slow ingestion or raise the limit;
    /// unfinalized data is never dropped silently.
    pub fn compact(&mut self) -> bool {
        let unfinalized = self.blocks.len() - self.finalized_head - 1;
        if unfinalized > self.max_size {
            return false;
        }
        if self.blocks.len() > self.max_size {
            let excess = self.blocks.len() - self.max_size;
            let trim = excess.min(self.finalized_head);
            if trim > 0 {
                self.blocks.drain(..trim);
                self.finalized_head -= trim;
            }
        }
        true
    }
}
