//! Chunk replay: continuity validation and the archive-backed block source.
//!
//! Each chunk directory holds its blocks as `blocks.jsonl` — one JSON
//! [`Block`] per line, ascending. The chunk-name contract never depends on
//! this file; only the validator and [`ArchiveSource`] read it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use chainstream_core::{Block, BlockSource, SourceError};

use crate::error::LayoutError;
use crate::fs::Fs;
use crate::layout::{short_hash, BlockRange, DataChunk, NO_HASH};
use crate::walk::ChunkWalk;

/// File inside every chunk directory holding the block records.
pub const BLOCKS_FILE: &str = "blocks.jsonl";

async fn read_chunk_blocks(fs: &dyn Fs, chunk: &DataChunk) -> Result<Vec<Block>, LayoutError> {
    let path = format!("{}/{}", chunk.path(), BLOCKS_FILE);
    let bytes = fs.read_file(&path).await?;
    let text = String::from_utf8(bytes).map_err(|e| LayoutError::Storage {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    let mut blocks = Vec::new();
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let block: Block = serde_json::from_str(line).map_err(|e| LayoutError::Storage {
            path: path.clone(),
            reason: format!("bad block record: {e}"),
        })?;
        blocks.push(block);
    }
    Ok(blocks)
}

// ─── Continuity validator ─────────────────────────────────────────────────────

/// Options for [`validate_chunks`].
#[derive(Debug, Clone, Default)]
pub struct ValidateOptions {
    /// Also check `parent_hash` linkage between consecutive blocks.
    pub check_parent_hash: bool,
}

/// Summary of a successful validation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidateReport {
    pub chunks: usize,
    pub blocks: usize,
    pub first: Option<u64>,
    pub last: Option<u64>,
}

/// Replay chunks overlapping `range` in order and assert the archived chain
/// is whole: block numbers strictly consecutive (within and across chunks),
/// optional parent-hash linkage, and each chunk's first/last block and short
/// hash matching its declared name.
pub async fn validate_chunks(
    fs: Arc<dyn Fs>,
    range: BlockRange,
    opts: &ValidateOptions,
) -> Result<ValidateReport, LayoutError> {
    let mut walk = ChunkWalk::forward(fs.clone(), range);
    let mut report = ValidateReport { chunks: 0, blocks: 0, first: None, last: None };
    let mut prev: Option<Block> = None;

    while let Some(chunk) = walk.next().await? {
        let blocks = read_chunk_blocks(fs.as_ref(), &chunk).await?;
        let broken = |number: u64, reason: String| LayoutError::BrokenChunk {
            chunk: chunk.path(),
            number,
            reason,
        };

        let (first, last) = match (blocks.first(), blocks.last()) {
            (Some(first), Some(last)) => (first.clone(), last.clone()),
            _ => return Err(broken(chunk.from, "chunk has no blocks".into())),
        };
        if first.number != chunk.from {
            return Err(broken(
                first.number,
                format!("first block does not match declared from ({})", chunk.from),
            ));
        }
        if last.number != chunk.to {
            return Err(broken(
                last.number,
                format!("last block does not match declared to ({})", chunk.to),
            ));
        }
        if chunk.hash != NO_HASH && short_hash(&last.hash) != chunk.hash {
            return Err(broken(
                last.number,
                format!(
                    "last block hash {} does not match declared {}",
                    short_hash(&last.hash),
                    chunk.hash
                ),
            ));
        }

        for block in &blocks {
            if let Some(prev) = &prev {
                if block.number != prev.number + 1 {
                    return Err(broken(
                        block.number,
                        format!("gap after block {}", prev.number),
                    ));
                }
                if opts.check_parent_hash && block.parent_hash != prev.hash {
                    return Err(broken(
                        block.number,
                        format!(
                            "parent hash {} does not link to {}#{}",
                            block.parent_hash, prev.number, prev.hash
                        ),
                    ));
                }
            }
            report.blocks += 1;
            report.first.get_or_insert(block.number);
            report.last = Some(block.number);
            prev = Some(block.clone());
        }
        report.chunks += 1;
        tracing::debug!(chunk = %chunk, blocks = blocks.len(), "chunk validated");
    }
    Ok(report)
}

// ─── ArchiveSource ────────────────────────────────────────────────────────────

/// [`BlockSource`] over the archive — lets the engine replay finalized chunks
/// through the same interface chain adapters implement.
pub struct ArchiveSource {
    fs: Arc<dyn Fs>,
}

impl ArchiveSource {
    pub fn new(fs: Arc<dyn Fs>) -> Self {
        Self { fs }
    }
}

fn storage_err(e: LayoutError) -> SourceError {
    SourceError::Storage(e.to_string())
}

#[async_trait]
impl BlockSource for ArchiveSource {
    async fn get_block_batch(&self, heights: &[u64]) -> Result<Vec<Block>, SourceError> {
        let (Some(&lo), Some(&hi)) = (heights.iter().min(), heights.iter().max()) else {
            return Ok(vec![]);
        };
        let mut walk = ChunkWalk::forward(self.fs.clone(), BlockRange::new(lo, hi));
        let mut found: HashMap<u64, Block> = HashMap::with_capacity(heights.len());
        while let Some(chunk) = walk.next().await.map_err(storage_err)? {
            for block in read_chunk_blocks(self.fs.as_ref(), &chunk)
                .await
                .map_err(storage_err)?
            {
                if block.number >= lo && block.number <= hi {
                    found.insert(block.number, block);
                }
            }
        }
        heights
            .iter()
            .map(|h| found.remove(h).ok_or(SourceError::NotAvailable(*h)))
            .collect()
    }

    async fn get_finalized_height(&self) -> Result<u64, SourceError> {
        // Everything archived is finalized; the watermark is the top chunk.
        let mut walk = ChunkWalk::reverse(self.fs.clone(), BlockRange::new(0, u64::MAX));
        match walk.next().await.map_err(storage_err)? {
            Some(chunk) => Ok(chunk.to),
            None => Ok(0),
        }
    }
}
