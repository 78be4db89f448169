//! The block stream engine — phased ingestion over any pair of sources.
//!
//! # Phases
//! A stream starts `Cold` (nothing fetched yet), replays history in batches
//! while `CatchingUp`, and switches to `Live` once it reaches its target:
//! the finalized watermark for finalized streams, the chain tip for live
//! streams. Every fetched block flows through the stream's own `ChainWindow`,
//! so continuity and finality violations surface before a consumer ever sees
//! the data.

use std::sync::Arc;
use std::time::Duration;

use chainstream_core::{
    Block, BlockRef, BlockSource, ChainWindow, ContinuityError, ForkSignal, SourceError,
    StreamRequest,
};

use crate::error::StreamError;

// ─── Config ───────────────────────────────────────────────────────────────────

/// Tuning knobs for the engine, shared by every stream it creates.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Blocks fetched per batch while catching up.
    pub batch_size: usize,
    /// Target size of each stream's chain window.
    pub window_size: usize,
    /// Idle delay between polls when the stream is at its target.
    pub poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            window_size: 256,
            poll_interval: Duration::from_secs(1),
        }
    }
}

// ─── Engine ───────────────────────────────────────────────────────────────────

/// Factory for finalized and live block streams.
///
/// Wraps a hot source (a node endpoint) and an optional archive source; the
/// archive serves the historical prefix during cold replay so the node is not
/// hammered for data that already sits in chunk files.
pub struct BlockStreamEngine {
    hot: Arc<dyn BlockSource>,
    archive: Option<Arc<dyn BlockSource>>,
    config: EngineConfig,
}

impl BlockStreamEngine {
    pub fn new(hot: Arc<dyn BlockSource>, config: EngineConfig) -> Self {
        Self { hot, archive: None, config }
    }

    /// Serve heights at or below the archive's top from `archive` instead of
    /// the hot source.
    pub fn with_archive(mut self, archive: Arc<dyn BlockSource>) -> Self {
        self.archive = Some(archive);
        self
    }

    /// A stream that only ever yields finalized blocks.
    pub fn finalized_stream(&self, req: StreamRequest) -> FinalizedStream {
        FinalizedStream { inner: self.state(req) }
    }

    /// A stream that follows the chain tip and surfaces rollbacks explicitly.
    pub fn live_stream(&self, req: StreamRequest) -> LiveStream {
        LiveStream { inner: self.state(req) }
    }

    fn state(&self, req: StreamRequest) -> StreamState {
        StreamState {
            hot: self.hot.clone(),
            archive: self.archive.clone(),
            config: self.config.clone(),
            next: req.from,
            req,
            window: None,
            phase: StreamPhase::Cold,
            finalized: 0,
            archive_top: None,
        }
    }
}

// ─── Stream state ─────────────────────────────────────────────────────────────

/// Where a stream is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    /// Nothing fetched yet.
    Cold,
    /// Replaying history toward the target in batches.
    CatchingUp,
    /// At the target; following as the chain advances.
    Live,
}

/// Items yielded by a [`LiveStream`].
#[derive(Debug)]
pub enum LiveEvent {
    /// New blocks in strictly increasing order.
    Blocks(Vec<Block>),
    /// The chain forked; everything above `base` has been discarded. Delivery
    /// resumes at `base.number + 1`.
    Rollback { base: BlockRef },
}

struct StreamState {
    hot: Arc<dyn BlockSource>,
    archive: Option<Arc<dyn BlockSource>>,
    config: EngineConfig,
    req: StreamRequest,
    /// Next height to deliver.
    next: u64,
    /// Seeded by the first fetched block.
    window: Option<ChainWindow>,
    phase: StreamPhase,
    /// Last finalized height reported by the hot source.
    finalized: u64,
    /// Highest height the archive holds, resolved once.
    archive_top: Option<u64>,
}

impl StreamState {
    fn set_phase(&mut self, phase: StreamPhase) {
        if self.phase != phase {
            tracing::info!(from = ?self.phase, to = ?phase, at = self.next, "stream phase change");
            self.phase = phase;
        }
    }

    fn past_end(&self) -> bool {
        self.req.to.is_some_and(|to| self.next > to)
    }

    async fn refresh_finalized(&mut self) -> Result<(), StreamError> {
        self.finalized = self.hot.get_finalized_height().await?;
        Ok(())
    }

    async fn archive_top(&mut self) -> Result<u64, StreamError> {
        if let Some(top) = self.archive_top {
            return Ok(top);
        }
        let top = match &self.archive {
            Some(archive) => archive.get_finalized_height().await?,
            None => 0,
        };
        self.archive_top = Some(top);
        Ok(top)
    }

    /// Fetch `[from, to]` inclusive from the archive when it covers `from`,
    /// otherwise from the hot source. Batches never straddle the boundary;
    /// the caller simply asks again for the remainder.
    async fn fetch_batch(&mut self, from: u64, mut to: u64) -> Result<Vec<Block>, StreamError> {
        let top = self.archive_top().await?;
        let source = if self.archive.is_some() && from <= top {
            to = to.min(top);
            self.archive.as_ref().map(Arc::clone)
        } else {
            None
        };
        let source = source.unwrap_or_else(|| self.hot.clone());

        let heights: Vec<u64> = (from..=to).collect();
        let blocks = source.get_block_batch(&heights).await?;
        if blocks.len() != heights.len() {
            return Err(SourceError::Inconsistent(format!(
                "asked for {} heights, got {} blocks",
                heights.len(),
                blocks.len()
            ))
            .into());
        }
        for (block, height) in blocks.iter().zip(&heights) {
            if block.number != *height {
                return Err(SourceError::Inconsistent(format!(
                    "asked for block {height}, got {}",
                    block.number
                ))
                .into());
            }
        }
        Ok(blocks)
    }

    async fn fetch_one(&mut self, height: u64) -> Result<Block, StreamError> {
        let mut batch = self.fetch_batch(height, height).await?;
        match batch.pop() {
            Some(block) => Ok(block),
            None => Err(SourceError::NotAvailable(height).into()),
        }
    }

    /// Run a batch through the window: seed it on first contact (validating
    /// the request's anchor), then append or roll back block by block.
    fn absorb(&mut self, batch: &[Block]) -> Result<(), StreamError> {
        let mut blocks = batch.iter();
        if self.window.is_none() {
            let Some(first) = blocks.next() else { return Ok(()) };
            if let Some(expected) = &self.req.parent_hash {
                if first.parent_hash != *expected {
                    tracing::warn!(
                        at = first.number,
                        expected = %expected,
                        actual = %first.parent_hash,
                        "request anchor does not match the chain"
                    );
                    return Err(StreamError::InvalidBaseBlock(ForkSignal::from_ascending(batch)));
                }
            }
            self.window = Some(ChainWindow::new(first.clone(), self.config.window_size));
        }
        if let Some(window) = &mut self.window {
            for block in blocks {
                window.push(block.clone())?;
            }
            if !window.compact() {
                tracing::warn!(
                    len = window.len(),
                    finalized = window.finalized_number(),
                    "unfinalized tail exceeds window size, not compacting"
                );
            }
        }
        Ok(())
    }

    /// Move the window's watermark up to the source-reported finalized height.
    async fn advance_finality(&mut self) -> Result<(), StreamError> {
        let target = match &self.window {
            Some(window) => self.finalized.min(window.head().number),
            None => return Ok(()),
        };
        let already = self
            .window
            .as_ref()
            .map(|w| w.finalized_number())
            .unwrap_or(u64::MAX);
        if target <= already {
            return Ok(());
        }
        let canonical = self.fetch_one(target).await?;
        if let Some(window) = &mut self.window {
            if !window.finalize(target, &canonical.hash) {
                // The window holds a fork at a now-finalized height; the next
                // tip fetch will trigger the rollback.
                tracing::warn!(at = target, "finalized hash differs from window");
            }
        }
        Ok(())
    }

    /// One catch-up step: fetch up to `batch_size` blocks ending at `cap`.
    async fn catch_up_batch(&mut self, cap: u64) -> Result<Vec<Block>, StreamError> {
        self.set_phase(if self.window.is_none() {
            StreamPhase::Cold
        } else {
            StreamPhase::CatchingUp
        });
        let step = self.config.batch_size.max(1) as u64;
        let end = (self.next + step - 1).min(cap);
        // The batch may come back shorter than asked when it was served from
        // the archive and hit the archive's top.
        let batch = self.fetch_batch(self.next, end).await?;
        self.absorb(&batch)?;
        if let (Some(window), Some(last)) = (&mut self.window, batch.last()) {
            if last.number <= self.finalized {
                window.finalize(last.number, &last.hash);
            }
        }
        self.next = batch.last().map(|b| b.number + 1).unwrap_or(end + 1);
        self.set_phase(StreamPhase::CatchingUp);
        Ok(batch)
    }

    /// Walk back from a mismatching tip until a block the window also has,
    /// fetching canonical parents as needed. Failing to find one above the
    /// watermark is a finality violation.
    async fn find_fork_base(
        &mut self,
        known: Vec<BlockRef>,
        floor: u64,
        tip: &Block,
    ) -> Result<BlockRef, StreamError> {
        let mut parent_hash = tip.parent_hash.clone();
        let mut number = tip.number.saturating_sub(1);
        loop {
            let ours = known.iter().find(|r| r.number == number);
            match ours {
                Some(r) if r.hash == parent_hash => return Ok(r.clone()),
                _ if number <= floor => {
                    return Err(ContinuityError::FinalityViolation {
                        number,
                        finalized_number: floor,
                    }
                    .into())
                }
                _ => {
                    let canonical = self.fetch_one(number).await?;
                    parent_hash = canonical.parent_hash;
                    number -= 1;
                }
            }
        }
    }
}

// ─── FinalizedStream ──────────────────────────────────────────────────────────

/// Pull-based stream of finalized blocks.
///
/// Never yields a block above the source's finalized watermark, so consumers
/// can write its output straight to immutable storage.
pub struct FinalizedStream {
    inner: StreamState,
}

impl FinalizedStream {
    pub fn phase(&self) -> StreamPhase {
        self.inner.phase
    }

    /// The next batch, in strictly increasing order. Blocks until new blocks
    /// are finalized; `None` once the request's end block has been delivered.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<Block>>, StreamError> {
        let s = &mut self.inner;
        loop {
            if s.past_end() {
                return Ok(None);
            }
            if s.next > s.finalized {
                s.refresh_finalized().await?;
            }
            let cap = s.finalized.min(s.req.to.unwrap_or(u64::MAX));
            if s.next > cap {
                s.set_phase(StreamPhase::Live);
                tokio::time::sleep(s.config.poll_interval).await;
                continue;
            }
            let batch = s.catch_up_batch(cap).await?;
            if s.next > cap {
                s.set_phase(StreamPhase::Live);
            }
            return Ok(Some(batch));
        }
    }
}

// ─── LiveStream ───────────────────────────────────────────────────────────────

/// Pull-based stream following the chain tip.
///
/// Catch-up happens in batches; at the tip, blocks arrive one by one and a
/// fork shows up as an explicit [`LiveEvent::Rollback`] before delivery
/// resumes above the fork base.
pub struct LiveStream {
    inner: StreamState,
}

impl LiveStream {
    pub fn phase(&self) -> StreamPhase {
        self.inner.phase
    }

    /// The next event; `None` once the request's end block has been delivered.
    pub async fn next_event(&mut self) -> Result<Option<LiveEvent>, StreamError> {
        let s = &mut self.inner;
        loop {
            if s.past_end() {
                return Ok(None);
            }
            if s.next > s.finalized {
                s.refresh_finalized().await?;
            }
            if s.next <= s.finalized {
                let cap = s.finalized.min(s.req.to.unwrap_or(u64::MAX));
                let batch = s.catch_up_batch(cap).await?;
                return Ok(Some(LiveEvent::Blocks(batch)));
            }

            s.set_phase(StreamPhase::Live);
            let block = match s.fetch_one(s.next).await {
                Ok(block) => block,
                Err(StreamError::Source(SourceError::NotAvailable(_))) => {
                    s.advance_finality().await?;
                    tokio::time::sleep(s.config.poll_interval).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let mismatch = s.window.as_ref().and_then(|w| {
                let head = w.head();
                (block.number == head.number + 1 && block.parent_hash != head.hash)
                    .then(|| (w.finalized_number(), w.refs(), head.number))
            });
            if let Some((floor, known, head_number)) = mismatch {
                let base = s.find_fork_base(known, floor, &block).await?;
                tracing::warn!(
                    base = %base,
                    dropped = head_number - base.number,
                    "fork at live head, rolling back"
                );
                s.next = base.number + 1;
                return Ok(Some(LiveEvent::Rollback { base }));
            }

            s.absorb(std::slice::from_ref(&block))?;
            s.next = block.number + 1;
            return Ok(Some(LiveEvent::Blocks(vec![block])));
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
