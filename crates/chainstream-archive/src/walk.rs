//! Lazy traversal of the sharded chunk tree.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::LayoutError;
use crate::fs::Fs;
use crate::layout::{parse_top_dir, top_dir_name, BlockRange, DataChunk};

/// Pull-based iterator over archived chunks overlapping a block range.
///
/// Lists one top-level bucket at a time, in order, and stops as soon as the
/// remaining tree can no longer overlap the range. Every yielded chunk's
/// directory name is recomputed from its parsed fields and compared
/// byte-for-byte with the on-disk name; a mismatch is fatal
/// ([`LayoutError::NameMismatch`]).
pub struct ChunkWalk {
    fs: Arc<dyn Fs>,
    range: BlockRange,
    reverse: bool,
    /// Buckets still to visit, in traversal order. `None` until the root
    /// directory has been listed.
    tops: Option<VecDeque<u64>>,
    pending: VecDeque<DataChunk>,
    done: bool,
}

impl ChunkWalk {
    /// Walk chunks overlapping `range` in ascending order.
    pub fn forward(fs: Arc<dyn Fs>, range: BlockRange) -> Self {
        Self::new(fs, range, false)
    }

    /// Walk chunks overlapping `range` in descending order.
    pub fn reverse(fs: Arc<dyn Fs>, range: BlockRange) -> Self {
        Self::new(fs, range, true)
    }

    fn new(fs: Arc<dyn Fs>, range: BlockRange, reverse: bool) -> Self {
        Self {
            fs,
            range,
            reverse,
            tops: None,
            pending: VecDeque::new(),
            done: false,
        }
    }

    /// Yield the next overlapping chunk, or `None` when the walk is complete.
    pub async fn next(&mut self) -> Result<Option<DataChunk>, LayoutError> {
        loop {
            if let Some(chunk) = self.pending.pop_front() {
                return Ok(Some(chunk));
            }
            if self.done {
                return Ok(None);
            }
            self.fill().await?;
        }
    }

    /// Drain the walk into a vector.
    pub async fn collect(mut self) -> Result<Vec<DataChunk>, LayoutError> {
        let mut chunks = Vec::new();
        while let Some(chunk) = self.next().await? {
            chunks.push(chunk);
        }
        Ok(chunks)
    }

    async fn list_tops(&mut self) -> Result<(), LayoutError> {
        let mut tops = Vec::new();
        for name in self.fs.ls("").await? {
            let top = parse_top_dir(&name)
                .ok_or_else(|| LayoutError::UnexpectedEntry { path: name.clone() })?;
            let canonical = top_dir_name(top);
            if canonical != name {
                return Err(LayoutError::NameMismatch { on_disk: name, canonical });
            }
            // Chunks in this bucket all have `from >= top`.
            if top <= self.range.to {
                tops.push(top);
            }
        }
        tops.sort_unstable();
        // Buckets wholly below the range are skipped too, keeping the last
        // one at or before `range.from` since a chunk may straddle buckets.
        if let Some(pos) = tops.iter().rposition(|&top| top <= self.range.from) {
            tops.drain(..pos);
        }
        if self.reverse {
            tops.reverse();
        }
        self.tops = Some(tops.into());
        Ok(())
    }

    /// List the next bucket and queue its overlapping chunks.
    async fn fill(&mut self) -> Result<(), LayoutError> {
        if self.tops.is_none() {
            self.list_tops().await?;
        }
        let top = match self.tops.as_mut().and_then(VecDeque::pop_front) {
            Some(top) => top,
            None => {
                self.done = true;
                return Ok(());
            }
        };

        let top_dir = top_dir_name(top);
        let mut chunks = Vec::new();
        for name in self.fs.ls(&top_dir).await? {
            let chunk = DataChunk::parse(top, &name).ok_or_else(|| {
                LayoutError::UnexpectedEntry { path: format!("{top_dir}/{name}") }
            })?;
            let canonical = chunk.dir_name();
            if canonical != name {
                return Err(LayoutError::NameMismatch { on_disk: name, canonical });
            }
            chunk.assert_valid()?;
            chunks.push(chunk);
        }
        chunks.sort_unstable_by_key(|c| c.from);

        if self.reverse {
            for chunk in chunks.into_iter().rev() {
                // Archive chunks are disjoint and ascending, so once one ends
                // below the range nothing earlier can overlap.
                if chunk.to < self.range.from {
                    self.done = true;
                    break;
                }
                if chunk.range().overlaps(&self.range) {
                    self.pending.push_back(chunk);
                }
            }
        } else {
            for chunk in chunks {
                if chunk.from > self.range.to {
                    self.done = true;
                    break;
                }
                if chunk.range().overlaps(&self.range) {
                    self.pending.push_back(chunk);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemFs;

    /// Archive with three buckets of two chunks each, 100 blocks per chunk.
    fn fixture() -> Arc<MemFs> {
        let fs = MemFs::new();
        for (top, from) in [
            (0u64, 0u64),
            (0, 100),
            (200, 200),
            (200, 300),
            (400, 400),
            (400, 500),
        ] {
            let chunk = DataChunk::new(top, from, from + 99, Some(&format!("0xaa{from:04x}")));
            fs.put(format!("{}/blocks.jsonl", chunk.path()), "");
        }
        Arc::new(fs)
    }

    #[tokio::test]
    async fn forward_walk_yields_overlapping_in_order() {
        let walk = ChunkWalk::forward(fixture(), BlockRange::new(150, 450));
        let chunks = walk.collect().await.unwrap();
        let froms: Vec<u64> = chunks.iter().map(|c| c.from).collect();
        assert_eq!(froms, vec![100, 200, 300, 400]);
    }

    #[tokio::test]
    async fn reverse_walk_is_symmetric() {
        let walk = ChunkWalk::reverse(fixture(), BlockRange::new(150, 450));
        let chunks = walk.collect().await.unwrap();
        let froms: Vec<u64> = chunks.iter().map(|c| c.from).collect();
        assert_eq!(froms, vec![400, 300, 200, 100]);
    }

    #[tokio::test]
    async fn walk_skips_buckets_below_range() {
        struct ListingLog {
            inner: Arc<MemFs>,
            listed: std::sync::Mutex<Vec<String>>,
        }

        #[async_trait::async_trait]
        impl Fs for ListingLog {
            async fn ls(&self, dir: &str) -> Result<Vec<String>, LayoutError> {
                self.listed.lock().unwrap().push(dir.to_string());
                self.inner.ls(dir).await
            }

            async fn read_file(&self, path: &str) -> Result<Vec<u8>, LayoutError> {
                self.inner.read_file(path).await
            }
        }

        let fs = Arc::new(ListingLog {
            inner: fixture(),
            listed: std::sync::Mutex::new(Vec::new()),
        });
        let walk = ChunkWalk::forward(fs.clone(), BlockRange::new(450, 460));
        let chunks = walk.collect().await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].from, 400);

        // Buckets wholly below the range are never listed.
        let listed = fs.listed.lock().unwrap().clone();
        assert!(!listed.contains(&"0000000000".to_string()));
        assert!(!listed.contains(&"0000000200".to_string()));
        assert!(listed.contains(&"0000000400".to_string()));
    }

    #[tokio::test]
    async fn walk_keeps_last_bucket_before_range() {
        // A chunk may straddle buckets, so the last bucket at or before
        // `range.from` still gets listed.
        let walk = ChunkWalk::forward(fixture(), BlockRange::new(350, 450));
        let chunks = walk.collect().await.unwrap();
        let froms: Vec<u64> = chunks.iter().map(|c| c.from).collect();
        assert_eq!(froms, vec![300, 400]);
    }

    #[tokio::test]
    async fn walk_skips_buckets_past_range() {
        let walk = ChunkWalk::forward(fixture(), BlockRange::new(0, 150));
        let chunks = walk.collect().await.unwrap();
        let froms: Vec<u64> = chunks.iter().map(|c| c.from).collect();
        assert_eq!(froms, vec![0, 100]);
    }

    #[tokio::test]
    async fn walk_whole_archive() {
        let walk = ChunkWalk::forward(fixture(), BlockRange::new(0, u64::MAX));
        assert_eq!(walk.collect().await.unwrap().len(), 6);
    }

    #[tokio::test]
    async fn renamed_chunk_is_detected() {
        let fs = MemFs::new();
        // Hash edited on disk relative to nothing — name is simply not canonical
        // in padding.
        fs.put("0000000000/100-199-1a2b3c/blocks.jsonl", "");
        let mut walk = ChunkWalk::forward(Arc::new(fs), BlockRange::new(0, 1000));
        let err = walk.next().await.unwrap_err();
        assert!(matches!(err, LayoutError::NameMismatch { .. }));
    }

    #[tokio::test]
    async fn stray_entry_is_detected() {
        let fs = MemFs::new();
        fs.put("0000000000/notes.txt", "hello");
        let mut walk = ChunkWalk::forward(Arc::new(fs), BlockRange::new(0, 1000));
        let err = walk.next().await.unwrap_err();
        assert!(matches!(err, LayoutError::UnexpectedEntry { .. }));
    }

    #[tokio::test]
    async fn inverted_chunk_range_is_detected() {
        let fs = MemFs::new();
        fs.put("0000000500/0000000300-0000000399-abcdef/blocks.jsonl", "");
        let mut walk = ChunkWalk::forward(Arc::new(fs), BlockRange::new(0, 1000));
        let err = walk.next().await.unwrap_err();
        assert!(matches!(err, LayoutError::InvalidChunk { .. }));
    }
}
