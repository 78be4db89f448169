//! Chunk naming, parsing and validation.

use serde::{Deserialize, Serialize};

use crate::error::LayoutError;

/// Placeholder used in chunk names when the last block's hash is unknown.
pub const NO_HASH: &str = "000000";

/// Width of the short hash fragment embedded in chunk names.
pub const SHORT_HASH_LEN: usize = 6;

/// An inclusive block-number range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    pub fn new(from: u64, to: u64) -> Self {
        Self { from, to }
    }

    /// Returns `true` if the ranges share at least one block.
    pub fn overlaps(&self, other: &BlockRange) -> bool {
        self.from <= other.to && other.from <= self.to
    }
}

/// One archived, immutable range of blocks.
///
/// `top` is a coarse directory bucket (not necessarily equal to `from`) that
/// keeps per-directory fan-out bounded regardless of total chain length.
/// `hash` is the short fingerprint of the *last* block in the chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataChunk {
    pub top: u64,
    pub from: u64,
    pub to: u64,
    pub hash: String,
}

impl DataChunk {
    /// Build a chunk descriptor; `last_hash` is the full hash of the last
    /// block, shortened for the name (`None` → the `000000` placeholder).
    pub fn new(top: u64, from: u64, to: u64, last_hash: Option<&str>) -> Self {
        Self {
            top,
            from,
            to,
            hash: last_hash.map_or_else(|| NO_HASH.to_string(), short_hash),
        }
    }

    /// The inclusive block range this chunk covers.
    pub fn range(&self) -> BlockRange {
        BlockRange::new(self.from, self.to)
    }

    /// Canonical directory name within the top-level bucket:
    /// `"{from:010}-{to:010}-{hash}"`.
    pub fn dir_name(&self) -> String {
        format!("{:010}-{:010}-{}", self.from, self.to, self.hash)
    }

    /// Canonical path relative to the archive root:
    /// `"{top:010}/{from:010}-{to:010}-{hash}"`.
    pub fn path(&self) -> String {
        format!("{}/{}", top_dir_name(self.top), self.dir_name())
    }

    /// Parse a chunk directory name within the bucket `top`.
    ///
    /// Parsing is deliberately lenient about padding; callers that need
    /// integrity re-derive [`dir_name`](Self::dir_name) and compare it
    /// byte-for-byte with the on-disk name.
    pub fn parse(top: u64, name: &str) -> Option<Self> {
        let (from, rest) = name.split_once('-')?;
        let (to, hash) = rest.split_once('-')?;
        if hash.is_empty() {
            return None;
        }
        Some(Self {
            top,
            from: parse_padded(from)?,
            to: parse_padded(to)?,
            hash: hash.to_string(),
        })
    }

    /// Parse a full `"top/from-to-hash"` path relative to the archive root.
    pub fn parse_path(path: &str) -> Option<Self> {
        let (top, name) = path.split_once('/')?;
        Self::parse(parse_top_dir(top)?, name)
    }

    /// Returns the violated invariant, or `None` if the chunk is well formed.
    pub fn validation_error(&self) -> Option<String> {
        if self.top > self.from {
            return Some(format!("top ({}) must not exceed from ({})", self.top, self.from));
        }
        if self.from > self.to {
            return Some(format!("from ({}) must not exceed to ({})", self.from, self.to));
        }
        if self.hash.len() != SHORT_HASH_LEN
            || !self.hash.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
        {
            return Some(format!(
                "hash ({:?}) must be {SHORT_HASH_LEN} lowercase hex chars",
                self.hash
            ));
        }
        None
    }

    /// Fail with [`LayoutError::InvalidChunk`] if an invariant is violated.
    pub fn assert_valid(&self) -> Result<(), LayoutError> {
        match self.validation_error() {
            None => Ok(()),
            Some(reason) => Err(LayoutError::InvalidChunk {
                path: self.path(),
                reason,
            }),
        }
    }
}

impl std::fmt::Display for DataChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path())
    }
}

/// Canonical name of a top-level bucket directory.
pub fn top_dir_name(top: u64) -> String {
    format!("{top:010}")
}

/// Parse a top-level bucket directory name. Lenient like [`DataChunk::parse`];
/// the walker re-derives [`top_dir_name`] to verify padding.
pub fn parse_top_dir(name: &str) -> Option<u64> {
    parse_padded(name)
}

fn parse_padded(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Shorten a full block hash to the fragment embedded in chunk names:
/// strip `0x`, take the first [`SHORT_HASH_LEN`] chars, lowercase.
pub fn short_hash(hash: &str) -> String {
    hash.strip_prefix("0x")
        .unwrap_or(hash)
        .chars()
        .take(SHORT_HASH_LEN)
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_path_format() {
        let chunk = DataChunk::new(0, 100, 199, Some("0x1a2b3cffff"));
        assert_eq!(chunk.path(), "0000000000/0000000100-0000000199-1a2b3c");
    }

    #[test]
    fn chunk_path_without_hash() {
        let chunk = DataChunk::new(5_000_000, 5_000_100, 5_000_199, None);
        assert_eq!(chunk.path(), "0005000000/0005000100-0005000199-000000");
    }

    #[test]
    fn chunk_path_round_trip() {
        // Parsing the literal name reproduces the struct, and
        // formatting the struct reproduces the literal name.
        let parsed = DataChunk::parse_path("0000000000/0000000100-0000000199-1a2b3c").unwrap();
        assert_eq!(
            parsed,
            DataChunk { top: 0, from: 100, to: 199, hash: "1a2b3c".into() }
        );
        assert_eq!(parsed.path(), "0000000000/0000000100-0000000199-1a2b3c");
    }

    #[test]
    fn parse_rejects_malformed_names() {
        assert!(DataChunk::parse(0, "0000000100-0000000199").is_none()); // no hash
        assert!(DataChunk::parse(0, "0000000100_0000000199-ff").is_none());
        assert!(DataChunk::parse(0, "000000a100-0000000199-ff").is_none());
        assert!(parse_top_dir("00000000x0").is_none());
        assert!(parse_top_dir("").is_none());
    }

    #[test]
    fn lenient_parse_is_caught_by_recompute() {
        // Unpadded names parse, but their canonical form differs — the walker
        // turns that into a NameMismatch.
        let parsed = DataChunk::parse(0, "100-199-1a2b3c").unwrap();
        assert_eq!(parsed.dir_name(), "0000000100-0000000199-1a2b3c");
    }

    #[test]
    fn validation_catches_inverted_ranges() {
        let chunk = DataChunk { top: 200, from: 100, to: 199, hash: "1a2b3c".into() };
        assert!(chunk.validation_error().unwrap().contains("top"));

        let chunk = DataChunk { top: 0, from: 300, to: 199, hash: "1a2b3c".into() };
        assert!(chunk.validation_error().unwrap().contains("from"));

        let chunk = DataChunk { top: 0, from: 100, to: 199, hash: "XYZ".into() };
        assert!(chunk.validation_error().unwrap().contains("hash"));

        let chunk = DataChunk { top: 0, from: 100, to: 199, hash: "1a2b3c".into() };
        assert!(chunk.validation_error().is_none());
        assert!(chunk.assert_valid().is_ok());
    }

    #[test]
    fn short_hash_normalizes() {
        assert_eq!(short_hash("0x1A2B3CDDEE"), "1a2b3c");
        assert_eq!(short_hash("abcdef012345"), "abcdef");
        assert_eq!(short_hash("0xab"), "ab"); // shorter hashes pass through
    }

    #[test]
    fn range_overlap() {
        let a = BlockRange::new(100, 199);
        assert!(a.overlaps(&BlockRange::new(150, 300)));
        assert!(a.overlaps(&BlockRange::new(0, 100)));
        assert!(!a.overlaps(&BlockRange::new(200, 300)));
    }
}
