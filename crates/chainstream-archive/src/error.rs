//! Archive error types.

use thiserror::Error;

/// Errors surfaced while reading the archive layout.
///
/// All of these are fatal: a mismatching or invalid name implies
/// storage-level data loss, manual edits, or a naming-scheme drift.
#[derive(Debug, Error)]
pub enum LayoutError {
    /// The storage backend failed.
    #[error("storage error at {path}: {reason}")]
    Storage { path: String, reason: String },

    /// A directory name could not be parsed as part of the layout.
    #[error("unexpected entry in archive: {path}")]
    UnexpectedEntry { path: String },

    /// A parsed chunk violates the layout invariants.
    #[error("invalid chunk {path}: {reason}")]
    InvalidChunk { path: String, reason: String },

    /// A chunk directory name does not match its canonical recomputation.
    #[error("chunk name mismatch: on disk {on_disk:?}, canonical {canonical:?}")]
    NameMismatch { on_disk: String, canonical: String },

    /// Chunk contents contradict the declared range or break continuity.
    #[error("chunk {chunk} failed validation at block {number}: {reason}")]
    BrokenChunk {
        chunk: String,
        number: u64,
        reason: String,
    },
}
