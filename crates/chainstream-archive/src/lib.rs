//! chainstream-archive — the canonical chunked archive layout.
//!
//! Finalized block ranges live in immutable chunk directories under a sharded
//! tree whose names double as an integrity check:
//!
//! ```text
//! 0000000000/0000000100-0000000199-1a2b3c
//! ^ top       ^ from     ^ to      ^ short hash of the last block
//! ```
//!
//! Zero-padded decimal keeps lexicographic listing equal to numeric order;
//! the embedded hash lets a reader detect a truncated or tampered chunk
//! without opening it.

pub mod error;
pub mod fs;
pub mod layout;
pub mod validate;
pub mod walk;

pub use error::LayoutError;
pub use fs::{Fs, LocalFs, MemFs};
pub use layout::{short_hash, top_dir_name, BlockRange, DataChunk, NO_HASH};
pub use validate::{validate_chunks, ArchiveSource, ValidateOptions, ValidateReport, BLOCKS_FILE};
pub use walk::ChunkWalk;
