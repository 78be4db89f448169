//! chainstream-core — foundation types for the ChainStream ingestion engine.
//!
//! # Architecture
//!
//! ```text
//! BlockStreamEngine (chainstream-engine)
//!        ├── ChainWindow   (fork-aware in-memory window, this crate)
//!        ├── BlockSource   (chain-adapter trait, this crate)
//!        ├── ChunkWalk     (archived ranges, chainstream-archive)
//!        └── RetryableRpc  (transport, chainstream-rpc)
//! ```
//!
//! The core crate is pure data structures and traits — no I/O.

pub mod error;
pub mod request;
pub mod types;
pub mod window;

pub use error::ContinuityError;
pub use request::{BlockSource, ForkSignal, SourceError, StreamRequest};
pub use types::{Block, BlockRef};
pub use window::{ChainWindow, QueryResult};
