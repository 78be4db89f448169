//! Stream and subscription error types.

use thiserror::Error;

use chainstream_core::{ContinuityError, ForkSignal, SourceError};

/// Errors that terminate a block stream.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The chain the source returned does not link up. Fatal; the consumer
    /// must resync from a trusted point.
    #[error(transparent)]
    Continuity(#[from] ContinuityError),

    /// The request's `parent_hash` anchor does not match the chain. Carries
    /// nearby refs so the consumer can pick a new anchor.
    #[error("{0}")]
    InvalidBaseBlock(ForkSignal),

    /// The source failed after its own retries were exhausted.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// The live subscription wrapper failed.
    #[error(transparent)]
    Guard(#[from] GuardError),
}

/// Errors surfaced by [`crate::LiveSubscriptionGuard`].
#[derive(Debug, Error)]
pub enum GuardError {
    /// The subscription could not be established.
    #[error("subscription connect failed: {0}")]
    Connect(String),

    /// The push channel closed. `delivered` is the number of blocks received
    /// before the disconnect; zero means the subscription never worked.
    #[error("subscription closed after {delivered} blocks")]
    Disconnected { delivered: u64 },

    /// The watchdog fired: no message within the timeout. The subscription
    /// has been torn down.
    #[error("no subscription message for {timeout_ms}ms, watchdog fired")]
    Stalled { timeout_ms: u64 },
}
