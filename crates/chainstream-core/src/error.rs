//! Error types for the chain window.

use thiserror::Error;

/// Fatal chain-continuity failures raised by [`crate::ChainWindow`].
///
/// Both variants mean the window can no longer vouch for its contents;
/// the consumer must discard it and resync from an externally verified anchor.
#[derive(Debug, Error)]
pub enum ContinuityError {
    /// The new block does not chain from the block it claims to follow.
    #[error(
        "block {number}#{hash} does not chain from {expected_number}#{expected_hash} \
         (parent given: {parent_number}#{parent_hash})"
    )]
    BrokenChain {
        number: u64,
        hash: String,
        parent_number: u64,
        parent_hash: String,
        expected_number: u64,
        expected_hash: String,
    },

    /// A rollback attempted to rewrite a block at or below the finalized head.
    #[error("rollback at block {number} would rewrite finalized history (finalized head: {finalized_number})")]
    FinalityViolation { number: u64, finalized_number: u64 },
}
