//! Fixed backoff ladder for transient RPC failures.

use std::time::Duration;

/// Backoff ladder in milliseconds; attempts past the end stay clamped at the
/// last entry.
pub const BACKOFF_LADDER_MS: [u64; 6] = [100, 500, 2000, 5000, 10_000, 20_000];

/// Configuration for the retry loop.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (first try included). `None` keeps retrying
    /// forever — the default, since ingesters are expected to outlive
    /// provider incidents.
    pub max_attempts: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: None }
    }
}

impl RetryConfig {
    /// Returns `true` if another attempt is allowed after `attempts` failures.
    pub fn allows(&self, attempts: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempts < max,
            None => true,
        }
    }
}

/// Delay before the retry following the `attempt`-th failure (1-based).
pub fn backoff_delay(attempt: u32) -> Duration {
    let idx = (attempt.saturating_sub(1) as usize).min(BACKOFF_LADDER_MS.len() - 1);
    Duration::from_millis(BACKOFF_LADDER_MS[idx])
}
