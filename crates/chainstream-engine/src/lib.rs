//! chainstream-engine — phased block ingestion over any [`BlockSource`].
//!
//! # Overview
//!
//! - [`BlockStreamEngine`] — builds finalized and live streams over a hot
//!   source plus an optional archive; each stream owns a fork-aware
//!   `ChainWindow` and moves through `Cold → CatchingUp → Live`
//! - [`LiveSubscriptionGuard`] — wraps a push subscription with a bounded
//!   drop-oldest buffer and a silence watchdog
//! - [`WsHeadSubscription`] — tokio-tungstenite head subscription feeding the
//!   guard
//!
//! [`BlockSource`]: chainstream_core::BlockSource

pub mod engine;
pub mod error;
pub mod guard;
pub mod ws;

pub use engine::{BlockStreamEngine, EngineConfig, FinalizedStream, LiveEvent, LiveStream, StreamPhase};
pub use error::{GuardError, StreamError};
pub use guard::{GuardConfig, LiveSubscriptionGuard, ResilientSubscription, Subscription};
pub use ws::WsHeadSubscription;
