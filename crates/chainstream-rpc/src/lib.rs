//! chainstream-rpc — retry-safe batched JSON-RPC transport.
//!
//! # Overview
//!
//! - [`RpcTransport`] — the async trait a transport implements (HTTP or mock)
//! - [`JsonRpcRequest`] / [`JsonRpcResponse`] — wire types
//! - [`RpcError`] — classified error type (retryable vs connection-class)
//! - [`RetryableRpc`] — retry ladder, in-flight admission gate, and
//!   batch bisection that isolates a poisoned request without discarding
//!   the healthy majority of a batch

pub mod client;
pub mod error;
pub mod http;
pub mod request;
pub mod retry;
pub mod transport;

pub use client::{RetryableRpc, RpcCall, RpcConfig};
pub use error::RpcError;
pub use http::HttpTransport;
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId};
pub use retry::{backoff_delay, RetryConfig, BACKOFF_LADDER_MS};
pub use transport::RpcTransport;
