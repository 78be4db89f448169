//! Transport-level error types and their retry classification.

use thiserror::Error;

use crate::request::JsonRpcError;

/// Errors that can occur during an RPC operation.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Non-2xx HTTP status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Connection could not be established or was reset mid-flight.
    #[error("connection error: {0}")]
    Connect(String),

    /// Request or body read timed out.
    #[error("request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Well-formed JSON-RPC application error returned by the node.
    #[error("{0}")]
    Rpc(JsonRpcError),

    /// Malformed response: bad JSON, unknown ids, wrong shape.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The retry ceiling was reached; wraps the last error seen.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<RpcError>,
    },
}

impl RpcError {
    /// Returns `true` if this error is transient and worth backing off on:
    /// rate limiting, gateway failures, timeouts, connection resets.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => matches!(status, 429 | 502 | 503 | 504),
            Self::Connect(_) | Self::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` for failures of the request as a whole, as opposed to a
    /// well-formed per-item JSON-RPC error. This is what triggers batch
    /// bisection: a connection- or protocol-class failure leaves unknown which
    /// request inside the batch poisoned it.
    pub fn is_connection_class(&self) -> bool {
        !matches!(self, Self::Rpc(_))
    }
}
