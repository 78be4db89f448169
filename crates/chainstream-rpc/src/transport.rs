//! The `RpcTransport` trait — the seam between the reliability layer and the
//! actual wire.

use async_trait::async_trait;

use crate::error::RpcError;
use crate::request::{JsonRpcRequest, JsonRpcResponse};

/// One JSON-RPC endpoint. Implementations perform a single attempt per call;
/// retries, backoff and batch isolation live in [`crate::RetryableRpc`].
///
/// # Thread Safety
/// Implementations must be `Send + Sync` for use across Tokio tasks, and the
/// trait is object-safe (`Arc<dyn RpcTransport>`).
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    /// Send a single JSON-RPC request and return the raw response.
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, RpcError>;

    /// Send a batch as one JSON array. The returned responses may arrive in
    /// any order; callers match them back by `id`.
    async fn send_batch(&self, reqs: Vec<JsonRpcRequest>)
        -> Result<Vec<JsonRpcResponse>, RpcError>;

    /// The endpoint's identifier (URL or name), for logging.
    fn url(&self) -> &str;
}
