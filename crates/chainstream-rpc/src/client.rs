//! The reliability layer: retry ladder, in-flight admission gate, and
//! poisoned-batch isolation via bisection.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Semaphore;

use crate::error::RpcError;
use crate::request::{JsonRpcRequest, JsonRpcResponse, RpcId};
use crate::retry::{backoff_delay, RetryConfig};
use crate::transport::RpcTransport;

/// One logical call inside a batch.
#[derive(Debug, Clone)]
pub struct RpcCall {
    pub method: String,
    pub params: Vec<Value>,
}

impl RpcCall {
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self { method: method.into(), params }
    }
}

/// Configuration for [`RetryableRpc`].
#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub retry: RetryConfig,
    /// Maximum number of concurrently in-flight HTTP requests. Requests
    /// beyond capacity queue first-come-first-served.
    pub max_in_flight: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            max_in_flight: 10,
        }
    }
}

/// Retry-safe client over a single endpoint.
///
/// Transient failures back off per the fixed ladder; non-retryable errors
/// propagate immediately. Batches are matched back by response `id`, and a
/// poisoned batch is narrowed down by bisection instead of being discarded.
pub struct RetryableRpc {
    transport: Arc<dyn RpcTransport>,
    config: RpcConfig,
    gate: Arc<Semaphore>,
    next_id: AtomicU64,
}

impl RetryableRpc {
    pub fn new(transport: Arc<dyn RpcTransport>, config: RpcConfig) -> Self {
        let gate = Arc::new(Semaphore::new(config.max_in_flight));
        Self {
            transport,
            config,
            gate,
            next_id: AtomicU64::new(1),
        }
    }

    /// Create with default configuration.
    pub fn default_for(transport: Arc<dyn RpcTransport>) -> Self {
        Self::new(transport, RpcConfig::default())
    }

    /// The endpoint this client talks to.
    pub fn url(&self) -> &str {
        self.transport.url()
    }

    fn assign_id(&self, call: &RpcCall) -> JsonRpcRequest {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        JsonRpcRequest::new(id, call.method.clone(), call.params.clone())
    }

    async fn send_once(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, RpcError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| RpcError::Protocol("admission gate closed".into()))?;
        self.transport.send(req).await
    }

    async fn send_batch_once(
        &self,
        reqs: Vec<JsonRpcRequest>,
    ) -> Result<Vec<JsonRpcResponse>, RpcError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| RpcError::Protocol("admission gate closed".into()))?;
        self.transport.send_batch(reqs).await
    }

    /// Issue a single call, retrying transient failures per the backoff
    /// ladder. JSON-RPC application errors propagate immediately.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let req = self.assign_id(&RpcCall::new(method, params));
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let outcome = self
                .send_once(req.clone())
                .await
                .and_then(|resp| resp.into_result().map_err(RpcError::Rpc));
            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && self.config.retry.allows(attempts) => {
                    let delay = backoff_delay(attempts);
                    tracing::warn!(
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        url = %self.transport.url(),
                        method = %req.method,
                        "retrying request"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_retryable() => {
                    return Err(RpcError::RetriesExhausted { attempts, last: Box::new(e) })
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One attempt of a whole batch: send as a JSON array, match responses
    /// back by `id`, surface per-item JSON-RPC errors as item results.
    async fn try_batch(&self, calls: &[RpcCall]) -> Result<Vec<Result<Value, RpcError>>, RpcError> {
        let reqs: Vec<JsonRpcRequest> = calls.iter().map(|c| self.assign_id(c)).collect();
        let responses = self.send_batch_once(reqs.clone()).await?;
        if responses.len() != reqs.len() {
            return Err(RpcError::Protocol(format!(
                "batch of {} got {} responses",
                reqs.len(),
                responses.len()
            )));
        }

        // Responses are matched by id, never by array position.
        let mut by_id: HashMap<u64, JsonRpcResponse> = HashMap::with_capacity(responses.len());
        for resp in responses {
            match resp.id {
                RpcId::Number(id) => {
                    by_id.insert(id, resp);
                }
                ref other => {
                    return Err(RpcError::Protocol(format!(
                        "batch response with unexpected id {other}"
                    )))
                }
            }
        }

        reqs.iter()
            .map(|req| {
                let id = match req.id {
                    RpcId::Number(id) => id,
                    _ => unreachable!("client always assigns numeric ids"),
                };
                let resp = by_id.remove(&id).ok_or_else(|| {
                    RpcError::Protocol(format!("no response for batch id {id}"))
                })?;
                Ok(resp.into_result().map_err(RpcError::Rpc))
            })
            .collect()
    }

    /// Issue a batch with whole-batch retries. The outer `Err` is a failure
    /// of the batch as a whole (after retries); inner errors are per-item
    /// JSON-RPC application errors.
    pub async fn batch_call(
        &self,
        calls: &[RpcCall],
    ) -> Result<Vec<Result<Value, RpcError>>, RpcError> {
        if calls.is_empty() {
            return Ok(vec![]);
        }
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.try_batch(calls).await {
                Ok(items) => return Ok(items),
                Err(e) if e.is_retryable() && self.config.retry.allows(attempts) => {
                    let delay = backoff_delay(attempts);
                    tracing::warn!(
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        size = calls.len(),
                        "retrying batch"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_retryable() => {
                    return Err(RpcError::RetriesExhausted { attempts, last: Box::new(e) })
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Execute a batch, isolating poisoned requests by bisection.
    ///
    /// A batch of size ≤ 1 goes through the normal retrying path. Larger
    /// batches get one un-retried attempt; if that fails as a whole (a
    /// connection- or protocol-class error, not a per-item one), the batch is
    /// split in half and each half handled the same way recursively, results
    /// concatenated in original order. Full backoff applies again at size-1
    /// leaves, so exactly the failing call(s) end up isolated while the
    /// healthy majority keeps its batching: at worst `O(n)` individual calls
    /// plus `O(log n)` extra round-trips when a single item is bad.
    pub fn reduce_batch_on_retry<'a>(
        &'a self,
        calls: &'a [RpcCall],
    ) -> Pin<Box<dyn Future<Output = Vec<Result<Value, RpcError>>> + Send + 'a>> {
        Box::pin(async move {
            match calls {
                [] => vec![],
                [call] => vec![self.call(&call.method, call.params.clone()).await],
                _ => match self.try_batch(calls).await {
                    Ok(items) => items,
                    Err(e) => {
                        debug_assert!(e.is_connection_class());
                        let mid = calls.len() / 2;
                        tracing::debug!(
                            size = calls.len(),
                            error = %e,
                            "batch failed as a whole, bisecting"
                        );
                        let mut left = self.reduce_batch_on_retry(&calls[..mid]).await;
                        let right = self.reduce_batch_on_retry(&calls[mid..]).await;
                        left.extend(right);
                        left
                    }
                },
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Scriptable transport: single sends fail for "poisoned" methods, batch
    /// sends fail as a whole when any request in them is poisoned.
    struct MockTransport {
        poisoned: Vec<String>,
        /// HTTP statuses to fail with before succeeding (single sends).
        fail_first: Mutex<Vec<u16>>,
        reverse_batch_order: bool,
        single_sends: AtomicUsize,
        batch_sends: AtomicUsize,
    }

    impl MockTransport {
        fn new() -> Self {
            Self {
                poisoned: vec![],
                fail_first: Mutex::new(vec![]),
                reverse_batch_order: false,
                single_sends: AtomicUsize::new(0),
                batch_sends: AtomicUsize::new(0),
            }
        }

        fn ok_response(req: &JsonRpcRequest) -> JsonRpcResponse {
            JsonRpcResponse {
                jsonrpc: "2.0".into(),
                id: req.id.clone(),
                result: Some(json!(format!("result:{}", req.method))),
                error: None,
            }
        }
    }

    #[async_trait]
    impl RpcTransport for MockTransport {
        async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, RpcError> {
            self.single_sends.fetch_add(1, Ordering::Relaxed);
            if let Some(status) = self.fail_first.lock().unwrap().pop() {
                return Err(RpcError::Http { status, body: "scripted".into() });
            }
            if self.poisoned.contains(&req.method) {
                return Err(RpcError::Protocol(format!("malformed call {}", req.method)));
            }
            Ok(Self::ok_response(&req))
        }

        async fn send_batch(
            &self,
            reqs: Vec<JsonRpcRequest>,
        ) -> Result<Vec<JsonRpcResponse>, RpcError> {
            self.batch_sends.fetch_add(1, Ordering::Relaxed);
            if let Some(bad) = reqs.iter().find(|r| self.poisoned.contains(&r.method)) {
                return Err(RpcError::Protocol(format!("malformed call {}", bad.method)));
            }
            let mut responses: Vec<JsonRpcResponse> =
                reqs.iter().map(Self::ok_response).collect();
            if self.reverse_batch_order {
                responses.reverse();
            }
            Ok(responses)
        }

        fn url(&self) -> &str {
            "mock://"
        }
    }

    fn client(transport: MockTransport) -> RetryableRpc {
        RetryableRpc::default_for(Arc::new(transport))
    }

    fn calls(n: usize) -> Vec<RpcCall> {
        (0..n).map(|i| RpcCall::new(format!("m{i}"), vec![])).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn call_retries_transient_then_succeeds() {
        let transport = MockTransport {
            fail_first: Mutex::new(vec![503, 429]),
            ..MockTransport::new()
        };
        let rpc = client(transport);
        let value = rpc.call("m0", vec![]).await.unwrap();
        assert_eq!(value, json!("result:m0"));
    }

    #[tokio::test]
    async fn call_propagates_non_retryable_immediately() {
        let transport = MockTransport {
            fail_first: Mutex::new(vec![400]),
            ..MockTransport::new()
        };
        let rpc = client(transport);
        let err = rpc.call("m0", vec![]).await.unwrap_err();
        assert!(matches!(err, RpcError::Http { status: 400, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn call_reports_exhausted_retries() {
        let transport = MockTransport {
            fail_first: Mutex::new(vec![503; 10]),
            ..MockTransport::new()
        };
        let rpc = RetryableRpc::new(
            Arc::new(transport),
            RpcConfig {
                retry: RetryConfig { max_attempts: Some(3) },
                ..RpcConfig::default()
            },
        );
        let err = rpc.call("m0", vec![]).await.unwrap_err();
        match err {
            RpcError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(last.is_retryable());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn batch_matches_responses_by_id_not_position() {
        let transport = MockTransport {
            reverse_batch_order: true,
            ..MockTransport::new()
        };
        let rpc = client(transport);
        let items = rpc.batch_call(&calls(4)).await.unwrap();
        for (i, item) in items.iter().enumerate() {
            assert_eq!(item.as_ref().unwrap(), &json!(format!("result:m{i}")));
        }
    }

    #[tokio::test]
    async fn bisection_isolates_single_poisoned_call() {
        // 8 calls, index 5 always fails with a protocol error.
        let transport = MockTransport {
            poisoned: vec!["m5".into()],
            ..MockTransport::new()
        };
        let rpc = client(transport);
        let results = rpc.reduce_batch_on_retry(&calls(8)).await;
        assert_eq!(results.len(), 8);
        for (i, result) in results.iter().enumerate() {
            if i == 5 {
                let err = result.as_ref().unwrap_err();
                assert!(err.to_string().contains("m5"), "error must name the bad call");
            } else {
                assert_eq!(result.as_ref().unwrap(), &json!(format!("result:m{i}")));
            }
        }
    }

    #[tokio::test]
    async fn bisection_keeps_healthy_majority_batched() {
        let mock = Arc::new(MockTransport {
            poisoned: vec!["m5".into()],
            ..MockTransport::new()
        });
        let rpc = RetryableRpc::default_for(mock.clone());
        let _ = rpc.reduce_batch_on_retry(&calls(8)).await;
        // [8]✗ → [0..4]✓ [4..8]✗ → [4,5]✗ [6,7]✓ → leaves 4 and 5 go single.
        assert_eq!(mock.batch_sends.load(Ordering::Relaxed), 5);
        assert_eq!(mock.single_sends.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn bisection_handles_poison_at_every_position() {
        for bad in 0..6usize {
            let transport = MockTransport {
                poisoned: vec![format!("m{bad}")],
                ..MockTransport::new()
            };
            let rpc = client(transport);
            let results = rpc.reduce_batch_on_retry(&calls(6)).await;
            for (i, result) in results.iter().enumerate() {
                assert_eq!(result.is_err(), i == bad, "position {bad}, index {i}");
            }
        }
    }

    #[tokio::test]
    async fn empty_and_single_batches() {
        let rpc = client(MockTransport::new());
        assert!(rpc.reduce_batch_on_retry(&[]).await.is_empty());
        let one = rpc.reduce_batch_on_retry(&calls(1)).await;
        assert_eq!(one[0].as_ref().unwrap(), &json!("result:m0"));
    }

    #[tokio::test]
    async fn admission_gate_bounds_in_flight_requests() {
        struct Gauge {
            current: AtomicUsize,
            peak: AtomicUsize,
        }

        struct SlowTransport(Arc<Gauge>);

        #[async_trait]
        impl RpcTransport for SlowTransport {
            async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, RpcError> {
                let now = self.0.current.fetch_add(1, Ordering::SeqCst) + 1;
                self.0.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                self.0.current.fetch_sub(1, Ordering::SeqCst);
                Ok(MockTransport::ok_response(&req))
            }

            async fn send_batch(
                &self,
                _reqs: Vec<JsonRpcRequest>,
            ) -> Result<Vec<JsonRpcResponse>, RpcError> {
                unimplemented!("singles only")
            }

            fn url(&self) -> &str {
                "mock://slow"
            }
        }

        let gauge = Arc::new(Gauge { current: AtomicUsize::new(0), peak: AtomicUsize::new(0) });
        let rpc = Arc::new(RetryableRpc::new(
            Arc::new(SlowTransport(gauge.clone())),
            RpcConfig { max_in_flight: 2, ..RpcConfig::default() },
        ));

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let rpc = rpc.clone();
                tokio::spawn(async move { rpc.call(&format!("m{i}"), vec![]).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
    }
}
