//! HTTP JSON-RPC transport backed by `reqwest`.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::RpcError;
use crate::request::{JsonRpcRequest, JsonRpcResponse};
use crate::transport::RpcTransport;

/// Single-endpoint HTTP POST transport.
pub struct HttpTransport {
    url: String,
    http: reqwest::Client,
    request_timeout: Duration,
}

impl HttpTransport {
    /// Create a transport for the given JSON-RPC endpoint URL.
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| RpcError::Connect(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            http,
            request_timeout,
        })
    }

    fn classify(&self, e: reqwest::Error) -> RpcError {
        if e.is_timeout() {
            RpcError::Timeout { ms: self.request_timeout.as_millis() as u64 }
        } else if e.is_connect() || e.is_request() {
            RpcError::Connect(e.to_string())
        } else {
            RpcError::Protocol(e.to_string())
        }
    }

    async fn post<B: serde::Serialize>(&self, body: &B) -> Result<reqwest::Response, RpcError> {
        let resp = self
            .http
            .post(&self.url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RpcError::Http { status: status.as_u16(), body });
        }
        Ok(resp)
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, RpcError> {
        let resp = self.post(&req).await?;
        resp.json::<JsonRpcResponse>()
            .await
            .map_err(|e| self.classify(e))
    }

    async fn send_batch(
        &self,
        reqs: Vec<JsonRpcRequest>,
    ) -> Result<Vec<JsonRpcResponse>, RpcError> {
        if reqs.is_empty() {
            return Ok(vec![]);
        }
        let resp = self.post(&reqs).await?;
        resp.json::<Vec<JsonRpcResponse>>()
            .await
            .map_err(|e| self.classify(e))
    }

    fn url(&self) -> &str {
        &self.url
    }
}
