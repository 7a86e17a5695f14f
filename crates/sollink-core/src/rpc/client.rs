use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, trace, Instrument, Span};

use crate::error::CoreError;

use super::protocol::{parse_response_id, JsonRpcRequest, JsonRpcResponse};
use super::transport::{HttpOptions, HttpTransport, RpcTransport};
use super::LedgerRpc;

/// JSON-RPC client over a [`RpcTransport`].
///
/// Safe to share across tasks; request ids come from one atomic counter, so
/// concurrent calls never reuse an id.
pub struct RpcClient {
    transport: Arc<dyn RpcTransport>,
    next_id: AtomicU64,
    span: Span,
}

impl RpcClient {
    /// Client for an HTTP(S) endpoint with default transport options.
    pub fn new(endpoint: &str, span: Span) -> Result<Self, CoreError> {
        Self::with_options(endpoint, HttpOptions::default(), span)
    }

    pub fn with_options(
        endpoint: &str,
        options: HttpOptions,
        span: Span,
    ) -> Result<Self, CoreError> {
        let transport = HttpTransport::new(endpoint, options)?;
        Ok(Self::with_transport(Arc::new(transport), span))
    }

    pub fn with_transport(transport: Arc<dyn RpcTransport>, span: Span) -> Self {
        Self {
            transport,
            next_id: AtomicU64::new(initial_request_id()),
            span,
        }
    }

    fn reserve_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn rpc_call(&self, method: &str, params: Vec<Value>) -> Result<Value, CoreError> {
        let id = self.reserve_request_id();
        debug!(
            rpc.id = id,
            rpc.method = method,
            rpc.params = params.len(),
            "rpc call"
        );
        let body = JsonRpcRequest::new(id, method, &params).to_json()?;

        let response = self.transport.post(body).await.inspect_err(|e| {
            debug!(rpc.id = id, rpc.method = method, error = %e, "rpc transport failure");
        })?;
        debug!(rpc.id = id, rpc.method = method, body_len = response.len(), "rpc response");
        trace!(rpc.id = id, rpc.method = method, body = %response, "rpc response body");

        let decoded: JsonRpcResponse = serde_json::from_str(&response).map_err(|e| {
            CoreError::Protocol(format!("decode JSON-RPC response: {e}; body={response}"))
        })?;

        // Servers answer requests they could not attribute (rate limits,
        // invalid requests) with a null id; the error is still the answer.
        if decoded.error.is_some() {
            return decoded.into_result();
        }

        let echoed = parse_response_id(&decoded.id)?;
        if echoed != id {
            return Err(CoreError::Protocol(format!(
                "response id {echoed} does not match request id {id} for {method}"
            )));
        }

        decoded.into_result()
    }
}

#[async_trait]
impl LedgerRpc for RpcClient {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, CoreError> {
        self.rpc_call(method, params)
            .instrument(self.span.clone())
            .await
    }
}

/// Seed the id counter from the clock so ids stay distinct across client
/// restarts against the same server logs.
fn initial_request_id() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(1)
}
