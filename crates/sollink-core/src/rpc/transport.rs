//! Request/response transport seam.
//!
//! [`RpcClient`](super::RpcClient) only needs "post this JSON text, give me
//! the response text". The HTTP library stays behind [`RpcTransport`], so tests
//! and alternative stacks plug in without touching the client.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use tracing::trace;

use crate::error::{CoreError, TransportError};

use super::connection::parse_http_endpoint;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Send one JSON-RPC request body and return the raw response body.
    async fn post(&self, body: String) -> Result<String, TransportError>;
}

// ==============================================================================
// HTTP Transport
// ==============================================================================

/// Options for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Extra headers sent with every request, e.g. provider API keys.
    pub headers: Vec<(String, String)>,
    /// Outbound request budget; `None` disables limiting.
    pub requests_per_second: Option<u32>,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            headers: Vec::new(),
            requests_per_second: None,
        }
    }
}

/// JSON-RPC over HTTP(S) using a pooled `reqwest` client.
pub struct HttpTransport {
    client: reqwest::Client,
    url: reqwest::Url,
    limiter: Option<DirectRateLimiter>,
}

impl HttpTransport {
    pub fn new(endpoint: &str, options: HttpOptions) -> Result<Self, CoreError> {
        let url = parse_http_endpoint(endpoint)?;

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        for (name, value) in &options.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| CoreError::InvalidEncoding(format!("header name `{name}`: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| CoreError::InvalidEncoding(format!("header `{name}` value: {e}")))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .connect_timeout(options.connect_timeout)
            .timeout(options.request_timeout)
            .pool_max_idle_per_host(32)
            .tcp_nodelay(true)
            .default_headers(headers)
            .build()
            .map_err(TransportError::Http)?;

        let limiter = match options.requests_per_second {
            None => None,
            Some(limit) => {
                let limit = NonZeroU32::new(limit).ok_or_else(|| {
                    CoreError::InvalidEncoding("requests_per_second must be at least 1".to_owned())
                })?;
                Some(RateLimiter::direct(Quota::per_second(limit)))
            }
        };

        Ok(Self {
            client,
            url,
            limiter,
        })
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn post(&self, body: String) -> Result<String, TransportError> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let response = self.client.post(self.url.clone()).body(body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        trace!(%status, body_len = text.len(), "http response");

        // JSON-RPC servers report method failures with a 200 and an error
        // object, but some map them onto 4xx/5xx with the same JSON body. Only
        // bodies that are not JSON are treated as transport failures.
        if !status.is_success() && serde_json::from_str::<serde_json::Value>(&text).is_err() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }
}
