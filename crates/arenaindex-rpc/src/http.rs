//! HTTP JSON-RPC client backed by `reqwest`.
//!
//! Every request carries the configured timeout; transient failures are
//! retried with backoff before surfacing to the caller.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::TransportError;
use crate::request::{JsonRpcRequest, JsonRpcResponse};
use crate::retry::{RetryConfig, RetryPolicy};
use crate::transport::RpcTransport;

/// Configuration for `HttpRpcClient`.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub retry: RetryConfig,
    pub request_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP JSON-RPC client.
pub struct HttpRpcClient {
    url: String,
    http: reqwest::Client,
    retry: RetryPolicy,
    request_timeout: Duration,
}

impl HttpRpcClient {
    /// Create a client for the given JSON-RPC endpoint URL.
    pub fn new(url: impl Into<String>, config: HttpClientConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TransportError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            url: url.into(),
            http,
            retry: RetryPolicy::new(config.retry),
            request_timeout: config.request_timeout,
        })
    }

    /// Create with default configuration.
    pub fn default_for(url: impl Into<String>) -> Result<Self, TransportError> {
        Self::new(url, HttpClientConfig::default())
    }

    fn map_reqwest(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout {
                ms: self.request_timeout.as_millis() as u64,
            }
        } else {
            TransportError::Http(e.to_string())
        }
    }

    async fn send_once(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let resp = self
            .http
            .post(&self.url)
            .json(req)
            .send()
            .await
            .map_err(|e| self.map_reqwest(e))?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(TransportError::RateLimited {
                endpoint: self.url.clone(),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Http(format!("HTTP {}: {body}", status.as_u16())));
        }

        let bytes = resp.bytes().await.map_err(|e| self.map_reqwest(e))?;
        Ok(serde_json::from_slice::<JsonRpcResponse>(&bytes)?)
    }
}

#[async_trait]
impl RpcTransport for HttpRpcClient {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let err = match self.send_once(&req).await {
                Ok(resp) => match resp.error {
                    // node-side throttling arrives as a 200 with an error body
                    Some(ref rpc) if matches!(rpc.code, -32005 | -32603) => {
                        TransportError::Rpc(rpc.clone())
                    }
                    _ => return Ok(resp),
                },
                Err(e) => e,
            };

            if !err.is_retryable() {
                return Err(err);
            }
            match self.retry.next_delay(attempt) {
                Some(delay) => {
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        method = %req.method,
                        error = %err,
                        url = %self.url,
                        "retrying request"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    tracing::error!(
                        attempt,
                        method = %req.method,
                        error = %err,
                        url = %self.url,
                        "max retries exceeded"
                    );
                    return Err(err);
                }
            }
        }
    }

    fn url(&self) -> &str {
        &self.url
    }
}
