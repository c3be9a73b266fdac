//! Transport-level error types.

use thiserror::Error;

use crate::request::JsonRpcError;

/// Errors that can occur while talking to the chain RPC endpoint.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed (connection refused, reset, 5xx, ...).
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON-RPC error object returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// The endpoint answered 429.
    #[error("Rate limit exceeded (endpoint: {endpoint})")]
    RateLimited { endpoint: String },

    /// No answer within the configured timeout.
    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Response body could not be deserialized.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns `true` for failures worth retrying (network, timeout, throttling,
    /// and node-side errors that nodes emit under load).
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout { .. } | Self::RateLimited { .. } => true,
            // -32005: limit exceeded, -32603: internal error (overloaded node)
            Self::Rpc(err) => matches!(err.code, -32005 | -32603),
            Self::Deserialization(_) | Self::Other(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(TransportError::Http("reset".into()).is_retryable());
        assert!(TransportError::Timeout { ms: 10 }.is_retryable());
        assert!(TransportError::RateLimited { endpoint: "x".into() }.is_retryable());
        assert!(!TransportError::Other("bad".into()).is_retryable());

        let reverted = JsonRpcError {
            code: 3,
            message: "execution reverted".into(),
            data: None,
        };
        assert!(!TransportError::Rpc(reverted).is_retryable());

        let overloaded = JsonRpcError {
            code: -32005,
            message: "limit exceeded".into(),
            data: None,
        };
        assert!(TransportError::Rpc(overloaded).is_retryable());
    }
}
