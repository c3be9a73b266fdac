//! The `RpcTransport` trait.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::TransportError;
use crate::request::{JsonRpcRequest, JsonRpcResponse};

/// One JSON-RPC endpoint.
///
/// Implementations own their retry and timeout behaviour: a returned
/// retryable error means the transport has already exhausted its attempts.
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    /// Send a single request and return the raw response.
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError>;

    /// Endpoint identifier for logs.
    fn url(&self) -> &str;

    /// Call `method` and deserialize its result.
    async fn call<T: DeserializeOwned>(
        &self,
        id: u64,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, TransportError> {
        let resp = self.send(JsonRpcRequest::new(id, method, params)).await?;
        let result = resp.into_result().map_err(TransportError::Rpc)?;
        serde_json::from_value(result).map_err(TransportError::Deserialization)
    }
}
