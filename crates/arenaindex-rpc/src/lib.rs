//! arenaindex-rpc: the JSON-RPC plumbing under the ledger client.
//!
//! - [`RpcTransport`]: the async trait the ledger client is generic over
//! - [`JsonRpcRequest`] / [`JsonRpcResponse`]: wire types
//! - [`TransportError`]: transient vs. permanent failure classification
//! - [`RetryPolicy`]: capped exponential backoff
//! - [`HttpRpcClient`]: `reqwest` transport with per-request timeout and retry

pub mod error;
pub mod http;
pub mod request;
pub mod retry;
pub mod transport;

pub use error::TransportError;
pub use http::{HttpClientConfig, HttpRpcClient};
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId};
pub use retry::{RetryConfig, RetryPolicy};
pub use transport::RpcTransport;
