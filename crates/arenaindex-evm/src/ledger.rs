//! Ledger client: everything the indexer reads from the chain.
//!
//! [`RpcLedger`] speaks JSON-RPC (`eth_blockNumber`, `eth_getBlockByNumber`,
//! `eth_getLogs`, `eth_getTransactionByHash`, `eth_call`) over any
//! [`RpcTransport`]. Log ranges wider than `max_logs_range` are split and the
//! sub-ranges fetched concurrently, then reassembled in chain order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::Address;
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use arenaindex_core::{BlockHashSource, BlockSummary, IndexerConfig, IndexerError};
use arenaindex_rpc::{RpcTransport, TransportError};

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "blockHash")]
    pub block_hash: String,
    #[serde(rename = "transactionHash")]
    pub tx_hash: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl RawLog {
    pub fn block_number_u64(&self) -> Result<u64, IndexerError> {
        parse_hex_u64(&self.block_number)
    }

    pub fn log_index_u64(&self) -> Result<u64, IndexerError> {
        parse_hex_u64(&self.log_index)
    }

    /// `(block, log_index)`: the log's position in the chain.
    pub fn position(&self) -> Result<(u64, u64), IndexerError> {
        Ok((self.block_number_u64()?, self.log_index_u64()?))
    }

    /// Returns `true` if this log was removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }
}

/// Read access to the chain.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Current head block number.
    async fn head_block_number(&self) -> Result<u64, IndexerError>;

    /// Block summary at `number`, `None` if the node doesn't have it.
    async fn block(&self, number: u64) -> Result<Option<BlockSummary>, IndexerError>;

    /// Canonical hash at `number`.
    async fn canonical_hash(&self, number: u64) -> Result<Option<String>, IndexerError> {
        Ok(self.block(number).await?.map(|b| b.hash))
    }

    /// Contract logs in `[from, to]`, sorted by `(block, log_index)`, with
    /// removed logs dropped.
    async fn logs(&self, from: u64, to: u64) -> Result<Vec<RawLog>, IndexerError>;

    /// Calldata of a transaction, `None` if the node doesn't know it.
    async fn transaction_input(&self, tx_hash: &str) -> Result<Option<Vec<u8>>, IndexerError>;

    /// `eth_call` against `to` at `block` (`None` = latest).
    async fn call(&self, to: Address, data: Vec<u8>, block: Option<u64>) -> Result<Vec<u8>, IndexerError>;
}

/// Adapts any [`LedgerClient`] to the reorg detector's hash source.
pub struct LedgerHashes<'a, L: ?Sized>(pub &'a L);

#[async_trait]
impl<'a, L: LedgerClient + ?Sized> BlockHashSource for LedgerHashes<'a, L> {
    async fn canonical_hash(&self, number: u64) -> Result<Option<String>, IndexerError> {
        self.0.canonical_hash(number).await
    }
}

// ─── JSON-RPC implementation ────────────────────────────────────────────────

/// What [`RpcLedger`] needs from the indexer configuration.
#[derive(Debug, Clone)]
pub struct LedgerSettings {
    /// Contract whose logs are fetched.
    pub contract: Address,
    /// Maximum blocks per `eth_getLogs` request.
    pub max_logs_range: u64,
    /// Sub-range requests in flight at once.
    pub fetch_concurrency: usize,
    /// Upper bound on any single call, retries included.
    pub rpc_timeout: Duration,
}

impl LedgerSettings {
    pub fn from_config(config: &IndexerConfig) -> Self {
        Self {
            contract: config.contract_address,
            max_logs_range: config.max_logs_range.max(1),
            fetch_concurrency: config.fetch_concurrency.max(1),
            rpc_timeout: Duration::from_millis(config.rpc_timeout_ms),
        }
    }
}

/// [`LedgerClient`] over a JSON-RPC transport.
pub struct RpcLedger<T> {
    transport: T,
    settings: LedgerSettings,
    next_id: AtomicU64,
}

impl<T: RpcTransport> RpcLedger<T> {
    pub fn new(transport: T, settings: LedgerSettings) -> Self {
        Self {
            transport,
            settings,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    async fn request<R: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<R, IndexerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let timeout = self.settings.rpc_timeout;
        match tokio::time::timeout(timeout, self.transport.call(id, method, params)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(fetch_failure(method, self.transport.url(), err)),
            Err(_) => Err(IndexerError::transient(format!(
                "{method} timed out after {}ms",
                timeout.as_millis()
            ))),
        }
    }

    async fn get_logs(&self, from: u64, to: u64) -> Result<Vec<RawLog>, IndexerError> {
        let filter = json!({
            "address": format!("{:#x}", self.settings.contract),
            "fromBlock": format!("{from:#x}"),
            "toBlock": format!("{to:#x}"),
        });
        let logs: Vec<RawLog> = self.request("eth_getLogs", vec![filter]).await?;
        tracing::debug!(from, to, logs = logs.len(), "eth_getLogs");
        Ok(logs)
    }
}

#[async_trait]
impl<T: RpcTransport> LedgerClient for RpcLedger<T> {
    async fn head_block_number(&self) -> Result<u64, IndexerError> {
        let hex: String = self.request("eth_blockNumber", vec![]).await?;
        parse_hex_u64(&hex)
    }

    async fn block(&self, number: u64) -> Result<Option<BlockSummary>, IndexerError> {
        let value: Option<Value> = self
            .request("eth_getBlockByNumber", vec![json!(format!("{number:#x}")), json!(false)])
            .await?;
        match value {
            None => Ok(None),
            Some(v) => block_from_json(&v)
                .map(Some)
                .ok_or_else(|| IndexerError::transient(format!("malformed block {number} from node"))),
        }
    }

    async fn logs(&self, from: u64, to: u64) -> Result<Vec<RawLog>, IndexerError> {
        let requests: Vec<_> = split_range(from, to, self.settings.max_logs_range)
            .into_iter()
            .map(|(a, b)| self.get_logs(a, b))
            .collect();
        let chunks: Vec<Vec<RawLog>> = stream::iter(requests)
            .buffered(self.settings.fetch_concurrency)
            .try_collect()
            .await?;

        let mut keyed = Vec::new();
        for log in chunks.into_iter().flatten() {
            if log.is_removed() {
                continue;
            }
            let position = log
                .position()
                .map_err(|e| IndexerError::transient(format!("log with unreadable position: {e}")))?;
            keyed.push((position, log));
        }
        keyed.sort_by_key(|(position, _)| *position);
        Ok(keyed.into_iter().map(|(_, log)| log).collect())
    }

    async fn transaction_input(&self, tx_hash: &str) -> Result<Option<Vec<u8>>, IndexerError> {
        let value: Option<Value> = self
            .request("eth_getTransactionByHash", vec![json!(tx_hash)])
            .await?;
        let Some(tx) = value else {
            return Ok(None);
        };
        let input = tx["input"]
            .as_str()
            .ok_or_else(|| IndexerError::transient(format!("transaction {tx_hash} has no input")))?;
        decode_hex(input).map(Some)
    }

    async fn call(&self, to: Address, data: Vec<u8>, block: Option<u64>) -> Result<Vec<u8>, IndexerError> {
        let tag = match block {
            Some(n) => format!("{n:#x}"),
            None => "latest".to_string(),
        };
        let request = json!({
            "to": format!("{to:#x}"),
            "data": format!("0x{}", hex::encode(&data)),
        });
        let out: String = self.request("eth_call", vec![request, json!(tag)]).await?;
        decode_hex(&out)
    }
}

fn fetch_failure(method: &str, url: &str, err: TransportError) -> IndexerError {
    tracing::warn!(method, url, error = %err, retryable = err.is_retryable(), "rpc call failed");
    IndexerError::transient(format!("{method}: {err}"))
}

/// Inclusive sub-ranges of at most `max_range` blocks covering `[from, to]`.
pub fn split_range(from: u64, to: u64, max_range: u64) -> Vec<(u64, u64)> {
    let max_range = max_range.max(1);
    let mut ranges = Vec::new();
    let mut start = from;
    while start <= to {
        let end = start.saturating_add(max_range - 1).min(to);
        ranges.push((start, end));
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }
    ranges
}

/// Parse a hex-encoded quantity (with or without `0x`).
pub fn parse_hex_u64(s: &str) -> Result<u64, IndexerError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16)
        .map_err(|e| IndexerError::transient(format!("bad hex quantity '{s}': {e}")))
}

fn decode_hex(s: &str) -> Result<Vec<u8>, IndexerError> {
    hex::decode(s.strip_prefix("0x").unwrap_or(s))
        .map_err(|e| IndexerError::transient(format!("bad hex data from node: {e}")))
}

/// Convert an `eth_getBlockByNumber` result to a [`BlockSummary`].
pub fn block_from_json(v: &Value) -> Option<BlockSummary> {
    Some(BlockSummary {
        number: parse_hex_u64(v["number"].as_str()?).ok()?,
        hash: v["hash"].as_str()?.to_lowercase(),
        parent_hash: v["parentHash"].as_str()?.to_lowercase(),
        timestamp: parse_hex_u64(v["timestamp"].as_str()?).ok()? as i64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use arenaindex_rpc::{JsonRpcRequest, JsonRpcResponse};

    #[test]
    fn parse_hex_u64_basic() {
        assert_eq!(parse_hex_u64("0x1").unwrap(), 1);
        assert_eq!(parse_hex_u64("0xff").unwrap(), 255);
        assert_eq!(parse_hex_u64("1234").unwrap(), 0x1234);
        assert!(parse_hex_u64("0xzz").is_err());
    }

    #[test]
    fn raw_log_position() {
        let log = RawLog {
            address: "0x0".into(),
            topics: vec![],
            data: "0x".into(),
            block_number: "0x12a05f200".into(), // 5_000_000_000
            block_hash: "0x0".into(),
            tx_hash: "0x0".into(),
            log_index: "0x5".into(),
            removed: None,
        };
        assert_eq!(log.position().unwrap(), (5_000_000_000, 5));
        assert!(!log.is_removed());
    }

    #[test]
    fn ranges_cover_without_overlap() {
        assert_eq!(split_range(1, 10, 4), vec![(1, 4), (5, 8), (9, 10)]);
        assert_eq!(split_range(7, 7, 500), vec![(7, 7)]);
        assert!(split_range(8, 7, 500).is_empty());
        assert_eq!(split_range(1, 3, 0), vec![(1, 1), (2, 2), (3, 3)]);
    }

    #[test]
    fn block_json_is_normalized() {
        let v = json!({
            "number": "0x10",
            "hash": "0xABCD",
            "parentHash": "0xAB00",
            "timestamp": "0x64",
        });
        let b = block_from_json(&v).unwrap();
        assert_eq!(b.number, 16);
        assert_eq!(b.hash, "0xabcd");
        assert_eq!(b.timestamp, 100);
        assert!(block_from_json(&json!({ "number": "0x1" })).is_none());
    }

    /// Answers `eth_getLogs` from a canned list, one response per request,
    /// and records each requested range.
    struct Scripted {
        responses: Mutex<VecDeque<Result<Value, TransportError>>>,
        seen: Mutex<Vec<JsonRpcRequest>>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<Value, TransportError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RpcTransport for Scripted {
        async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
            self.seen.lock().unwrap().push(req);
            let next = self.responses.lock().unwrap().pop_front();
            match next {
                Some(Ok(v)) => Ok(JsonRpcResponse::ok(1, v)),
                Some(Err(e)) => Err(e),
                None => Err(TransportError::Other("no scripted response".into())),
            }
        }

        fn url(&self) -> &str {
            "mock://scripted"
        }
    }

    fn log_json(block: u64, index: u64, removed: bool) -> Value {
        json!({
            "address": "0x1111111111111111111111111111111111111111",
            "topics": [],
            "data": "0x",
            "blockNumber": format!("{block:#x}"),
            "blockHash": format!("0x{block:064x}"),
            "transactionHash": "0x01",
            "logIndex": format!("{index:#x}"),
            "removed": removed,
        })
    }

    fn settings(max_logs_range: u64, fetch_concurrency: usize) -> LedgerSettings {
        LedgerSettings {
            contract: Address::repeat_byte(0x11),
            max_logs_range,
            fetch_concurrency,
            rpc_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn logs_are_split_merged_and_sorted() {
        // second chunk answers with out-of-order logs and a removed one
        let transport = Scripted::new(vec![
            Ok(json!([log_json(2, 0, false)])),
            Ok(json!([log_json(5, 3, false), log_json(4, 1, true), log_json(4, 0, false)])),
        ]);
        let ledger = RpcLedger::new(transport, settings(3, 1));

        let logs = ledger.logs(1, 5).await.unwrap();
        let positions: Vec<_> = logs.iter().map(|l| l.position().unwrap()).collect();
        assert_eq!(positions, vec![(2, 0), (4, 0), (5, 3)]);

        let seen = ledger.transport.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].params[0]["fromBlock"], "0x1");
        assert_eq!(seen[0].params[0]["toBlock"], "0x3");
        assert_eq!(seen[1].params[0]["fromBlock"], "0x4");
        assert_eq!(seen[1].params[0]["toBlock"], "0x5");
        assert_eq!(
            seen[0].params[0]["address"],
            "0x1111111111111111111111111111111111111111"
        );
    }

    #[tokio::test]
    async fn any_failed_chunk_fails_the_range() {
        let transport = Scripted::new(vec![
            Ok(json!([log_json(1, 0, false)])),
            Err(TransportError::Timeout { ms: 10 }),
        ]);
        let ledger = RpcLedger::new(transport, settings(1, 2));
        let err = ledger.logs(1, 2).await.unwrap_err();
        assert!(err.is_transient(), "{err}");
    }

    #[tokio::test]
    async fn call_hex_round_trip() {
        let transport = Scripted::new(vec![Ok(json!("0x00ff"))]);
        let ledger = RpcLedger::new(transport, settings(10, 1));
        let out = ledger
            .call(Address::repeat_byte(0x22), vec![0xde, 0xad], Some(16))
            .await
            .unwrap();
        assert_eq!(out, vec![0x00, 0xff]);

        let seen = ledger.transport.seen.lock().unwrap();
        assert_eq!(seen[0].method, "eth_call");
        assert_eq!(seen[0].params[0]["data"], "0xdead");
        assert_eq!(seen[0].params[1], "0x10");
    }

    #[tokio::test]
    async fn missing_block_and_transaction_are_none() {
        let transport = Scripted::new(vec![Ok(Value::Null), Ok(Value::Null)]);
        let ledger = RpcLedger::new(transport, settings(10, 1));
        assert!(ledger.block(99).await.unwrap().is_none());
        assert!(ledger.transaction_input("0xabc").await.unwrap().is_none());
    }
}
