//! Indexer configuration.

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// Configuration for one indexer instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Unique name for this indexer (checkpoint stream key).
    pub id: String,
    pub chain_id: u64,
    /// JSON-RPC endpoint.
    pub rpc_url: String,
    /// ArenaEngine contract.
    pub contract_address: Address,
    /// First block to index.
    pub from_block: u64,
    /// Optional end block. `None` = follow the head forever.
    pub to_block: Option<u64>,
    /// Blocks behind the head to stay. `0` indexes the head itself and
    /// relies on reorg handling.
    pub confirmation_depth: u64,
    /// Maximum blocks per batch (one projection transaction).
    pub batch_size: u64,
    /// Maximum blocks per `eth_getLogs` sub-request.
    pub max_logs_range: u64,
    /// Concurrent `eth_getLogs` / enrichment requests.
    pub fetch_concurrency: usize,
    /// Delay between polls once synced (milliseconds).
    pub poll_interval_ms: u64,
    /// Deepest reorg the indexer will rewind through. Required.
    pub max_reorg_depth: u64,
    /// Per-RPC-call timeout (milliseconds).
    pub rpc_timeout_ms: u64,
    /// Per-store-transaction timeout (milliseconds).
    pub store_timeout_ms: u64,
    /// Chain block time used to derive arena durations (milliseconds).
    pub block_time_ms: u64,
    /// Asset pair recorded on new arenas.
    pub asset_pair: String,
}

impl IndexerConfig {
    /// Config with defaults for everything except the three values that have
    /// no sensible default.
    pub fn new(rpc_url: impl Into<String>, contract_address: Address, max_reorg_depth: u64) -> Self {
        Self {
            id: "arena-engine".into(),
            chain_id: 1,
            rpc_url: rpc_url.into(),
            contract_address,
            from_block: 0,
            to_block: None,
            confirmation_depth: 0,
            batch_size: 1000,
            max_logs_range: 500,
            fetch_concurrency: 4,
            poll_interval_ms: 1000,
            max_reorg_depth,
            rpc_timeout_ms: 30_000,
            store_timeout_ms: 30_000,
            block_time_ms: 1000,
            asset_pair: "ETH/USD".into(),
        }
    }

    /// Checkpoint stream key: one per indexer id and contract.
    pub fn stream(&self) -> String {
        format!("{}:{}:{:#x}", self.id, self.chain_id, self.contract_address)
    }

    /// Capacity of the recent block-hash window.
    pub fn hash_window_capacity(&self) -> usize {
        usize::try_from(self.max_reorg_depth.saturating_add(1)).unwrap_or(usize::MAX)
    }

    /// Reject configurations the driver can't run with.
    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.id.trim().is_empty() {
            return Err(invalid("id must not be empty"));
        }
        if self.rpc_url.trim().is_empty() {
            return Err(invalid("rpc_url must not be empty"));
        }
        if !(self.rpc_url.starts_with("http://") || self.rpc_url.starts_with("https://")) {
            return Err(invalid(format!(
                "rpc_url must be an http(s) URL, got '{}'",
                self.rpc_url
            )));
        }
        if self.contract_address == Address::ZERO {
            return Err(invalid("contract_address must not be the zero address"));
        }
        if self.max_reorg_depth == 0 {
            return Err(invalid("max_reorg_depth must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size must be at least 1"));
        }
        if self.max_logs_range == 0 {
            return Err(invalid("max_logs_range must be at least 1"));
        }
        if self.fetch_concurrency == 0 {
            return Err(invalid("fetch_concurrency must be at least 1"));
        }
        if self.poll_interval_ms == 0 {
            return Err(invalid("poll_interval_ms must be at least 1"));
        }
        if self.rpc_timeout_ms == 0 || self.store_timeout_ms == 0 {
            return Err(invalid("timeouts must be at least 1ms"));
        }
        if let Some(to) = self.to_block {
            if to < self.from_block {
                return Err(invalid(format!(
                    "to_block {to} is below from_block {}",
                    self.from_block
                )));
            }
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> IndexerError {
    IndexerError::Config(msg.into())
}
