//! Fluent builder API for indexer configurations.
//!
//! # Example
//!
//! ```rust,no_run
//! use arenaindex_evm::IndexerBuilder;
//! use arenaindex_core::Address;
//!
//! let config = IndexerBuilder::new()
//!     .rpc_url("https://carrot.megaeth.com/rpc")
//!     .contract(Address::repeat_byte(0x11))
//!     .chain_id(6343)
//!     .from_block(1_000_000)
//!     .max_reorg_depth(64)
//!     .build()
//!     .unwrap();
//! ```

use alloy_primitives::Address;

use arenaindex_core::{IndexerConfig, IndexerError};

/// Fluent builder for [`IndexerConfig`].
///
/// The RPC URL, contract address and maximum reorg depth have no defaults;
/// [`build`](Self::build) fails without them.
pub struct IndexerBuilder {
    config: IndexerConfig,
    max_reorg_depth: Option<u64>,
}

impl Default for IndexerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self {
            config: IndexerConfig::new(String::new(), Address::ZERO, 0),
            max_reorg_depth: None,
        }
    }

    /// Set the indexer ID (used for checkpoint keys).
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.config.id = id.into();
        self
    }

    pub fn chain_id(mut self, chain_id: u64) -> Self {
        self.config.chain_id = chain_id;
        self
    }

    pub fn rpc_url(mut self, url: impl Into<String>) -> Self {
        self.config.rpc_url = url.into();
        self
    }

    /// The ArenaEngine contract whose events are indexed.
    pub fn contract(mut self, address: Address) -> Self {
        self.config.contract_address = address;
        self
    }

    /// Set the start block.
    pub fn from_block(mut self, block: u64) -> Self {
        self.config.from_block = block;
        self
    }

    /// Set the end block (for bounded backfill).
    pub fn to_block(mut self, block: u64) -> Self {
        self.config.to_block = Some(block);
        self
    }

    /// Set confirmation depth (blocks behind head before processing).
    pub fn confirmation_depth(mut self, depth: u64) -> Self {
        self.config.confirmation_depth = depth;
        self
    }

    /// Deepest reorg to rewind through before halting.
    pub fn max_reorg_depth(mut self, depth: u64) -> Self {
        self.max_reorg_depth = Some(depth);
        self
    }

    /// Set the number of blocks applied per store transaction.
    pub fn batch_size(mut self, size: u64) -> Self {
        self.config.batch_size = size;
        self
    }

    /// Set the number of blocks per `eth_getLogs` request.
    pub fn max_logs_range(mut self, blocks: u64) -> Self {
        self.config.max_logs_range = blocks;
        self
    }

    pub fn fetch_concurrency(mut self, n: usize) -> Self {
        self.config.fetch_concurrency = n;
        self
    }

    /// Set live mode polling interval in milliseconds.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn rpc_timeout_ms(mut self, ms: u64) -> Self {
        self.config.rpc_timeout_ms = ms;
        self
    }

    pub fn store_timeout_ms(mut self, ms: u64) -> Self {
        self.config.store_timeout_ms = ms;
        self
    }

    pub fn block_time_ms(mut self, ms: u64) -> Self {
        self.config.block_time_ms = ms;
        self
    }

    pub fn asset_pair(mut self, pair: impl Into<String>) -> Self {
        self.config.asset_pair = pair.into();
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<IndexerConfig, IndexerError> {
        let mut config = self.config;
        config.max_reorg_depth = self
            .max_reorg_depth
            .ok_or_else(|| IndexerError::Config("max_reorg_depth is required".into()))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> IndexerBuilder {
        IndexerBuilder::new()
            .rpc_url("http://localhost:8545")
            .contract(Address::repeat_byte(0x11))
    }

    #[test]
    fn builder_defaults() {
        let cfg = base().max_reorg_depth(64).build().unwrap();
        assert_eq!(cfg.id, "arena-engine");
        assert_eq!(cfg.confirmation_depth, 0);
        assert_eq!(cfg.batch_size, 1000);
        assert_eq!(cfg.poll_interval_ms, 1000);
        assert_eq!(cfg.max_reorg_depth, 64);
    }

    #[test]
    fn builder_custom() {
        let cfg = base()
            .id("arena-main")
            .chain_id(6343)
            .from_block(50_000_000)
            .to_block(50_001_000)
            .confirmation_depth(2)
            .max_reorg_depth(128)
            .batch_size(500)
            .fetch_concurrency(8)
            .asset_pair("BTC/USD")
            .build()
            .unwrap();

        assert_eq!(cfg.id, "arena-main");
        assert_eq!(cfg.chain_id, 6343);
        assert_eq!(cfg.from_block, 50_000_000);
        assert_eq!(cfg.to_block, Some(50_001_000));
        assert_eq!(cfg.confirmation_depth, 2);
        assert_eq!(cfg.batch_size, 500);
        assert_eq!(cfg.fetch_concurrency, 8);
        assert_eq!(cfg.asset_pair, "BTC/USD");
        assert_eq!(cfg.hash_window_capacity(), 129);
    }

    #[test]
    fn reorg_depth_is_required() {
        let err = base().build().unwrap_err();
        assert!(err.to_string().contains("max_reorg_depth is required"), "{err}");
    }

    #[test]
    fn missing_endpoint_or_contract_fails_validation() {
        assert!(IndexerBuilder::new()
            .contract(Address::repeat_byte(1))
            .max_reorg_depth(8)
            .build()
            .is_err());
        assert!(IndexerBuilder::new()
            .rpc_url("http://localhost:8545")
            .max_reorg_depth(8)
            .build()
            .is_err());
        assert!(base().max_reorg_depth(8).batch_size(0).build().is_err());
    }
}
