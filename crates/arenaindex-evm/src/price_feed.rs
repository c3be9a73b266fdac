//! Price-tape builder.
//!
//! Samples the price-feed contract's `getPriceAtBlock(bytes32 feedId, uint256 block)`
//! once per block of an arena's window and packs the samples with the
//! price-tape codec. Requests run with bounded concurrency; results keep
//! block order. A block whose price can't be read is recorded as 0 and
//! reported in [`PriceTape::failed_blocks`].

use alloy_core::dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::{Address, B256, U256};
use futures::stream::{self, StreamExt};
use serde::Serialize;

use arenaindex_codec::price_tape;
use arenaindex_core::IndexerError;

use crate::abi;
use crate::ledger::LedgerClient;

pub const GET_PRICE_AT_BLOCK: &str = "getPriceAtBlock(bytes32,uint256)";

/// Feed id for an asset pair: keccak256 of its base symbol (`"ETH/USD"` → `keccak256("ETH")`).
pub fn feed_id(asset_pair: &str) -> Result<B256, IndexerError> {
    let symbol = asset_pair.split('/').next().unwrap_or_default().trim();
    if symbol.is_empty() {
        return Err(IndexerError::Config(format!("asset pair '{asset_pair}' has no base symbol")));
    }
    Ok(abi::keccak256(symbol.as_bytes()))
}

/// Packed prices for `[start_block, end_block]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceTape {
    pub asset_pair: String,
    pub start_block: u64,
    pub end_block: u64,
    /// One masked 32-bit sample per block.
    pub samples: Vec<u64>,
    pub words: Vec<U256>,
    /// Blocks recorded as 0 because the feed couldn't be read.
    pub failed_blocks: Vec<u64>,
}

/// Reads a price tape from a feed contract.
pub struct PriceTapeBuilder<'a, L: ?Sized> {
    ledger: &'a L,
    feed: Address,
    concurrency: usize,
}

impl<'a, L: LedgerClient + ?Sized> PriceTapeBuilder<'a, L> {
    pub fn new(ledger: &'a L, feed: Address, concurrency: usize) -> Self {
        Self {
            ledger,
            feed,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn build(&self, asset_pair: &str, start_block: u64, end_block: u64) -> Result<PriceTape, IndexerError> {
        if end_block < start_block {
            return Err(IndexerError::Config(format!(
                "end block {end_block} is before start block {start_block}"
            )));
        }
        let feed_id = feed_id(asset_pair)?;

        let requests: Vec<_> = (start_block..=end_block)
            .map(|block| self.sample(feed_id, block))
            .collect();
        let results: Vec<(u64, Result<u32, String>)> = stream::iter(requests)
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut samples = Vec::with_capacity(results.len());
        let mut failed_blocks = Vec::new();
        for (block, result) in results {
            match result {
                Ok(price) => samples.push(u64::from(price)),
                Err(reason) => {
                    tracing::warn!(block, feed = %self.feed, reason = %reason, "price sample failed, recording 0");
                    failed_blocks.push(block);
                    samples.push(0);
                }
            }
        }

        tracing::info!(
            asset_pair,
            start_block,
            end_block,
            samples = samples.len(),
            failed = failed_blocks.len(),
            "price tape built"
        );
        Ok(PriceTape {
            asset_pair: asset_pair.to_string(),
            start_block,
            end_block,
            words: price_tape::encode(&samples),
            samples,
            failed_blocks,
        })
    }

    async fn sample(&self, feed_id: B256, block: u64) -> (u64, Result<u32, String>) {
        let data = abi::encode_call(
            GET_PRICE_AT_BLOCK,
            vec![
                DynSolValue::FixedBytes(feed_id, 32),
                DynSolValue::Uint(U256::from(block), 256),
            ],
        );
        let result = match self.ledger.call(self.feed, data, None).await {
            Ok(out) => abi::decode_params(&out, &[DynSolType::Uint(256)])
                .and_then(|values| abi::uint::<U256>(&values[0], "price"))
                .map(price_tape::mask_u256),
            Err(err) => Err(err.to_string()),
        };
        (block, result)
    }
}
