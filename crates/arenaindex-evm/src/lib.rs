//! arenaindex-evm: the chain-facing half of the ArenaEngine indexer.
//!
//! - [`ledger`]: [`LedgerClient`] and its JSON-RPC implementation
//! - [`decoder`]: raw logs → [`ArenaEvent`](arenaindex_core::ArenaEvent)
//! - [`enrich`]: calldata and `getPlayerState` reads that complete events
//! - [`price_feed`]: per-block price sampling into a packed price tape
//! - [`driver`]: the [`IndexLoop`] that ties them to a projection
//! - [`builder`]: fluent [`IndexerBuilder`] for configurations

pub mod abi;
pub mod builder;
pub mod decoder;
pub mod driver;
pub mod enrich;
pub mod ledger;
pub mod price_feed;

pub use builder::IndexerBuilder;
pub use decoder::{Decoded, EventDecoder, EventKind};
pub use driver::{DriverStats, IndexLoop};
pub use enrich::{EnrichReport, Enricher};
pub use ledger::{LedgerClient, LedgerHashes, LedgerSettings, RawLog, RpcLedger};
pub use price_feed::{PriceTape, PriceTapeBuilder};
