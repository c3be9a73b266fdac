//! The projection contract: how the driver hands decoded events to the
//! derived-state store.

use std::collections::BTreeSet;

use alloy_primitives::{Address, U256};
use async_trait::async_trait;

use crate::changes::ChangeSet;
use crate::error::IndexerError;
use crate::events::EventEnvelope;

/// All events decoded from one block range, in (block, log_index) order.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub from_block: u64,
    /// Inclusive. Also the height used to promote arena statuses by block.
    pub to_block: u64,
    pub events: Vec<EventEnvelope>,
    /// Arenas with at least one event that could not be decoded or enriched.
    pub incomplete_arenas: BTreeSet<U256>,
}

impl Batch {
    pub fn new(from_block: u64, to_block: u64) -> Self {
        Self {
            from_block,
            to_block,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.incomplete_arenas.is_empty()
    }
}

/// Outcome of applying one batch.
#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    /// Events applied for the first time.
    pub applied: usize,
    /// Events already journaled (re-delivery after a crash or retry).
    pub duplicates: usize,
    /// Events refused because they reference an unknown arena, player or
    /// tournament.
    pub rejected: usize,
    pub changes: ChangeSet,
}

/// Derived state built from contract events.
///
/// Exactly one writer (the driver) calls these methods.
#[async_trait]
pub trait Projection: Send + Sync {
    /// Apply `batch` atomically: either every event takes effect or none does.
    /// Re-applying an event that was already applied is a no-op.
    async fn apply_batch(&self, batch: &Batch) -> Result<ApplyReport, IndexerError>;

    /// Undo every event above `block`. The result equals having applied only
    /// the events at or below `block`.
    async fn rewind_to(&self, block: u64) -> Result<ChangeSet, IndexerError>;

    /// Players currently joined to `arena_id`.
    async fn arena_players(&self, arena_id: U256) -> Result<Vec<Address>, IndexerError>;

    /// Highest block holding an applied event, `None` if nothing was applied.
    async fn last_applied_block(&self) -> Result<Option<u64>, IndexerError>;
}
