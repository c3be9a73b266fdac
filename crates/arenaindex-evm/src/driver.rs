//! The index loop: the single writer that keeps the projection in step with
//! the chain.
//!
//! Each cycle:
//!   1. Compare the checkpoint block's recorded hash with the chain. On a
//!      mismatch, locate the fork point, rewind projection and checkpoint to
//!      it, publish the rewind and start the next cycle.
//!   2. Compute the target (`head - confirmation_depth`, capped by `to_block`).
//!      At the target, sleep `poll_interval` (or finish, for a bounded range).
//!   3. Fetch `[checkpoint + 1, min(target, checkpoint + batch_size)]`: logs,
//!      block headers, decode, enrich.
//!   4. Apply the batch in one store transaction, then advance and save the
//!      checkpoint, then publish the change set.
//!
//! Transient failures back off exponentially and retry the cycle from the
//! unchanged checkpoint. Fatal failures (a reorg deeper than
//! `max_reorg_depth`, a corrupted store) stop the loop.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::U256;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use tokio::sync::{broadcast, watch};

use arenaindex_core::{
    Batch, BlockSummary, ChangeSet, Checkpoint, CheckpointManager, CheckpointStore, IndexerConfig,
    IndexerError, Projection, ReorgDetector, ReorgOutcome, SyncState,
};
use arenaindex_rpc::{RetryConfig, RetryPolicy};

use crate::decoder::{Decoded, EventDecoder};
use crate::enrich::Enricher;
use crate::ledger::{LedgerClient, LedgerHashes};

/// Counters kept by the loop. Every error it handles shows up here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriverStats {
    pub cycles: u64,
    pub batches: u64,
    pub events_applied: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub unknown_logs: u64,
    pub decode_failures: u64,
    pub enrichment_gaps: u64,
    pub reorgs: u64,
    pub transient_errors: u64,
    pub last_processed_block: u64,
}

enum Cycle {
    /// Work was done; go again immediately.
    Advanced,
    /// At the target; wait for new blocks.
    Idle,
    /// Reached `to_block`.
    Finished,
}

/// One batch ready for the store, plus the headers to anchor the checkpoint.
struct Fetched {
    batch: Batch,
    anchors: Vec<BlockSummary>,
}

pub struct IndexLoop<L, P> {
    config: IndexerConfig,
    ledger: Arc<L>,
    projection: Arc<P>,
    checkpoints: CheckpointManager,
    detector: ReorgDetector,
    decoder: EventDecoder,
    changes: broadcast::Sender<ChangeSet>,
    retry: RetryPolicy,
    state: SyncState,
    stats: DriverStats,
}

impl<L, P> IndexLoop<L, P>
where
    L: LedgerClient,
    P: Projection,
{
    /// Build a loop over a validated configuration.
    pub fn new(
        config: IndexerConfig,
        ledger: Arc<L>,
        projection: Arc<P>,
        store: Arc<dyn CheckpointStore>,
        changes: broadcast::Sender<ChangeSet>,
    ) -> Result<Self, IndexerError> {
        config.validate()?;
        let checkpoints = CheckpointManager::new(store, config.stream(), config.hash_window_capacity());
        let retry = RetryPolicy::new(RetryConfig {
            initial_backoff: Duration::from_millis(config.poll_interval_ms),
            max_backoff: Duration::from_millis(config.poll_interval_ms.saturating_mul(30)),
            ..RetryConfig::default()
        });
        Ok(Self {
            detector: ReorgDetector::new(config.max_reorg_depth),
            decoder: EventDecoder::new(),
            checkpoints,
            ledger,
            projection,
            changes,
            retry,
            state: SyncState::CatchingUp,
            stats: DriverStats::default(),
            config,
        })
    }

    /// Replace the backoff used between failed cycles.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = RetryPolicy::new(retry);
        self
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn stats(&self) -> &DriverStats {
        &self.stats
    }

    /// Run until `stop` turns `true`, `to_block` is reached, or a fatal error.
    ///
    /// The checkpoint only ever names fully committed blocks, so stopping
    /// between cycles always leaves a state the next run resumes from.
    pub async fn run(&mut self, mut stop: watch::Receiver<bool>) -> Result<DriverStats, IndexerError> {
        let mut checkpoint = self.checkpoints.load_or_genesis(self.config.from_block).await?;
        self.reconcile_with_checkpoint(&checkpoint).await?;
        self.stats.last_processed_block = checkpoint.last_processed_block;

        tracing::info!(
            stream = %self.checkpoints.stream(),
            next_block = checkpoint.last_processed_block + 1,
            to_block = ?self.config.to_block,
            max_reorg_depth = self.config.max_reorg_depth,
            "index loop starting"
        );

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let mut failures: u32 = 0;
        loop {
            if *stop.borrow() {
                tracing::info!(block = checkpoint.last_processed_block, "stop requested");
                break;
            }
            self.stats.cycles += 1;

            let delay = match self.cycle(&mut checkpoint).await {
                Ok(Cycle::Advanced) => {
                    failures = 0;
                    None
                }
                Ok(Cycle::Idle) => {
                    failures = 0;
                    Some(poll_interval)
                }
                Ok(Cycle::Finished) => {
                    tracing::info!(block = checkpoint.last_processed_block, "reached to_block");
                    break;
                }
                Err(err) if err.is_transient() => {
                    failures = failures.saturating_add(1);
                    self.stats.transient_errors += 1;
                    let backoff = self.retry.backoff(failures);
                    tracing::warn!(
                        error = %err,
                        attempt = failures,
                        backoff_ms = backoff.as_millis() as u64,
                        block = checkpoint.last_processed_block,
                        "cycle failed, retrying"
                    );
                    Some(backoff)
                }
                Err(err) => {
                    tracing::error!(
                        error = %err,
                        block = checkpoint.last_processed_block,
                        "index loop stopped"
                    );
                    return Err(err);
                }
            };

            if let Some(delay) = delay {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    changed = stop.changed() => {
                        if changed.is_err() {
                            tracing::info!("stop channel closed");
                            break;
                        }
                    }
                }
            }
        }
        Ok(self.stats.clone())
    }

    /// A crash between a batch commit and the checkpoint save leaves applied
    /// events above the checkpoint. Those blocks are fetched again, possibly
    /// from a different branch, so drop them first.
    async fn reconcile_with_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<(), IndexerError> {
        let applied = self.projection.last_applied_block().await?;
        if let Some(applied) = applied.filter(|b| *b > checkpoint.last_processed_block) {
            tracing::warn!(
                applied,
                checkpoint = checkpoint.last_processed_block,
                "projection is ahead of the checkpoint, rewinding"
            );
            let changes = with_store_timeout(
                self.store_limit(),
                "rewind",
                self.projection.rewind_to(checkpoint.last_processed_block),
            )
            .await?;
            self.publish(changes);
        }
        Ok(())
    }

    async fn cycle(&mut self, checkpoint: &mut Checkpoint) -> Result<Cycle, IndexerError> {
        let floor = self.config.from_block.saturating_sub(1);
        let hashes = LedgerHashes(&*self.ledger);
        if let Some(reorg) = self.detector.check(checkpoint, &hashes, floor).await? {
            self.rewind(checkpoint, reorg).await?;
            return Ok(Cycle::Advanced);
        }

        let head = self.ledger.head_block_number().await?;
        let mut target = head.saturating_sub(self.config.confirmation_depth);
        if let Some(to_block) = self.config.to_block {
            target = target.min(to_block);
        }
        let last = checkpoint.last_processed_block;
        if last >= target {
            if self.config.to_block.is_some_and(|to| last >= to) {
                return Ok(Cycle::Finished);
            }
            self.set_state(SyncState::Synced, last, head);
            return Ok(Cycle::Idle);
        }
        self.set_state(SyncState::CatchingUp, last, head);

        let from = last + 1;
        let to = target.min(last.saturating_add(self.config.batch_size));
        let parent = checkpoint.recent_hashes.get(last).map(str::to_string);
        let Fetched { batch, anchors } = self.fetch(from, to, parent.as_deref()).await?;

        let report = with_store_timeout(
            self.store_limit(),
            "apply batch",
            self.projection.apply_batch(&batch),
        )
        .await?;

        let mut next = checkpoint.clone();
        for anchor in &anchors {
            next.recent_hashes.push(anchor.number, anchor.hash.clone());
        }
        next.recent_hashes
            .prune_below(to.saturating_sub(self.config.max_reorg_depth));
        next.last_processed_block = to;
        self.checkpoints.save(&mut next).await?;
        *checkpoint = next;

        self.stats.batches += 1;
        self.stats.events_applied += report.applied as u64;
        self.stats.duplicates += report.duplicates as u64;
        self.stats.rejected += report.rejected as u64;
        self.stats.last_processed_block = to;

        tracing::info!(
            from,
            to,
            target,
            events = batch.events.len(),
            applied = report.applied,
            duplicates = report.duplicates,
            rejected = report.rejected,
            incomplete = batch.incomplete_arenas.len(),
            "batch committed"
        );
        self.publish(report.changes);
        Ok(Cycle::Advanced)
    }

    async fn rewind(&mut self, checkpoint: &mut Checkpoint, reorg: ReorgOutcome) -> Result<(), IndexerError> {
        self.state = SyncState::ReorgDetected;
        tracing::warn!(
            state = %self.state,
            detected_at = reorg.detected_at,
            fork_point = reorg.fork_point,
            depth = reorg.depth,
            "rewinding to fork point"
        );

        let changes = with_store_timeout(
            self.store_limit(),
            "rewind",
            self.projection.rewind_to(reorg.fork_point),
        )
        .await?;

        let mut next = checkpoint.clone();
        next.last_processed_block = reorg.fork_point;
        next.recent_hashes.rewind_to(reorg.fork_point);
        self.checkpoints.save(&mut next).await?;
        *checkpoint = next;

        self.stats.reorgs += 1;
        self.stats.last_processed_block = reorg.fork_point;
        self.publish(changes);
        Ok(())
    }

    /// Logs, headers, decode and enrichment for `[from, to]`. `parent` is the
    /// checkpointed hash of `from - 1`; the batch must build on it.
    async fn fetch(&mut self, from: u64, to: u64, parent: Option<&str>) -> Result<Fetched, IndexerError> {
        let ledger = &*self.ledger;
        let logs = ledger.logs(from, to).await?;

        // Headers for every block with a log (timestamps) and every block in
        // the last `max_reorg_depth` of the batch (fork-point anchors).
        let anchor_from = from.max(to.saturating_sub(self.config.max_reorg_depth));
        let mut heights: BTreeSet<u64> = (anchor_from..=to).collect();
        heights.insert(from);
        for log in &logs {
            heights.insert(log.block_number_u64()?);
        }
        let requests: Vec<_> = heights
            .iter()
            .map(|n| async move {
                ledger
                    .block(*n)
                    .await?
                    .ok_or_else(|| IndexerError::transient(format!("block {n} not available")))
            })
            .collect();
        let headers: Vec<BlockSummary> = stream::iter(requests)
            .buffered(self.config.fetch_concurrency)
            .try_collect()
            .await?;
        let headers: BTreeMap<u64, BlockSummary> = headers.into_iter().map(|b| (b.number, b)).collect();

        // A reorg below `from` that landed after the detector ran.
        if let (Some(parent), Some(first)) = (parent, headers.get(&from)) {
            if !first.parent_hash.eq_ignore_ascii_case(parent) {
                return Err(IndexerError::transient(format!(
                    "chain moved under the checkpoint: block {from} has parent {}, checkpoint holds {parent}",
                    first.parent_hash
                )));
            }
        }

        let anchors: Vec<BlockSummary> = headers.range(anchor_from..=to).map(|(_, b)| b.clone()).collect();
        for pair in anchors.windows(2) {
            if !pair[1].extends(&pair[0]) {
                return Err(IndexerError::transient(format!(
                    "chain moved while fetching: block {} does not extend {}",
                    pair[1].number, pair[0].number
                )));
            }
        }

        let mut batch = Batch::new(from, to);
        for log in &logs {
            let number = log.block_number_u64()?;
            let header = headers
                .get(&number)
                .ok_or_else(|| IndexerError::transient(format!("missing header for block {number}")))?;
            if !header.hash.eq_ignore_ascii_case(&log.block_hash) {
                return Err(IndexerError::transient(format!(
                    "chain moved while fetching: log in block {number} has hash {}, node now reports {}",
                    log.block_hash, header.hash
                )));
            }

            match self.decoder.decode(log, header.timestamp) {
                Ok(Decoded::Event(envelope)) => batch.events.push(envelope),
                Ok(Decoded::Unknown) => {
                    self.stats.unknown_logs += 1;
                    tracing::debug!(block = number, tx = %log.tx_hash, "ignoring unknown log");
                }
                Err(IndexerError::DecodeFailure { arena_id, reason }) => {
                    self.stats.decode_failures += 1;
                    tracing::warn!(
                        block = number,
                        log_index = %log.log_index,
                        tx = %log.tx_hash,
                        arena = arena_id.as_deref().unwrap_or("-"),
                        reason = %reason,
                        "undecodable event skipped"
                    );
                    if let Some(id) = arena_id.as_deref().and_then(|s| U256::from_str(s).ok()) {
                        batch.incomplete_arenas.insert(id);
                    }
                }
                Err(err) => return Err(err),
            }
        }

        let enricher = Enricher::new(
            ledger,
            &*self.projection,
            self.config.contract_address,
            self.config.fetch_concurrency,
        );
        let enriched = enricher.enrich(&mut batch).await?;
        self.stats.enrichment_gaps += enriched.gaps as u64;

        Ok(Fetched { batch, anchors })
    }

    fn set_state(&mut self, state: SyncState, block: u64, head: u64) {
        if self.state != state {
            tracing::info!(from = %self.state, to = %state, block, head, "sync state changed");
            self.state = state;
        }
    }

    fn publish(&self, changes: ChangeSet) {
        if changes.is_empty() {
            return;
        }
        if let Err(err) = self.changes.send(changes) {
            tracing::debug!(from = err.0.from_block, to = err.0.to_block, "no change subscribers");
        }
    }

    fn store_limit(&self) -> Duration {
        Duration::from_millis(self.config.store_timeout_ms)
    }
}

async fn with_store_timeout<T>(
    limit: Duration,
    what: &str,
    fut: impl Future<Output = Result<T, IndexerError>>,
) -> Result<T, IndexerError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(IndexerError::StoreTransactionFailure(format!(
            "{what} timed out after {}ms",
            limit.as_millis()
        ))),
    }
}
