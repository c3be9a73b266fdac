//! Reorg detection and fork-point search.
//!
//! Before every batch the driver compares the hash it recorded for the
//! checkpoint block with the chain's current hash for that height. A mismatch
//! means the indexed branch is no longer canonical: the detector walks the
//! recorded hashes backward to the newest one the chain still agrees with
//! and reports it as the fork point. The projection and checkpoint are
//! rewound there and the next cycle re-indexes the canonical branch.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::checkpoint::Checkpoint;
use crate::error::IndexerError;
use crate::window::BlockHashWindow;

/// Where the driver stands relative to the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    /// Checkpoint is at the target height.
    Synced,
    /// Checkpoint is below the target height.
    CatchingUp,
    /// The indexed branch diverged from the canonical chain.
    ReorgDetected,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Synced => write!(f, "synced"),
            Self::CatchingUp => write!(f, "catching-up"),
            Self::ReorgDetected => write!(f, "reorg-detected"),
        }
    }
}

/// Anything that can report the canonical hash at a height.
#[async_trait]
pub trait BlockHashSource: Send + Sync {
    /// `None` if the chain has no block at `number` (yet).
    async fn canonical_hash(&self, number: u64) -> Result<Option<String>, IndexerError>;
}

/// A located reorg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReorgOutcome {
    /// Checkpoint height where the mismatch was seen.
    pub detected_at: u64,
    /// Newest height still on the canonical chain; rewind here.
    pub fork_point: u64,
    /// `detected_at - fork_point`.
    pub depth: u64,
}

/// Finds fork points, refusing to rewind further than `max_depth` blocks.
#[derive(Debug, Clone)]
pub struct ReorgDetector {
    max_depth: u64,
}

impl ReorgDetector {
    pub fn new(max_depth: u64) -> Self {
        Self { max_depth }
    }

    pub fn max_depth(&self) -> u64 {
        self.max_depth
    }

    /// Check whether the checkpoint block is still canonical.
    ///
    /// `floor` is the height below the indexed range (`from_block - 1`); it
    /// is treated as always canonical. Returns `Ok(None)` when nothing
    /// changed, `Ok(Some(_))` with the fork point otherwise.
    pub async fn check<S: BlockHashSource + ?Sized>(
        &self,
        checkpoint: &Checkpoint,
        source: &S,
        floor: u64,
    ) -> Result<Option<ReorgOutcome>, IndexerError> {
        let cp = checkpoint.last_processed_block;
        if cp <= floor {
            return Ok(None);
        }
        let Some(stored) = checkpoint.recent_hashes.get(cp) else {
            tracing::warn!(block = cp, "checkpoint block has no recorded hash, skipping reorg check");
            return Ok(None);
        };
        let canonical = source.canonical_hash(cp).await?;
        if canonical.as_deref().is_some_and(|h| h.eq_ignore_ascii_case(stored)) {
            return Ok(None);
        }

        tracing::warn!(
            block = cp,
            stored = %stored,
            canonical = canonical.as_deref().unwrap_or("<missing>"),
            "checkpoint hash mismatch, searching for fork point"
        );
        let fork_point = self
            .find_fork_point(&checkpoint.recent_hashes, source, cp, floor)
            .await?;
        let outcome = ReorgOutcome {
            detected_at: cp,
            fork_point,
            depth: cp - fork_point,
        };
        tracing::warn!(
            detected_at = outcome.detected_at,
            fork_point = outcome.fork_point,
            depth = outcome.depth,
            "reorg located"
        );
        Ok(Some(outcome))
    }

    /// Walk `window` newest-first to the highest height whose recorded hash
    /// the chain still reports, falling back to `floor`.
    pub async fn find_fork_point<S: BlockHashSource + ?Sized>(
        &self,
        window: &BlockHashWindow,
        source: &S,
        checkpoint_block: u64,
        floor: u64,
    ) -> Result<u64, IndexerError> {
        for entry in window.iter_desc() {
            if entry.number > checkpoint_block {
                continue;
            }
            if entry.number <= floor {
                break;
            }
            self.ensure_within_depth(checkpoint_block, entry.number)?;
            let canonical = source.canonical_hash(entry.number).await?;
            if canonical
                .as_deref()
                .is_some_and(|h| h.eq_ignore_ascii_case(&entry.hash))
            {
                return Ok(entry.number);
            }
        }
        self.ensure_within_depth(checkpoint_block, floor)?;
        Ok(floor)
    }

    fn ensure_within_depth(&self, checkpoint_block: u64, candidate: u64) -> Result<(), IndexerError> {
        let depth = checkpoint_block.saturating_sub(candidate);
        if depth > self.max_depth {
            tracing::error!(
                checkpoint = checkpoint_block,
                depth,
                max_depth = self.max_depth,
                "reorg deeper than allowed"
            );
            return Err(IndexerError::ReorgExceedsDepth {
                depth,
                max_depth: self.max_depth,
                checkpoint: checkpoint_block,
            });
        }
        Ok(())
    }
}
