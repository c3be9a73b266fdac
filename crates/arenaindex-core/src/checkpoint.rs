//! Checkpoint manager: persists the indexer's position for crash recovery.
//!
//! A checkpoint stores the last block whose events are fully committed to the
//! projection, plus the recent block hashes used to find a fork point. On
//! restart the driver resumes from `last_processed_block + 1`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::window::BlockHashWindow;

/// A persisted checkpoint for one indexing stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Stream identifier (one per indexer id / contract).
    pub stream: String,
    /// Last block whose events are committed.
    pub last_processed_block: u64,
    /// Recent `(height, hash)` pairs, newest last.
    pub recent_hashes: BlockHashWindow,
    /// Unix timestamp of when this checkpoint was saved.
    pub updated_at: i64,
}

impl Checkpoint {
    /// The checkpoint a stream starts from: just below `from_block`.
    pub fn genesis(stream: impl Into<String>, from_block: u64, window_capacity: usize) -> Self {
        Self {
            stream: stream.into(),
            last_processed_block: from_block.saturating_sub(1),
            recent_hashes: BlockHashWindow::new(window_capacity),
            updated_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Storage for checkpoints.
///
/// Implementations: [`MemoryCheckpointStore`] and the SQLite projection in
/// `arenaindex-storage`.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the checkpoint for `stream`.
    async fn load(&self, stream: &str) -> Result<Option<Checkpoint>, IndexerError>;

    /// Save (upsert) a checkpoint.
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), IndexerError>;

    /// Delete a checkpoint (e.g. when resetting a stream).
    async fn delete(&self, stream: &str) -> Result<(), IndexerError>;
}

/// Checkpoint reads and writes for one stream.
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    stream: String,
    window_capacity: usize,
}

impl CheckpointManager {
    /// `window_capacity` should be at least `max_reorg_depth + 1`.
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        stream: impl Into<String>,
        window_capacity: usize,
    ) -> Self {
        Self {
            store,
            stream: stream.into(),
            window_capacity,
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Load the saved checkpoint.
    pub async fn load(&self) -> Result<Option<Checkpoint>, IndexerError> {
        self.store.load(&self.stream).await
    }

    /// Load the saved checkpoint, or start just below `from_block`.
    ///
    /// A stored window is resized to the configured capacity so a changed
    /// max reorg depth takes effect on restart.
    pub async fn load_or_genesis(&self, from_block: u64) -> Result<Checkpoint, IndexerError> {
        match self.load().await? {
            Some(mut cp) => {
                cp.recent_hashes.resize(self.window_capacity);
                tracing::info!(
                    stream = %self.stream,
                    block = cp.last_processed_block,
                    hashes = cp.recent_hashes.len(),
                    "resuming from checkpoint"
                );
                Ok(cp)
            }
            None => {
                tracing::info!(stream = %self.stream, from_block, "no checkpoint, starting fresh");
                Ok(Checkpoint::genesis(
                    self.stream.clone(),
                    from_block,
                    self.window_capacity,
                ))
            }
        }
    }

    /// Stamp and persist `checkpoint`.
    pub async fn save(&self, checkpoint: &mut Checkpoint) -> Result<(), IndexerError> {
        checkpoint.updated_at = chrono::Utc::now().timestamp();
        self.store.save(checkpoint).await
    }

    /// Forget this stream's checkpoint.
    pub async fn reset(&self) -> Result<(), IndexerError> {
        self.store.delete(&self.stream).await
    }
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory checkpoint store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    data: Mutex<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Checkpoint>>, IndexerError> {
        self.data
            .lock()
            .map_err(|_| IndexerError::StoreCorrupted("checkpoint mutex poisoned".into()))
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, stream: &str) -> Result<Option<Checkpoint>, IndexerError> {
        Ok(self.lock()?.get(stream).cloned())
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), IndexerError> {
        self.lock()?
            .insert(checkpoint.stream.clone(), checkpoint.clone());
        Ok(())
    }

    async fn delete(&self, stream: &str) -> Result<(), IndexerError> {
        self.lock()?.remove(stream);
        Ok(())
    }
}
