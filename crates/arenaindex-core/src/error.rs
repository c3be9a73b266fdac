//! Error types for the indexing pipeline.

use thiserror::Error;

/// Errors that can occur while indexing.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// The ledger could not be read (after the transport's own retries).
    #[error("Transient fetch failure: {reason}")]
    TransientFetchFailure { reason: String },

    /// A log matched a known event signature but its payload was malformed.
    #[error("Decode failure{}: {reason}", arena_suffix(.arena_id))]
    DecodeFailure {
        arena_id: Option<String>,
        reason: String,
    },

    #[error("Reorg of depth {depth} at checkpoint {checkpoint} exceeds max depth {max_depth}")]
    ReorgExceedsDepth {
        depth: u64,
        max_depth: u64,
        checkpoint: u64,
    },

    /// A store transaction failed and was rolled back.
    #[error("Store transaction failed: {0}")]
    StoreTransactionFailure(String),

    /// Persisted state is unreadable.
    #[error("Store corrupted: {0}")]
    StoreCorrupted(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Indexer aborted: {reason}")]
    Aborted { reason: String },

    #[error("{0}")]
    Other(String),
}

fn arena_suffix(arena_id: &Option<String>) -> String {
    match arena_id {
        Some(id) => format!(" (arena {id})"),
        None => String::new(),
    }
}

impl IndexerError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::TransientFetchFailure {
            reason: reason.into(),
        }
    }

    pub fn decode(arena_id: Option<String>, reason: impl Into<String>) -> Self {
        Self::DecodeFailure {
            arena_id,
            reason: reason.into(),
        }
    }

    /// Returns `true` if a later attempt at the same work may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransientFetchFailure { .. } | Self::StoreTransactionFailure(_)
        )
    }

    /// Returns `true` if the driver must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ReorgExceedsDepth { .. } | Self::StoreCorrupted(_) | Self::Config(_)
        )
    }
}
