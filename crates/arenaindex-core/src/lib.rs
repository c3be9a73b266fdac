//! arenaindex-core: the pieces of the ArenaEngine indexer that don't touch
//! a network or a database.
//!
//! # Architecture
//!
//! ```text
//! IndexLoop (arenaindex-evm)
//!     ├── CheckpointManager  (last processed block + recent block hashes)
//!     ├── ReorgDetector      (fork-point search, bounded by max depth)
//!     ├── Projection         (derived state, one transaction per Batch)
//!     └── ChangeSet          (what a commit or rewind touched)
//! ```

pub mod changes;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod events;
pub mod projection;
pub mod reorg;
pub mod types;
pub mod window;

pub use changes::ChangeSet;
pub use checkpoint::{Checkpoint, CheckpointManager, CheckpointStore, MemoryCheckpointStore};
pub use config::IndexerConfig;
pub use error::IndexerError;
pub use events::{ArenaEvent, ArenaStatus, EventEnvelope, PlayerStanding, Reveal, TournamentStatus};
pub use projection::{ApplyReport, Batch, Projection};
pub use reorg::{BlockHashSource, ReorgDetector, ReorgOutcome, SyncState};
pub use types::BlockSummary;
pub use window::BlockHashWindow;

pub use alloy_primitives::{Address, B256, U256};
