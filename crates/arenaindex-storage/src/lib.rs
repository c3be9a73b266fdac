//! arenaindex-storage: the relational projection of ArenaEngine state.
//!
//! [`SqliteProjection`] is both the state reconciler (it implements
//! [`Projection`](arenaindex_core::Projection)) and the checkpoint store
//! ([`CheckpointStore`](arenaindex_core::CheckpointStore)), so projection rows
//! and the indexer position live in one SQLite file.

mod apply;
pub mod rows;
mod schema;
pub mod sqlite;
mod stats;
mod values;

pub use rows::{ArenaRow, BotDetectionRow, PlayerRow, PlayerStatsRow, ReferralRow, TournamentRow};
pub use sqlite::{ProjectionSettings, SqliteProjection};
