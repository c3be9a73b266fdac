//! SQLite projection of ArenaEngine state.
//!
//! One file holds the projection tables, the event journal and the indexer
//! checkpoint. WAL mode lets readers (an API process, the `status` command)
//! see only committed batches while the driver writes.
//!
//! # Usage
//! ```rust,no_run
//! use arenaindex_storage::SqliteProjection;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteProjection::open("./arena.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteProjection::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeSet;
use std::str::FromStr;

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};

use arenaindex_core::{
    ApplyReport, ArenaEvent, Batch, BlockHashWindow, ChangeSet, Checkpoint, CheckpointStore,
    EventEnvelope, IndexerError, Projection,
};

use crate::apply::{self, BatchEffects, Outcome};
use crate::rows::{ArenaRow, BotDetectionRow, PlayerRow, PlayerStatsRow, ReferralRow, TournamentRow};
use crate::values::{addr, db_err, dec, json_err, parse_addr};
use crate::{schema, stats};

const KEY_LAST_BLOCK: &str = "lastProcessedBlock";
const KEY_RECENT_HASHES: &str = "recentBlockHashes";
const KEY_UPDATED_AT: &str = "updatedAt";

/// Values stamped on new arenas that the chain doesn't emit.
#[derive(Debug, Clone)]
pub struct ProjectionSettings {
    /// Recorded as the arena's asset pair.
    pub asset_pair: String,
    /// Converts an arena's block span into `duration_sec`.
    pub block_time_ms: u64,
}

impl Default for ProjectionSettings {
    fn default() -> Self {
        Self {
            asset_pair: "ETH/USD".into(),
            block_time_ms: 1000,
        }
    }
}

/// SQLite-backed projection and checkpoint store.
pub struct SqliteProjection {
    pool: SqlitePool,
    settings: ProjectionSettings,
}

impl SqliteProjection {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./arena.db"`) or a full
    /// SQLite URL (`"sqlite:./arena.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}")
        };
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(db_err)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(db_err)?;
        Self::with_pool(pool).await
    }

    /// Open an in-memory SQLite database.
    ///
    /// All data is lost when the projection is dropped. Ideal for tests.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(db_err)?
            .foreign_keys(true);
        // every connection to :memory: is its own database, so keep exactly one
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(db_err)?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, IndexerError> {
        schema::init(&pool).await?;
        Ok(Self {
            pool,
            settings: ProjectionSettings::default(),
        })
    }

    /// Replace the values stamped on new arenas.
    pub fn with_settings(mut self, settings: ProjectionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &ProjectionSettings {
        &self.settings
    }

    // ─── Journal ────────────────────────────────────────────────────────────────

    async fn is_journaled(conn: &mut SqliteConnection, env: &EventEnvelope) -> Result<bool, IndexerError> {
        let row = sqlx::query("SELECT 1 FROM event_journal WHERE block_number = ? AND log_index = ?")
            .bind(env.block_number as i64)
            .bind(env.log_index as i64)
            .fetch_optional(&mut *conn)
            .await
            .map_err(db_err)?;
        Ok(row.is_some())
    }

    async fn journal(conn: &mut SqliteConnection, env: &EventEnvelope) -> Result<(), IndexerError> {
        let payload = serde_json::to_string(env).map_err(json_err)?;
        sqlx::query(
            "INSERT INTO event_journal (block_number, log_index, block_hash, tx_hash, event_type, payload)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(env.block_number as i64)
        .bind(env.log_index as i64)
        .bind(&env.block_hash)
        .bind(&env.tx_hash)
        .bind(env.event.name())
        .bind(payload)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn journaled_after(
        conn: &mut SqliteConnection,
        block: u64,
    ) -> Result<Vec<EventEnvelope>, IndexerError> {
        let rows = sqlx::query(
            "SELECT payload FROM event_journal WHERE block_number > ?
             ORDER BY block_number, log_index",
        )
        .bind(block as i64)
        .fetch_all(&mut *conn)
        .await
        .map_err(db_err)?;
        rows.iter()
            .map(|r| serde_json::from_str(&r.get::<String, _>("payload")).map_err(json_err))
            .collect()
    }

    /// Number of journaled events.
    pub async fn journal_len(&self) -> Result<u64, IndexerError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM event_journal")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.get::<i64, _>("cnt") as u64)
    }

    // ─── Reads ──────────────────────────────────────────────────────────────────

    pub async fn arena(&self, arena_id: U256) -> Result<Option<ArenaRow>, IndexerError> {
        let row = sqlx::query("SELECT * FROM arenas WHERE arena_id = ?")
            .bind(dec(arena_id))
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(ArenaRow::from_row).transpose()
    }

    /// All arenas, oldest first.
    pub async fn arenas(&self) -> Result<Vec<ArenaRow>, IndexerError> {
        let rows = sqlx::query("SELECT * FROM arenas ORDER BY created_block, arena_id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(ArenaRow::from_row).collect()
    }

    pub async fn players(&self, arena_id: U256) -> Result<Vec<PlayerRow>, IndexerError> {
        let rows = sqlx::query(
            "SELECT * FROM players WHERE arena_id = ? ORDER BY joined_block, joined_log_index",
        )
        .bind(dec(arena_id))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(PlayerRow::from_row).collect()
    }

    pub async fn player(&self, arena_id: U256, player: Address) -> Result<Option<PlayerRow>, IndexerError> {
        let row = sqlx::query("SELECT * FROM players WHERE arena_id = ? AND address = ?")
            .bind(dec(arena_id))
            .bind(addr(player))
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(PlayerRow::from_row).transpose()
    }

    pub async fn player_stats(&self, player: Address) -> Result<Option<PlayerStatsRow>, IndexerError> {
        let row = sqlx::query("SELECT * FROM player_stats WHERE address = ?")
            .bind(addr(player))
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(PlayerStatsRow::from_row).transpose()
    }

    /// Top players by wins, then best streak.
    pub async fn leaderboard(&self, limit: u32) -> Result<Vec<PlayerStatsRow>, IndexerError> {
        let rows = sqlx::query(
            "SELECT * FROM player_stats ORDER BY wins DESC, best_streak DESC, address LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(PlayerStatsRow::from_row).collect()
    }

    pub async fn referrals_by(&self, referrer: Address) -> Result<Vec<ReferralRow>, IndexerError> {
        let rows = sqlx::query(
            "SELECT * FROM referrals WHERE referrer = ? ORDER BY block_number, log_index",
        )
        .bind(addr(referrer))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(ReferralRow::from_row).collect()
    }

    pub async fn tournament(&self, tournament_id: U256) -> Result<Option<TournamentRow>, IndexerError> {
        let row = sqlx::query("SELECT * FROM tournaments WHERE tournament_id = ?")
            .bind(dec(tournament_id))
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(TournamentRow::from_row).transpose()
    }

    pub async fn bot_detections(&self) -> Result<Vec<BotDetectionRow>, IndexerError> {
        let rows = sqlx::query("SELECT * FROM bot_detections ORDER BY block_number, log_index")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(BotDetectionRow::from_row).collect()
    }
}

/// Record in `changes` what dropping `env` affects.
async fn touch_dropped(
    conn: &mut SqliteConnection,
    env: &EventEnvelope,
    changes: &mut ChangeSet,
) -> Result<(), IndexerError> {
    match &env.event {
        ArenaEvent::PlayerJoined { arena_id, player, .. }
        | ArenaEvent::PredictionCommitted { arena_id, player, .. }
        | ArenaEvent::PredictionRevealed { arena_id, player, .. }
        | ArenaEvent::PotDistributed {
            arena_id,
            winner: player,
            ..
        } => {
            changes.touch_player(*arena_id, *player);
            changes.leaderboard.insert(*player);
        }
        ArenaEvent::ArenaFinalized { arena_id, .. } => {
            changes.touch_arena(*arena_id);
            for player in apply::arena_players(conn, *arena_id).await? {
                changes.touch_player(*arena_id, player);
                changes.leaderboard.insert(player);
            }
        }
        ArenaEvent::GodStreakUpdate { player, .. } => {
            changes.leaderboard.insert(*player);
        }
        ArenaEvent::ReferralPaid { referrer, .. } => {
            changes.referrals.insert(*referrer);
        }
        ArenaEvent::TournamentCreated { tournament_id, .. }
        | ArenaEvent::TournamentFinalized { tournament_id } => {
            changes.tournaments.insert(*tournament_id);
        }
        ArenaEvent::TournamentArenaAdded {
            tournament_id,
            arena_id,
            ..
        } => {
            changes.tournaments.insert(*tournament_id);
            changes.touch_arena(*arena_id);
        }
        ArenaEvent::ArenaCreated { arena_id, .. } | ArenaEvent::ArenaReset { arena_id, .. } => {
            changes.touch_arena(*arena_id);
        }
        ArenaEvent::BotDetected { .. } => {}
    }
    Ok(())
}

// ─── Projection impl ─────────────────────────────────────────────────────────

#[async_trait]
impl Projection for SqliteProjection {
    async fn apply_batch(&self, batch: &Batch) -> Result<ApplyReport, IndexerError> {
        let mut events: Vec<&EventEnvelope> = batch.events.iter().collect();
        events.sort_by_key(|e| e.position());

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut fx = BatchEffects {
            changes: ChangeSet::for_range(batch.from_block, batch.to_block),
            ..Default::default()
        };
        let mut report = ApplyReport::default();

        for env in events {
            if Self::is_journaled(&mut tx, env).await? {
                debug!(
                    block = env.block_number,
                    log_index = env.log_index,
                    event = env.event.name(),
                    "event already applied"
                );
                report.duplicates += 1;
                continue;
            }
            match apply::apply_event(&mut tx, env, &self.settings, &mut fx).await? {
                Outcome::Applied => {
                    Self::journal(&mut tx, env).await?;
                    report.applied += 1;
                }
                Outcome::Rejected(reason) => {
                    warn!(
                        block = env.block_number,
                        log_index = env.log_index,
                        tx = %env.tx_hash,
                        event = env.event.name(),
                        reason = %reason,
                        "event rejected"
                    );
                    report.rejected += 1;
                }
            }
        }

        if !batch.incomplete_arenas.is_empty() {
            apply::mark_incomplete(&mut tx, &batch.incomplete_arenas, batch.from_block, &mut fx).await?;
        }
        apply::promote_by_height(&mut tx, batch.to_block, &mut fx).await?;
        let dirty = std::mem::take(&mut fx.dirty);
        stats::recompute(&mut tx, &dirty, &mut fx).await?;

        tx.commit().await.map_err(db_err)?;

        debug!(
            from = batch.from_block,
            to = batch.to_block,
            applied = report.applied,
            duplicates = report.duplicates,
            rejected = report.rejected,
            "batch committed"
        );
        report.changes = fx.changes;
        Ok(report)
    }

    /// Clears the projection and replays the journal up to `block` in one
    /// transaction. The cost grows with the whole indexed history, not with
    /// the reorg depth: player stats and streaks are derived across arenas,
    /// so a partial rebuild could leave them inconsistent.
    async fn rewind_to(&self, block: u64) -> Result<ChangeSet, IndexerError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut changes = ChangeSet::rewind(block);

        let dropped = Self::journaled_after(&mut tx, block).await?;
        for env in &dropped {
            touch_dropped(&mut tx, env, &mut changes).await?;
            changes.to_block = changes.to_block.max(env.block_number);
        }

        for stmt in [
            "DELETE FROM event_journal WHERE block_number > ?",
            "DELETE FROM incomplete_marks WHERE block_number > ?",
        ] {
            sqlx::query(stmt)
                .bind(block as i64)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }
        for table in ["referrals", "bot_detections", "players", "tournaments", "arenas", "player_stats"] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }

        let kept = Self::journaled_after(&mut tx, 0).await?;
        let mut fx = BatchEffects::default();
        for env in &kept {
            if let Outcome::Rejected(reason) =
                apply::apply_event(&mut tx, env, &self.settings, &mut fx).await?
            {
                return Err(IndexerError::StoreCorrupted(format!(
                    "journaled {} at {}:{} no longer applies: {reason}",
                    env.event.name(),
                    env.block_number,
                    env.log_index
                )));
            }
        }
        apply::refresh_incomplete(&mut tx).await?;
        apply::promote_by_height(&mut tx, block, &mut fx).await?;

        let rows = sqlx::query("SELECT DISTINCT address FROM players")
            .fetch_all(&mut *tx)
            .await
            .map_err(db_err)?;
        let players: BTreeSet<Address> = rows
            .iter()
            .map(|r| parse_addr(&r.get::<String, _>("address")))
            .collect::<Result<_, _>>()?;
        stats::recompute(&mut tx, &players, &mut fx).await?;

        tx.commit().await.map_err(db_err)?;

        info!(
            to = block,
            dropped = dropped.len(),
            replayed = kept.len(),
            "projection rewound"
        );
        Ok(changes)
    }

    async fn arena_players(&self, arena_id: U256) -> Result<Vec<Address>, IndexerError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        apply::arena_players(&mut conn, arena_id).await
    }

    async fn last_applied_block(&self) -> Result<Option<u64>, IndexerError> {
        let row = sqlx::query("SELECT MAX(block_number) AS head FROM event_journal")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.get::<Option<i64>, _>("head").map(|b| b as u64))
    }
}

// ─── CheckpointStore impl ────────────────────────────────────────────────────

#[async_trait]
impl CheckpointStore for SqliteProjection {
    async fn load(&self, stream: &str) -> Result<Option<Checkpoint>, IndexerError> {
        let rows = sqlx::query("SELECT key, value FROM indexer_state WHERE stream = ?")
            .bind(stream)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        let mut last_block = None;
        let mut hashes = None;
        let mut updated_at = 0i64;
        for r in &rows {
            let key: String = r.get("key");
            let value: String = r.get("value");
            match key.as_str() {
                KEY_LAST_BLOCK => {
                    last_block = Some(value.parse::<u64>().map_err(|e| {
                        IndexerError::StoreCorrupted(format!("{KEY_LAST_BLOCK} '{value}': {e}"))
                    })?)
                }
                KEY_RECENT_HASHES => {
                    hashes = Some(serde_json::from_str::<BlockHashWindow>(&value).map_err(json_err)?)
                }
                KEY_UPDATED_AT => updated_at = value.parse().unwrap_or_default(),
                _ => {}
            }
        }

        Ok(last_block.map(|last_processed_block| Checkpoint {
            stream: stream.to_string(),
            last_processed_block,
            recent_hashes: hashes.unwrap_or_else(|| BlockHashWindow::new(1)),
            updated_at,
        }))
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), IndexerError> {
        let hashes = serde_json::to_string(&checkpoint.recent_hashes).map_err(json_err)?;
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for (key, value) in [
            (KEY_LAST_BLOCK, checkpoint.last_processed_block.to_string()),
            (KEY_RECENT_HASHES, hashes),
            (KEY_UPDATED_AT, checkpoint.updated_at.to_string()),
        ] {
            sqlx::query(
                "INSERT INTO indexer_state (stream, key, value) VALUES (?, ?, ?)
                 ON CONFLICT (stream, key) DO UPDATE SET value = excluded.value",
            )
            .bind(&checkpoint.stream)
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;

        debug!(
            stream = %checkpoint.stream,
            block = checkpoint.last_processed_block,
            "checkpoint saved"
        );
        Ok(())
    }

    async fn delete(&self, stream: &str) -> Result<(), IndexerError> {
        sqlx::query("DELETE FROM indexer_state WHERE stream = ?")
            .bind(stream)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
