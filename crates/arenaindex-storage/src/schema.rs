//! Table definitions.

use sqlx::SqlitePool;

use arenaindex_core::IndexerError;

use crate::values::db_err;

const STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS arenas (
        arena_id            TEXT    PRIMARY KEY,
        tier                INTEGER NOT NULL,
        entry_fee           TEXT    NOT NULL,
        duration_sec        INTEGER NOT NULL,
        start_block         INTEGER NOT NULL,
        end_block           INTEGER NOT NULL,
        status              TEXT    NOT NULL DEFAULT 'upcoming',
        asset_pair          TEXT    NOT NULL DEFAULT 'ETH/USD',
        epoch               INTEGER NOT NULL DEFAULT 0,
        winner_count        TEXT,
        best_score          INTEGER,
        incomplete          INTEGER NOT NULL DEFAULT 0,
        created_block       INTEGER NOT NULL,
        created_at          INTEGER NOT NULL,
        finalized_block     INTEGER,
        finalized_log_index INTEGER,
        finalized_at        INTEGER,
        tx_hash             TEXT    NOT NULL,
        CHECK (end_block > start_block)
    );",
    "CREATE TABLE IF NOT EXISTS players (
        arena_id            TEXT    NOT NULL REFERENCES arenas(arena_id),
        address             TEXT    NOT NULL,
        referrer            TEXT,
        joined_block        INTEGER NOT NULL,
        joined_log_index    INTEGER NOT NULL,
        joined_tx           TEXT    NOT NULL,
        commitment_hash     TEXT,
        prediction          TEXT,
        prediction_words    TEXT,
        commitment_verified INTEGER,
        revealed            INTEGER NOT NULL DEFAULT 0,
        score               INTEGER,
        payout              TEXT,
        PRIMARY KEY (arena_id, address)
    );",
    "CREATE TABLE IF NOT EXISTS player_stats (
        address        TEXT    PRIMARY KEY,
        total_arenas   INTEGER NOT NULL DEFAULT 0,
        wins           INTEGER NOT NULL DEFAULT 0,
        losses         INTEGER NOT NULL DEFAULT 0,
        total_pnl      TEXT    NOT NULL DEFAULT '0',
        current_streak INTEGER NOT NULL DEFAULT 0,
        best_streak    INTEGER NOT NULL DEFAULT 0,
        god_streak     INTEGER NOT NULL DEFAULT 0
    );",
    "CREATE TABLE IF NOT EXISTS referrals (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        referrer     TEXT    NOT NULL,
        referee      TEXT    NOT NULL,
        arena_id     TEXT,
        reward       TEXT    NOT NULL,
        block_number INTEGER NOT NULL,
        log_index    INTEGER NOT NULL,
        tx_hash      TEXT    NOT NULL,
        created_at   INTEGER NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS tournaments (
        tournament_id    TEXT    PRIMARY KEY,
        name             TEXT    NOT NULL,
        status           TEXT    NOT NULL DEFAULT 'upcoming',
        tier             INTEGER NOT NULL,
        round_count      INTEGER NOT NULL,
        arenas_per_round INTEGER NOT NULL,
        current_round    INTEGER NOT NULL DEFAULT 0,
        start_block      INTEGER NOT NULL,
        end_block        INTEGER,
        arena_ids        TEXT    NOT NULL DEFAULT '[]',
        created_at       INTEGER NOT NULL,
        tx_hash          TEXT    NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS bot_detections (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        player       TEXT    NOT NULL,
        reason       TEXT    NOT NULL,
        block_number INTEGER NOT NULL,
        log_index    INTEGER NOT NULL,
        tx_hash      TEXT    NOT NULL,
        created_at   INTEGER NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS event_journal (
        block_number INTEGER NOT NULL,
        log_index    INTEGER NOT NULL,
        block_hash   TEXT    NOT NULL,
        tx_hash      TEXT    NOT NULL,
        event_type   TEXT    NOT NULL,
        payload      TEXT    NOT NULL,
        PRIMARY KEY (block_number, log_index)
    );",
    "CREATE TABLE IF NOT EXISTS incomplete_marks (
        arena_id     TEXT    NOT NULL,
        block_number INTEGER NOT NULL,
        PRIMARY KEY (arena_id, block_number)
    );",
    "CREATE TABLE IF NOT EXISTS indexer_state (
        stream TEXT NOT NULL,
        key    TEXT NOT NULL,
        value  TEXT NOT NULL,
        PRIMARY KEY (stream, key)
    );",
    "CREATE INDEX IF NOT EXISTS idx_arenas_status ON arenas (status);",
    "CREATE INDEX IF NOT EXISTS idx_players_address ON players (address);",
    "CREATE INDEX IF NOT EXISTS idx_referrals_referrer ON referrals (referrer);",
    "CREATE INDEX IF NOT EXISTS idx_referrals_block ON referrals (block_number);",
    "CREATE INDEX IF NOT EXISTS idx_bot_detections_block ON bot_detections (block_number);",
];

/// Create tables and indexes if they don't exist.
pub(crate) async fn init(pool: &SqlitePool) -> Result<(), IndexerError> {
    for stmt in STATEMENTS {
        sqlx::query(stmt).execute(pool).await.map_err(db_err)?;
    }
    Ok(())
}
