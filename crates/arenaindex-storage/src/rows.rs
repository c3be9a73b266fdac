//! Read models for the projection tables.

use alloy_primitives::{Address, B256, U256};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use arenaindex_core::{ArenaStatus, IndexerError, TournamentStatus};

use crate::values::{json_err, parse_addr, parse_i256, parse_u256};

fn opt_u256(v: Option<String>) -> Result<Option<U256>, IndexerError> {
    v.as_deref().map(parse_u256).transpose()
}

fn opt_addr(v: Option<String>) -> Result<Option<Address>, IndexerError> {
    v.as_deref().map(parse_addr).transpose()
}

fn corrupted(msg: String) -> IndexerError {
    IndexerError::StoreCorrupted(msg)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArenaRow {
    pub arena_id: U256,
    pub tier: u8,
    pub entry_fee: U256,
    pub duration_sec: u64,
    pub start_block: u64,
    pub end_block: u64,
    pub status: ArenaStatus,
    pub asset_pair: String,
    pub epoch: u32,
    pub winner_count: Option<U256>,
    pub best_score: Option<u16>,
    pub incomplete: bool,
    pub created_block: u64,
    pub created_at: i64,
    pub finalized_block: Option<u64>,
    pub finalized_at: Option<i64>,
    pub tx_hash: String,
}

impl ArenaRow {
    pub(crate) fn from_row(r: &SqliteRow) -> Result<Self, IndexerError> {
        let status: String = r.get("status");
        Ok(Self {
            arena_id: parse_u256(&r.get::<String, _>("arena_id"))?,
            tier: r.get::<i64, _>("tier") as u8,
            entry_fee: parse_u256(&r.get::<String, _>("entry_fee"))?,
            duration_sec: r.get::<i64, _>("duration_sec") as u64,
            start_block: r.get::<i64, _>("start_block") as u64,
            end_block: r.get::<i64, _>("end_block") as u64,
            status: status.parse().map_err(corrupted)?,
            asset_pair: r.get("asset_pair"),
            epoch: r.get::<i64, _>("epoch") as u32,
            winner_count: opt_u256(r.get("winner_count"))?,
            best_score: r.get::<Option<i64>, _>("best_score").map(|v| v as u16),
            incomplete: r.get::<i64, _>("incomplete") != 0,
            created_block: r.get::<i64, _>("created_block") as u64,
            created_at: r.get("created_at"),
            finalized_block: r.get::<Option<i64>, _>("finalized_block").map(|v| v as u64),
            finalized_at: r.get("finalized_at"),
            tx_hash: r.get("tx_hash"),
        })
    }

    /// Number of price ticks (and prediction bits) the arena spans.
    pub fn tick_count(&self) -> u64 {
        self.end_block - self.start_block + 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerRow {
    pub arena_id: U256,
    pub address: Address,
    pub referrer: Option<Address>,
    pub joined_block: u64,
    pub commitment_hash: Option<B256>,
    /// `"1"` = up, `"0"` = down, one character per tick.
    pub prediction: Option<String>,
    pub prediction_words: Option<Vec<U256>>,
    pub commitment_verified: Option<bool>,
    pub revealed: bool,
    pub score: Option<u16>,
    pub payout: Option<U256>,
}

impl PlayerRow {
    pub(crate) fn from_row(r: &SqliteRow) -> Result<Self, IndexerError> {
        let commitment_hash = r
            .get::<Option<String>, _>("commitment_hash")
            .map(|h| {
                h.parse::<B256>()
                    .map_err(|e| corrupted(format!("bad commitment hash '{h}': {e}")))
            })
            .transpose()?;
        let prediction_words = r
            .get::<Option<String>, _>("prediction_words")
            .map(|json| serde_json::from_str::<Vec<U256>>(&json).map_err(json_err))
            .transpose()?;
        Ok(Self {
            arena_id: parse_u256(&r.get::<String, _>("arena_id"))?,
            address: parse_addr(&r.get::<String, _>("address"))?,
            referrer: opt_addr(r.get("referrer"))?,
            joined_block: r.get::<i64, _>("joined_block") as u64,
            commitment_hash,
            prediction: r.get("prediction"),
            prediction_words,
            commitment_verified: r.get::<Option<i64>, _>("commitment_verified").map(|v| v != 0),
            revealed: r.get::<i64, _>("revealed") != 0,
            score: r.get::<Option<i64>, _>("score").map(|v| v as u16),
            payout: opt_u256(r.get("payout"))?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerStatsRow {
    pub address: Address,
    pub total_arenas: u64,
    pub wins: u64,
    pub losses: u64,
    /// Signed decimal: total payouts minus total entry fees.
    pub total_pnl: String,
    pub current_streak: u64,
    pub best_streak: u64,
    pub god_streak: u64,
}

impl PlayerStatsRow {
    pub(crate) fn from_row(r: &SqliteRow) -> Result<Self, IndexerError> {
        let total_pnl: String = r.get("total_pnl");
        parse_i256(&total_pnl)?;
        Ok(Self {
            address: parse_addr(&r.get::<String, _>("address"))?,
            total_arenas: r.get::<i64, _>("total_arenas") as u64,
            wins: r.get::<i64, _>("wins") as u64,
            losses: r.get::<i64, _>("losses") as u64,
            total_pnl,
            current_streak: r.get::<i64, _>("current_streak") as u64,
            best_streak: r.get::<i64, _>("best_streak") as u64,
            god_streak: r.get::<i64, _>("god_streak") as u64,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferralRow {
    pub referrer: Address,
    pub referee: Address,
    pub arena_id: Option<U256>,
    pub reward: U256,
    pub block_number: u64,
    pub created_at: i64,
}

impl ReferralRow {
    pub(crate) fn from_row(r: &SqliteRow) -> Result<Self, IndexerError> {
        Ok(Self {
            referrer: parse_addr(&r.get::<String, _>("referrer"))?,
            referee: parse_addr(&r.get::<String, _>("referee"))?,
            arena_id: opt_u256(r.get("arena_id"))?,
            reward: parse_u256(&r.get::<String, _>("reward"))?,
            block_number: r.get::<i64, _>("block_number") as u64,
            created_at: r.get("created_at"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TournamentRow {
    pub tournament_id: U256,
    pub name: String,
    pub status: TournamentStatus,
    pub tier: u8,
    pub round_count: u8,
    pub arenas_per_round: u8,
    pub current_round: u8,
    pub start_block: u64,
    pub end_block: Option<u64>,
    pub arena_ids: Vec<U256>,
}

impl TournamentRow {
    pub(crate) fn from_row(r: &SqliteRow) -> Result<Self, IndexerError> {
        let status: String = r.get("status");
        let ids: Vec<String> =
            serde_json::from_str(&r.get::<String, _>("arena_ids")).map_err(json_err)?;
        Ok(Self {
            tournament_id: parse_u256(&r.get::<String, _>("tournament_id"))?,
            name: r.get("name"),
            status: status.parse().map_err(corrupted)?,
            tier: r.get::<i64, _>("tier") as u8,
            round_count: r.get::<i64, _>("round_count") as u8,
            arenas_per_round: r.get::<i64, _>("arenas_per_round") as u8,
            current_round: r.get::<i64, _>("current_round") as u8,
            start_block: r.get::<i64, _>("start_block") as u64,
            end_block: r.get::<Option<i64>, _>("end_block").map(|v| v as u64),
            arena_ids: ids.iter().map(|s| parse_u256(s)).collect::<Result<_, _>>()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BotDetectionRow {
    pub player: Address,
    pub reason: String,
    pub block_number: u64,
    pub created_at: i64,
}

impl BotDetectionRow {
    pub(crate) fn from_row(r: &SqliteRow) -> Result<Self, IndexerError> {
        Ok(Self {
            player: parse_addr(&r.get::<String, _>("player"))?,
            reason: r.get("reason"),
            block_number: r.get::<i64, _>("block_number") as u64,
            created_at: r.get("created_at"),
        })
    }
}
