//! Player statistics, always recomputed from `players` ⋈ `arenas`.
//!
//! Recomputing instead of incrementing keeps stats correct under re-delivery
//! and after a rewind.

use std::collections::BTreeSet;

use alloy_primitives::{Address, I256, U256};
use sqlx::sqlite::SqliteConnection;
use sqlx::Row;

use arenaindex_core::IndexerError;

use crate::apply::BatchEffects;
use crate::values::{addr, db_err, parse_u256};

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Tally {
    pub total_arenas: u64,
    pub wins: u64,
    pub losses: u64,
    pub total_pnl: I256,
    pub current_streak: u64,
    pub best_streak: u64,
}

/// One finalized participation, in finalization order.
pub(crate) struct Placing {
    pub revealed: bool,
    pub score: Option<u16>,
    pub best_score: Option<u16>,
    pub winner_count: U256,
    pub payout: U256,
}

impl Placing {
    /// Revealed with the best score in an arena that had winners. When the
    /// score is unknown, a received payout is the only evidence of a win.
    pub fn is_win(&self) -> bool {
        match (self.score, self.best_score) {
            (Some(score), Some(best)) => {
                self.revealed && score == best && self.winner_count > U256::ZERO
            }
            _ => self.payout > U256::ZERO,
        }
    }
}

fn signed(v: U256) -> I256 {
    I256::try_from(v).unwrap_or(I256::MAX)
}

/// Fold finalized results (oldest first) plus money flows into a tally.
pub(crate) fn tally(joined: u64, paid_in: U256, paid_out: U256, finalized: &[Placing]) -> Tally {
    let mut t = Tally {
        total_arenas: joined,
        wins: 0,
        losses: 0,
        total_pnl: signed(paid_out).saturating_sub(signed(paid_in)),
        current_streak: 0,
        best_streak: 0,
    };
    for r in finalized {
        if r.is_win() {
            t.wins += 1;
            t.current_streak += 1;
            t.best_streak = t.best_streak.max(t.current_streak);
        } else {
            t.losses += 1;
            t.current_streak = 0;
        }
    }
    t
}

/// Recompute and upsert stats for every address in `addresses`.
///
/// `god_streak` is left untouched: only `GodStreakUpdate` sets it.
pub(crate) async fn recompute(
    conn: &mut SqliteConnection,
    addresses: &BTreeSet<Address>,
    fx: &mut BatchEffects,
) -> Result<(), IndexerError> {
    for player in addresses {
        let rows = sqlx::query(
            "SELECT p.revealed, p.score, p.payout, a.entry_fee, a.status,
                    a.winner_count, a.best_score
             FROM players p JOIN arenas a ON a.arena_id = p.arena_id
             WHERE p.address = ?
             ORDER BY a.finalized_block, a.finalized_log_index",
        )
        .bind(addr(*player))
        .fetch_all(&mut *conn)
        .await
        .map_err(db_err)?;

        let mut paid_in = U256::ZERO;
        let mut paid_out = U256::ZERO;
        let mut finalized = Vec::new();
        for r in &rows {
            paid_in = paid_in.saturating_add(parse_u256(&r.get::<String, _>("entry_fee"))?);
            let payout = match r.get::<Option<String>, _>("payout") {
                Some(p) => parse_u256(&p)?,
                None => U256::ZERO,
            };
            paid_out = paid_out.saturating_add(payout);
            if r.get::<String, _>("status") == "finalized" {
                finalized.push(Placing {
                    revealed: r.get::<i64, _>("revealed") != 0,
                    score: r.get::<Option<i64>, _>("score").map(|v| v as u16),
                    best_score: r.get::<Option<i64>, _>("best_score").map(|v| v as u16),
                    winner_count: match r.get::<Option<String>, _>("winner_count") {
                        Some(w) => parse_u256(&w)?,
                        None => U256::ZERO,
                    },
                    payout,
                });
            }
        }
        let t = tally(rows.len() as u64, paid_in, paid_out, &finalized);

        sqlx::query(
            "INSERT INTO player_stats
             (address, total_arenas, wins, losses, total_pnl, current_streak, best_streak)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (address) DO UPDATE SET
                total_arenas   = excluded.total_arenas,
                wins           = excluded.wins,
                losses         = excluded.losses,
                total_pnl      = excluded.total_pnl,
                current_streak = excluded.current_streak,
                best_streak    = excluded.best_streak",
        )
        .bind(addr(*player))
        .bind(t.total_arenas as i64)
        .bind(t.wins as i64)
        .bind(t.losses as i64)
        .bind(t.total_pnl.to_string())
        .bind(t.current_streak as i64)
        .bind(t.best_streak as i64)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
        fx.changes.leaderboard.insert(*player);
    }
    Ok(())
}
