//! Per-event reconciliation inside an open transaction.
//!
//! Every handler checks its preconditions before writing, so a rejected event
//! leaves no trace. The caller journals applied events and runs the
//! batch-level passes (height promotion, stats) afterwards.

use std::collections::BTreeSet;

use alloy_primitives::{Address, B256, U256};
use sqlx::sqlite::SqliteConnection;
use sqlx::Row;

use arenaindex_codec::{decode_predictions, predictions_to_bitstring, Commitment, TICKS_PER_WORD};
use arenaindex_core::{ArenaEvent, ArenaStatus, ChangeSet, EventEnvelope, IndexerError, Reveal, TournamentStatus};

use crate::sqlite::ProjectionSettings;
use crate::values::{addr, db_err, dec, json_err, parse_addr, parse_u256};

/// Side effects accumulated over one batch (or one replay).
#[derive(Debug, Default)]
pub(crate) struct BatchEffects {
    pub changes: ChangeSet,
    /// Addresses whose stats must be recomputed before commit.
    pub dirty: BTreeSet<Address>,
}

#[derive(Debug)]
pub(crate) enum Outcome {
    Applied,
    Rejected(String),
}

fn reject(reason: impl Into<String>) -> Result<Outcome, IndexerError> {
    Ok(Outcome::Rejected(reason.into()))
}

// ─── Lookups ──────────────────────────────────────────────────────────────────

struct ArenaInfo {
    status: ArenaStatus,
    start_block: u64,
    end_block: u64,
}

async fn arena_info(conn: &mut SqliteConnection, arena_id: U256) -> Result<Option<ArenaInfo>, IndexerError> {
    let row = sqlx::query("SELECT status, start_block, end_block FROM arenas WHERE arena_id = ?")
        .bind(dec(arena_id))
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?;
    row.map(|r| {
        let status: String = r.get("status");
        Ok(ArenaInfo {
            status: status.parse().map_err(IndexerError::StoreCorrupted)?,
            start_block: r.get::<i64, _>("start_block") as u64,
            end_block: r.get::<i64, _>("end_block") as u64,
        })
    })
    .transpose()
}

/// `None` if the player never joined; otherwise the stored commitment (if any).
async fn player_commitment(
    conn: &mut SqliteConnection,
    arena_id: U256,
    player: Address,
) -> Result<Option<Option<String>>, IndexerError> {
    let row = sqlx::query("SELECT commitment_hash FROM players WHERE arena_id = ? AND address = ?")
        .bind(dec(arena_id))
        .bind(addr(player))
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?;
    Ok(row.map(|r| r.get::<Option<String>, _>("commitment_hash")))
}

pub(crate) async fn arena_players(
    conn: &mut SqliteConnection,
    arena_id: U256,
) -> Result<Vec<Address>, IndexerError> {
    let rows = sqlx::query(
        "SELECT address FROM players WHERE arena_id = ? ORDER BY joined_block, joined_log_index",
    )
    .bind(dec(arena_id))
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err)?;
    rows.iter()
        .map(|r| parse_addr(&r.get::<String, _>("address")))
        .collect()
}

async fn promote(
    conn: &mut SqliteConnection,
    arena_id: U256,
    current: ArenaStatus,
    target: ArenaStatus,
    fx: &mut BatchEffects,
) -> Result<(), IndexerError> {
    let next = current.promote(target);
    if next != current {
        sqlx::query("UPDATE arenas SET status = ? WHERE arena_id = ?")
            .bind(next.as_str())
            .bind(dec(arena_id))
            .execute(&mut *conn)
            .await
            .map_err(db_err)?;
        fx.changes.touch_arena(arena_id);
    }
    Ok(())
}

// ─── Event handlers ───────────────────────────────────────────────────────────

pub(crate) async fn apply_event(
    conn: &mut SqliteConnection,
    env: &EventEnvelope,
    settings: &ProjectionSettings,
    fx: &mut BatchEffects,
) -> Result<Outcome, IndexerError> {
    let block = env.block_number as i64;
    match &env.event {
        ArenaEvent::ArenaCreated {
            arena_id,
            tier,
            entry_fee,
            start_block,
            end_block,
        } => {
            if end_block <= start_block {
                return reject(format!(
                    "end block {end_block} is not after start block {start_block}"
                ));
            }
            if arena_info(conn, *arena_id).await?.is_some() {
                return reject("arena already exists");
            }
            let duration_sec = (end_block - start_block).saturating_mul(settings.block_time_ms) / 1000;
            sqlx::query(
                "INSERT INTO arenas
                 (arena_id, tier, entry_fee, duration_sec, start_block, end_block, status,
                  asset_pair, created_block, created_at, tx_hash)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(dec(*arena_id))
            .bind(*tier as i64)
            .bind(dec(*entry_fee))
            .bind(duration_sec as i64)
            .bind(*start_block as i64)
            .bind(*end_block as i64)
            .bind(ArenaStatus::Upcoming.as_str())
            .bind(&settings.asset_pair)
            .bind(block)
            .bind(env.timestamp)
            .bind(&env.tx_hash)
            .execute(&mut *conn)
            .await
            .map_err(db_err)?;
            fx.changes.touch_arena(*arena_id);
        }

        ArenaEvent::PlayerJoined {
            arena_id,
            player,
            referrer,
        } => {
            let Some(arena) = arena_info(conn, *arena_id).await? else {
                return reject("join for unknown arena");
            };
            if player_commitment(conn, *arena_id, *player).await?.is_some() {
                return reject("player already joined");
            }
            let referrer = (*referrer != Address::ZERO).then(|| addr(*referrer));
            sqlx::query(
                "INSERT INTO players
                 (arena_id, address, referrer, joined_block, joined_log_index, joined_tx)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(dec(*arena_id))
            .bind(addr(*player))
            .bind(referrer)
            .bind(block)
            .bind(env.log_index as i64)
            .bind(&env.tx_hash)
            .execute(&mut *conn)
            .await
            .map_err(db_err)?;
            promote(conn, *arena_id, arena.status, ArenaStatus::Active, fx).await?;
            fx.changes.touch_player(*arena_id, *player);
            fx.dirty.insert(*player);
        }

        ArenaEvent::PredictionCommitted {
            arena_id,
            player,
            commit_hash,
        } => {
            let Some(arena) = arena_info(conn, *arena_id).await? else {
                return reject("commit for unknown arena");
            };
            if player_commitment(conn, *arena_id, *player).await?.is_none() {
                return reject("commit from a player who has not joined");
            }
            if let Some(hash) = commit_hash {
                sqlx::query("UPDATE players SET commitment_hash = ? WHERE arena_id = ? AND address = ?")
                    .bind(format!("{hash:#x}"))
                    .bind(dec(*arena_id))
                    .bind(addr(*player))
                    .execute(&mut *conn)
                    .await
                    .map_err(db_err)?;
            }
            promote(conn, *arena_id, arena.status, ArenaStatus::Active, fx).await?;
            fx.changes.touch_player(*arena_id, *player);
        }

        ArenaEvent::PredictionRevealed {
            arena_id,
            player,
            reveal,
        } => {
            let Some(arena) = arena_info(conn, *arena_id).await? else {
                return reject("reveal for unknown arena");
            };
            let Some(commitment) = player_commitment(conn, *arena_id, *player).await? else {
                return reject("reveal from a player who has not joined");
            };
            sqlx::query("UPDATE players SET revealed = 1 WHERE arena_id = ? AND address = ?")
                .bind(dec(*arena_id))
                .bind(addr(*player))
                .execute(&mut *conn)
                .await
                .map_err(db_err)?;
            if let Some(reveal) = reveal {
                store_reveal(conn, *arena_id, *player, &arena, commitment, reveal).await?;
            }
            promote(conn, *arena_id, arena.status, ArenaStatus::Revealing, fx).await?;
            fx.changes.touch_player(*arena_id, *player);
            fx.dirty.insert(*player);
        }

        ArenaEvent::ArenaFinalized {
            arena_id,
            winner_count,
            best_score,
            standings,
        } => {
            let Some(arena) = arena_info(conn, *arena_id).await? else {
                return reject("finalization of unknown arena");
            };
            if arena.status == ArenaStatus::Finalized {
                return reject("arena already finalized");
            }
            sqlx::query(
                "UPDATE arenas SET status = ?, winner_count = ?, best_score = ?,
                 finalized_block = ?, finalized_log_index = ?, finalized_at = ?
                 WHERE arena_id = ?",
            )
            .bind(ArenaStatus::Finalized.as_str())
            .bind(dec(*winner_count))
            .bind(*best_score as i64)
            .bind(block)
            .bind(env.log_index as i64)
            .bind(env.timestamp)
            .bind(dec(*arena_id))
            .execute(&mut *conn)
            .await
            .map_err(db_err)?;
            for s in standings {
                sqlx::query(
                    "UPDATE players SET score = ?, revealed = MAX(revealed, ?)
                     WHERE arena_id = ? AND address = ?",
                )
                .bind(s.score as i64)
                .bind(s.revealed as i64)
                .bind(dec(*arena_id))
                .bind(addr(s.player))
                .execute(&mut *conn)
                .await
                .map_err(db_err)?;
            }
            fx.changes.touch_arena(*arena_id);
            for player in arena_players(conn, *arena_id).await? {
                fx.changes.touch_player(*arena_id, player);
                fx.dirty.insert(player);
            }
        }

        ArenaEvent::GodStreakUpdate { player, streak } => {
            sqlx::query(
                "INSERT INTO player_stats (address, god_streak) VALUES (?, ?)
                 ON CONFLICT (address) DO UPDATE SET god_streak = excluded.god_streak",
            )
            .bind(addr(*player))
            .bind(*streak as i64)
            .execute(&mut *conn)
            .await
            .map_err(db_err)?;
            fx.changes.leaderboard.insert(*player);
        }

        ArenaEvent::PotDistributed {
            arena_id,
            winner,
            amount,
        } => {
            let row = sqlx::query("SELECT payout FROM players WHERE arena_id = ? AND address = ?")
                .bind(dec(*arena_id))
                .bind(addr(*winner))
                .fetch_optional(&mut *conn)
                .await
                .map_err(db_err)?;
            let Some(row) = row else {
                return reject("payout to an address that is not a player of the arena");
            };
            let prior = match row.get::<Option<String>, _>("payout") {
                Some(p) => parse_u256(&p)?,
                None => U256::ZERO,
            };
            sqlx::query("UPDATE players SET payout = ? WHERE arena_id = ? AND address = ?")
                .bind(dec(prior.saturating_add(*amount)))
                .bind(dec(*arena_id))
                .bind(addr(*winner))
                .execute(&mut *conn)
                .await
                .map_err(db_err)?;
            fx.changes.touch_player(*arena_id, *winner);
            fx.dirty.insert(*winner);
        }

        ArenaEvent::ReferralPaid {
            referrer,
            referee,
            amount,
        } => {
            let arena_id = referral_arena(conn, *referee, &env.tx_hash).await?;
            sqlx::query(
                "INSERT INTO referrals
                 (referrer, referee, arena_id, reward, block_number, log_index, tx_hash, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(addr(*referrer))
            .bind(addr(*referee))
            .bind(arena_id)
            .bind(dec(*amount))
            .bind(block)
            .bind(env.log_index as i64)
            .bind(&env.tx_hash)
            .bind(env.timestamp)
            .execute(&mut *conn)
            .await
            .map_err(db_err)?;
            fx.changes.referrals.insert(*referrer);
        }

        ArenaEvent::ArenaReset {
            arena_id,
            new_epoch,
        } => {
            if arena_info(conn, *arena_id).await?.is_none() {
                return reject("reset of unknown arena");
            }
            sqlx::query("UPDATE arenas SET epoch = ? WHERE arena_id = ?")
                .bind(*new_epoch as i64)
                .bind(dec(*arena_id))
                .execute(&mut *conn)
                .await
                .map_err(db_err)?;
            fx.changes.touch_arena(*arena_id);
        }

        ArenaEvent::BotDetected { player, reason } => {
            sqlx::query(
                "INSERT INTO bot_detections (player, reason, block_number, log_index, tx_hash, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(addr(*player))
            .bind(reason)
            .bind(block)
            .bind(env.log_index as i64)
            .bind(&env.tx_hash)
            .bind(env.timestamp)
            .execute(&mut *conn)
            .await
            .map_err(db_err)?;
        }

        ArenaEvent::TournamentCreated {
            tournament_id,
            tier,
            round_count,
            arenas_per_round,
        } => {
            if tournament(conn, *tournament_id).await?.is_some() {
                return reject("tournament already exists");
            }
            sqlx::query(
                "INSERT INTO tournaments
                 (tournament_id, name, status, tier, round_count, arenas_per_round,
                  start_block, created_at, tx_hash)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(dec(*tournament_id))
            .bind(format!("Tier {tier} Tournament #{tournament_id}"))
            .bind(TournamentStatus::Upcoming.as_str())
            .bind(*tier as i64)
            .bind(*round_count as i64)
            .bind(*arenas_per_round as i64)
            .bind(block)
            .bind(env.timestamp)
            .bind(&env.tx_hash)
            .execute(&mut *conn)
            .await
            .map_err(db_err)?;
            fx.changes.tournaments.insert(*tournament_id);
        }

        ArenaEvent::TournamentArenaAdded {
            tournament_id,
            round,
            arena_id,
        } => {
            let Some(mut t) = tournament(conn, *tournament_id).await? else {
                return reject("arena added to unknown tournament");
            };
            if arena_info(conn, *arena_id).await?.is_none() {
                return reject("unknown arena added to tournament");
            }
            let id = dec(*arena_id);
            if !t.arena_ids.contains(&id) {
                t.arena_ids.push(id);
            }
            if t.status == TournamentStatus::Upcoming {
                t.status = TournamentStatus::Active;
            }
            t.current_round = t.current_round.max(*round as i64);
            sqlx::query(
                "UPDATE tournaments SET status = ?, current_round = ?, arena_ids = ?
                 WHERE tournament_id = ?",
            )
            .bind(t.status.as_str())
            .bind(t.current_round)
            .bind(serde_json::to_string(&t.arena_ids).map_err(json_err)?)
            .bind(dec(*tournament_id))
            .execute(&mut *conn)
            .await
            .map_err(db_err)?;
            fx.changes.tournaments.insert(*tournament_id);
            fx.changes.touch_arena(*arena_id);
        }

        ArenaEvent::TournamentFinalized { tournament_id } => {
            if tournament(conn, *tournament_id).await?.is_none() {
                return reject("finalization of unknown tournament");
            }
            sqlx::query("UPDATE tournaments SET status = ?, end_block = ? WHERE tournament_id = ?")
                .bind(TournamentStatus::Finalized.as_str())
                .bind(block)
                .bind(dec(*tournament_id))
                .execute(&mut *conn)
                .await
                .map_err(db_err)?;
            fx.changes.tournaments.insert(*tournament_id);
        }
    }
    Ok(Outcome::Applied)
}

async fn store_reveal(
    conn: &mut SqliteConnection,
    arena_id: U256,
    player: Address,
    arena: &ArenaInfo,
    commitment: Option<String>,
    reveal: &Reveal,
) -> Result<(), IndexerError> {
    // Bits past the revealed words carry nothing, so a wide window stays cheap.
    let window = (arena.end_block - arena.start_block).saturating_add(1);
    let revealed = (reveal.pred_words.len() as u64).saturating_mul(TICKS_PER_WORD as u64);
    let ticks = window.min(revealed) as usize;
    let bits = predictions_to_bitstring(&decode_predictions(&reveal.pred_words, ticks));
    let verified = match commitment {
        Some(stored) => {
            let expected: B256 = stored.parse().map_err(|e| {
                IndexerError::StoreCorrupted(format!("bad commitment hash '{stored}': {e}"))
            })?;
            Some(Commitment::verify(
                expected,
                arena_id,
                player,
                reveal.salt,
                &reveal.pred_words,
            ))
        }
        None => None,
    };
    if verified == Some(false) {
        tracing::warn!(
            arena = %arena_id,
            player = %player,
            "revealed predictions do not match the stored commitment"
        );
    }
    sqlx::query(
        "UPDATE players SET prediction = ?, prediction_words = ?, commitment_verified = ?
         WHERE arena_id = ? AND address = ?",
    )
    .bind(bits)
    .bind(serde_json::to_string(&reveal.pred_words).map_err(json_err)?)
    .bind(verified.map(i64::from))
    .bind(dec(arena_id))
    .bind(addr(player))
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

/// Arena a referral belongs to: the join in the same transaction, else the
/// referee's latest join.
async fn referral_arena(
    conn: &mut SqliteConnection,
    referee: Address,
    tx_hash: &str,
) -> Result<Option<String>, IndexerError> {
    let same_tx = sqlx::query(
        "SELECT arena_id FROM players WHERE address = ? AND joined_tx = ?
         ORDER BY joined_block DESC, joined_log_index DESC LIMIT 1",
    )
    .bind(addr(referee))
    .bind(tx_hash)
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_err)?;
    if let Some(r) = same_tx {
        return Ok(Some(r.get("arena_id")));
    }
    let latest = sqlx::query(
        "SELECT arena_id FROM players WHERE address = ?
         ORDER BY joined_block DESC, joined_log_index DESC LIMIT 1",
    )
    .bind(addr(referee))
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(latest.map(|r| r.get("arena_id")))
}

struct TournamentState {
    status: TournamentStatus,
    current_round: i64,
    arena_ids: Vec<String>,
}

async fn tournament(
    conn: &mut SqliteConnection,
    tournament_id: U256,
) -> Result<Option<TournamentState>, IndexerError> {
    let row = sqlx::query("SELECT status, current_round, arena_ids FROM tournaments WHERE tournament_id = ?")
        .bind(dec(tournament_id))
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?;
    row.map(|r| {
        let status: String = r.get("status");
        Ok(TournamentState {
            status: status.parse().map_err(IndexerError::StoreCorrupted)?,
            current_round: r.get("current_round"),
            arena_ids: serde_json::from_str(&r.get::<String, _>("arena_ids")).map_err(json_err)?,
        })
    })
    .transpose()
}

// ─── Batch-level passes ───────────────────────────────────────────────────────

/// Promote arenas whose block window the chain has reached: `start_block <= tip`
/// → active, `end_block < tip` → revealing.
pub(crate) async fn promote_by_height(
    conn: &mut SqliteConnection,
    tip: u64,
    fx: &mut BatchEffects,
) -> Result<(), IndexerError> {
    let tip = tip as i64;
    let rows = sqlx::query(
        "SELECT arena_id FROM arenas
         WHERE (status = 'upcoming' AND start_block <= ?)
            OR (status IN ('upcoming', 'active') AND end_block < ?)",
    )
    .bind(tip)
    .bind(tip)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err)?;
    if rows.is_empty() {
        return Ok(());
    }
    sqlx::query("UPDATE arenas SET status = 'active' WHERE status = 'upcoming' AND start_block <= ?")
        .bind(tip)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    sqlx::query(
        "UPDATE arenas SET status = 'revealing' WHERE status IN ('upcoming', 'active') AND end_block < ?",
    )
    .bind(tip)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    for r in rows {
        fx.changes.touch_arena(parse_u256(&r.get::<String, _>("arena_id"))?);
    }
    Ok(())
}

/// Record that `arenas` had undecodable events at `block`, then flag every
/// marked arena that exists.
pub(crate) async fn mark_incomplete(
    conn: &mut SqliteConnection,
    arenas: &BTreeSet<U256>,
    block: u64,
    fx: &mut BatchEffects,
) -> Result<(), IndexerError> {
    for arena_id in arenas {
        sqlx::query("INSERT OR IGNORE INTO incomplete_marks (arena_id, block_number) VALUES (?, ?)")
            .bind(dec(*arena_id))
            .bind(block as i64)
            .execute(&mut *conn)
            .await
            .map_err(db_err)?;
        fx.changes.touch_arena(*arena_id);
    }
    refresh_incomplete(conn).await
}

pub(crate) async fn refresh_incomplete(conn: &mut SqliteConnection) -> Result<(), IndexerError> {
    sqlx::query(
        "UPDATE arenas SET incomplete = 1
         WHERE incomplete = 0 AND arena_id IN (SELECT arena_id FROM incomplete_marks)",
    )
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}
