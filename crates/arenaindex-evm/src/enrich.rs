//! Event enrichment.
//!
//! ArenaEngine events carry identities only. Before a batch is reconciled the
//! contract-authoritative details are read back from the ledger:
//!
//! | Event                 | Source                                                   |
//! |-----------------------|----------------------------------------------------------|
//! | `PredictionCommitted` | `commitPrediction(uint256,bytes32)` calldata             |
//! | `PredictionRevealed`  | `revealPrediction(uint256,uint256[],bytes32)` calldata   |
//! | `ArenaFinalized`      | `getPlayerState(uint256,address)` at the event's block   |
//!
//! Calldata that is not a direct call to the expected function (a relayer,
//! a multicall) leaves the field empty and flags the arena incomplete. RPC
//! failures propagate as transient errors so the whole batch is retried.

use std::collections::{BTreeSet, HashMap};

use alloy_core::dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::{Address, B256, U256};
use futures::stream::{self, StreamExt, TryStreamExt};

use arenaindex_core::{ArenaEvent, Batch, IndexerError, PlayerStanding, Projection, Reveal};

use crate::abi;
use crate::ledger::LedgerClient;

pub const COMMIT_PREDICTION: &str = "commitPrediction(uint256,bytes32)";
pub const REVEAL_PREDICTION: &str = "revealPrediction(uint256,uint256[],bytes32)";
pub const GET_PLAYER_STATE: &str = "getPlayerState(uint256,address)";

/// Calldata for `commitPrediction(arenaId, commitHash)`.
pub fn commit_calldata(arena_id: U256, commit_hash: B256) -> Vec<u8> {
    abi::encode_call(
        COMMIT_PREDICTION,
        vec![DynSolValue::Uint(arena_id, 256), DynSolValue::FixedBytes(commit_hash, 32)],
    )
}

/// Calldata for `revealPrediction(arenaId, predWords, salt)`.
pub fn reveal_calldata(arena_id: U256, pred_words: &[U256], salt: B256) -> Vec<u8> {
    abi::encode_call(
        REVEAL_PREDICTION,
        vec![
            DynSolValue::Uint(arena_id, 256),
            DynSolValue::Array(pred_words.iter().map(|w| DynSolValue::Uint(*w, 256)).collect()),
            DynSolValue::FixedBytes(salt, 32),
        ],
    )
}

/// Calldata for `getPlayerState(arenaId, player)`.
pub fn player_state_calldata(arena_id: U256, player: Address) -> Vec<u8> {
    abi::encode_call(
        GET_PLAYER_STATE,
        vec![DynSolValue::Uint(arena_id, 256), DynSolValue::Address(player)],
    )
}

/// The commitment digest from `commitPrediction` calldata for `arena_id`.
pub fn decode_commit(calldata: &[u8], arena_id: U256) -> Result<B256, String> {
    let args = abi::strip_selector(calldata, COMMIT_PREDICTION)
        .ok_or("transaction is not a direct commitPrediction call")?;
    let values = abi::decode_params(args, &[DynSolType::Uint(256), DynSolType::FixedBytes(32)])?;
    check_arena(&values[0], arena_id)?;
    abi::word(&values[1], "commitHash")
}

/// Prediction words and salt from `revealPrediction` calldata for `arena_id`.
pub fn decode_reveal(calldata: &[u8], arena_id: U256) -> Result<Reveal, String> {
    let args = abi::strip_selector(calldata, REVEAL_PREDICTION)
        .ok_or("transaction is not a direct revealPrediction call")?;
    let values = abi::decode_params(
        args,
        &[
            DynSolType::Uint(256),
            DynSolType::Array(Box::new(DynSolType::Uint(256))),
            DynSolType::FixedBytes(32),
        ],
    )?;
    check_arena(&values[0], arena_id)?;
    Ok(Reveal {
        pred_words: abi::uint_array(&values[1], "predWords")?,
        salt: abi::word(&values[2], "salt")?,
    })
}

/// A player's standing from `getPlayerState` return data
/// `(bytes32 commitHash, bool revealed, uint16 score)`.
pub fn decode_player_state(data: &[u8], player: Address) -> Result<PlayerStanding, String> {
    let values = abi::decode_params(
        data,
        &[DynSolType::FixedBytes(32), DynSolType::Bool, DynSolType::Uint(16)],
    )?;
    Ok(PlayerStanding {
        player,
        revealed: abi::boolean(&values[1], "revealed")?,
        score: abi::uint(&values[2], "score")?,
    })
}

fn check_arena(value: &DynSolValue, arena_id: U256) -> Result<(), String> {
    let called: U256 = abi::uint(value, "arenaId")?;
    if called != arena_id {
        return Err(format!("calldata targets arena {called}, event is for arena {arena_id}"));
    }
    Ok(())
}

/// What an enrichment pass filled in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichReport {
    pub commitments: usize,
    pub reveals: usize,
    pub standings: usize,
    /// Fields left empty; their arenas are flagged incomplete.
    pub gaps: usize,
}

/// Fills in the ledger-side details of a batch's events.
pub struct Enricher<'a, L: ?Sized, P: ?Sized> {
    ledger: &'a L,
    projection: &'a P,
    contract: Address,
    concurrency: usize,
}

impl<'a, L, P> Enricher<'a, L, P>
where
    L: LedgerClient + ?Sized,
    P: Projection + ?Sized,
{
    pub fn new(ledger: &'a L, projection: &'a P, contract: Address, concurrency: usize) -> Self {
        Self {
            ledger,
            projection,
            contract,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn enrich(&self, batch: &mut Batch) -> Result<EnrichReport, IndexerError> {
        let mut report = EnrichReport::default();
        self.fill_calldata(batch, &mut report).await?;
        self.fill_standings(batch, &mut report).await?;
        Ok(report)
    }

    async fn fill_calldata(&self, batch: &mut Batch, report: &mut EnrichReport) -> Result<(), IndexerError> {
        let txs: BTreeSet<String> = batch
            .events
            .iter()
            .filter(|env| {
                matches!(
                    env.event,
                    ArenaEvent::PredictionCommitted { commit_hash: None, .. }
                        | ArenaEvent::PredictionRevealed { reveal: None, .. }
                )
            })
            .map(|env| env.tx_hash.clone())
            .collect();
        if txs.is_empty() {
            return Ok(());
        }

        let requests: Vec<_> = txs.iter().map(|tx| self.ledger.transaction_input(tx)).collect();
        let inputs: Vec<Option<Vec<u8>>> = stream::iter(requests)
            .buffered(self.concurrency)
            .try_collect()
            .await?;
        let mut by_tx: HashMap<&str, Vec<u8>> = HashMap::new();
        for (tx, input) in txs.iter().zip(inputs) {
            let input = input.ok_or_else(|| {
                IndexerError::transient(format!("transaction {tx} not found while its logs are visible"))
            })?;
            by_tx.insert(tx.as_str(), input);
        }

        let mut gaps = Vec::new();
        for env in batch.events.iter_mut() {
            let Some(input) = by_tx.get(env.tx_hash.as_str()) else {
                continue;
            };
            match &mut env.event {
                ArenaEvent::PredictionCommitted {
                    arena_id,
                    commit_hash: slot @ None,
                    ..
                } => match decode_commit(input, *arena_id) {
                    Ok(hash) => {
                        *slot = Some(hash);
                        report.commitments += 1;
                    }
                    Err(reason) => gaps.push((*arena_id, env.block_number, env.log_index, reason)),
                },
                ArenaEvent::PredictionRevealed {
                    arena_id,
                    reveal: slot @ None,
                    ..
                } => match decode_reveal(input, *arena_id) {
                    Ok(reveal) => {
                        *slot = Some(reveal);
                        report.reveals += 1;
                    }
                    Err(reason) => gaps.push((*arena_id, env.block_number, env.log_index, reason)),
                },
                _ => {}
            }
        }
        for (arena_id, block, log_index, reason) in gaps {
            tracing::warn!(arena = %arena_id, block, log_index, reason = %reason, "calldata not enriched, arena flagged incomplete");
            batch.incomplete_arenas.insert(arena_id);
            report.gaps += 1;
        }
        Ok(())
    }

    async fn fill_standings(&self, batch: &mut Batch, report: &mut EnrichReport) -> Result<(), IndexerError> {
        // (event index, arena, block, player) for every standing to read
        let mut lookups: Vec<(usize, U256, u64, Address)> = Vec::new();
        for (i, env) in batch.events.iter().enumerate() {
            let ArenaEvent::ArenaFinalized { arena_id, standings, .. } = &env.event else {
                continue;
            };
            if !standings.is_empty() {
                continue;
            }
            let mut players = self.projection.arena_players(*arena_id).await?;
            for earlier in &batch.events[..i] {
                if let ArenaEvent::PlayerJoined { arena_id: joined, player, .. } = &earlier.event {
                    if joined == arena_id && !players.contains(player) {
                        players.push(*player);
                    }
                }
            }
            lookups.extend(players.into_iter().map(|p| (i, *arena_id, env.block_number, p)));
        }
        if lookups.is_empty() {
            return Ok(());
        }

        let requests: Vec<_> = lookups
            .iter()
            .map(|(_, arena_id, block, player)| {
                self.ledger
                    .call(self.contract, player_state_calldata(*arena_id, *player), Some(*block))
            })
            .collect();
        let results: Vec<Vec<u8>> = stream::iter(requests)
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        for ((i, arena_id, block, player), data) in lookups.into_iter().zip(results) {
            match decode_player_state(&data, player) {
                Ok(standing) => {
                    if let ArenaEvent::ArenaFinalized { standings, .. } = &mut batch.events[i].event {
                        standings.push(standing);
                        report.standings += 1;
                    }
                }
                Err(reason) => {
                    tracing::warn!(arena = %arena_id, block, player = %player, reason = %reason, "player state unreadable, arena flagged incomplete");
                    batch.incomplete_arenas.insert(arena_id);
                    report.gaps += 1;
                }
            }
        }
        Ok(())
    }
}
