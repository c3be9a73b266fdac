//! ArenaEngine event decoder.
//!
//! `topics[0]` selects the event; indexed fields come from `topics[1..]`,
//! the rest from the ABI-encoded data payload. Logs whose topic 0 is not one
//! of the contract's events are returned as [`Decoded::Unknown`] and ignored.
//! A known event with a malformed payload is a
//! [`IndexerError::DecodeFailure`], carrying the arena id whenever topic 1
//! still yields one.

use std::collections::HashMap;

use alloy_core::dyn_abi::DynSolType;
use alloy_primitives::{Address, B256};

use arenaindex_core::{ArenaEvent, EventEnvelope, IndexerError};

use crate::abi::{self, parse_word, topic_address, topic_uint};
use crate::ledger::RawLog;

/// Every event the indexer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ArenaCreated,
    PlayerJoined,
    PredictionCommitted,
    PredictionRevealed,
    ArenaFinalized,
    GodStreakUpdate,
    PotDistributed,
    ReferralPaid,
    ArenaReset,
    BotDetected,
    TournamentCreated,
    TournamentArenaAdded,
    TournamentFinalized,
}

impl EventKind {
    pub const ALL: [EventKind; 13] = [
        Self::ArenaCreated,
        Self::PlayerJoined,
        Self::PredictionCommitted,
        Self::PredictionRevealed,
        Self::ArenaFinalized,
        Self::GodStreakUpdate,
        Self::PotDistributed,
        Self::ReferralPaid,
        Self::ArenaReset,
        Self::BotDetected,
        Self::TournamentCreated,
        Self::TournamentArenaAdded,
        Self::TournamentFinalized,
    ];

    /// Canonical ABI signature.
    pub fn signature(self) -> &'static str {
        match self {
            Self::ArenaCreated => "ArenaCreated(uint256,uint8,uint128,uint40,uint40)",
            Self::PlayerJoined => "PlayerJoined(uint256,address,address)",
            Self::PredictionCommitted => "PredictionCommitted(uint256,address)",
            Self::PredictionRevealed => "PredictionRevealed(uint256,address)",
            Self::ArenaFinalized => "ArenaFinalized(uint256,uint256,uint16)",
            Self::GodStreakUpdate => "GodStreakUpdate(address,uint16)",
            Self::PotDistributed => "PotDistributed(uint256,address,uint256)",
            Self::ReferralPaid => "ReferralPaid(address,address,uint256)",
            Self::ArenaReset => "ArenaReset(uint256,uint32)",
            Self::BotDetected => "BotDetected(address,string)",
            Self::TournamentCreated => "TournamentCreated(uint256,uint8,uint8,uint8)",
            Self::TournamentArenaAdded => "TournamentArenaAdded(uint256,uint8,uint256)",
            Self::TournamentFinalized => "TournamentFinalized(uint256)",
        }
    }

    pub fn topic0(self) -> B256 {
        abi::event_topic(self.signature())
    }

    /// `true` when topic 1 is an arena id.
    fn keyed_by_arena(self) -> bool {
        matches!(
            self,
            Self::ArenaCreated
                | Self::PlayerJoined
                | Self::PredictionCommitted
                | Self::PredictionRevealed
                | Self::ArenaFinalized
                | Self::PotDistributed
                | Self::ArenaReset
        )
    }

    /// Number of indexed parameters (topics after topic 0).
    fn indexed(self) -> usize {
        match self {
            Self::BotDetected => 0,
            Self::ArenaCreated
            | Self::ArenaFinalized
            | Self::GodStreakUpdate
            | Self::ArenaReset
            | Self::TournamentCreated
            | Self::TournamentArenaAdded
            | Self::TournamentFinalized => 1,
            Self::PredictionCommitted
            | Self::PredictionRevealed
            | Self::PotDistributed
            | Self::ReferralPaid => 2,
            Self::PlayerJoined => 3,
        }
    }

    /// Types of the non-indexed parameters, in order.
    fn data_types(self) -> Vec<DynSolType> {
        use DynSolType::{Address as Addr, String as Str, Uint};
        match self {
            Self::ArenaCreated => vec![Uint(8), Uint(128), Uint(40), Uint(40)],
            Self::ArenaFinalized => vec![Uint(256), Uint(16)],
            Self::GodStreakUpdate => vec![Uint(16)],
            Self::PotDistributed | Self::ReferralPaid => vec![Uint(256)],
            Self::ArenaReset => vec![Uint(32)],
            Self::BotDetected => vec![Addr, Str],
            Self::TournamentCreated => vec![Uint(8), Uint(8), Uint(8)],
            Self::TournamentArenaAdded => vec![Uint(8), Uint(256)],
            Self::PlayerJoined
            | Self::PredictionCommitted
            | Self::PredictionRevealed
            | Self::TournamentFinalized => vec![],
        }
    }
}

/// Result of decoding one log.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Event(EventEnvelope),
    /// Topic 0 is not an ArenaEngine event (or the log has no topics).
    Unknown,
}

/// Maps raw logs to [`ArenaEvent`]s.
#[derive(Debug, Clone)]
pub struct EventDecoder {
    by_topic: HashMap<B256, EventKind>,
}

impl Default for EventDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDecoder {
    pub fn new() -> Self {
        Self {
            by_topic: EventKind::ALL.iter().map(|k| (k.topic0(), *k)).collect(),
        }
    }

    /// Which event `topic0` identifies.
    pub fn kind(&self, topic0: &B256) -> Option<EventKind> {
        self.by_topic.get(topic0).copied()
    }

    /// Decode `log`, stamping the envelope with `timestamp`.
    pub fn decode(&self, log: &RawLog, timestamp: i64) -> Result<Decoded, IndexerError> {
        let Some(first) = log.topics.first() else {
            return Ok(Decoded::Unknown);
        };
        let Some(kind) = parse_word(first).ok().and_then(|t| self.kind(&t)) else {
            return Ok(Decoded::Unknown);
        };

        let (block_number, log_index) = log.position()?;
        let event = decode_event(kind, &log.topics[1..], &log.data).map_err(|reason| {
            let arena_id = if kind.keyed_by_arena() {
                log.topics
                    .get(1)
                    .and_then(|t| parse_word(t).ok())
                    .map(|w| topic_uint(&w).to_string())
            } else {
                None
            };
            IndexerError::decode(arena_id, format!("{}: {reason}", kind.signature()))
        })?;

        Ok(Decoded::Event(EventEnvelope {
            block_number,
            block_hash: log.block_hash.to_lowercase(),
            log_index,
            tx_hash: log.tx_hash.to_lowercase(),
            timestamp,
            event,
        }))
    }
}

fn decode_event(kind: EventKind, topics: &[String], data: &str) -> Result<ArenaEvent, String> {
    if topics.len() != kind.indexed() {
        return Err(format!(
            "expected {} indexed topics, got {}",
            kind.indexed(),
            topics.len()
        ));
    }
    let topics: Vec<B256> = topics.iter().map(|t| parse_word(t)).collect::<Result<_, _>>()?;
    let types = kind.data_types();
    let values = if types.is_empty() {
        Vec::new()
    } else {
        abi::decode_params(&abi::parse_data(data)?, &types)?
    };

    let topic_player = |i: usize| -> Result<Address, String> { topic_address(&topics[i]) };

    let event = match kind {
        EventKind::ArenaCreated => {
            let start_block: u64 = abi::uint(&values[2], "startBlock")?;
            let end_block: u64 = abi::uint(&values[3], "endBlock")?;
            ArenaEvent::ArenaCreated {
                arena_id: topic_uint(&topics[0]),
                tier: abi::uint(&values[0], "tier")?,
                entry_fee: abi::uint(&values[1], "entryFee")?,
                start_block,
                end_block,
            }
        }
        EventKind::PlayerJoined => ArenaEvent::PlayerJoined {
            arena_id: topic_uint(&topics[0]),
            player: topic_player(1)?,
            referrer: topic_player(2)?,
        },
        EventKind::PredictionCommitted => ArenaEvent::PredictionCommitted {
            arena_id: topic_uint(&topics[0]),
            player: topic_player(1)?,
            commit_hash: None,
        },
        EventKind::PredictionRevealed => ArenaEvent::PredictionRevealed {
            arena_id: topic_uint(&topics[0]),
            player: topic_player(1)?,
            reveal: None,
        },
        EventKind::ArenaFinalized => ArenaEvent::ArenaFinalized {
            arena_id: topic_uint(&topics[0]),
            winner_count: abi::uint(&values[0], "winnerCount")?,
            best_score: abi::uint(&values[1], "bestScore")?,
            standings: Vec::new(),
        },
        EventKind::GodStreakUpdate => ArenaEvent::GodStreakUpdate {
            player: topic_player(0)?,
            streak: abi::uint(&values[0], "streak")?,
        },
        EventKind::PotDistributed => ArenaEvent::PotDistributed {
            arena_id: topic_uint(&topics[0]),
            winner: topic_player(1)?,
            amount: abi::uint(&values[0], "amount")?,
        },
        EventKind::ReferralPaid => ArenaEvent::ReferralPaid {
            referrer: topic_player(0)?,
            referee: topic_player(1)?,
            amount: abi::uint(&values[0], "amount")?,
        },
        EventKind::ArenaReset => ArenaEvent::ArenaReset {
            arena_id: topic_uint(&topics[0]),
            new_epoch: abi::uint(&values[0], "newEpoch")?,
        },
        EventKind::BotDetected => ArenaEvent::BotDetected {
            player: abi::address(&values[0], "player")?,
            reason: abi::string(&values[1], "reason")?,
        },
        EventKind::TournamentCreated => ArenaEvent::TournamentCreated {
            tournament_id: topic_uint(&topics[0]),
            tier: abi::uint(&values[0], "tier")?,
            round_count: abi::uint(&values[1], "roundCount")?,
            arenas_per_round: abi::uint(&values[2], "arenasPerRound")?,
        },
        EventKind::TournamentArenaAdded => ArenaEvent::TournamentArenaAdded {
            tournament_id: topic_uint(&topics[0]),
            round: abi::uint(&values[0], "round")?,
            arena_id: abi::uint(&values[1], "arenaId")?,
        },
        EventKind::TournamentFinalized => ArenaEvent::TournamentFinalized {
            tournament_id: topic_uint(&topics[0]),
        },
    };
    Ok(event)
}
