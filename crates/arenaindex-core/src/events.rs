//! Decoded ArenaEngine events and the lifecycle enums they drive.
//!
//! Events carry the identities emitted on-chain. A few variants also carry
//! fields that are filled in after decoding, from the emitting transaction's
//! calldata or a contract read, because the log alone doesn't hold them.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

// ─── Lifecycles ───────────────────────────────────────────────────────────────

/// Arena lifecycle. Ordered: a status never moves backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArenaStatus {
    Upcoming,
    Active,
    Revealing,
    Finalized,
}

impl ArenaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upcoming => "upcoming",
            Self::Active => "active",
            Self::Revealing => "revealing",
            Self::Finalized => "finalized",
        }
    }

    /// The later of the two statuses.
    pub fn promote(self, to: ArenaStatus) -> ArenaStatus {
        self.max(to)
    }
}

impl fmt::Display for ArenaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArenaStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upcoming" => Ok(Self::Upcoming),
            "active" => Ok(Self::Active),
            "revealing" => Ok(Self::Revealing),
            "finalized" => Ok(Self::Finalized),
            other => Err(format!("unknown arena status '{other}'")),
        }
    }
}

/// Tournament lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TournamentStatus {
    Upcoming,
    Active,
    Finalized,
}

impl TournamentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upcoming => "upcoming",
            Self::Active => "active",
            Self::Finalized => "finalized",
        }
    }
}

impl fmt::Display for TournamentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TournamentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upcoming" => Ok(Self::Upcoming),
            "active" => Ok(Self::Active),
            "finalized" => Ok(Self::Finalized),
            other => Err(format!("unknown tournament status '{other}'")),
        }
    }
}

// ─── Enrichment payloads ──────────────────────────────────────────────────────

/// What a player revealed: the packed prediction words and the commit salt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reveal {
    pub pred_words: Vec<U256>,
    pub salt: B256,
}

/// A player's contract-side standing at finalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStanding {
    pub player: Address,
    pub revealed: bool,
    pub score: u16,
}

// ─── ArenaEvent ───────────────────────────────────────────────────────────────

/// One decoded contract event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ArenaEvent {
    ArenaCreated {
        arena_id: U256,
        tier: u8,
        entry_fee: U256,
        start_block: u64,
        end_block: u64,
    },
    PlayerJoined {
        arena_id: U256,
        player: Address,
        referrer: Address,
    },
    PredictionCommitted {
        arena_id: U256,
        player: Address,
        /// From `commitPrediction` calldata; `None` if the call wasn't direct.
        commit_hash: Option<B256>,
    },
    PredictionRevealed {
        arena_id: U256,
        player: Address,
        /// From `revealPrediction` calldata; `None` if the call wasn't direct.
        reveal: Option<Reveal>,
    },
    ArenaFinalized {
        arena_id: U256,
        winner_count: U256,
        best_score: u16,
        /// Read via `getPlayerState` at the finalization block.
        standings: Vec<PlayerStanding>,
    },
    GodStreakUpdate {
        player: Address,
        streak: u16,
    },
    PotDistributed {
        arena_id: U256,
        winner: Address,
        amount: U256,
    },
    ReferralPaid {
        referrer: Address,
        referee: Address,
        amount: U256,
    },
    ArenaReset {
        arena_id: U256,
        new_epoch: u32,
    },
    BotDetected {
        player: Address,
        reason: String,
    },
    TournamentCreated {
        tournament_id: U256,
        tier: u8,
        round_count: u8,
        arenas_per_round: u8,
    },
    TournamentArenaAdded {
        tournament_id: U256,
        round: u8,
        arena_id: U256,
    },
    TournamentFinalized {
        tournament_id: U256,
    },
}

impl ArenaEvent {
    /// The contract event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ArenaCreated { .. } => "ArenaCreated",
            Self::PlayerJoined { .. } => "PlayerJoined",
            Self::PredictionCommitted { .. } => "PredictionCommitted",
            Self::PredictionRevealed { .. } => "PredictionRevealed",
            Self::ArenaFinalized { .. } => "ArenaFinalized",
            Self::GodStreakUpdate { .. } => "GodStreakUpdate",
            Self::PotDistributed { .. } => "PotDistributed",
            Self::ReferralPaid { .. } => "ReferralPaid",
            Self::ArenaReset { .. } => "ArenaReset",
            Self::BotDetected { .. } => "BotDetected",
            Self::TournamentCreated { .. } => "TournamentCreated",
            Self::TournamentArenaAdded { .. } => "TournamentArenaAdded",
            Self::TournamentFinalized { .. } => "TournamentFinalized",
        }
    }

    /// The arena this event belongs to, if any.
    pub fn arena_id(&self) -> Option<U256> {
        match self {
            Self::ArenaCreated { arena_id, .. }
            | Self::PlayerJoined { arena_id, .. }
            | Self::PredictionCommitted { arena_id, .. }
            | Self::PredictionRevealed { arena_id, .. }
            | Self::ArenaFinalized { arena_id, .. }
            | Self::PotDistributed { arena_id, .. }
            | Self::ArenaReset { arena_id, .. }
            | Self::TournamentArenaAdded { arena_id, .. } => Some(*arena_id),
            _ => None,
        }
    }
}

/// An event plus where it sits in the chain.
///
/// `(block_number, log_index)` is the event's identity: the projection
/// journals it under that key and ignores a second copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub block_number: u64,
    pub block_hash: String,
    pub log_index: u64,
    pub tx_hash: String,
    /// Block timestamp when the node reports one, otherwise decode time.
    pub timestamp: i64,
    pub event: ArenaEvent,
}

impl EventEnvelope {
    /// Ordering key within the chain.
    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}
