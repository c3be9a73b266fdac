//! Change descriptors published after each commit or rewind.

use std::collections::BTreeSet;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// What a committed batch (or a rewind) touched.
///
/// Consumers such as a live broadcast layer use this to re-read exactly the
/// rows that changed instead of polling the whole projection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub from_block: u64,
    pub to_block: u64,
    pub arenas: BTreeSet<U256>,
    /// `(arena_id, player)` rows.
    pub players: BTreeSet<(U256, Address)>,
    /// Addresses whose `player_stats` row changed.
    pub leaderboard: BTreeSet<Address>,
    /// Referrers with new referral rows.
    pub referrals: BTreeSet<Address>,
    pub tournaments: BTreeSet<U256>,
    /// Set when this change set comes from a reorg rewind.
    pub rewound_to: Option<u64>,
}

impl ChangeSet {
    pub fn for_range(from_block: u64, to_block: u64) -> Self {
        Self {
            from_block,
            to_block,
            ..Default::default()
        }
    }

    pub fn rewind(to: u64) -> Self {
        Self {
            from_block: to,
            to_block: to,
            rewound_to: Some(to),
            ..Default::default()
        }
    }

    pub fn touch_arena(&mut self, arena_id: U256) {
        self.arenas.insert(arena_id);
    }

    pub fn touch_player(&mut self, arena_id: U256, player: Address) {
        self.arenas.insert(arena_id);
        self.players.insert((arena_id, player));
    }

    /// `true` if nothing was touched and no rewind happened.
    pub fn is_empty(&self) -> bool {
        self.arenas.is_empty()
            && self.players.is_empty()
            && self.leaderboard.is_empty()
            && self.referrals.is_empty()
            && self.tournaments.is_empty()
            && self.rewound_to.is_none()
    }

    /// Fold `other` into `self`, widening the block range.
    pub fn merge(&mut self, other: ChangeSet) {
        self.from_block = self.from_block.min(other.from_block);
        self.to_block = self.to_block.max(other.to_block);
        self.arenas.extend(other.arenas);
        self.players.extend(other.players);
        self.leaderboard.extend(other.leaderboard);
        self.referrals.extend(other.referrals);
        self.tournaments.extend(other.tournaments);
        self.rewound_to = match (self.rewound_to, other.rewound_to) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_player_touches_arena() {
        let mut cs = ChangeSet::for_range(10, 20);
        assert!(cs.is_empty());
        cs.touch_player(U256::from(42u64), Address::repeat_byte(1));
        assert!(cs.arenas.contains(&U256::from(42u64)));
        assert_eq!(cs.players.len(), 1);
        assert!(!cs.is_empty());
    }

    #[test]
    fn merge_widens_range() {
        let mut a = ChangeSet::for_range(10, 20);
        a.touch_arena(U256::from(1u64));
        let mut b = ChangeSet::for_range(21, 30);
        b.tournaments.insert(U256::from(9u64));
        a.merge(b);
        assert_eq!((a.from_block, a.to_block), (10, 30));
        assert_eq!(a.arenas.len(), 1);
        assert_eq!(a.tournaments.len(), 1);
        assert_eq!(a.rewound_to, None);
    }

    #[test]
    fn rewind_is_never_empty() {
        assert!(!ChangeSet::rewind(5).is_empty());
    }
}
