//! Shared chain-level types.

use serde::{Deserialize, Serialize};

/// A minimal block summary: enough to anchor a checkpoint and detect forks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummary {
    /// Block number.
    pub number: u64,
    /// Block hash (`0x…`, lowercase).
    pub hash: String,
    /// Parent block hash (`0x…`, lowercase).
    pub parent_hash: String,
    /// Unix timestamp of the block (seconds since epoch).
    pub timestamp: i64,
}

impl BlockSummary {
    /// Returns `true` if `parent` is the direct parent of `self`.
    pub fn extends(&self, parent: &BlockSummary) -> bool {
        self.number == parent.number + 1 && self.parent_hash == parent.hash
    }
}
