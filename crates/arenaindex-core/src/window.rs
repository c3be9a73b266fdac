//! Block-hash window: the recent `(height, hash)` pairs the indexer has seen,
//! kept so a fork can be located after the fact.
//!
//! The driver records every block within `max_reorg_depth` of the checkpoint,
//! so the newest still-canonical entry is always the exact fork point.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// One remembered block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHash {
    pub number: u64,
    pub hash: String,
}

/// Bounded ring of recent block hashes, ascending by height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHashWindow {
    capacity: usize,
    entries: VecDeque<BlockHash>,
}

impl BlockHashWindow {
    /// Create an empty window holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Record `hash` for `number`.
    ///
    /// Anything at or above `number` is discarded first, so pushing a height
    /// the window already holds replaces it and everything after it.
    pub fn push(&mut self, number: u64, hash: impl Into<String>) {
        self.truncate_from(number);
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(BlockHash {
            number,
            hash: hash.into(),
        });
    }

    /// Hash recorded for `number`, if it is still in the window.
    pub fn get(&self, number: u64) -> Option<&str> {
        self.entries
            .iter()
            .find(|b| b.number == number)
            .map(|b| b.hash.as_str())
    }

    /// Highest recorded entry.
    pub fn head(&self) -> Option<&BlockHash> {
        self.entries.back()
    }

    /// Discard everything above `number`.
    pub fn rewind_to(&mut self, number: u64) {
        while self.entries.back().is_some_and(|b| b.number > number) {
            self.entries.pop_back();
        }
    }

    /// Discard entries below `number`.
    pub fn prune_below(&mut self, number: u64) {
        while self.entries.front().is_some_and(|b| b.number < number) {
            self.entries.pop_front();
        }
    }

    /// Entries from newest to oldest.
    pub fn iter_desc(&self) -> impl Iterator<Item = &BlockHash> {
        self.entries.iter().rev()
    }

    /// Change the capacity, evicting the oldest entries if it shrank.
    pub fn resize(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn truncate_from(&mut self, number: u64) {
        while self.entries.back().is_some_and(|b| b.number >= number) {
            self.entries.pop_back();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_get() {
        let mut w = BlockHashWindow::new(10);
        w.push(100, "0xa");
        w.push(105, "0xb");
        assert_eq!(w.get(100), Some("0xa"));
        assert_eq!(w.get(105), Some("0xb"));
        assert_eq!(w.get(101), None);
        assert_eq!(w.head().unwrap().number, 105);
    }

    #[test]
    fn capacity_evicts_oldest() {
        let mut w = BlockHashWindow::new(3);
        for i in 0..5u64 {
            w.push(i, format!("0x{i}"));
        }
        assert_eq!(w.len(), 3);
        assert_eq!(w.get(1), None);
        assert_eq!(w.get(2), Some("0x2"));
    }

    #[test]
    fn push_lower_height_replaces_tail() {
        let mut w = BlockHashWindow::new(10);
        w.push(100, "0xa");
        w.push(101, "0xb");
        w.push(102, "0xc");
        w.push(101, "0xb2");
        assert_eq!(w.len(), 2);
        assert_eq!(w.get(101), Some("0xb2"));
        assert_eq!(w.get(102), None);
    }

    #[test]
    fn rewind_and_prune() {
        let mut w = BlockHashWindow::new(10);
        for i in 100..=110u64 {
            w.push(i, format!("0x{i}"));
        }
        w.rewind_to(105);
        assert_eq!(w.head().unwrap().number, 105);
        w.prune_below(103);
        let heights: Vec<u64> = w.iter_desc().map(|b| b.number).collect();
        assert_eq!(heights, vec![105, 104, 103]);
    }

    #[test]
    fn resize_keeps_newest() {
        let mut w = BlockHashWindow::new(10);
        for i in 0..6u64 {
            w.push(i, format!("0x{i}"));
        }
        w.resize(2);
        assert_eq!(w.capacity(), 2);
        let heights: Vec<u64> = w.iter_desc().map(|b| b.number).collect();
        assert_eq!(heights, vec![5, 4]);
    }
}
