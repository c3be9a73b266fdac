//! An in-memory chain that plays the node's side of [`LedgerClient`].
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use alloy_core::dyn_abi::DynSolValue;
use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;

use arenaindex_core::{BlockSummary, IndexerError};
use arenaindex_evm::{EventKind, LedgerClient, RawLog};

pub fn contract() -> Address {
    Address::repeat_byte(0x11)
}

pub fn u(v: u64) -> U256 {
    U256::from(v)
}

pub fn uint_topic(v: U256) -> String {
    format!("{:#x}", B256::from(v.to_be_bytes::<32>()))
}

pub fn addr_topic(a: Address) -> String {
    format!("{:#x}", a.into_word())
}

fn block_hash(branch: u8, number: u64) -> String {
    format!("0x{branch:02x}{number:062x}")
}

#[derive(Default)]
struct State {
    blocks: Vec<BlockSummary>,
    branch: u8,
    logs: Vec<RawLog>,
    inputs: HashMap<String, Vec<u8>>,
    calls: HashMap<(Address, Vec<u8>), Vec<u8>>,
    failing_calls: HashSet<(Address, Vec<u8>)>,
    failing_log_requests: u32,
    log_requests: u32,
    visible_head: Option<u64>,
    fork_on_head: Option<u64>,
    next_tx: u64,
}

/// Blocks `0..=head` on a numbered branch, the contract's logs in them,
/// transaction calldata and canned `eth_call` results.
pub struct MockChain {
    state: Mutex<State>,
}

impl MockChain {
    pub fn new(head: u64) -> Self {
        let chain = Self {
            state: Mutex::new(State::default()),
        };
        chain.mine_to(head);
        chain
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Extend the current branch up to `head`.
    pub fn mine_to(&self, head: u64) {
        let mut s = self.lock();
        let branch = s.branch;
        while s.blocks.len() as u64 <= head {
            let number = s.blocks.len() as u64;
            let parent_hash = s
                .blocks
                .last()
                .map(|b| b.hash.clone())
                .unwrap_or_else(|| format!("0x{:064x}", 0));
            s.blocks.push(BlockSummary {
                number,
                hash: block_hash(branch, number),
                parent_hash,
                timestamp: 1_700_000_000 + number as i64,
            });
        }
    }

    /// Replace every block from `height` up with a new branch of the same
    /// length. Logs in the replaced blocks disappear.
    pub fn fork_at(&self, height: u64) {
        let mut s = self.lock();
        let head = s.blocks.len() as u64 - 1;
        s.branch += 1;
        s.blocks.truncate(height as usize);
        s.logs.retain(|l| l.block_number_u64().map(|n| n < height).unwrap_or(false));
        drop(s);
        self.mine_to(head);
    }

    /// Fork at `height` while answering the next head request, i.e. after
    /// the loop has checked its checkpoint against the chain.
    pub fn fork_on_next_head(&self, height: u64) {
        self.lock().fork_on_head = Some(height);
    }

    /// Report at most `head` as the chain head until [`show_all`](Self::show_all).
    pub fn hide_above(&self, head: u64) {
        self.lock().visible_head = Some(head);
    }

    pub fn show_all(&self) {
        self.lock().visible_head = None;
    }

    pub fn hash_of(&self, number: u64) -> String {
        self.lock().blocks[number as usize].hash.clone()
    }

    /// The next `n` `eth_getLogs` requests fail.
    pub fn fail_log_requests(&self, n: u32) {
        self.lock().failing_log_requests = n;
    }

    pub fn log_requests(&self) -> u32 {
        self.lock().log_requests
    }

    /// Emit a contract log in `block` from a fresh transaction carrying
    /// `input`. Returns the transaction hash.
    pub fn emit(&self, block: u64, topics: Vec<String>, data: Vec<u8>, input: Vec<u8>) -> String {
        let mut s = self.lock();
        s.next_tx += 1;
        let tx_hash = format!("0x{:064x}", 0xA000 + s.next_tx);
        let log_index = s
            .logs
            .iter()
            .filter(|l| l.block_number_u64().ok() == Some(block))
            .count();
        let block_hash = s.blocks[block as usize].hash.clone();
        s.logs.push(RawLog {
            address: format!("{:#x}", contract()),
            topics,
            data: format!("0x{}", hex::encode(data)),
            block_number: format!("{block:#x}"),
            block_hash,
            tx_hash: tx_hash.clone(),
            log_index: format!("{log_index:#x}"),
            removed: None,
        });
        s.inputs.insert(tx_hash.clone(), input);
        tx_hash
    }

    /// Emit `kind` with the given indexed topics and non-indexed values.
    pub fn event(&self, block: u64, kind: EventKind, indexed: Vec<String>, data: Vec<DynSolValue>) -> String {
        self.event_with_input(block, kind, indexed, data, Vec::new())
    }

    pub fn event_with_input(
        &self,
        block: u64,
        kind: EventKind,
        indexed: Vec<String>,
        data: Vec<DynSolValue>,
        input: Vec<u8>,
    ) -> String {
        let mut topics = vec![format!("{:#x}", kind.topic0())];
        topics.extend(indexed);
        let data = if data.is_empty() {
            Vec::new()
        } else {
            DynSolValue::Tuple(data).abi_encode_params()
        };
        self.emit(block, topics, data, input)
    }

    /// Answer `eth_call(to, data)` with `output` at any block.
    pub fn on_call(&self, to: Address, data: Vec<u8>, output: Vec<u8>) {
        self.lock().calls.insert((to, data), output);
    }

    /// Make `eth_call(to, data)` fail.
    pub fn fail_call(&self, to: Address, data: Vec<u8>) {
        self.lock().failing_calls.insert((to, data));
    }

    // ─── ArenaEngine events ──────────────────────────────────────────────

    pub fn arena_created(&self, block: u64, arena: u64, fee: u64, start: u64, end: u64) {
        self.event(
            block,
            EventKind::ArenaCreated,
            vec![uint_topic(u(arena))],
            vec![
                DynSolValue::Uint(u(1), 8),
                DynSolValue::Uint(u(fee), 128),
                DynSolValue::Uint(u(start), 40),
                DynSolValue::Uint(u(end), 40),
            ],
        );
    }

    pub fn player_joined(&self, block: u64, arena: u64, player: Address, referrer: Address) {
        self.event(
            block,
            EventKind::PlayerJoined,
            vec![uint_topic(u(arena)), addr_topic(player), addr_topic(referrer)],
            vec![],
        );
    }

    pub fn committed(&self, block: u64, arena: u64, player: Address, input: Vec<u8>) {
        self.event_with_input(
            block,
            EventKind::PredictionCommitted,
            vec![uint_topic(u(arena)), addr_topic(player)],
            vec![],
            input,
        );
    }

    pub fn revealed(&self, block: u64, arena: u64, player: Address, input: Vec<u8>) {
        self.event_with_input(
            block,
            EventKind::PredictionRevealed,
            vec![uint_topic(u(arena)), addr_topic(player)],
            vec![],
            input,
        );
    }

    pub fn finalized(&self, block: u64, arena: u64, winners: u64, best_score: u64) {
        self.event(
            block,
            EventKind::ArenaFinalized,
            vec![uint_topic(u(arena))],
            vec![DynSolValue::Uint(u(winners), 256), DynSolValue::Uint(u(best_score), 16)],
        );
    }

    pub fn pot_distributed(&self, block: u64, arena: u64, winner: Address, amount: u64) {
        self.event(
            block,
            EventKind::PotDistributed,
            vec![uint_topic(u(arena)), addr_topic(winner)],
            vec![DynSolValue::Uint(u(amount), 256)],
        );
    }
}

#[async_trait]
impl LedgerClient for MockChain {
    async fn head_block_number(&self) -> Result<u64, IndexerError> {
        let pending = self.lock().fork_on_head.take();
        if let Some(height) = pending {
            self.fork_at(height);
        }
        let s = self.lock();
        let head = s.blocks.len() as u64 - 1;
        Ok(s.visible_head.map_or(head, |cap| cap.min(head)))
    }

    async fn block(&self, number: u64) -> Result<Option<BlockSummary>, IndexerError> {
        Ok(self.lock().blocks.get(number as usize).cloned())
    }

    async fn logs(&self, from: u64, to: u64) -> Result<Vec<RawLog>, IndexerError> {
        let mut s = self.lock();
        s.log_requests += 1;
        if s.failing_log_requests > 0 {
            s.failing_log_requests -= 1;
            return Err(IndexerError::transient("eth_getLogs: upstream unavailable"));
        }
        let mut logs: Vec<RawLog> = s
            .logs
            .iter()
            .filter(|l| l.block_number_u64().is_ok_and(|n| (from..=to).contains(&n)))
            .cloned()
            .collect();
        logs.sort_by_key(|l| l.position().unwrap_or_default());
        Ok(logs)
    }

    async fn transaction_input(&self, tx_hash: &str) -> Result<Option<Vec<u8>>, IndexerError> {
        Ok(self.lock().inputs.get(&tx_hash.to_lowercase()).cloned())
    }

    async fn call(&self, to: Address, data: Vec<u8>, _block: Option<u64>) -> Result<Vec<u8>, IndexerError> {
        let s = self.lock();
        let key = (to, data);
        if s.failing_calls.contains(&key) {
            return Err(IndexerError::transient("eth_call: execution reverted"));
        }
        s.calls
            .get(&key)
            .cloned()
            .ok_or_else(|| IndexerError::transient("eth_call: no result scripted"))
    }
}
