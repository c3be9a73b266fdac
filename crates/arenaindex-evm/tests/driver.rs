//! The index loop against a scripted chain and an in-memory SQLite projection.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use alloy_core::dyn_abi::DynSolValue;
use alloy_primitives::{Address, B256};
use tokio::sync::{broadcast, watch};

use arenaindex_codec::{predictions_to_bitstring, Commitment};
use arenaindex_core::{
    ArenaStatus, ChangeSet, CheckpointStore, IndexerConfig, IndexerError, SyncState,
};
use arenaindex_evm::enrich::{commit_calldata, player_state_calldata, reveal_calldata};
use arenaindex_evm::{DriverStats, EventKind, IndexLoop, IndexerBuilder};
use arenaindex_rpc::RetryConfig;
use arenaindex_storage::SqliteProjection;

use common::{addr_topic, contract, u, uint_topic, MockChain};

fn alice() -> Address {
    Address::repeat_byte(0xA1)
}
fn bob() -> Address {
    Address::repeat_byte(0xB0)
}
fn carol() -> Address {
    Address::repeat_byte(0xC0)
}
fn dave() -> Address {
    Address::repeat_byte(0xD0)
}

fn builder() -> IndexerBuilder {
    IndexerBuilder::new()
        .rpc_url("http://ledger.test")
        .contract(contract())
        .from_block(1)
        .max_reorg_depth(4)
        .batch_size(5)
        .poll_interval_ms(5)
}

fn bounded(to_block: u64) -> IndexerConfig {
    builder().to_block(to_block).build().unwrap()
}

type Loop = IndexLoop<MockChain, SqliteProjection>;

fn index_loop(
    config: IndexerConfig,
    chain: &Arc<MockChain>,
    store: &Arc<SqliteProjection>,
) -> (Loop, broadcast::Receiver<ChangeSet>) {
    let (changes, rx) = broadcast::channel(64);
    let checkpoints = Arc::clone(store) as Arc<dyn CheckpointStore>;
    let index = IndexLoop::new(config, Arc::clone(chain), Arc::clone(store), checkpoints, changes)
        .unwrap()
        .with_retry(RetryConfig {
            max_retries: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            multiplier: 2.0,
            jitter_fraction: 0.0,
        });
    (index, rx)
}

async fn run(index: &mut Loop) -> Result<DriverStats, IndexerError> {
    let (_stop, rx) = watch::channel(false);
    tokio::time::timeout(Duration::from_secs(10), index.run(rx))
        .await
        .expect("index loop did not finish")
}

async fn checkpoint_block(store: &SqliteProjection, config: &IndexerConfig) -> Option<u64> {
    store
        .load(&config.stream())
        .await
        .unwrap()
        .map(|cp| cp.last_processed_block)
}

fn drain(rx: &mut broadcast::Receiver<ChangeSet>) -> Vec<ChangeSet> {
    let mut sets = Vec::new();
    while let Ok(set) = rx.try_recv() {
        sets.push(set);
    }
    sets
}

fn player_state(revealed: bool, score: u64) -> Vec<u8> {
    DynSolValue::Tuple(vec![
        DynSolValue::FixedBytes(B256::ZERO, 32),
        DynSolValue::Bool(revealed),
        DynSolValue::Uint(u(score), 16),
    ])
    .abi_encode_params()
}

#[tokio::test]
async fn indexes_an_arena_lifecycle_with_enrichment() {
    let chain = Arc::new(MockChain::new(30));
    let predictions: Vec<bool> = (0..10).map(|i| i % 2 == 1).collect();
    let salt = B256::repeat_byte(0x5A);
    let commitment = Commitment::with_salt(u(42), alice(), salt, &predictions);

    chain.arena_created(2, 42, 100, 10, 19);
    chain.player_joined(3, 42, alice(), bob());
    chain.player_joined(4, 42, carol(), Address::ZERO);
    chain.committed(5, 42, alice(), commit_calldata(u(42), commitment.digest));
    chain.committed(6, 42, carol(), commit_calldata(u(42), B256::repeat_byte(0x09)));
    chain.revealed(21, 42, alice(), reveal_calldata(u(42), &commitment.words, salt));
    chain.revealed(22, 42, carol(), reveal_calldata(u(42), &[u(0x3FF)], salt));
    chain.finalized(23, 42, 1, 7);
    chain.pot_distributed(23, 42, alice(), 180);
    chain.on_call(contract(), player_state_calldata(u(42), alice()), player_state(true, 7));
    chain.on_call(contract(), player_state_calldata(u(42), carol()), player_state(true, 3));

    let store = Arc::new(SqliteProjection::in_memory().await.unwrap());
    let config = bounded(30);
    let (mut index, mut changes) = index_loop(config.clone(), &chain, &store);
    let stats = run(&mut index).await.unwrap();

    assert_eq!(stats.batches, 6);
    assert_eq!(stats.events_applied, 9);
    assert_eq!(stats.rejected, 0);
    assert_eq!(stats.enrichment_gaps, 0);
    assert_eq!(stats.reorgs, 0);
    assert_eq!(stats.last_processed_block, 30);
    assert_eq!(checkpoint_block(&store, &config).await, Some(30));

    let arena = store.arena(u(42)).await.unwrap().unwrap();
    assert_eq!(arena.status, ArenaStatus::Finalized);
    assert_eq!(arena.winner_count, Some(u(1)));
    assert_eq!(arena.best_score, Some(7));
    assert_eq!(arena.created_at, 1_700_000_002);
    assert!(!arena.incomplete);

    let a = store.player(u(42), alice()).await.unwrap().unwrap();
    assert_eq!(a.referrer, Some(bob()));
    assert_eq!(a.commitment_hash, Some(commitment.digest));
    assert_eq!(a.prediction.as_deref(), Some(predictions_to_bitstring(&predictions).as_str()));
    assert_eq!(a.commitment_verified, Some(true));
    assert_eq!(a.score, Some(7));
    assert_eq!(a.payout, Some(u(180)));

    let c = store.player(u(42), carol()).await.unwrap().unwrap();
    assert_eq!(c.commitment_verified, Some(false));
    assert_eq!(c.score, Some(3));

    assert_eq!(store.player_stats(alice()).await.unwrap().unwrap().wins, 1);
    assert_eq!(store.player_stats(carol()).await.unwrap().unwrap().losses, 1);

    let published = drain(&mut changes);
    assert!(!published.is_empty());
    assert!(published.iter().all(|set| set.rewound_to.is_none()));
    assert!(published.iter().any(|set| set.arenas.contains(&u(42))));
}

#[tokio::test]
async fn resumes_from_the_saved_checkpoint() {
    let chain = Arc::new(MockChain::new(20));
    chain.arena_created(2, 7, 10, 30, 40);
    chain.player_joined(14, 7, alice(), Address::ZERO);

    let store = Arc::new(SqliteProjection::in_memory().await.unwrap());
    let (mut first, _) = index_loop(bounded(10), &chain, &store);
    run(&mut first).await.unwrap();
    let requests = chain.log_requests();

    let (mut second, _) = index_loop(bounded(20), &chain, &store);
    let stats = run(&mut second).await.unwrap();

    assert_eq!(stats.batches, 2);
    assert_eq!(stats.events_applied, 1);
    assert_eq!(stats.duplicates, 0);
    assert_eq!(chain.log_requests() - requests, 2);
    assert_eq!(store.journal_len().await.unwrap(), 2);
}

#[tokio::test]
async fn rewinds_to_the_fork_point_and_follows_the_new_branch() {
    let chain = Arc::new(MockChain::new(12));
    chain.arena_created(2, 7, 10, 30, 40);
    chain.player_joined(3, 7, alice(), Address::ZERO);
    chain.player_joined(9, 7, carol(), Address::ZERO);

    let store = Arc::new(SqliteProjection::in_memory().await.unwrap());
    let (mut first, _) = index_loop(bounded(10), &chain, &store);
    run(&mut first).await.unwrap();
    assert_eq!(store.players(u(7)).await.unwrap().len(), 2);

    let orphaned = chain.hash_of(10);
    chain.fork_at(8);
    chain.player_joined(9, 7, dave(), Address::ZERO);
    assert_ne!(chain.hash_of(10), orphaned);

    let config = bounded(12);
    let (mut second, mut changes) = index_loop(config.clone(), &chain, &store);
    let stats = run(&mut second).await.unwrap();

    assert_eq!(stats.reorgs, 1);
    assert_eq!(stats.last_processed_block, 12);
    assert_eq!(checkpoint_block(&store, &config).await, Some(12));

    let players: BTreeSet<Address> = store
        .players(u(7))
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.address)
        .collect();
    assert_eq!(players, BTreeSet::from([alice(), dave()]));

    let published = drain(&mut changes);
    let rewind = published
        .iter()
        .find(|set| set.rewound_to.is_some())
        .expect("rewind published");
    assert_eq!(rewind.rewound_to, Some(7));
    assert!(rewind.players.contains(&(u(7), carol())));
}

#[tokio::test]
async fn reorg_between_check_and_fetch_is_not_merged() {
    let chain = Arc::new(MockChain::new(12));
    chain.arena_created(2, 7, 10, 30, 40);
    chain.player_joined(3, 7, alice(), Address::ZERO);
    chain.player_joined(10, 7, carol(), Address::ZERO);

    let store = Arc::new(SqliteProjection::in_memory().await.unwrap());
    let (mut first, _) = index_loop(bounded(10), &chain, &store);
    run(&mut first).await.unwrap();
    assert_eq!(store.players(u(7)).await.unwrap().len(), 2);

    chain.fork_on_next_head(10);
    let config = bounded(12);
    let (mut second, _) = index_loop(config.clone(), &chain, &store);
    let stats = run(&mut second).await.unwrap();

    assert_eq!(stats.transient_errors, 1);
    assert_eq!(stats.reorgs, 1);
    assert_eq!(stats.last_processed_block, 12);
    assert_eq!(checkpoint_block(&store, &config).await, Some(12));

    let players: Vec<Address> = store
        .players(u(7))
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.address)
        .collect();
    assert_eq!(players, vec![alice()]);

    let saved = store.load(&config.stream()).await.unwrap().unwrap();
    assert_eq!(saved.recent_hashes.get(10), Some(chain.hash_of(10).as_str()));
}

#[tokio::test]
async fn reorg_deeper_than_the_limit_halts() {
    let chain = Arc::new(MockChain::new(20));
    chain.arena_created(2, 7, 10, 30, 40);

    let store = Arc::new(SqliteProjection::in_memory().await.unwrap());
    let config = bounded(20);
    let (mut first, _) = index_loop(config.clone(), &chain, &store);
    run(&mut first).await.unwrap();

    chain.fork_at(10);
    let (mut second, _) = index_loop(config.clone(), &chain, &store);
    let err = run(&mut second).await.unwrap_err();

    match err {
        IndexerError::ReorgExceedsDepth {
            max_depth, checkpoint, ..
        } => {
            assert_eq!(max_depth, 4);
            assert_eq!(checkpoint, 20);
        }
        other => panic!("expected ReorgExceedsDepth, got {other}"),
    }
    assert_eq!(second.stats().transient_errors, 0);
    assert_eq!(checkpoint_block(&store, &config).await, Some(20));
    assert!(store.arena(u(7)).await.unwrap().is_some());
}

#[tokio::test]
async fn transient_failures_retry_from_the_same_checkpoint() {
    let chain = Arc::new(MockChain::new(10));
    chain.arena_created(2, 7, 10, 30, 40);
    chain.player_joined(8, 7, alice(), Address::ZERO);
    chain.fail_log_requests(2);

    let store = Arc::new(SqliteProjection::in_memory().await.unwrap());
    let (mut index, _) = index_loop(bounded(10), &chain, &store);
    let stats = run(&mut index).await.unwrap();

    assert_eq!(stats.transient_errors, 2);
    assert_eq!(stats.batches, 2);
    assert_eq!(stats.events_applied, 2);
    assert_eq!(stats.duplicates, 0);
    assert_eq!(chain.log_requests(), 4);
}

#[tokio::test]
async fn stop_signal_ends_a_failing_loop_without_progress() {
    let chain = Arc::new(MockChain::new(10));
    chain.arena_created(2, 7, 10, 30, 40);
    chain.fail_log_requests(u32::MAX);

    let store = Arc::new(SqliteProjection::in_memory().await.unwrap());
    let config = builder().build().unwrap();
    let (mut index, _) = index_loop(config.clone(), &chain, &store);

    let (stop, rx) = watch::channel(false);
    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.send(true).unwrap();
        stop
    });
    let stats = tokio::time::timeout(Duration::from_secs(10), index.run(rx))
        .await
        .expect("stop was not honoured")
        .unwrap();
    drop(stopper.await.unwrap());

    assert!(stats.transient_errors > 0);
    assert_eq!(stats.batches, 0);
    assert_eq!(stats.last_processed_block, 0);
    assert_eq!(store.journal_len().await.unwrap(), 0);
    assert_eq!(checkpoint_block(&store, &config).await.unwrap_or(0), 0);
}

#[tokio::test]
async fn follows_new_blocks_behind_the_confirmation_depth() {
    let chain = Arc::new(MockChain::new(12));
    chain.arena_created(2, 7, 10, 30, 40);
    chain.player_joined(9, 7, alice(), Address::ZERO);
    chain.player_joined(11, 7, carol(), Address::ZERO);
    chain.hide_above(6);

    let store = Arc::new(SqliteProjection::in_memory().await.unwrap());
    let config = builder().confirmation_depth(2).build().unwrap();
    let (mut index, _) = index_loop(config, &chain, &store);

    let (stop, rx) = watch::channel(false);
    let producer = {
        let chain = Arc::clone(&chain);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            chain.show_all();
            tokio::time::sleep(Duration::from_millis(150)).await;
            stop.send(true).unwrap();
            stop
        })
    };
    let stats = tokio::time::timeout(Duration::from_secs(10), index.run(rx))
        .await
        .expect("stop was not honoured")
        .unwrap();
    drop(producer.await.unwrap());

    assert_eq!(stats.last_processed_block, 10);
    assert_eq!(index.state(), SyncState::Synced);
    assert!(store.player(u(7), alice()).await.unwrap().is_some());
    assert!(store.player(u(7), carol()).await.unwrap().is_none());
}

#[tokio::test]
async fn undecodable_and_unenrichable_events_flag_their_arenas() {
    let chain = Arc::new(MockChain::new(10));
    chain.arena_created(1, 7, 10, 30, 40);
    chain.arena_created(1, 8, 10, 30, 40);
    chain.arena_created(1, 9, 10, 30, 40);
    chain.player_joined(2, 8, bob(), Address::ZERO);
    chain.player_joined(2, 9, alice(), Address::ZERO);

    // PlayerJoined without its referrer topic.
    chain.event(
        6,
        EventKind::PlayerJoined,
        vec![uint_topic(u(7)), addr_topic(carol())],
        vec![],
    );
    // A commit relayed through another contract.
    chain.committed(7, 8, bob(), vec![0xde, 0xad, 0xbe, 0xef, 0x00]);
    // Somebody else's event.
    chain.emit(8, vec![format!("{:#x}", B256::repeat_byte(0xEE))], Vec::new(), Vec::new());

    let store = Arc::new(SqliteProjection::in_memory().await.unwrap());
    let (mut index, _) = index_loop(bounded(10), &chain, &store);
    let stats = run(&mut index).await.unwrap();

    assert_eq!(stats.decode_failures, 1);
    assert_eq!(stats.enrichment_gaps, 1);
    assert_eq!(stats.unknown_logs, 1);
    assert_eq!(stats.events_applied, 6);
    assert_eq!(stats.last_processed_block, 10);

    assert!(store.arena(u(7)).await.unwrap().unwrap().incomplete);
    assert!(store.arena(u(8)).await.unwrap().unwrap().incomplete);
    assert!(!store.arena(u(9)).await.unwrap().unwrap().incomplete);
    assert!(store.player(u(7), carol()).await.unwrap().is_none());
    assert_eq!(store.player(u(8), bob()).await.unwrap().unwrap().commitment_hash, None);
}

#[tokio::test]
async fn projection_ahead_of_checkpoint_is_rewound_on_start() {
    let chain = Arc::new(MockChain::new(10));
    chain.arena_created(2, 7, 10, 30, 40);
    chain.player_joined(4, 7, alice(), Address::ZERO);
    chain.player_joined(8, 7, carol(), Address::ZERO);

    let store = Arc::new(SqliteProjection::in_memory().await.unwrap());
    let config = bounded(10);
    let (mut first, _) = index_loop(config.clone(), &chain, &store);
    run(&mut first).await.unwrap();

    // Roll the checkpoint back as if the process died before saving it.
    let mut cp = store.load(&config.stream()).await.unwrap().unwrap();
    cp.last_processed_block = 5;
    cp.recent_hashes.rewind_to(5);
    store.save(&cp).await.unwrap();

    let (mut second, mut changes) = index_loop(config.clone(), &chain, &store);
    let stats = run(&mut second).await.unwrap();

    assert_eq!(stats.duplicates, 0);
    assert_eq!(stats.events_applied, 1);
    assert_eq!(store.journal_len().await.unwrap(), 3);
    let published = drain(&mut changes);
    assert_eq!(published.first().and_then(|set| set.rewound_to), Some(5));
}
