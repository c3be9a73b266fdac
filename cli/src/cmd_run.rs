//! `arenaindex run`: follow the ArenaEngine contract into a SQLite projection.
//!
//! Ctrl-C asks the index loop to stop after the cycle in flight, so the
//! checkpoint always names a committed block.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tokio::sync::{broadcast, watch};

use arenaindex_core::{Address, ChangeSet, CheckpointStore};
use arenaindex_evm::{IndexLoop, IndexerBuilder, LedgerSettings, RpcLedger};
use arenaindex_rpc::{HttpClientConfig, HttpRpcClient};
use arenaindex_storage::{ProjectionSettings, SqliteProjection};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// JSON-RPC endpoint
    #[arg(long, env = "ARENA_RPC_URL")]
    pub rpc_url: String,

    /// ArenaEngine contract address
    #[arg(long, env = "ARENA_ENGINE_ADDRESS")]
    pub contract: String,

    #[arg(long, env = "ARENA_CHAIN_ID", default_value_t = 6343)]
    pub chain_id: u64,

    /// SQLite file or `sqlite:` URL
    #[arg(long, env = "ARENA_DATABASE_URL", default_value = "arena.db")]
    pub database: String,

    /// Deepest reorg to rewind through before stopping
    #[arg(long, env = "ARENA_MAX_REORG_DEPTH")]
    pub max_reorg_depth: u64,

    #[arg(long, env = "ARENA_FROM_BLOCK", default_value_t = 0)]
    pub from_block: u64,

    /// Stop once this block is indexed
    #[arg(long)]
    pub to_block: Option<u64>,

    #[arg(long, env = "ARENA_POLL_INTERVAL_MS", default_value_t = 1000)]
    pub poll_interval_ms: u64,

    /// Blocks to stay behind the head
    #[arg(long, default_value_t = 0)]
    pub confirmations: u64,

    /// Blocks applied per store transaction
    #[arg(long, default_value_t = 1000)]
    pub batch_size: u64,

    /// Blocks per eth_getLogs request
    #[arg(long, default_value_t = 500)]
    pub max_logs_range: u64,

    #[arg(long, default_value_t = 4)]
    pub fetch_concurrency: usize,

    #[arg(long, default_value_t = 30_000)]
    pub rpc_timeout_ms: u64,

    #[arg(long, default_value_t = 1000)]
    pub block_time_ms: u64,

    #[arg(long, default_value = "ETH/USD")]
    pub asset_pair: String,

    /// Indexer id, part of the checkpoint key
    #[arg(long, default_value = "arena-engine")]
    pub id: String,
}

pub async fn run(args: RunArgs) -> Result<()> {
    let contract: Address = args
        .contract
        .parse()
        .with_context(|| format!("invalid contract address '{}'", args.contract))?;

    let mut builder = IndexerBuilder::new()
        .id(args.id)
        .chain_id(args.chain_id)
        .rpc_url(args.rpc_url)
        .contract(contract)
        .from_block(args.from_block)
        .confirmation_depth(args.confirmations)
        .max_reorg_depth(args.max_reorg_depth)
        .batch_size(args.batch_size)
        .max_logs_range(args.max_logs_range)
        .fetch_concurrency(args.fetch_concurrency)
        .poll_interval_ms(args.poll_interval_ms)
        .rpc_timeout_ms(args.rpc_timeout_ms)
        .block_time_ms(args.block_time_ms)
        .asset_pair(args.asset_pair);
    if let Some(to_block) = args.to_block {
        builder = builder.to_block(to_block);
    }
    let config = builder.build()?;

    let transport = HttpRpcClient::new(
        config.rpc_url.clone(),
        HttpClientConfig {
            request_timeout: Duration::from_millis(config.rpc_timeout_ms),
            ..HttpClientConfig::default()
        },
    )?;
    let ledger = Arc::new(RpcLedger::new(transport, LedgerSettings::from_config(&config)));

    let store = Arc::new(
        SqliteProjection::open(&args.database)
            .await
            .with_context(|| format!("opening database '{}'", args.database))?
            .with_settings(ProjectionSettings {
                asset_pair: config.asset_pair.clone(),
                block_time_ms: config.block_time_ms,
            }),
    );

    let (changes, subscriber) = broadcast::channel(256);
    tokio::spawn(log_changes(subscriber));

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("interrupt received, stopping after the current cycle");
                let _ = stop_tx.send(true);
            }
            Err(err) => {
                tracing::warn!(error = %err, "cannot listen for Ctrl-C");
                stop_tx.closed().await;
            }
        }
    });

    let checkpoints = Arc::clone(&store) as Arc<dyn CheckpointStore>;
    let mut index = IndexLoop::new(config, ledger, store, checkpoints, changes)?;
    let stats = index.run(stop_rx).await?;

    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

async fn log_changes(mut subscriber: broadcast::Receiver<ChangeSet>) {
    loop {
        match subscriber.recv().await {
            Ok(set) => tracing::debug!(
                from = set.from_block,
                to = set.to_block,
                arenas = set.arenas.len(),
                players = set.players.len(),
                leaderboard = set.leaderboard.len(),
                rewound_to = ?set.rewound_to,
                "projection changed"
            ),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "change log lagging");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
