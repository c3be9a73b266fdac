//! arenaindex CLI: run the ArenaEngine indexer and the codecs it is built on.
//!
//! # Commands
//! ```text
//! arenaindex run          --rpc-url <url> --contract <addr> --max-reorg-depth <n>
//! arenaindex status       --database <path> --contract <addr>
//! arenaindex commit-hash  --arena <id> --player <addr> --predictions <bits> [--salt <hex>]
//! arenaindex encode-tape  --prices <p1,p2,...>
//! arenaindex price-tape   --rpc-url <url> --feed <addr> --start <block> --end <block>
//! ```

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use arenaindex_codec::{bitstring_to_predictions, price_tape, Commitment};
use arenaindex_core::{Address, ArenaStatus, CheckpointStore, IndexerConfig, B256, U256};
use arenaindex_evm::{LedgerSettings, PriceTapeBuilder, RpcLedger};
use arenaindex_rpc::{HttpClientConfig, HttpRpcClient};
use arenaindex_storage::SqliteProjection;

mod cmd_run;
mod logging;

#[derive(Parser)]
#[command(
    name = "arenaindex",
    about = "ArenaEngine event indexer",
    long_about = "
arenaindex: follows the ArenaEngine prediction-market contract and keeps a
reorg-safe SQLite projection of arenas, players, stats and tournaments.

ENVIRONMENT VARIABLES:
  ARENA_RPC_URL            JSON-RPC endpoint
  ARENA_ENGINE_ADDRESS     ArenaEngine contract address
  ARENA_CHAIN_ID           Chain id (default 6343)
  ARENA_DATABASE_URL       SQLite file or sqlite: URL
  ARENA_POLL_INTERVAL_MS   Poll interval in milliseconds
  ARENA_MAX_REORG_DEPTH    Deepest reorg rewound automatically (required for run)
  ARENA_FROM_BLOCK         First block to index
  ARENA_LOG_LEVEL          trace | debug | info | warn | error
",
    version
)]
struct Cli {
    #[arg(long, global = true, env = "ARENA_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Per-crate override, e.g. `arenaindex_evm=debug` (repeatable)
    #[arg(long = "log", global = true)]
    log_overrides: Vec<String>,

    /// Emit JSON structured logs
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index the contract until interrupted (or until --to-block)
    Run(cmd_run::RunArgs),

    /// Print the saved checkpoint of an indexer database
    Status {
        #[arg(long, env = "ARENA_DATABASE_URL", default_value = "arena.db")]
        database: String,
        #[arg(long, env = "ARENA_ENGINE_ADDRESS")]
        contract: String,
        #[arg(long, env = "ARENA_CHAIN_ID", default_value_t = 6343)]
        chain_id: u64,
        #[arg(long, default_value = "arena-engine")]
        id: String,
    },

    /// Compute a prediction commitment
    #[command(name = "commit-hash")]
    CommitHash {
        /// Arena id (decimal or 0x-hex)
        #[arg(long)]
        arena: String,
        #[arg(long)]
        player: String,
        /// One character per tick: '1' = up, '0' = down
        #[arg(long)]
        predictions: String,
        /// 32-byte hex salt; a fresh one is generated when omitted
        #[arg(long)]
        salt: Option<String>,
    },

    /// Pack prices into price-tape words
    #[command(name = "encode-tape")]
    EncodeTape {
        #[arg(long, value_delimiter = ',', num_args = 1..)]
        prices: Vec<u64>,
        #[arg(long)]
        json: bool,
    },

    /// Sample a price feed for a block range and pack it
    #[command(name = "price-tape")]
    PriceTape {
        #[arg(long, env = "ARENA_RPC_URL")]
        rpc_url: String,
        /// Price feed contract address
        #[arg(long, env = "ARENA_PRICE_FEED_ADDRESS")]
        feed: String,
        #[arg(long, default_value = "ETH/USD")]
        asset_pair: String,
        #[arg(long)]
        start: u64,
        #[arg(long)]
        end: u64,
        /// Requests in flight at once
        #[arg(long, default_value_t = 8)]
        concurrency: usize,
        #[arg(long, default_value_t = 30_000)]
        rpc_timeout_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log = logging::LogConfig {
        level: cli.log_level.clone(),
        json: cli.log_json,
        ..logging::LogConfig::default()
    }
    .with_overrides(&cli.log_overrides)?;
    logging::init_tracing(&log);

    match cli.command {
        Commands::Run(args) => cmd_run::run(args).await,

        Commands::Status { database, contract, chain_id, id } => {
            cmd_status(&database, &contract, chain_id, &id).await
        }

        Commands::CommitHash { arena, player, predictions, salt } => {
            cmd_commit_hash(&arena, &player, &predictions, salt.as_deref())
        }

        Commands::EncodeTape { prices, json } => cmd_encode_tape(&prices, json),

        Commands::PriceTape {
            rpc_url,
            feed,
            asset_pair,
            start,
            end,
            concurrency,
            rpc_timeout_ms,
        } => cmd_price_tape(&rpc_url, &feed, &asset_pair, start, end, concurrency, rpc_timeout_ms).await,
    }
}

// ─── Command implementations ─────────────────────────────────────────────────

fn parse_address(value: &str) -> Result<Address> {
    value
        .parse()
        .with_context(|| format!("invalid address '{value}'"))
}

fn parse_u256(value: &str) -> Result<U256> {
    U256::from_str(value).with_context(|| format!("invalid integer '{value}'"))
}

async fn cmd_status(database: &str, contract: &str, chain_id: u64, id: &str) -> Result<()> {
    let mut config = IndexerConfig::new(String::new(), parse_address(contract)?, 0);
    config.id = id.to_string();
    config.chain_id = chain_id;
    let stream = config.stream();

    let store = SqliteProjection::open(database)
        .await
        .with_context(|| format!("opening database '{database}'"))?;
    let Some(checkpoint) = store.load(&stream).await? else {
        println!("No checkpoint for stream {stream}");
        return Ok(());
    };

    let arenas = store.arenas().await?;
    let finalized = arenas.iter().filter(|a| a.status == ArenaStatus::Finalized).count();
    let incomplete = arenas.iter().filter(|a| a.incomplete).count();
    let report = serde_json::json!({
        "stream": checkpoint.stream,
        "last_processed_block": checkpoint.last_processed_block,
        "last_hash": checkpoint.recent_hashes.get(checkpoint.last_processed_block),
        "recent_hashes": checkpoint.recent_hashes.len(),
        "updated_at": checkpoint.updated_at,
        "arenas": arenas.len(),
        "finalized_arenas": finalized,
        "incomplete_arenas": incomplete,
        "journaled_events": store.journal_len().await?,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn cmd_commit_hash(arena: &str, player: &str, predictions: &str, salt: Option<&str>) -> Result<()> {
    let arena_id = parse_u256(arena)?;
    let player = parse_address(player)?;
    let predictions = bitstring_to_predictions(predictions)?;

    let commitment = match salt {
        Some(hex) => {
            let salt = B256::from_str(hex).with_context(|| format!("invalid salt '{hex}'"))?;
            Commitment::with_salt(arena_id, player, salt, &predictions)
        }
        None => Commitment::new(arena_id, player, &predictions)?,
    };

    let report = serde_json::json!({
        "arena_id": commitment.arena_id.to_string(),
        "player": format!("{:#x}", commitment.player),
        "ticks": predictions.len(),
        "salt": format!("{:#x}", commitment.salt),
        "pred_words": commitment.words.iter().map(|w| format!("{w:#x}")).collect::<Vec<_>>(),
        "commit_hash": format!("{:#x}", commitment.digest),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn cmd_encode_tape(prices: &[u64], as_json: bool) -> Result<()> {
    let words = price_tape::encode(prices);
    let hex: Vec<String> = words
        .iter()
        .map(|w| format!("{:#x}", B256::from(w.to_be_bytes::<32>())))
        .collect();
    if as_json {
        println!("{}", serde_json::to_string_pretty(&hex)?);
    } else {
        println!("{} prices → {} words", prices.len(), words.len());
        for (i, word) in hex.iter().enumerate() {
            println!("  [{i}] {word}");
        }
    }
    Ok(())
}

async fn cmd_price_tape(
    rpc_url: &str,
    feed: &str,
    asset_pair: &str,
    start: u64,
    end: u64,
    concurrency: usize,
    rpc_timeout_ms: u64,
) -> Result<()> {
    let feed = parse_address(feed)?;
    let rpc_timeout = Duration::from_millis(rpc_timeout_ms);
    let transport = HttpRpcClient::new(
        rpc_url,
        HttpClientConfig {
            request_timeout: rpc_timeout,
            ..HttpClientConfig::default()
        },
    )?;
    let ledger = RpcLedger::new(
        transport,
        LedgerSettings {
            contract: feed,
            max_logs_range: 500,
            fetch_concurrency: concurrency.max(1),
            rpc_timeout,
        },
    );

    let tape = PriceTapeBuilder::new(&ledger, feed, concurrency)
        .build(asset_pair, start, end)
        .await?;
    if !tape.failed_blocks.is_empty() {
        eprintln!(
            "warning: {} of {} samples could not be read and were recorded as 0",
            tape.failed_blocks.len(),
            tape.samples.len()
        );
    }
    println!("{}", serde_json::to_string_pretty(&tape)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn encode_tape_takes_a_comma_list() {
        let cli = Cli::try_parse_from(["arenaindex", "encode-tape", "--prices", "1,2,3"]).unwrap();
        match cli.command {
            Commands::EncodeTape { prices, json } => {
                assert_eq!(prices, vec![1, 2, 3]);
                assert!(!json);
            }
            _ => panic!("expected encode-tape"),
        }
    }

    #[test]
    fn run_requires_a_reorg_depth() {
        if std::env::var_os("ARENA_MAX_REORG_DEPTH").is_some() {
            return;
        }
        let parsed = Cli::try_parse_from([
            "arenaindex",
            "run",
            "--rpc-url",
            "http://localhost:8545",
            "--contract",
            "0x1111111111111111111111111111111111111111",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn commit_hash_accepts_hex_arena_ids() {
        assert_eq!(parse_u256("0x2a").unwrap(), U256::from(42u64));
        assert_eq!(parse_u256("42").unwrap(), U256::from(42u64));
        assert!(parse_address("0x12").is_err());
    }
}
