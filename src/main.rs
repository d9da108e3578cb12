use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use config_manager::SystemConfig;
use harvest_core::{CancellationToken, QueryFilter};
use job_orchestrator::{discover_entities, JobOrchestrator};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(version, about = "Resumable token data collection from Birdeye, Moralis, Bitquery, pump.fun and Solana RPC")]
struct Cli {
    /// Configuration file (defaults, then this file, then HARVEST__* env vars)
    #[arg(long, global = true, default_value = "harvest.toml")]
    config: PathBuf,

    #[command(flatten)]
    fetch: FetchFlags,

    #[command(subcommand)]
    command: Command,
}

/// Flags mapped onto `FetchOptions`; unset flags keep the configured value
#[derive(Args)]
struct FetchFlags {
    /// Directory for artifacts, cache entries and progress files
    #[arg(long, global = true)]
    data_dir: Option<String>,
    /// Start date (YYYY-MM-DD) for tokens without a creation time
    #[arg(long, global = true)]
    default_start_date: Option<String>,
    /// Skip tokens without a creation time
    #[arg(long, global = true)]
    skip_missing: bool,
    /// Seconds to sleep between entities
    #[arg(long, global = true)]
    sleep: Option<f64>,
    /// Fetch security details before resolving the start time
    #[arg(long, global = true)]
    fetch_security: bool,
    /// Fetch a single interval (e.g. 1H) instead of multi-resolution windows
    #[arg(long, global = true)]
    single_interval: Option<String>,
    /// Forget all recorded progress for the job
    #[arg(long, global = true)]
    reset: bool,
    /// Reprocess entities recorded as failed
    #[arg(long, global = true)]
    retry_failed: bool,
    /// Ignore existing artifacts
    #[arg(long, global = true)]
    force_refresh: bool,
    #[arg(short, long, global = true)]
    verbose: bool,
}

impl FetchFlags {
    fn apply(self, config: &mut SystemConfig) {
        let fetch = &mut config.fetch;
        if let Some(dir) = self.data_dir {
            config.storage.data_dir = dir;
        }
        if let Some(date) = self.default_start_date {
            fetch.default_start_date = date;
        }
        if let Some(sleep) = self.sleep {
            fetch.sleep_seconds = sleep;
        }
        if self.single_interval.is_some() {
            fetch.single_interval = self.single_interval;
        }
        fetch.skip_missing |= self.skip_missing;
        fetch.fetch_security |= self.fetch_security;
        fetch.reset |= self.reset;
        fetch.retry_failed |= self.retry_failed;
        fetch.force_refresh |= self.force_refresh;
        fetch.verbose |= self.verbose;
    }
}

/// CSV file, or directory of CSV files, listing the entities to process
#[derive(Args)]
struct EntityInput {
    input: PathBuf,
    /// Column holding the entity address
    #[arg(long)]
    column: Option<String>,
}

impl EntityInput {
    fn discover(&self, default_column: &str) -> anyhow::Result<Vec<harvest_core::EntityKey>> {
        let column = self.column.as_deref().unwrap_or(default_column);
        let keys = discover_entities(&self.input, column)
            .with_context(|| format!("discovering entities in {}", self.input.display()))?;
        info!("📋 {} entities from {} ({})", keys.len(), self.input.display(), column);
        Ok(keys)
    }
}

/// Trades take either a time range or a block range, never both
#[derive(Args)]
struct TradesArgs {
    #[command(flatten)]
    entities: EntityInput,
    /// Only trades after this unix time
    #[arg(long, conflicts_with_all = ["after_block", "before_block"])]
    after_time: Option<i64>,
    /// Only trades before this unix time
    #[arg(long, conflicts_with_all = ["after_block", "before_block"])]
    before_time: Option<i64>,
    /// Only trades after this block number
    #[arg(long)]
    after_block: Option<u64>,
    /// Only trades before this block number
    #[arg(long)]
    before_block: Option<u64>,
}

impl TradesArgs {
    fn filter(&self) -> QueryFilter {
        if self.after_time.is_some() || self.before_time.is_some() {
            QueryFilter::TimeRange {
                after: self.after_time,
                before: self.before_time,
            }
        } else if self.after_block.is_some() || self.before_block.is_some() {
            QueryFilter::BlockRange {
                after: self.after_block,
                before: self.before_block,
            }
        } else {
            QueryFilter::Unbounded
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Multi-resolution OHLCV history per token
    Ohlcv(EntityInput),
    /// Daily price history per token
    Prices(EntityInput),
    /// Security details per token
    Security(EntityInput),
    /// Meme metadata documents per token
    Metadata(EntityInput),
    /// pump.fun coin documents
    PumpMetadata(EntityInput),
    /// Recent swaps per token
    Trades(TradesArgs),
    /// Pair price histories from Moralis
    MoralisPrices(EntityInput),
    /// Signatures and transaction details per program
    ProgramTxs(EntityInput),
    /// Today's trending token snapshot
    Trending,
    /// Today's Bitquery daily price aggregates
    BitqueryPrices,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.fetch.verbose);

    let mut config = SystemConfig::load_from_path(&cli.config).context("loading configuration")?;
    cli.fetch.apply(&mut config);
    config.validate().context("validating command line options")?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Interrupt received, stopping after the current step");
            on_signal.cancel();
        }
    });

    let orchestrator = JobOrchestrator::new(config, cancel);
    let summary = match cli.command {
        Command::Ohlcv(input) => orchestrator.run_ohlcv(&input.discover("address")?).await?,
        Command::Prices(input) => orchestrator.run_prices(&input.discover("address")?).await?,
        Command::Security(input) => orchestrator.run_security(&input.discover("address")?).await?,
        Command::Metadata(input) => orchestrator.run_metadata(&input.discover("address")?).await?,
        Command::PumpMetadata(input) => {
            orchestrator
                .run_pump_metadata(&input.discover("TokenAddress")?)
                .await?
        }
        Command::Trades(args) => {
            let keys = args.entities.discover("address")?;
            orchestrator.run_trades(&keys, args.filter()).await?
        }
        Command::MoralisPrices(input) => {
            orchestrator
                .run_moralis_prices(&input.discover("address")?)
                .await?
        }
        Command::ProgramTxs(input) => {
            orchestrator
                .run_program_txs(&input.discover("address")?)
                .await?
        }
        Command::Trending => {
            println!("{}", orchestrator.run_trending().await?.describe());
            return Ok(());
        }
        Command::BitqueryPrices => {
            println!("{}", orchestrator.run_bitquery_prices().await?.describe());
            return Ok(());
        }
    };

    print!("{}", summary.render());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trades(args: &[&str]) -> Result<TradesArgs, clap::Error> {
        let mut argv = vec!["token_harvest", "trades", "tokens.csv"];
        argv.extend_from_slice(args);
        let cli = Cli::try_parse_from(argv)?;
        match cli.command {
            Command::Trades(trades) => Ok(trades),
            _ => panic!("parsed into another subcommand"),
        }
    }

    #[test]
    fn test_trade_filter_is_time_or_block() {
        let by_block = trades(&["--after-block", "100"]).unwrap();
        assert_eq!(
            by_block.filter(),
            QueryFilter::BlockRange {
                after: Some(100),
                before: None
            }
        );
        let by_time = trades(&["--before-time", "1700000000"]).unwrap();
        assert_eq!(
            by_time.filter(),
            QueryFilter::TimeRange {
                after: None,
                before: Some(1_700_000_000)
            }
        );
        assert_eq!(trades(&[]).unwrap().filter(), QueryFilter::Unbounded);

        assert!(trades(&["--after-time", "1", "--before-block", "2"]).is_err());
    }
}
