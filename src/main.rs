#![allow(dead_code)]

mod client;
mod collector;
mod config;
mod db;
mod fees;
mod model;
mod notify;
mod rebalance;
mod report;
mod scoring;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::{info, warn};

use crate::client::lncli::LncliClient;
use crate::config::Config;
use crate::notify::Notifier;
use crate::report::EarningsDetail;

#[derive(Parser)]
#[command(
    name = "lnd-steward",
    about = "Operator toolkit for a single LND routing node",
    version
)]
struct Cli {
    /// Path to steward.toml config file
    #[arg(short, long, default_value = "steward.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the channel liquidity table
    #[command(alias = "bal")]
    Balance,
    /// Print the per-channel fee policy table
    Fees,
    /// Set the fee policy of a single channel
    SetFees {
        #[arg(long)]
        channel_id: String,
        #[arg(long)]
        ppm: i64,
        /// Base fee in millisatoshis (defaults from config)
        #[arg(long)]
        base_fee: Option<i64>,
    },
    /// Apply one fee policy to every active channel
    BulkSetFees {
        #[arg(long)]
        ppm: i64,
        #[arg(long)]
        base_fee: Option<i64>,
    },
    /// Print recommended fee policies without applying anything
    SuggestFees,
    /// Apply recommended fee policies to channels that need an update
    FeeOptimizer {
        #[arg(long)]
        dry_run: bool,
    },
    /// Print fee earnings
    Earnings {
        #[arg(long)]
        detailed: bool,
        #[arg(long, conflicts_with = "detailed")]
        super_detailed: bool,
    },
    /// Print ranked rebalance proposals
    SuggestRebalance,
    /// Execute one circular rebalance
    Rebalance {
        #[arg(long)]
        from_channel: String,
        #[arg(long)]
        to_channel: String,
        /// Amount to shift, in satoshis
        #[arg(long)]
        amount: i64,
    },
    /// Execute all priority-1 rebalance proposals sequentially
    AutoRebalance,
    /// Send a 1-sat keysend probe to the first active peer
    TestKeysend,
    /// Run the telemetry collector
    Collect {
        /// Take a single snapshot and exit
        #[arg(long)]
        once: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("FAIL: {e:#}");
            return ExitCode::from(1);
        }
    };

    env_logger::Builder::new()
        .filter_level(
            config
                .general
                .log_level
                .parse()
                .unwrap_or(log::LevelFilter::Info),
        )
        .format_timestamp_secs()
        .init();

    if config.general.dry_run {
        warn!("DRY-RUN MODE: no actions will be executed");
    }

    match dispatch(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("FAIL: {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn dispatch(command: Commands, config: &Config) -> anyhow::Result<()> {
    let client = LncliClient::new(&config.node);

    match command {
        Commands::Balance => report::print_balance(&client).await,
        Commands::Fees => report::print_fees(&client).await,
        Commands::SetFees {
            channel_id,
            ppm,
            base_fee,
        } => fees::set_one(&client, config, &channel_id, ppm, base_fee).await,
        Commands::BulkSetFees { ppm, base_fee } => {
            fees::bulk_set(&client, config, ppm, base_fee).await
        }
        Commands::SuggestFees => fees::suggest(&client, config).await,
        Commands::FeeOptimizer { dry_run } => fees::optimize(&client, config, dry_run).await,
        Commands::Earnings {
            detailed,
            super_detailed,
        } => {
            let detail = if super_detailed {
                EarningsDetail::SuperDetailed
            } else if detailed {
                EarningsDetail::Detailed
            } else {
                EarningsDetail::Summary
            };
            report::print_earnings(&client, detail).await
        }
        Commands::SuggestRebalance => rebalance::suggest(&client, config).await,
        Commands::Rebalance {
            from_channel,
            to_channel,
            amount,
        } => rebalance::run_one(&client, config, &from_channel, &to_channel, amount).await,
        Commands::AutoRebalance => {
            let notifier = Notifier::new(&config.notify);
            rebalance::run_auto(&client, config, &notifier).await
        }
        Commands::TestKeysend => rebalance::self_test(&client).await,
        Commands::Collect { once } => {
            let database = db::Database::open(&config.general.database_path)?;
            if once {
                collector::tick(&client, &database).await?;
                info!("collector: single tick complete");
                Ok(())
            } else {
                let notifier = Notifier::new(&config.notify);
                collector::run(config, &client, &database, &notifier).await
            }
        }
    }
}
