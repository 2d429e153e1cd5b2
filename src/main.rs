//! Strategy lab CLI
//!
//! # Usage
//!
//! ```bash
//! # Price one contract
//! strategy-lab price --instrument BTC-29MAR24-45000-C --spot 45000 --volatility 0.8
//!
//! # Risk report for a strategy against a snapshot payload
//! strategy-lab risk --strategy straddle.json --snapshot data/BTC/2024-03-01.json
//!
//! # Backtest over file-backed snapshots
//! strategy-lab --config engine.toml backtest --strategy straddle.json \
//!     --start 2024-03-01 --end 2024-03-28 --capital 100000 --data data
//! ```
//!
//! Every command prints JSON on stdout; logs go to stderr.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use strategy_lab::config::EngineConfig;
use strategy_lab::data::{InMemoryProvider, JsonFileProvider, OptionContract, SnapshotNormalizer, Strategy};
use strategy_lab::risk::MarketContext;
use strategy_lab::service::{ContractInputs, OptionsEngine};

#[derive(Parser)]
#[command(name = "strategy-lab")]
#[command(about = "Pricing, risk metrics and backtests for crypto option strategies")]
#[command(version)]
struct Cli {
    /// Engine configuration (TOML); defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Price a single contract and its Greeks
    Price {
        /// Venue instrument name, e.g. BTC-29MAR24-45000-C
        #[arg(short, long)]
        instrument: String,

        #[arg(long)]
        spot: f64,

        /// Annualized volatility as a fraction
        #[arg(long)]
        volatility: f64,

        /// Risk-free rate (default: pricing.risk_free_rate)
        #[arg(long)]
        rate: Option<f64>,

        /// Valuation time, RFC 3339 (default: now)
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Risk metrics and warnings for a strategy
    Risk {
        /// Strategy JSON file
        #[arg(short, long)]
        strategy: PathBuf,

        /// Snapshot payload JSON file
        #[arg(long)]
        snapshot: PathBuf,

        /// Valuation time, RFC 3339 (default: snapshot timestamp)
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Replay a strategy over historical snapshots
    Backtest {
        /// Strategy JSON file
        #[arg(short, long)]
        strategy: PathBuf,

        /// First day (YYYY-MM-DD)
        #[arg(long)]
        start: NaiveDate,

        /// Last day, inclusive (YYYY-MM-DD)
        #[arg(long)]
        end: NaiveDate,

        #[arg(long, default_value = "100000")]
        capital: Decimal,

        /// Snapshot directory (default: data.data_dir, then ./data)
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Print a text summary instead of the full result
        #[arg(long)]
        summary: bool,
    },
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_price(
    config: EngineConfig,
    instrument: &str,
    spot: f64,
    volatility: f64,
    rate: Option<f64>,
    at: Option<DateTime<Utc>>,
) -> Result<()> {
    let contract = OptionContract::parse_instrument(instrument)
        .with_context(|| format!("Cannot parse instrument {}", instrument))?;
    let inputs = ContractInputs {
        spot,
        valuation_time: at.unwrap_or_else(Utc::now),
        rate: rate.unwrap_or(config.pricing.risk_free_rate),
        volatility,
    };

    let engine = OptionsEngine::in_memory(config, Arc::new(InMemoryProvider::new()));
    let priced = engine.price_contract(&contract, inputs).context("Pricing failed")?;
    print_json(&priced)
}

fn cmd_risk(config: EngineConfig, strategy_path: &Path, snapshot_path: &Path, at: Option<DateTime<Utc>>) -> Result<()> {
    let strategy: Strategy = read_json(strategy_path)?;
    let raw: Value = read_json(snapshot_path)?;

    let underlying = strategy.underlying().unwrap_or_default().to_string();
    let normalized = SnapshotNormalizer::new(config.pricing.normalize_config())
        .normalize(&raw, &underlying, Utc::now().date_naive())
        .with_context(|| format!("Cannot normalize {}", snapshot_path.display()))?;
    for rejected in &normalized.rejected {
        warn!("Dropped quote {}: {}", rejected.instrument_name, rejected.reason);
    }

    let mut context = MarketContext::new(normalized.snapshot, config.pricing.risk_free_rate);
    if let Some(at) = at {
        context = context.at(at);
    }

    let engine = OptionsEngine::in_memory(config, Arc::new(InMemoryProvider::new()));
    let report = engine.build_risk_metrics(&strategy, &context);
    print_json(&report)
}

fn cmd_backtest(
    config: EngineConfig,
    strategy_path: &Path,
    start: NaiveDate,
    end: NaiveDate,
    capital: Decimal,
    data: Option<PathBuf>,
    summary: bool,
) -> Result<()> {
    let strategy: Strategy = read_json(strategy_path)?;
    let data_dir = data
        .or_else(|| config.data.data_dir.clone())
        .unwrap_or_else(|| PathBuf::from("data"));
    info!("Reading snapshots from {}", data_dir.display());

    let provider = JsonFileProvider::new(&data_dir, config.pricing.normalize_config());
    let engine = OptionsEngine::in_memory(config, Arc::new(provider));
    let strategy_id = engine.strategies().create(strategy)?;

    let result = engine
        .run_backtest(strategy_id, start, end, capital)
        .context("Backtest failed")?;

    if summary {
        println!("{}", result.summary());
        println!();
        println!("{}", engine.performance(result.id)?.summary());
        Ok(())
    } else {
        print_json(&result)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("strategy_lab=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Price {
            instrument,
            spot,
            volatility,
            rate,
            at,
        } => cmd_price(config, &instrument, spot, volatility, rate, at)?,
        Commands::Risk { strategy, snapshot, at } => cmd_risk(config, &strategy, &snapshot, at)?,
        Commands::Backtest {
            strategy,
            start,
            end,
            capital,
            data,
            summary,
        } => cmd_backtest(config, &strategy, start, end, capital, data, summary)?,
    }

    Ok(())
}
