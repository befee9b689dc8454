//! Command-line launcher.
//!
//! `ohlcv-pipeline <year> <month> <day> [symbol] [--config PATH]`
//!
//! Without a symbol the whole day is partitioned, resampled and loaded. With
//! a symbol only that symbol's resample and load stages run, against an
//! existing partition.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ohlcv_core::{Config, FsBlobStore, Symbol, TimeSeriesSink};
use ohlcv_loader::DuckDbSink;

use crate::orchestrator::PipelineOrchestrator;

/// Earliest and latest accepted years.
const YEAR_RANGE: std::ops::RangeInclusive<i32> = 1900..=2100;

#[derive(Debug, Parser)]
#[command(
    name = "ohlcv-pipeline",
    version,
    about = "Partition, resample and load one day of minute OHLCV data"
)]
pub struct Cli {
    /// Year of the trading day (e.g. 2025)
    pub year: i32,

    /// Month, 1-12
    pub month: u32,

    /// Day of month
    pub day: u32,

    /// Only resample and load this symbol
    pub symbol: Option<String>,

    /// TOML configuration file; defaults apply when omitted
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Validate date components.
pub fn parse_day(year: i32, month: u32, day: u32) -> anyhow::Result<NaiveDate> {
    if !YEAR_RANGE.contains(&year) {
        bail!("year {year} outside {}..={}", YEAR_RANGE.start(), YEAR_RANGE.end());
    }
    NaiveDate::from_ymd_opt(year, month, day)
        .with_context(|| format!("{year}-{month:02}-{day:02} is not a calendar date"))
}

/// Install the `fmt` subscriber, filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}

/// Parse arguments, run, and map the outcome to an exit code.
pub fn main_with_args<I, T>(args: I) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    init_tracing();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Run the pipeline for the parsed arguments.
pub fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let day = parse_day(cli.year, cli.month, cli.day)?;
    let symbol = match cli.symbol.as_deref() {
        Some(raw) => Some(Symbol::new(raw).with_context(|| format!("invalid symbol '{raw}'"))?),
        None => None,
    };
    let config = match &cli.config {
        Some(path) => {
            Config::load(path).with_context(|| format!("loading config {}", path.display()))?
        }
        None => Config::default(),
    };

    let store = FsBlobStore::new(config.storage.root.clone());
    let sink = match &config.sink.database_path {
        Some(path) => DuckDbSink::open(path)
            .with_context(|| format!("opening sink database {}", path.display()))?,
        None => DuckDbSink::in_memory()?,
    };
    let sink: &dyn TimeSeriesSink = &sink;
    let orchestrator = PipelineOrchestrator::new(&store, sink, config)?;

    match symbol {
        Some(symbol) => {
            info!(%day, %symbol, "running symbol stages");
            let state = orchestrator.run_symbol(day, &symbol);
            println!("{}", serde_json::to_string_pretty(&state)?);
            Ok(if state.is_done() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        None => {
            let report = orchestrator.run_day(day)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(if report.is_success() || report.source_missing() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}
