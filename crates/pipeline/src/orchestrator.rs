//! Per-day pipeline sequencing.
//!
//! A day is partitioned once; every materialized symbol is then resampled
//! and loaded independently on a bounded pool. Each stage records its state
//! so a caller can inspect where a day or symbol stopped and re-drive it.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::NaiveDate;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;
use tracing::{error, info, warn};

use ohlcv_core::{
    BlobStore, Config, Error, MissingKeyPolicy, PathScheme, Result, Symbol, TimeSeriesSink,
    GZIP_CONTENT_TYPE,
};
use ohlcv_ingestion::{decode_partition, CompletenessReport, PartitionFanOut};
use ohlcv_loader::{LoadSummary, SinkLoader};
use ohlcv_resample::{encode_resampled, Resampler};

use crate::state::{DayState, ResampleSummary, SymbolState};

/// Outcome of [`PipelineOrchestrator::run_day`].
#[derive(Debug, Clone, Serialize)]
pub struct DayReport {
    pub day: NaiveDate,
    /// Final day state. `None` when the source file was absent.
    pub partition: Option<DayState>,
    /// Final state of each symbol that was driven.
    pub symbols: BTreeMap<Symbol, SymbolState>,
}

impl DayReport {
    /// The source file was absent; nothing was written.
    pub fn source_missing(&self) -> bool {
        self.partition.is_none()
    }

    /// Symbols that stopped in a failed state.
    pub fn failed_symbols(&self) -> Vec<&Symbol> {
        self.symbols
            .iter()
            .filter(|(_, state)| state.is_failed())
            .map(|(symbol, _)| symbol)
            .collect()
    }

    /// Partitioning succeeded and every symbol reached `Done`.
    pub fn is_success(&self) -> bool {
        matches!(self.partition, Some(DayState::Partitioned(_)))
            && self.symbols.values().all(SymbolState::is_done)
    }
}

/// Drives partition, resample and load against a blob store and a sink.
pub struct PipelineOrchestrator<'a> {
    store: &'a dyn BlobStore,
    config: Config,
    paths: PathScheme,
    fan_out: PartitionFanOut<'a>,
    resampler: Resampler,
    loader: SinkLoader<'a>,
    symbol_pool: ThreadPool,
    days: Mutex<BTreeMap<NaiveDate, DayState>>,
    symbols: Mutex<BTreeMap<(NaiveDate, Symbol), SymbolState>>,
}

impl<'a> PipelineOrchestrator<'a> {
    pub fn new(store: &'a dyn BlobStore, sink: &'a dyn TimeSeriesSink, config: Config) -> Result<Self> {
        config.validate()?;
        let paths = config.path_scheme();
        let fan_out = PartitionFanOut::new(store, paths.clone(), &config.partition)?;
        let resampler = Resampler::from_config(&config.resample);
        let loader = SinkLoader::from_config(sink, &config.sink);
        let symbol_pool = ThreadPoolBuilder::new()
            .num_threads(config.pipeline.symbol_workers)
            .thread_name(|i| format!("pipeline-symbol-{i}"))
            .build()
            .map_err(|e| Error::config(format!("cannot build symbol pool: {e}")))?;
        Ok(Self {
            store,
            config,
            paths,
            fan_out,
            resampler,
            loader,
            symbol_pool,
            days: Mutex::new(BTreeMap::new()),
            symbols: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn day_state(&self, day: NaiveDate) -> DayState {
        self.days
            .lock()
            .ok()
            .and_then(|days| days.get(&day).cloned())
            .unwrap_or(DayState::Pending)
    }

    pub fn symbol_state(&self, day: NaiveDate, symbol: &Symbol) -> SymbolState {
        self.symbols
            .lock()
            .ok()
            .and_then(|symbols| symbols.get(&(day, symbol.clone())).cloned())
            .unwrap_or(SymbolState::Pending)
    }

    /// Partition the day's source file.
    ///
    /// A non-empty `missing` set is a warning, or a failure of the day when
    /// `pipeline.missing_keys = fail`.
    pub fn partition(&self, day: NaiveDate) -> Result<CompletenessReport> {
        self.set_day(day, DayState::Partitioning)?;
        let report = match self.fan_out.run(day) {
            Ok(report) => report,
            Err(e) => {
                self.set_day(day, DayState::PartitionFailed(e.to_string()))?;
                return Err(e);
            }
        };

        if !report.missing.is_empty() {
            match self.config.pipeline.missing_keys {
                MissingKeyPolicy::Warn => {
                    warn!(%day, missing = report.missing.len(), "continuing with incomplete partition");
                }
                MissingKeyPolicy::Fail => {
                    let e = Error::IncompletePartition {
                        day: day.to_string(),
                        missing: report.missing.len(),
                    };
                    self.set_day(day, DayState::PartitionFailed(e.to_string()))?;
                    return Err(e);
                }
            }
        }

        self.set_day(day, DayState::Partitioned(report.clone()))?;
        Ok(report)
    }

    /// Resample one symbol's partition and write every configured granularity.
    pub fn resample(&self, day: NaiveDate, symbol: &Symbol) -> Result<ResampleSummary> {
        self.set_symbol(day, symbol, SymbolState::Resampling)?;
        match self.resample_inner(day, symbol) {
            Ok(summary) => {
                self.set_symbol(day, symbol, SymbolState::Resampled(summary.clone()))?;
                Ok(summary)
            }
            Err(e) => {
                warn!(%symbol, %day, error = %e, "resampling failed");
                self.set_symbol(day, symbol, SymbolState::ResampleFailed(e.to_string()))?;
                Err(e)
            }
        }
    }

    fn resample_inner(&self, day: NaiveDate, symbol: &Symbol) -> Result<ResampleSummary> {
        let bytes = self.store.get(&self.paths.partition_path(symbol, day))?;
        let series = decode_partition(day, symbol, bytes)?;
        let mut summary = ResampleSummary { buckets: Vec::new() };
        for resampled in self.resampler.resample(&series)? {
            let path = self.paths.series_path(symbol, resampled.granularity, day);
            let bytes = encode_resampled(&resampled.buckets)?;
            self.store.put(&path, &bytes, GZIP_CONTENT_TYPE)?;
            summary.buckets.push((resampled.granularity, resampled.len()));
        }
        info!(%symbol, %day, rows = series.len(), "resampled and stored");
        Ok(summary)
    }

    /// Load one symbol's resampled files into the sink.
    pub fn load(&self, day: NaiveDate, symbol: &Symbol) -> Result<LoadSummary> {
        self.set_symbol(day, symbol, SymbolState::Loading)?;
        let outcome = self.loader.load_resampled(
            self.store,
            &self.paths,
            symbol,
            day,
            self.resampler.granularities(),
        );
        match outcome {
            Ok(summary) => {
                self.set_symbol(day, symbol, SymbolState::Done(summary.clone()))?;
                Ok(summary)
            }
            Err(e) => {
                warn!(%symbol, %day, error = %e, "load failed");
                self.set_symbol(day, symbol, SymbolState::LoadFailed(e.to_string()))?;
                Err(e)
            }
        }
    }

    /// Resample then load one symbol. Returns the symbol's final state.
    pub fn run_symbol(&self, day: NaiveDate, symbol: &Symbol) -> SymbolState {
        if self.resample(day, symbol).is_ok() {
            // Failure is recorded in the symbol state.
            let _ = self.load(day, symbol);
        }
        self.symbol_state(day, symbol)
    }

    /// Partition the day, then resample and load every materialized symbol.
    ///
    /// A missing source file is logged and reported, not returned as an error.
    pub fn run_day(&self, day: NaiveDate) -> Result<DayReport> {
        info!(%day, "pipeline started");
        let report = match self.partition(day) {
            Ok(report) => report,
            Err(Error::SourceNotFound(path)) => {
                error!(%day, path, "source file not found; nothing to do");
                return Ok(DayReport {
                    day,
                    partition: None,
                    symbols: BTreeMap::new(),
                });
            }
            Err(e @ Error::IncompletePartition { .. }) => {
                error!(%day, error = %e, "day halted after partitioning");
                return Ok(DayReport {
                    day,
                    partition: Some(self.day_state(day)),
                    symbols: BTreeMap::new(),
                });
            }
            Err(e) => return Err(e),
        };

        let symbols: Vec<Symbol> = report.materialized.iter().cloned().collect();
        let states: BTreeMap<Symbol, SymbolState> = self.symbol_pool.install(|| {
            symbols
                .par_iter()
                .map(|symbol| (symbol.clone(), self.run_symbol(day, symbol)))
                .collect()
        });

        let day_report = DayReport {
            day,
            partition: Some(self.day_state(day)),
            symbols: states,
        };
        let failed = day_report.failed_symbols();
        if failed.is_empty() {
            info!(%day, symbols = day_report.symbols.len(), "pipeline finished");
        } else {
            warn!(%day, failed = ?failed, "pipeline finished with failed symbols");
        }
        Ok(day_report)
    }

    fn set_day(&self, day: NaiveDate, next: DayState) -> Result<()> {
        let mut days = self
            .days
            .lock()
            .map_err(|_| Error::Other("day state lock poisoned".to_string()))?;
        let current = days.entry(day).or_insert(DayState::Pending);
        if !current.allows(&next) {
            return Err(Error::invalid_transition(format!("day {day}: {current} -> {next}")));
        }
        *current = next;
        Ok(())
    }

    fn set_symbol(&self, day: NaiveDate, symbol: &Symbol, next: SymbolState) -> Result<()> {
        let mut symbols = self
            .symbols
            .lock()
            .map_err(|_| Error::Other("symbol state lock poisoned".to_string()))?;
        let current = symbols
            .entry((day, symbol.clone()))
            .or_insert(SymbolState::Pending);
        if !current.allows(&next) {
            return Err(Error::invalid_transition(format!(
                "{symbol} on {day}: {current} -> {next}"
            )));
        }
        *current = next;
        Ok(())
    }
}
