//! Per-symbol fan-out of one day's source file.
//!
//! Chunks are processed on an outer worker pool; within a chunk, each symbol
//! group is handled on an inner pool. A symbol can span several chunks, so its
//! rows are staged until the last chunk containing it (known from the census
//! pre-pass) has been grouped. That task then writes the whole partition in a
//! single overwrite and reports the outcome to the completeness ledger.

use std::collections::HashMap;
use std::sync::Mutex;
use std::thread;

use chrono::NaiveDate;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, info, warn};

use ohlcv_core::config::PartitionConfig;
use ohlcv_core::{
    day_range_ns, BlobStore, Error, PartitionedSeries, PathScheme, Result, Symbol,
    GZIP_CONTENT_TYPE,
};

use crate::chunk_reader::{Chunk, ChunkReader, KeyCensus, SourceRow};
use crate::codec::encode_partition;
use crate::ledger::{CompletenessLedger, CompletenessReport, LedgerHandle};

/// Rows buffered for one symbol until every chunk containing it is grouped.
#[derive(Debug, Default)]
struct StagedSeries {
    remaining_chunks: usize,
    rows: Vec<SourceRow>,
}

/// Splits a daily source into per-symbol partition files.
pub struct PartitionFanOut<'a> {
    store: &'a dyn BlobStore,
    paths: PathScheme,
    chunk_rows: usize,
    outer: ThreadPool,
    inner: ThreadPool,
}

impl<'a> PartitionFanOut<'a> {
    pub fn new(store: &'a dyn BlobStore, paths: PathScheme, config: &PartitionConfig) -> Result<Self> {
        if config.chunk_rows == 0 {
            return Err(Error::config("partition.chunk_rows must be > 0"));
        }
        let outer = ThreadPoolBuilder::new()
            .num_threads(config.outer_workers)
            .thread_name(|i| format!("partition-chunk-{i}"))
            .build()
            .map_err(|e| Error::config(format!("cannot build chunk pool: {e}")))?;
        let inner = ThreadPoolBuilder::new()
            .num_threads(config.inner_workers)
            .thread_name(|i| format!("partition-upload-{i}"))
            .build()
            .map_err(|e| Error::config(format!("cannot build upload pool: {e}")))?;
        Ok(Self {
            store,
            paths,
            chunk_rows: config.chunk_rows,
            outer,
            inner,
        })
    }

    pub fn paths(&self) -> &PathScheme {
        &self.paths
    }

    /// Fetch the day's source file from the blob store.
    ///
    /// Fails with [`Error::SourceNotFound`] when the file does not exist.
    pub fn open_source(&self, day: NaiveDate) -> Result<ChunkReader> {
        let path = self.paths.source_path(day);
        if !self.store.exists(&path)? {
            return Err(Error::source_not_found(path));
        }
        let bytes = match self.store.get(&path) {
            Ok(bytes) => bytes,
            Err(Error::BlobNotFound(_)) => return Err(Error::source_not_found(path)),
            Err(e) => return Err(e),
        };
        debug!(%day, path, bytes = bytes.len(), "fetched source file");
        ChunkReader::from_gzip(bytes, self.chunk_rows)
    }

    /// Fetch the day's source and partition it.
    pub fn run(&self, day: NaiveDate) -> Result<CompletenessReport> {
        let reader = self.open_source(day)?;
        self.partition_day(day, &reader)
    }

    /// Write one partition per valid symbol with rows on `day`.
    ///
    /// Per-symbol upload failures are recorded in the report, never returned.
    /// An error is returned only when the source itself cannot be read.
    pub fn partition_day(&self, day: NaiveDate, reader: &ChunkReader) -> Result<CompletenessReport> {
        let census = reader.census(day)?;
        let (start, end) = day_range_ns(day)?;
        let staging = Self::staging_for(&census);
        let (ledger, handle) = CompletenessLedger::open(day, census.symbols());

        info!(
            %day,
            symbols = census.chunks_per_symbol.len(),
            rows = census.stats.rows,
            "partitioning day"
        );

        let (outcome, report) = thread::scope(|scope| {
            let aggregator = scope.spawn(move || ledger.finalize());
            let outcome = self.outer.install(|| {
                reader.chunks()?.par_bridge().try_for_each(|chunk| {
                    self.process_chunk(day, chunk?, (start, end), &staging, &handle);
                    Ok::<(), Error>(())
                })
            });
            drop(handle);
            (outcome, aggregator.join())
        });
        outcome?;

        let report = report
            .map_err(|_| Error::Other("completeness aggregator panicked".to_string()))?
            .with_rows(census.stats);

        if report.is_complete() {
            info!(
                %day,
                materialized = report.materialized.len(),
                malformed = report.rows.malformed,
                "partitioning complete"
            );
        } else {
            warn!(
                %day,
                missing = ?report.missing,
                unexpected = ?report.unexpected,
                "materialized symbols differ from observed symbols"
            );
        }
        Ok(report)
    }

    fn staging_for(census: &KeyCensus) -> Mutex<HashMap<Symbol, StagedSeries>> {
        let staged = census
            .chunks_per_symbol
            .iter()
            .map(|(symbol, &chunks)| {
                (
                    symbol.clone(),
                    StagedSeries {
                        remaining_chunks: chunks,
                        rows: Vec::new(),
                    },
                )
            })
            .collect();
        Mutex::new(staged)
    }

    fn process_chunk(
        &self,
        day: NaiveDate,
        chunk: Chunk,
        (start, end): (i64, i64),
        staging: &Mutex<HashMap<Symbol, StagedSeries>>,
        ledger: &LedgerHandle,
    ) {
        let index = chunk.index;
        let grouped = chunk.group_within(start, end);
        debug!(
            chunk = index,
            groups = grouped.groups.len(),
            off_day = grouped.off_day,
            invalid_keys = grouped.invalid_keys,
            "grouped chunk"
        );

        self.inner.install(|| {
            grouped.groups.into_par_iter().for_each(|(symbol, rows)| {
                let ready = match Self::stage(staging, &symbol, rows) {
                    Ok(ready) => ready,
                    Err(e) => {
                        ledger.failed(symbol, e.to_string());
                        return;
                    }
                };
                if let Some(rows) = ready {
                    match self.upload(day, symbol.clone(), rows) {
                        Ok(()) => ledger.materialized(symbol),
                        Err(e) => {
                            warn!(%symbol, %day, error = %e, "partition upload failed");
                            ledger.failed(symbol, e.to_string());
                        }
                    }
                }
            });
        });
    }

    /// Add `rows` to the symbol's staging buffer. Returns the full row set once
    /// the symbol's last chunk has arrived.
    fn stage(
        staging: &Mutex<HashMap<Symbol, StagedSeries>>,
        symbol: &Symbol,
        rows: Vec<SourceRow>,
    ) -> Result<Option<Vec<SourceRow>>> {
        let mut staged = staging
            .lock()
            .map_err(|_| Error::Other("partition staging lock poisoned".to_string()))?;
        let Some(entry) = staged.get_mut(symbol) else {
            // Not seen by the census; write what we have.
            return Ok(Some(rows));
        };
        entry.rows.extend(rows);
        entry.remaining_chunks = entry.remaining_chunks.saturating_sub(1);
        if entry.remaining_chunks > 0 {
            return Ok(None);
        }
        Ok(staged.remove(symbol).map(|entry| entry.rows))
    }

    fn upload(&self, day: NaiveDate, symbol: Symbol, mut rows: Vec<SourceRow>) -> Result<()> {
        // Chunks finish in any order; source line restores a stable order
        // among rows sharing a timestamp.
        rows.sort_by_key(|row| (row.record.timestamp_ns, row.line));
        let records = rows.into_iter().map(|row| row.record).collect();
        let series = PartitionedSeries::new(day, symbol, records)?;
        let bytes = encode_partition(&series)?;
        let path = self.paths.partition_path(series.symbol(), day);
        self.store.put(&path, &bytes, GZIP_CONTENT_TYPE)?;
        debug!(path, rows = series.len(), bytes = bytes.len(), "partition stored");
        Ok(())
    }
}
