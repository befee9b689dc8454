//! Chunked reading of the daily source file.
//!
//! The source is a (usually gzip-compressed) CSV whose header names the
//! columns `window_start,ticker,open,high,low,close,volume`; extra columns are
//! ignored. Rows are handed out in bounded chunks, in source order. A reader
//! owns the source bytes, so every call to [`ChunkReader::chunks`] restarts
//! from the first row and yields the same chunk boundaries.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;

use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord};
use flate2::read::GzDecoder;
use serde::Serialize;
use tracing::debug;

use ohlcv_core::{day_range_ns, Error, Key, RawRecord, Result, Symbol, TimestampNs};

/// How the source bytes are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    None,
}

/// A record together with its 1-based line in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRow {
    pub line: u64,
    pub record: RawRecord,
}

/// A bounded run of consecutive source rows.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Position of this chunk in the source, from 0.
    pub index: usize,
    /// Successfully parsed rows, in source order.
    pub rows: Vec<SourceRow>,
    /// Rows that could not be parsed and were skipped.
    pub malformed: u64,
}

/// Rows of one chunk grouped by symbol, restricted to one day.
#[derive(Debug, Default)]
pub struct DayGroups {
    pub groups: BTreeMap<Symbol, Vec<SourceRow>>,
    pub invalid_keys: u64,
    pub off_day: u64,
}

impl Chunk {
    /// Group the chunk's rows by symbol, dropping invalid keys and rows
    /// whose timestamp falls outside `[start, end)`.
    pub fn group_within(self, start: TimestampNs, end: TimestampNs) -> DayGroups {
        let mut out = DayGroups::default();
        for row in self.rows {
            if row.record.timestamp_ns < start || row.record.timestamp_ns >= end {
                out.off_day += 1;
                continue;
            }
            match &row.record.key {
                Key::Valid(symbol) => {
                    let symbol = symbol.clone();
                    out.groups.entry(symbol).or_default().push(row);
                }
                Key::Invalid => out.invalid_keys += 1,
            }
        }
        out
    }
}

/// Row accounting gathered over a full pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RowStats {
    /// Data rows read, parsed or not.
    pub rows: u64,
    /// Rows skipped because they could not be parsed.
    pub malformed: u64,
    /// Parsed rows whose ticker was missing or blank.
    pub invalid_keys: u64,
    /// Parsed rows dated outside the requested day.
    pub off_day: u64,
}

/// Per-day symbol census from a full pre-pass over the source.
#[derive(Debug, Clone, Default)]
pub struct KeyCensus {
    /// For each valid symbol with rows on the day, how many chunks contain it.
    pub chunks_per_symbol: BTreeMap<Symbol, usize>,
    /// Row accounting for the pass.
    pub stats: RowStats,
}

impl KeyCensus {
    pub fn symbols(&self) -> BTreeSet<Symbol> {
        self.chunks_per_symbol.keys().cloned().collect()
    }
}

/// Streams a source file in bounded row chunks.
#[derive(Debug, Clone)]
pub struct ChunkReader {
    bytes: Vec<u8>,
    compression: Compression,
    chunk_rows: usize,
}

impl ChunkReader {
    /// Default upper bound on rows per chunk.
    pub const DEFAULT_CHUNK_ROWS: usize = 10_000;

    pub fn new(bytes: Vec<u8>, compression: Compression, chunk_rows: usize) -> Result<Self> {
        if chunk_rows == 0 {
            return Err(Error::config("chunk_rows must be > 0"));
        }
        Ok(Self {
            bytes,
            compression,
            chunk_rows,
        })
    }

    /// Reader over gzip-compressed CSV bytes.
    pub fn from_gzip(bytes: Vec<u8>, chunk_rows: usize) -> Result<Self> {
        Self::new(bytes, Compression::Gzip, chunk_rows)
    }

    pub fn chunk_rows(&self) -> usize {
        self.chunk_rows
    }

    /// Lazily iterate the source in chunks, starting from the first row.
    pub fn chunks(&self) -> Result<Chunks<'_>> {
        let input: Box<dyn Read + Send + '_> = match self.compression {
            Compression::Gzip => Box::new(GzDecoder::new(self.bytes.as_slice())),
            Compression::None => Box::new(self.bytes.as_slice()),
        };
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(input);
        let headers = reader
            .headers()
            .map_err(|e| Error::codec(format!("cannot read source header: {e}")))?
            .clone();
        let columns = ColumnIndices::from_headers(&headers)?;
        Ok(Chunks {
            reader,
            columns,
            chunk_rows: self.chunk_rows,
            next_index: 0,
            done: false,
        })
    }

    /// Every valid symbol in the source, on any day, without materializing
    /// partitions.
    ///
    /// Partitioning takes its `observed` set from [`ChunkReader::census`]
    /// instead, which makes the same pass but keeps only symbols with rows on
    /// the requested day and also counts chunks per symbol.
    pub fn distinct_keys(&self) -> Result<BTreeSet<Symbol>> {
        let mut keys = BTreeSet::new();
        for chunk in self.chunks()? {
            for row in chunk?.rows {
                if let Key::Valid(symbol) = row.record.key {
                    keys.insert(symbol);
                }
            }
        }
        Ok(keys)
    }

    /// Full pass counting, per valid symbol with rows on `day`, the chunks
    /// that contain it.
    pub fn census(&self, day: NaiveDate) -> Result<KeyCensus> {
        let (start, end) = day_range_ns(day)?;
        let mut census = KeyCensus::default();
        for chunk in self.chunks()? {
            let chunk = chunk?;
            census.stats.rows += chunk.rows.len() as u64 + chunk.malformed;
            census.stats.malformed += chunk.malformed;
            let grouped = chunk.group_within(start, end);
            census.stats.invalid_keys += grouped.invalid_keys;
            census.stats.off_day += grouped.off_day;
            for symbol in grouped.groups.into_keys() {
                *census.chunks_per_symbol.entry(symbol).or_insert(0) += 1;
            }
        }
        debug!(
            %day,
            symbols = census.chunks_per_symbol.len(),
            rows = census.stats.rows,
            malformed = census.stats.malformed,
            "source census complete"
        );
        Ok(census)
    }
}

/// Lazy chunk iterator returned by [`ChunkReader::chunks`].
pub struct Chunks<'a> {
    reader: csv::Reader<Box<dyn Read + Send + 'a>>,
    columns: ColumnIndices,
    chunk_rows: usize,
    next_index: usize,
    done: bool,
}

impl Iterator for Chunks<'_> {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut chunk = Chunk {
            index: self.next_index,
            rows: Vec::with_capacity(self.chunk_rows.min(ChunkReader::DEFAULT_CHUNK_ROWS)),
            malformed: 0,
        };
        let mut read = 0;
        let mut record = StringRecord::new();
        while read < self.chunk_rows {
            match self.reader.read_record(&mut record) {
                Ok(true) => {
                    read += 1;
                    let line = record.position().map(|p| p.line()).unwrap_or(0);
                    match self.columns.parse(&record, line) {
                        Ok(parsed) => chunk.rows.push(SourceRow {
                            line,
                            record: parsed,
                        }),
                        Err(e) => {
                            debug!(error = %e, "skipping malformed row");
                            chunk.malformed += 1;
                        }
                    }
                }
                Ok(false) => {
                    self.done = true;
                    break;
                }
                Err(e) if e.is_io_error() => {
                    self.done = true;
                    return Some(Err(Error::codec(format!("source stream failed: {e}"))));
                }
                Err(e) => {
                    read += 1;
                    debug!(error = %e, "skipping undecodable row");
                    chunk.malformed += 1;
                }
            }
        }
        if read == 0 {
            return None;
        }
        self.next_index += 1;
        Some(Ok(chunk))
    }
}

/// Positions of the required columns within the header.
#[derive(Debug, Clone)]
struct ColumnIndices {
    window_start: usize,
    ticker: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: usize,
}

impl ColumnIndices {
    fn from_headers(headers: &StringRecord) -> Result<Self> {
        let lookup = |name: &str| -> Result<usize> {
            headers
                .iter()
                .position(|h| h.trim() == name)
                .ok_or_else(|| Error::codec(format!("missing csv column: {name}")))
        };

        Ok(Self {
            window_start: lookup("window_start")?,
            ticker: lookup("ticker")?,
            open: lookup("open")?,
            high: lookup("high")?,
            low: lookup("low")?,
            close: lookup("close")?,
            volume: lookup("volume")?,
        })
    }

    fn parse(&self, record: &StringRecord, line: u64) -> Result<RawRecord> {
        let field = |idx: usize| record.get(idx).map(str::trim);
        // The ticker is not trimmed; keys compare by exact text.

        let timestamp_ns = match field(self.window_start) {
            Some(raw) if !raw.is_empty() => raw
                .parse::<i64>()
                .map_err(|_| Error::malformed_row(line, format!("bad window_start '{raw}'")))?,
            _ => return Err(Error::malformed_row(line, "missing window_start")),
        };

        Ok(RawRecord {
            timestamp_ns,
            key: Key::parse(record.get(self.ticker)),
            open: parse_price(field(self.open), "open", line)?,
            high: parse_price(field(self.high), "high", line)?,
            low: parse_price(field(self.low), "low", line)?,
            close: parse_price(field(self.close), "close", line)?,
            volume: parse_volume(field(self.volume), line)?,
        })
    }
}

fn parse_price(raw: Option<&str>, name: &str, line: u64) -> Result<f64> {
    let raw = raw.unwrap_or_default();
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(Error::malformed_row(line, format!("bad {name} '{raw}'"))),
    }
}

/// Volumes are integral; whole-number floats such as `1200.0` are accepted.
fn parse_volume(raw: Option<&str>, line: u64) -> Result<u64> {
    let raw = raw.unwrap_or_default();
    if let Ok(value) = raw.parse::<u64>() {
        return Ok(value);
    }
    match raw.parse::<f64>() {
        Ok(value)
            if value.is_finite()
                && value >= 0.0
                && value.fract() == 0.0
                && value <= u64::MAX as f64 =>
        {
            Ok(value as u64)
        }
        _ => Err(Error::malformed_row(line, format!("bad volume '{raw}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::gzip;
    use proptest::prelude::*;

    const HEADER: &str = "window_start,ticker,open,high,low,close,volume\n";
    const DAY_START: i64 = 1_672_531_200_000_000_000; // 2023-01-01T00:00:00Z
    const MINUTE: i64 = 60_000_000_000;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 1, 1).unwrap()
    }

    fn csv(rows: &[String]) -> Vec<u8> {
        let mut text = HEADER.to_string();
        for row in rows {
            text.push_str(row);
            text.push('\n');
        }
        text.into_bytes()
    }

    fn row(minute: i64, ticker: &str) -> String {
        format!("{},{ticker},10.0,11.0,9.0,10.5,100", DAY_START + minute * MINUTE)
    }

    #[test]
    fn test_chunks_are_bounded_and_ordered() {
        let rows: Vec<String> = (0..25).map(|i| row(i, "AAPL")).collect();
        let reader = ChunkReader::new(csv(&rows), Compression::None, 10).unwrap();
        let chunks: Vec<Chunk> = reader.chunks().unwrap().map(|c| c.unwrap()).collect();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].rows.len(), 10);
        assert_eq!(chunks[2].rows.len(), 5);
        assert_eq!(chunks[2].index, 2);
        assert_eq!(chunks[0].rows[0].record.timestamp_ns, DAY_START);
        assert_eq!(chunks[0].rows[0].line, 2);
        let all: Vec<i64> = chunks
            .iter()
            .flat_map(|c| c.rows.iter().map(|r| r.record.timestamp_ns))
            .collect();
        assert!(all.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_reader_restarts_from_source() {
        let rows: Vec<String> = (0..7).map(|i| row(i, "MSFT")).collect();
        let reader = ChunkReader::from_gzip(gzip(&csv(&rows)).unwrap(), 3).unwrap();
        let first: Vec<usize> = reader.chunks().unwrap().map(|c| c.unwrap().rows.len()).collect();
        let second: Vec<usize> = reader.chunks().unwrap().map(|c| c.unwrap().rows.len()).collect();
        assert_eq!(first, vec![3, 3, 1]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_malformed_rows_are_skipped_and_counted() {
        let rows = vec![
            row(0, "AAPL"),
            format!("{},AAPL,abc,11.0,9.0,10.5,100", DAY_START),
            ",AAPL,10.0,11.0,9.0,10.5,100".to_string(),
            format!("{},AAPL,10.0,11.0,9.0,10.5,lots", DAY_START),
            format!("{},AAPL,10.0", DAY_START),
            row(1, "AAPL"),
        ];
        let reader = ChunkReader::new(csv(&rows), Compression::None, 100).unwrap();
        let chunks: Vec<Chunk> = reader.chunks().unwrap().map(|c| c.unwrap()).collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].rows.len(), 2);
        assert_eq!(chunks[0].malformed, 4);
    }

    #[test]
    fn test_blank_ticker_is_invalid_but_nan_is_valid() {
        let rows = vec![row(0, ""), row(1, "NaN"), row(2, "  ")];
        let reader = ChunkReader::new(csv(&rows), Compression::None, 100).unwrap();
        let chunk = reader.chunks().unwrap().next().unwrap().unwrap();
        assert_eq!(chunk.rows[0].record.key, Key::Invalid);
        assert_eq!(
            chunk.rows[1].record.key,
            Key::Valid(Symbol::new("NaN").unwrap())
        );
        assert_eq!(chunk.rows[2].record.key, Key::Invalid);

        let keys = reader.distinct_keys().unwrap();
        assert_eq!(keys.len(), 1);
    }

    #[test]
    fn test_volume_accepts_integral_floats() {
        let rows = vec![format!("{},AAPL,1,1,1,1,1200.0", DAY_START)];
        let reader = ChunkReader::new(csv(&rows), Compression::None, 100).unwrap();
        let chunk = reader.chunks().unwrap().next().unwrap().unwrap();
        assert_eq!(chunk.rows[0].record.volume, 1200);
    }

    #[test]
    fn test_columns_resolved_by_name() {
        let text = format!(
            "ticker,volume,open,close,high,low,window_start,transactions\nAAPL,5,1.5,2.5,3.0,1.0,{DAY_START},7\n"
        );
        let reader = ChunkReader::new(text.into_bytes(), Compression::None, 100).unwrap();
        let chunk = reader.chunks().unwrap().next().unwrap().unwrap();
        let record = &chunk.rows[0].record;
        assert_eq!(record.timestamp_ns, DAY_START);
        assert_eq!(record.open, 1.5);
        assert_eq!(record.close, 2.5);
        assert_eq!(record.high, 3.0);
        assert_eq!(record.volume, 5);
    }

    #[test]
    fn test_missing_column_fails() {
        let text = "window_start,ticker,open,high,low,close\n1,A,1,1,1,1\n";
        let reader = ChunkReader::new(text.as_bytes().to_vec(), Compression::None, 100).unwrap();
        assert!(matches!(reader.chunks(), Err(Error::Codec(_))));
    }

    #[test]
    fn test_census_counts_chunks_per_symbol() {
        // AAPL straddles the chunk boundary, MSFT sits in the second chunk only.
        let rows = vec![
            row(0, "AAPL"),
            row(1, "AAPL"),
            row(2, "AAPL"),
            row(3, "MSFT"),
            row(-1, "GOOG"),
            row(4, ""),
        ];
        let reader = ChunkReader::new(csv(&rows), Compression::None, 2).unwrap();
        let census = reader.census(day()).unwrap();

        assert_eq!(census.chunks_per_symbol[&Symbol::new("AAPL").unwrap()], 2);
        assert_eq!(census.chunks_per_symbol[&Symbol::new("MSFT").unwrap()], 1);
        assert!(!census
            .chunks_per_symbol
            .contains_key(&Symbol::new("GOOG").unwrap()));
        assert_eq!(census.stats.rows, 6);
        assert_eq!(census.stats.off_day, 1);
        assert_eq!(census.stats.invalid_keys, 1);
    }

    #[test]
    fn test_census_symbols_are_distinct_keys_on_the_day() {
        let rows = vec![
            row(0, "AAPL"),
            row(1, " AAPL"),
            row(2, "NaN"),
            row(-1, "GOOG"),
            row(3, ""),
        ];
        let reader = ChunkReader::new(csv(&rows), Compression::None, 2).unwrap();

        let all = reader.distinct_keys().unwrap();
        let on_day = reader.census(day()).unwrap().symbols();

        assert_eq!(all.len(), 4);
        assert!(on_day.is_subset(&all));
        let dropped: Vec<&Symbol> = all.difference(&on_day).collect();
        assert_eq!(dropped, vec![&Symbol::new("GOOG").unwrap()]);
    }

    #[test]
    fn test_zero_chunk_rows_rejected() {
        assert!(ChunkReader::new(Vec::new(), Compression::None, 0).is_err());
    }

    proptest! {
        #[test]
        fn test_chunking_preserves_every_row(n in 0usize..200, chunk_rows in 1usize..50) {
            let rows: Vec<String> = (0..n as i64).map(|i| row(i, "AAPL")).collect();
            let reader = ChunkReader::new(csv(&rows), Compression::None, chunk_rows).unwrap();
            let chunks: Vec<Chunk> = reader.chunks().unwrap().map(|c| c.unwrap()).collect();

            prop_assert_eq!(chunks.len(), n.div_ceil(chunk_rows));
            prop_assert!(chunks.iter().all(|c| c.rows.len() <= chunk_rows));
            prop_assert!(chunks.iter().enumerate().all(|(i, c)| c.index == i));
            let total: usize = chunks.iter().map(|c| c.rows.len()).sum();
            prop_assert_eq!(total, n);
        }
    }
}
