//! Gzip CSV encoding of per-symbol partitions.
//!
//! Partition files keep the source header and column order, one row per
//! record in ascending timestamp order. Encoding is deterministic: the gzip
//! header carries no modification time, so identical series always produce
//! identical bytes.

use std::io::{Read, Write};

use chrono::NaiveDate;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;

use ohlcv_core::{Error, PartitionedSeries, Result, Symbol};

use crate::chunk_reader::ChunkReader;

/// Header of source and partition files.
pub const PARTITION_HEADER: [&str; 7] = [
    "window_start",
    "ticker",
    "open",
    "high",
    "low",
    "close",
    "volume",
];

#[derive(Serialize)]
struct PartitionRow<'a> {
    window_start: i64,
    ticker: &'a str,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: u64,
}

/// Gzip-compress `bytes`.
pub fn gzip(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

/// Decompress gzip `bytes`.
pub fn gunzip(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut out)
        .map_err(|e| Error::codec(format!("gzip decode failed: {e}")))?;
    Ok(out)
}

/// Serialize a partition as gzip-compressed CSV.
pub fn encode_partition(series: &PartitionedSeries) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(true)
        .from_writer(Vec::with_capacity(series.len() * 64));
    let ticker = series.symbol().as_str();
    for record in series.records() {
        writer
            .serialize(PartitionRow {
                window_start: record.timestamp_ns,
                ticker,
                open: record.open,
                high: record.high,
                low: record.low,
                close: record.close,
                volume: record.volume,
            })
            .map_err(|e| Error::codec(format!("csv encode failed: {e}")))?;
    }
    if series.is_empty() {
        writer
            .write_record(PARTITION_HEADER)
            .map_err(|e| Error::codec(format!("csv encode failed: {e}")))?;
    }
    let csv = writer
        .into_inner()
        .map_err(|e| Error::codec(format!("csv flush failed: {e}")))?;
    gzip(&csv)
}

/// Parse a partition written by [`encode_partition`].
///
/// Unlike the source reader this is strict: a partition is our own output,
/// so any unparseable row fails the whole decode.
pub fn decode_partition(day: NaiveDate, symbol: &Symbol, bytes: Vec<u8>) -> Result<PartitionedSeries> {
    let reader = ChunkReader::from_gzip(bytes, ChunkReader::DEFAULT_CHUNK_ROWS)?;
    let mut records = Vec::new();
    for chunk in reader.chunks()? {
        let chunk = chunk?;
        if chunk.malformed > 0 {
            return Err(Error::codec(format!(
                "{symbol} partition for {day} has {} unparseable rows",
                chunk.malformed
            )));
        }
        records.extend(chunk.rows.into_iter().map(|row| row.record));
    }
    PartitionedSeries::new(day, symbol.clone(), records)
}
