//! Gzip CSV encoding of resampled series.
//!
//! Layout: `window_start,open,high,low,close,volume`, one row per bucket,
//! `window_start` being the bucket start in nanoseconds.

use serde::{Deserialize, Serialize};

use ohlcv_core::{Error, Granularity, ResampledBucket, Result, Symbol};
use ohlcv_ingestion::{gunzip, gzip};

/// Header of resampled files.
pub const RESAMPLED_HEADER: [&str; 6] = ["window_start", "open", "high", "low", "close", "volume"];

#[derive(Debug, Serialize, Deserialize)]
struct ResampledRow {
    window_start: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: u64,
}

/// Serialize buckets as gzip-compressed CSV.
pub fn encode_resampled(buckets: &[ResampledBucket]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(true)
        .from_writer(Vec::with_capacity(buckets.len() * 56));
    for bucket in buckets {
        writer
            .serialize(ResampledRow {
                window_start: bucket.bucket_start,
                open: bucket.open,
                high: bucket.high,
                low: bucket.low,
                close: bucket.close,
                volume: bucket.volume,
            })
            .map_err(|e| Error::codec(format!("csv encode failed: {e}")))?;
    }
    if buckets.is_empty() {
        writer
            .write_record(RESAMPLED_HEADER)
            .map_err(|e| Error::codec(format!("csv encode failed: {e}")))?;
    }
    let csv = writer
        .into_inner()
        .map_err(|e| Error::codec(format!("csv flush failed: {e}")))?;
    gzip(&csv)
}

/// Parse a file written by [`encode_resampled`].
pub fn decode_resampled(
    symbol: &Symbol,
    granularity: Granularity,
    bytes: &[u8],
) -> Result<Vec<ResampledBucket>> {
    let csv = gunzip(bytes)?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(csv.as_slice());
    let mut buckets = Vec::new();
    for row in reader.deserialize::<ResampledRow>() {
        let row = row.map_err(|e| {
            Error::codec(format!("{symbol} {granularity} file has a bad row: {e}"))
        })?;
        if row.window_start != granularity.bucket_start(row.window_start) {
            return Err(Error::codec(format!(
                "{symbol} {granularity} bucket {} is not aligned",
                row.window_start
            )));
        }
        buckets.push(ResampledBucket {
            symbol: symbol.clone(),
            granularity,
            bucket_start: row.window_start,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
        });
    }
    Ok(buckets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ohlcv_core::NANOS_PER_HOUR;

    const DAY_START: i64 = 1_672_531_200_000_000_000;

    fn bucket(hour: i64, close: f64) -> ResampledBucket {
        ResampledBucket {
            symbol: Symbol::new("MSFT").unwrap(),
            granularity: Granularity::H1,
            bucket_start: DAY_START + hour * NANOS_PER_HOUR,
            open: 250.1,
            high: 251.7,
            low: 249.05,
            close,
            volume: 123_456,
        }
    }

    #[test]
    fn test_round_trip_is_exact() {
        let buckets = vec![bucket(0, 0.1 + 0.2), bucket(1, 250.333_333_333_333_3)];
        let bytes = encode_resampled(&buckets).unwrap();
        let decoded = decode_resampled(&Symbol::new("MSFT").unwrap(), Granularity::H1, &bytes).unwrap();
        assert_eq!(decoded, buckets);
    }

    #[test]
    fn test_header_and_first_row() {
        let bytes = encode_resampled(&[bucket(0, 250.5)]).unwrap();
        let text = String::from_utf8(gunzip(&bytes).unwrap()).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), RESAMPLED_HEADER.join(","));
        assert_eq!(
            lines.next().unwrap(),
            "1672531200000000000,250.1,251.7,249.05,250.5,123456"
        );
    }

    #[test]
    fn test_empty_file_has_header_only() {
        let bytes = encode_resampled(&[]).unwrap();
        let text = String::from_utf8(gunzip(&bytes).unwrap()).unwrap();
        assert_eq!(text.trim_end(), RESAMPLED_HEADER.join(","));
        let decoded = decode_resampled(&Symbol::new("MSFT").unwrap(), Granularity::H1, &bytes).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_misaligned_bucket_is_rejected() {
        let mut misaligned = bucket(0, 1.0);
        misaligned.bucket_start += 60_000_000_000;
        let bytes = encode_resampled(&[misaligned]).unwrap();
        let result = decode_resampled(&Symbol::new("MSFT").unwrap(), Granularity::H1, &bytes);
        assert!(matches!(result, Err(Error::Codec(_))));
    }
}
