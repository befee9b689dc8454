//! Conversion of resampled buckets into time-series points.
//!
//! Every bucket becomes one point tagged by `ticker` and `period`, with
//! `open/high/low/close` as float fields, `volume` as an unsigned field and
//! the bucket start as timestamp. A call issues at most one batched write.

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info, warn};

use ohlcv_core::config::SinkConfig;
use ohlcv_core::{
    BlobStore, Error, FieldValue, Granularity, PathScheme, Point, ResampledBucket, Result, Symbol,
    TimeSeriesSink,
};
use ohlcv_resample::decode_resampled;

/// Tag carrying the symbol.
pub const TICKER_TAG: &str = "ticker";
/// Tag carrying the granularity.
pub const PERIOD_TAG: &str = "period";

/// Outcome of loading one symbol's resampled files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    /// Points written in the batch.
    pub points: usize,
    /// Granularities whose file was read.
    pub loaded: Vec<Granularity>,
    /// Granularities whose file was absent.
    pub skipped: Vec<Granularity>,
}

/// Writes resampled buckets to a time-series sink.
pub struct SinkLoader<'a> {
    sink: &'a dyn TimeSeriesSink,
    bucket: String,
    measurement: String,
}

impl<'a> SinkLoader<'a> {
    pub fn new(sink: &'a dyn TimeSeriesSink, bucket: impl Into<String>, measurement: impl Into<String>) -> Self {
        Self {
            sink,
            bucket: bucket.into(),
            measurement: measurement.into(),
        }
    }

    pub fn from_config(sink: &'a dyn TimeSeriesSink, config: &SinkConfig) -> Self {
        Self::new(sink, config.bucket.clone(), config.measurement.clone())
    }

    /// Point for one bucket, tagged with `symbol`.
    pub fn to_point(&self, symbol: &Symbol, bucket: &ResampledBucket) -> Point {
        Point::new(self.measurement.clone(), bucket.bucket_start)
            .tag(TICKER_TAG, symbol.as_str())
            .tag(PERIOD_TAG, bucket.granularity.as_str())
            .field("open", FieldValue::Float(bucket.open))
            .field("high", FieldValue::Float(bucket.high))
            .field("low", FieldValue::Float(bucket.low))
            .field("close", FieldValue::Float(bucket.close))
            .field("volume", FieldValue::UInt(bucket.volume))
    }

    /// Write all buckets for `symbol` in one batched call.
    ///
    /// Fails fast: a sink error aborts the call and nothing is retried here.
    /// An empty slice writes nothing.
    pub fn load(&self, symbol: &Symbol, buckets: &[ResampledBucket]) -> Result<usize> {
        if let Some(stray) = buckets.iter().find(|b| &b.symbol != symbol) {
            return Err(Error::invalid_series(format!(
                "bucket for {} passed to the {symbol} load",
                stray.symbol
            )));
        }
        if buckets.is_empty() {
            debug!(%symbol, "nothing to load");
            return Ok(0);
        }
        let points: Vec<Point> = buckets.iter().map(|b| self.to_point(symbol, b)).collect();
        self.sink.write(&self.bucket, &points)?;
        debug!(%symbol, points = points.len(), bucket = %self.bucket, "points written");
        Ok(points.len())
    }

    /// Read each granularity's resampled file for `(symbol, day)` and load
    /// them together. Absent files are logged and skipped.
    pub fn load_resampled(
        &self,
        store: &dyn BlobStore,
        paths: &PathScheme,
        symbol: &Symbol,
        day: NaiveDate,
        granularities: &[Granularity],
    ) -> Result<LoadSummary> {
        let mut summary = LoadSummary::default();
        let mut buckets = Vec::new();
        for &granularity in granularities {
            let path = paths.series_path(symbol, granularity, day);
            let bytes = match store.get(&path) {
                Ok(bytes) => bytes,
                Err(e) if e.is_not_found() => {
                    warn!(%symbol, %day, %granularity, path, "resampled file not found; skipping");
                    summary.skipped.push(granularity);
                    continue;
                }
                Err(e) => return Err(e),
            };
            buckets.extend(decode_resampled(symbol, granularity, &bytes)?);
            summary.loaded.push(granularity);
        }
        summary.points = self.load(symbol, &buckets)?;
        info!(
            %symbol,
            %day,
            points = summary.points,
            skipped = summary.skipped.len(),
            "loaded resampled series"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ohlcv_core::{MemoryBlobStore, MemorySink, GZIP_CONTENT_TYPE, NANOS_PER_MINUTE};
    use ohlcv_resample::encode_resampled;

    const DAY_START: i64 = 1_672_531_200_000_000_000;

    fn sym(s: &str) -> Symbol {
        Symbol::new(s).unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 1, 1).unwrap()
    }

    fn bucket(symbol: &str, granularity: Granularity, i: i64) -> ResampledBucket {
        ResampledBucket {
            symbol: sym(symbol),
            granularity,
            bucket_start: DAY_START + i * granularity.duration_ns(),
            open: 10.0 + i as f64,
            high: 11.0 + i as f64,
            low: 9.0 + i as f64,
            close: 10.5 + i as f64,
            volume: 100 * (i as u64 + 1),
        }
    }

    /// Sink that rejects every write.
    struct RejectingSink;

    impl TimeSeriesSink for RejectingSink {
        fn write(&self, _bucket: &str, _points: &[Point]) -> Result<()> {
            Err(Error::sink("401 unauthorized"))
        }
    }

    #[test]
    fn test_point_model() {
        let sink = MemorySink::new();
        let loader = SinkLoader::new(&sink, "stock", "stock_price");
        let point = loader.to_point(&sym("AAPL"), &bucket("AAPL", Granularity::M5, 2));

        assert_eq!(point.measurement, "stock_price");
        assert_eq!(point.timestamp_ns, DAY_START + 10 * NANOS_PER_MINUTE);
        assert_eq!(point.tags[TICKER_TAG], "AAPL");
        assert_eq!(point.tags[PERIOD_TAG], "5m");
        assert_eq!(point.fields["open"], FieldValue::Float(12.0));
        assert_eq!(point.fields["close"], FieldValue::Float(12.5));
        assert_eq!(point.fields["volume"], FieldValue::UInt(300));
        assert_eq!(point.fields.len(), 5);
    }

    #[test]
    fn test_load_writes_one_batch() {
        let sink = MemorySink::new();
        let loader = SinkLoader::new(&sink, "stock", "stock_price");
        let buckets: Vec<_> = (0..5).map(|i| bucket("AAPL", Granularity::H1, i)).collect();

        assert_eq!(loader.load(&sym("AAPL"), &buckets).unwrap(), 5);
        let points = sink.points("stock");
        assert_eq!(points.len(), 5);
        assert!(points.windows(2).all(|w| w[0].timestamp_ns < w[1].timestamp_ns));
    }

    #[test]
    fn test_empty_load_skips_sink() {
        let loader = SinkLoader::new(&RejectingSink, "stock", "stock_price");
        assert_eq!(loader.load(&sym("AAPL"), &[]).unwrap(), 0);
    }

    #[test]
    fn test_sink_failure_propagates() {
        let loader = SinkLoader::new(&RejectingSink, "stock", "stock_price");
        let result = loader.load(&sym("AAPL"), &[bucket("AAPL", Granularity::D1, 0)]);
        assert!(matches!(result, Err(Error::SinkWrite(_))));
    }

    #[test]
    fn test_foreign_bucket_is_rejected() {
        let sink = MemorySink::new();
        let loader = SinkLoader::new(&sink, "stock", "stock_price");
        let result = loader.load(&sym("AAPL"), &[bucket("MSFT", Granularity::D1, 0)]);
        assert!(matches!(result, Err(Error::InvalidSeries(_))));
        assert!(sink.points("stock").is_empty());
    }

    #[test]
    fn test_load_resampled_skips_missing_files() {
        let store = MemoryBlobStore::new();
        let paths = PathScheme::default();
        let sink = MemorySink::new();
        let loader = SinkLoader::new(&sink, "stock", "stock_price");
        let hourly: Vec<_> = (0..24).map(|i| bucket("AAPL", Granularity::H1, i)).collect();
        store
            .put(
                &paths.series_path(&sym("AAPL"), Granularity::H1, day()),
                &encode_resampled(&hourly).unwrap(),
                GZIP_CONTENT_TYPE,
            )
            .unwrap();

        let summary = loader
            .load_resampled(
                &store,
                &paths,
                &sym("AAPL"),
                day(),
                &[Granularity::M5, Granularity::H1],
            )
            .unwrap();

        assert_eq!(summary.points, 24);
        assert_eq!(summary.loaded, vec![Granularity::H1]);
        assert_eq!(summary.skipped, vec![Granularity::M5]);
        assert!(sink
            .points("stock")
            .iter()
            .all(|p| p.tags[PERIOD_TAG] == "1h"));
    }
}
