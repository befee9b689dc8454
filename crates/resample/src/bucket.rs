//! OHLCV bucket building from minute records.
//!
//! Records must be added in chronological order: the first record of a
//! bucket sets its open and the last one its close.

use ohlcv_core::{Granularity, RawRecord, ResampledBucket, Symbol, TimestampNs};
use std::collections::BTreeMap;

/// Builder for the non-empty buckets of one symbol at one granularity.
#[derive(Debug, Clone)]
pub struct BucketBuilder {
    granularity: Granularity,
    /// Buckets being built, keyed by bucket start.
    buckets: BTreeMap<TimestampNs, BucketInProgress>,
}

/// A bucket that's currently being built.
#[derive(Debug, Clone)]
struct BucketInProgress {
    open: Option<f64>,
    high: f64,
    low: f64,
    close: f64,
    volume: u64,
}

impl BucketInProgress {
    fn new() -> Self {
        Self {
            open: None,
            high: f64::NEG_INFINITY,
            low: f64::INFINITY,
            close: 0.0,
            volume: 0,
        }
    }

    fn add_record(&mut self, record: &RawRecord) {
        if self.open.is_none() {
            self.open = Some(record.open);
        }
        self.high = self.high.max(record.high);
        self.low = self.low.min(record.low);
        self.close = record.close;
        self.volume = self.volume.saturating_add(record.volume);
    }

    fn to_bucket(&self, symbol: &Symbol, granularity: Granularity, start: TimestampNs) -> Option<ResampledBucket> {
        let open = self.open?;
        Some(ResampledBucket {
            symbol: symbol.clone(),
            granularity,
            bucket_start: start,
            open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        })
    }
}

impl BucketBuilder {
    pub fn new(granularity: Granularity) -> Self {
        Self {
            granularity,
            buckets: BTreeMap::new(),
        }
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Add a record to the bucket containing its timestamp.
    pub fn add_record(&mut self, record: &RawRecord) {
        let start = self.granularity.bucket_start(record.timestamp_ns);
        self.buckets
            .entry(start)
            .or_insert_with(BucketInProgress::new)
            .add_record(record);
    }

    /// Add multiple records.
    pub fn add_records(&mut self, records: &[RawRecord]) {
        for record in records {
            self.add_record(record);
        }
    }

    /// Get the number of buckets currently being built.
    pub fn pending_bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Completed buckets keyed by start, ascending.
    pub fn finish(self, symbol: &Symbol) -> BTreeMap<TimestampNs, ResampledBucket> {
        let granularity = self.granularity;
        self.buckets
            .into_iter()
            .filter_map(|(start, bucket)| {
                bucket
                    .to_bucket(symbol, granularity, start)
                    .map(|b| (start, b))
            })
            .collect()
    }
}
