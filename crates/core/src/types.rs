//! Core data types for the OHLCV pipeline.

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Timestamp in nanoseconds since Unix epoch (UTC).
pub type TimestampNs = i64;

pub const NANOS_PER_MINUTE: i64 = 60 * 1_000_000_000;
pub const NANOS_PER_HOUR: i64 = 60 * NANOS_PER_MINUTE;
pub const NANOS_PER_DAY: i64 = 24 * NANOS_PER_HOUR;

/// Floor a timestamp onto a bucket boundary of width `width_ns`.
///
/// Uses Euclidean division so pre-epoch timestamps floor downwards too.
#[inline]
pub fn floor_to(ts_ns: TimestampNs, width_ns: i64) -> TimestampNs {
    ts_ns.div_euclid(width_ns) * width_ns
}

/// Calendar date (UTC) a timestamp falls on.
#[inline]
pub fn date_of(ts_ns: TimestampNs) -> NaiveDate {
    DateTime::from_timestamp_nanos(ts_ns).date_naive()
}

/// `[day_start, day_start + 24h)` in nanoseconds.
pub fn day_range_ns(day: NaiveDate) -> Result<(TimestampNs, TimestampNs)> {
    let start = day
        .and_hms_opt(0, 0, 0)
        .and_then(|dt| dt.and_utc().timestamp_nanos_opt())
        .ok_or_else(|| Error::invalid_series(format!("{day} is outside the nanosecond range")))?;
    Ok((start, start + NANOS_PER_DAY))
}

/// A validated, non-empty instrument symbol.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Build a symbol, rejecting empty or whitespace-only input.
    ///
    /// The text is kept as given: `"AAPL"` and `" AAPL"` are distinct symbols.
    pub fn new(raw: &str) -> Option<Self> {
        if raw.trim().is_empty() {
            None
        } else {
            Some(Self(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Symbol {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Symbol::new(&value).ok_or_else(|| Error::config("symbol must not be empty"))
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

/// Instrument key as read from the source.
///
/// Decided once at parse time. `Invalid` keys never reach partitioning or
/// completeness accounting. The literal text `NaN` is a valid symbol: keys
/// are compared as strings, never interpreted as numbers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Valid(Symbol),
    Invalid,
}

impl Key {
    /// Classify a raw ticker field. Missing, empty and blank fields are `Invalid`.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.and_then(Symbol::new) {
            Some(symbol) => Key::Valid(symbol),
            None => Key::Invalid,
        }
    }

    pub fn symbol(&self) -> Option<&Symbol> {
        match self {
            Key::Valid(symbol) => Some(symbol),
            Key::Invalid => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Key::Valid(_))
    }
}

/// One minute-granularity observation from the source file.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// Window start in nanoseconds.
    pub timestamp_ns: TimestampNs,
    /// Instrument key.
    pub key: Key,
    /// Open price.
    pub open: f64,
    /// High price.
    pub high: f64,
    /// Low price.
    pub low: f64,
    /// Close price.
    pub close: f64,
    /// Traded volume.
    pub volume: u64,
}

/// One symbol's records for one calendar day, ascending by timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionedSeries {
    day: NaiveDate,
    symbol: Symbol,
    records: Vec<RawRecord>,
}

impl PartitionedSeries {
    /// Build a series, checking every record belongs to `day` and `symbol`.
    ///
    /// Records are stably sorted by timestamp, so rows sharing a timestamp
    /// keep their input order.
    pub fn new(day: NaiveDate, symbol: Symbol, mut records: Vec<RawRecord>) -> Result<Self> {
        let (start, end) = day_range_ns(day)?;
        for record in &records {
            if record.timestamp_ns < start || record.timestamp_ns >= end {
                return Err(Error::invalid_series(format!(
                    "{symbol}: timestamp {} is outside {day}",
                    record.timestamp_ns
                )));
            }
            if record.key.symbol() != Some(&symbol) {
                return Err(Error::invalid_series(format!(
                    "{symbol}: record keyed {:?} does not belong to this series",
                    record.key
                )));
            }
        }
        records.sort_by_key(|r| r.timestamp_ns);
        Ok(Self {
            day,
            symbol,
            records,
        })
    }

    pub fn day(&self) -> NaiveDate {
        self.day
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn records(&self) -> &[RawRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// First and last timestamps, if any.
    pub fn time_extent(&self) -> Option<(TimestampNs, TimestampNs)> {
        match (self.records.first(), self.records.last()) {
            (Some(first), Some(last)) => Some((first.timestamp_ns, last.timestamp_ns)),
            _ => None,
        }
    }
}

/// Fixed bucket widths, in ascending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Granularity {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "10m")]
    M10,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Granularity {
    /// Every granularity, finest first.
    pub const ALL: [Granularity; 8] = [
        Granularity::M1,
        Granularity::M5,
        Granularity::M10,
        Granularity::M15,
        Granularity::M30,
        Granularity::H1,
        Granularity::H4,
        Granularity::D1,
    ];

    /// Bucket width in nanoseconds.
    pub fn duration_ns(self) -> i64 {
        match self {
            Granularity::M1 => NANOS_PER_MINUTE,
            Granularity::M5 => 5 * NANOS_PER_MINUTE,
            Granularity::M10 => 10 * NANOS_PER_MINUTE,
            Granularity::M15 => 15 * NANOS_PER_MINUTE,
            Granularity::M30 => 30 * NANOS_PER_MINUTE,
            Granularity::H1 => NANOS_PER_HOUR,
            Granularity::H4 => 4 * NANOS_PER_HOUR,
            Granularity::D1 => NANOS_PER_DAY,
        }
    }

    /// Label used in paths and point tags.
    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::M1 => "1m",
            Granularity::M5 => "5m",
            Granularity::M10 => "10m",
            Granularity::M15 => "15m",
            Granularity::M30 => "30m",
            Granularity::H1 => "1h",
            Granularity::H4 => "4h",
            Granularity::D1 => "1d",
        }
    }

    /// Start of the bucket containing `ts_ns`.
    #[inline]
    pub fn bucket_start(self, ts_ns: TimestampNs) -> TimestampNs {
        floor_to(ts_ns, self.duration_ns())
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Granularity::ALL
            .into_iter()
            .find(|g| g.as_str() == s)
            .ok_or_else(|| Error::config(format!("unknown granularity '{s}'")))
    }
}

/// One aggregated OHLCV bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResampledBucket {
    /// Instrument symbol.
    pub symbol: Symbol,
    /// Bucket width.
    pub granularity: Granularity,
    /// Floor-aligned bucket start (ns).
    pub bucket_start: TimestampNs,
    /// Open of the chronologically first record.
    pub open: f64,
    /// Max of all highs.
    pub high: f64,
    /// Min of all lows.
    pub low: f64,
    /// Close of the chronologically last record.
    pub close: f64,
    /// Sum of all volumes.
    pub volume: u64,
}

/// A field value carried by a time-series point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Float(f64),
    UInt(u64),
}

/// A single time-series point as handed to a sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Measurement name (e.g. "stock_price").
    pub measurement: String,
    /// Series tags, ordered by name.
    pub tags: BTreeMap<String, String>,
    /// Field values, ordered by name.
    pub fields: BTreeMap<String, FieldValue>,
    /// Point timestamp (ns).
    pub timestamp_ns: TimestampNs,
}

impl Point {
    pub fn new(measurement: impl Into<String>, timestamp_ns: TimestampNs) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp_ns,
        }
    }

    pub fn tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(name.into(), value.into());
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }
}
