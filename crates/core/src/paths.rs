//! Blob path scheme shared by every stage.
//!
//! Downstream consumers read these paths directly, so the layout is fixed:
//!
//! - raw daily file: `{prefix}/{YYYY}/{MM}/{YYYY}-{MM}-{DD}.csv.gz`
//! - partition: `{prefix}/{symbol}/1m/{YYYY}/{MM}/{symbol}_{YYYY}-{MM}-{DD}.csv.gz`
//! - resampled: `{prefix}/{symbol}/{g}/{YYYY}/{MM}/{symbol}_{YYYY}-{MM}-{DD}_{g}.csv.gz`
//!
//! The partition sits next to the resampled `1m` file without a granularity
//! suffix, so writing resampled output never replaces resampler input.

use chrono::{Datelike, NaiveDate};

use crate::types::{Granularity, Symbol};

/// Content type used for every gzip-compressed CSV blob.
pub const GZIP_CONTENT_TYPE: &str = "application/gzip";

/// Granularity of the per-symbol partition written by the fan-out.
pub const PARTITION_GRANULARITY: Granularity = Granularity::M1;

/// Builds blob paths under fixed source and output prefixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathScheme {
    source_prefix: String,
    output_prefix: String,
}

impl PathScheme {
    pub fn new(source_prefix: impl Into<String>, output_prefix: impl Into<String>) -> Self {
        Self {
            source_prefix: trim_slashes(source_prefix.into()),
            output_prefix: trim_slashes(output_prefix.into()),
        }
    }

    /// The raw daily file for `day`.
    pub fn source_path(&self, day: NaiveDate) -> String {
        let (y, m, d) = ymd(day);
        format!("{}/{y}/{m}/{y}-{m}-{d}.csv.gz", self.source_prefix)
    }

    /// The per-symbol file for `(symbol, granularity, day)`.
    pub fn series_path(&self, symbol: &Symbol, granularity: Granularity, day: NaiveDate) -> String {
        let (y, m, d) = ymd(day);
        format!(
            "{prefix}/{symbol}/{g}/{y}/{m}/{symbol}_{y}-{m}-{d}_{g}.csv.gz",
            prefix = self.output_prefix,
            g = granularity.as_str(),
        )
    }

    /// The finest-grained partition for `(symbol, day)`.
    pub fn partition_path(&self, symbol: &Symbol, day: NaiveDate) -> String {
        let (y, m, d) = ymd(day);
        format!(
            "{prefix}/{symbol}/{g}/{y}/{m}/{symbol}_{y}-{m}-{d}.csv.gz",
            prefix = self.output_prefix,
            g = PARTITION_GRANULARITY.as_str(),
        )
    }

    /// Prefix under which every symbol's files live.
    pub fn output_prefix(&self) -> &str {
        &self.output_prefix
    }
}

impl Default for PathScheme {
    fn default() -> Self {
        Self::new("stock/usa", "stock/usa")
    }
}

fn ymd(day: NaiveDate) -> (String, String, String) {
    (
        format!("{:04}", day.year()),
        format!("{:02}", day.month()),
        format!("{:02}", day.day()),
    )
}

fn trim_slashes(prefix: String) -> String {
    prefix.trim_matches('/').to_string()
}
