//! Configuration structures for the OHLCV pipeline.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::paths::PathScheme;
use crate::types::Granularity;

/// Main configuration for the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local blob store location.
    pub storage: StorageConfig,
    /// Raw daily file location.
    pub source: SourceConfig,
    /// Per-symbol output location.
    pub output: OutputConfig,
    /// Partition fan-out configuration.
    pub partition: PartitionConfig,
    /// Resampling configuration.
    pub resample: ResampleConfig,
    /// Time-series sink configuration.
    pub sink: SinkConfig,
    /// Orchestration policy.
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Parse a TOML document. Missing sections fall back to defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(text).map_err(|e| Error::config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Reject settings that would make a stage unable to run.
    pub fn validate(&self) -> Result<()> {
        if self.partition.chunk_rows == 0 {
            return Err(Error::config("partition.chunk_rows must be > 0"));
        }
        if self.partition.outer_workers == 0 || self.partition.inner_workers == 0 {
            return Err(Error::config("partition worker counts must be > 0"));
        }
        if self.resample.granularities.is_empty() {
            return Err(Error::config("resample.granularities must not be empty"));
        }
        if self.sink.bucket.trim().is_empty() || self.sink.measurement.trim().is_empty() {
            return Err(Error::config("sink.bucket and sink.measurement must be set"));
        }
        if self.pipeline.symbol_workers == 0 {
            return Err(Error::config("pipeline.symbol_workers must be > 0"));
        }
        Ok(())
    }

    /// Path scheme built from the source and output prefixes.
    pub fn path_scheme(&self) -> PathScheme {
        PathScheme::new(self.source.prefix.clone(), self.output.prefix.clone())
    }
}

/// Local blob store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory of the filesystem blob store.
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
        }
    }
}

/// Raw daily file configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Prefix of `{YYYY}/{MM}/{YYYY}-{MM}-{DD}.csv.gz` source files.
    pub prefix: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            prefix: "stock/usa".to_string(),
        }
    }
}

/// Per-symbol output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Prefix of per-symbol partition and resampled files.
    pub prefix: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            prefix: "stock/usa".to_string(),
        }
    }
}

/// Partition fan-out configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    /// Maximum rows per chunk.
    pub chunk_rows: usize,
    /// Workers processing chunks in parallel.
    pub outer_workers: usize,
    /// Workers processing per-chunk symbol groups in parallel.
    pub inner_workers: usize,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            chunk_rows: 10_000,
            outer_workers: 4,
            inner_workers: 8,
        }
    }
}

/// Policy for buckets with no source data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillPolicy {
    /// Emit only non-empty buckets.
    #[default]
    Drop,
    /// Carry the previous close into empty buckets with zero volume.
    ForwardFill,
}

/// Which bucket starts a resampled series must cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Extent {
    /// From the first to the last observed bucket.
    #[default]
    Observed,
    /// Every bucket of the calendar day.
    Day,
}

/// Resampling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResampleConfig {
    /// Granularities to derive, finest first.
    pub granularities: Vec<Granularity>,
    /// Empty-bucket policy.
    pub fill_policy: FillPolicy,
    /// Bucket extent enumerated per granularity.
    pub extent: Extent,
}

impl Default for ResampleConfig {
    fn default() -> Self {
        Self {
            granularities: Granularity::ALL.to_vec(),
            fill_policy: FillPolicy::Drop,
            extent: Extent::Observed,
        }
    }
}

/// Time-series sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// DuckDB database file. `None` keeps the database in memory.
    pub database_path: Option<PathBuf>,
    /// Destination bucket name.
    pub bucket: String,
    /// Measurement name of every point.
    pub measurement: String,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            database_path: Some(PathBuf::from("data/timeseries.duckdb")),
            bucket: "stock".to_string(),
            measurement: "stock_price".to_string(),
        }
    }
}

/// What to do when some observed symbols were not materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingKeyPolicy {
    /// Log the missing symbols and continue.
    #[default]
    Warn,
    /// Demote the day to a failed partition.
    Fail,
}

/// Orchestration policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Treatment of a non-empty `missing` set.
    pub missing_keys: MissingKeyPolicy,
    /// Symbols resampled and loaded in parallel.
    pub symbol_workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            missing_keys: MissingKeyPolicy::Warn,
            symbol_workers: 4,
        }
    }
}
