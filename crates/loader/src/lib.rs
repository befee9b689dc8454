//! Time-series loading for the OHLCV pipeline.
//!
//! This crate provides:
//! - Bucket to point conversion
//! - Batched, fail-fast sink writes
//! - Loading of resampled files from the blob store
//! - A DuckDB-backed sink

pub mod duckdb_sink;
pub mod sink_loader;

pub use duckdb_sink::DuckDbSink;
pub use sink_loader::{LoadSummary, SinkLoader, PERIOD_TAG, TICKER_TAG};
