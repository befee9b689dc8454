//! Core types and configuration for the OHLCV pipeline.
//!
//! This crate provides shared types used across all other crates:
//! - Market data types (records, keys, granularities, buckets, points)
//! - The blob path scheme
//! - Blob store and time-series sink interfaces
//! - Configuration structures
//! - Common error types

pub mod config;
pub mod error;
pub mod paths;
pub mod store;
pub mod types;

pub use config::{Config, Extent, FillPolicy, MissingKeyPolicy};
pub use error::{Error, Result};
pub use paths::{PathScheme, GZIP_CONTENT_TYPE};
pub use store::{BlobStore, FsBlobStore, MemoryBlobStore, MemorySink, TimeSeriesSink};
pub use types::*;
