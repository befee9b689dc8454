//! Resampling of per-symbol partitions for the OHLCV pipeline.
//!
//! This crate handles:
//! - OHLCV bucket building at a fixed granularity
//! - Bucket extent enumeration and fill policies
//! - Resampled file encoding

pub mod bucket;
pub mod codec;
pub mod resampler;

pub use bucket::BucketBuilder;
pub use codec::{decode_resampled, encode_resampled, RESAMPLED_HEADER};
pub use resampler::{bucket_extent, forward_fill, resample_granularity, ResampledSeries, Resampler};
