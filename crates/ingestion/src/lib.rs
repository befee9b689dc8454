//! Source ingestion and per-symbol partitioning.
//!
//! This crate handles:
//! - Chunked reading of the daily gzip CSV source
//! - The key census used for completeness accounting
//! - Partition file encoding
//! - Concurrent per-symbol fan-out into the blob store

pub mod chunk_reader;
pub mod codec;
pub mod ledger;
pub mod partition;

pub use chunk_reader::{Chunk, ChunkReader, Compression, KeyCensus, RowStats, SourceRow};
pub use codec::{decode_partition, encode_partition, gunzip, gzip};
pub use ledger::{CompletenessLedger, CompletenessReport, LedgerHandle};
pub use partition::PartitionFanOut;
