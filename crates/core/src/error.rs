//! Error types for the OHLCV pipeline.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the OHLCV pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The day's input blob does not exist.
    #[error("Source not found: {0}")]
    SourceNotFound(String),

    /// A single source row could not be parsed.
    #[error("Malformed row at line {line}: {reason}")]
    MalformedRow { line: u64, reason: String },

    /// A blob requested with `get` is absent.
    #[error("Blob not found: {0}")]
    BlobNotFound(String),

    /// Blob store failure (put/list/exists).
    #[error("Storage error: {0}")]
    Storage(String),

    /// CSV or gzip encoding/decoding failure.
    #[error("Codec error: {0}")]
    Codec(String),

    /// The time-series sink rejected a batched write.
    #[error("Sink write failed: {0}")]
    SinkWrite(String),

    /// Forward-fill requested but the first bucket of the extent is empty.
    #[error("Insufficient seed data for {symbol} at {granularity}: first bucket is empty")]
    InsufficientSeedData { symbol: String, granularity: String },

    /// A partitioned series violates its day or ordering invariant.
    #[error("Invalid series: {0}")]
    InvalidSeries(String),

    /// Observed symbols were not materialized and policy treats it as fatal.
    #[error("Incomplete partition for {day}: {missing} observed symbols not materialized")]
    IncompletePartition { day: String, missing: usize },

    /// A pipeline stage was triggered from a state that does not allow it.
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with message.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a source-not-found error.
    pub fn source_not_found(path: impl Into<String>) -> Self {
        Error::SourceNotFound(path.into())
    }

    /// Create a malformed row error.
    pub fn malformed_row(line: u64, reason: impl Into<String>) -> Self {
        Error::MalformedRow {
            line,
            reason: reason.into(),
        }
    }

    /// Create a storage error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(msg.into())
    }

    /// Create a codec error.
    pub fn codec(msg: impl Into<String>) -> Self {
        Error::Codec(msg.into())
    }

    /// Create a sink write error.
    pub fn sink(msg: impl Into<String>) -> Self {
        Error::SinkWrite(msg.into())
    }

    /// Create an invalid series error.
    pub fn invalid_series(msg: impl Into<String>) -> Self {
        Error::InvalidSeries(msg.into())
    }

    /// Create an invalid transition error.
    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        Error::InvalidTransition(msg.into())
    }

    /// Whether this error means "the thing was not there" rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::SourceNotFound(_) | Error::BlobNotFound(_))
    }
}
