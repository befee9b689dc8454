//! Stage states for a day job and its per-symbol jobs.
//!
//! Transitions are driven from outside, one call per stage. A failed state
//! is terminal until a caller re-drives the stage; nothing retries on its own.

use std::fmt;

use serde::Serialize;

use ohlcv_core::Granularity;
use ohlcv_ingestion::CompletenessReport;
use ohlcv_loader::LoadSummary;

/// Progress of partitioning one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DayState {
    Pending,
    Partitioning,
    Partitioned(CompletenessReport),
    PartitionFailed(String),
}

impl DayState {
    /// Whether `next` may follow this state.
    ///
    /// Partitioning is an idempotent overwrite, so it may be re-driven from
    /// any state except while it is already running.
    pub fn allows(&self, next: &DayState) -> bool {
        use DayState::*;
        matches!(
            (self, next),
            (Pending | Partitioned(_) | PartitionFailed(_), Partitioning)
                | (Partitioning, Partitioned(_) | PartitionFailed(_))
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            DayState::Pending => "pending",
            DayState::Partitioning => "partitioning",
            DayState::Partitioned(_) => "partitioned",
            DayState::PartitionFailed(_) => "partition_failed",
        }
    }
}

impl fmt::Display for DayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the resample stage wrote for a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResampleSummary {
    /// Bucket count per granularity, finest first.
    pub buckets: Vec<(Granularity, usize)>,
}

/// Progress of one symbol through resampling and loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SymbolState {
    Pending,
    Resampling,
    Resampled(ResampleSummary),
    ResampleFailed(String),
    Loading,
    Done(LoadSummary),
    LoadFailed(String),
}

impl SymbolState {
    /// Whether `next` may follow this state.
    pub fn allows(&self, next: &SymbolState) -> bool {
        use SymbolState::*;
        matches!(
            (self, next),
            (
                Pending | Resampled(_) | ResampleFailed(_) | Done(_) | LoadFailed(_),
                Resampling
            ) | (Resampling, Resampled(_) | ResampleFailed(_))
                | (Resampled(_) | Done(_) | LoadFailed(_), Loading)
                | (Loading, Done(_) | LoadFailed(_))
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, SymbolState::ResampleFailed(_) | SymbolState::LoadFailed(_))
    }

    pub fn is_done(&self) -> bool {
        matches!(self, SymbolState::Done(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            SymbolState::Pending => "pending",
            SymbolState::Resampling => "resampling",
            SymbolState::Resampled(_) => "resampled",
            SymbolState::ResampleFailed(_) => "resample_failed",
            SymbolState::Loading => "loading",
            SymbolState::Done(_) => "done",
            SymbolState::LoadFailed(_) => "load_failed",
        }
    }
}

impl fmt::Display for SymbolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
