//! Pipeline orchestration for daily OHLCV files.
//!
//! Sequences partitioning, resampling and loading per day and per symbol,
//! tracking each stage in an explicit state machine.

pub mod launcher;
pub mod orchestrator;
pub mod state;

pub use orchestrator::{DayReport, PipelineOrchestrator};
pub use state::{DayState, ResampleSummary, SymbolState};
