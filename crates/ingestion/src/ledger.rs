//! Completeness accounting for one day's partitioning.
//!
//! The ledger is owned by a single aggregator. Workers never touch the sets
//! directly: they hold a cloneable [`LedgerHandle`] and send completion events
//! over a channel. [`CompletenessLedger::finalize`] drains the channel until
//! every handle is dropped and returns the read-only report.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::mpsc::{self, Receiver, Sender};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::warn;

use ohlcv_core::Symbol;

use crate::chunk_reader::RowStats;

/// Completion event sent by an upload task.
#[derive(Debug, Clone)]
pub enum LedgerEvent {
    /// The symbol's partition was stored.
    Materialized(Symbol),
    /// The symbol's upload failed; it stays out of `materialized`.
    Failed { symbol: Symbol, reason: String },
}

/// Sending side of the ledger, shared by workers.
#[derive(Debug, Clone)]
pub struct LedgerHandle {
    tx: Sender<LedgerEvent>,
}

impl LedgerHandle {
    pub fn materialized(&self, symbol: Symbol) {
        self.send(LedgerEvent::Materialized(symbol));
    }

    pub fn failed(&self, symbol: Symbol, reason: impl Into<String>) {
        self.send(LedgerEvent::Failed {
            symbol,
            reason: reason.into(),
        });
    }

    fn send(&self, event: LedgerEvent) {
        if let Err(mpsc::SendError(event)) = self.tx.send(event) {
            warn!(?event, "completeness ledger closed; event dropped");
        }
    }
}

/// Aggregating side of the ledger.
#[derive(Debug)]
pub struct CompletenessLedger {
    day: NaiveDate,
    observed: BTreeSet<Symbol>,
    rx: Receiver<LedgerEvent>,
}

impl CompletenessLedger {
    /// Open a ledger for `day` expecting `observed` symbols.
    pub fn open(day: NaiveDate, observed: BTreeSet<Symbol>) -> (Self, LedgerHandle) {
        let (tx, rx) = mpsc::channel();
        (Self { day, observed, rx }, LedgerHandle { tx })
    }

    /// Consume events until all handles are dropped, then build the report.
    pub fn finalize(self) -> CompletenessReport {
        let mut materialized = BTreeSet::new();
        let mut failures = BTreeMap::new();
        for event in self.rx {
            match event {
                LedgerEvent::Materialized(symbol) => {
                    failures.remove(&symbol);
                    materialized.insert(symbol);
                }
                LedgerEvent::Failed { symbol, reason } => {
                    if !materialized.contains(&symbol) {
                        failures.insert(symbol, reason);
                    }
                }
            }
        }
        CompletenessReport::new(self.day, self.observed, materialized, failures)
    }
}

/// Outcome of partitioning one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletenessReport {
    pub day: NaiveDate,
    /// Every valid symbol with rows on the day.
    pub observed: BTreeSet<Symbol>,
    /// Symbols whose partition upload succeeded.
    pub materialized: BTreeSet<Symbol>,
    /// `observed - materialized`.
    pub missing: BTreeSet<Symbol>,
    /// `materialized - observed`; empty unless the source changed under us.
    pub unexpected: BTreeSet<Symbol>,
    /// Failure reason per symbol whose upload failed.
    pub failures: BTreeMap<Symbol, String>,
    /// Source row accounting.
    pub rows: RowStats,
}

impl CompletenessReport {
    pub fn new(
        day: NaiveDate,
        observed: BTreeSet<Symbol>,
        materialized: BTreeSet<Symbol>,
        failures: BTreeMap<Symbol, String>,
    ) -> Self {
        let missing = observed.difference(&materialized).cloned().collect();
        let unexpected = materialized.difference(&observed).cloned().collect();
        Self {
            day,
            observed,
            materialized,
            missing,
            unexpected,
            failures,
            rows: RowStats::default(),
        }
    }

    pub fn with_rows(mut self, rows: RowStats) -> Self {
        self.rows = rows;
        self
    }

    /// `materialized == observed`.
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty()
    }
}
