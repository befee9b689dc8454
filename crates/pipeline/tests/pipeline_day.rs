//! Whole-day runs against a filesystem store and a DuckDB sink.

use std::collections::BTreeSet;
use std::process::ExitCode;

use chrono::NaiveDate;
use ohlcv_core::{
    BlobStore, Config, Error, Extent, FillPolicy, FsBlobStore, Granularity, MemoryBlobStore,
    MemorySink, MissingKeyPolicy, PathScheme, Result, Symbol, GZIP_CONTENT_TYPE,
};
use ohlcv_ingestion::{decode_partition, gzip};
use ohlcv_loader::DuckDbSink;
use ohlcv_pipeline::launcher::{run, Cli};
use ohlcv_pipeline::{DayState, PipelineOrchestrator, SymbolState};
use ohlcv_resample::decode_resampled;

const DAY_START: i64 = 1_741_910_400_000_000_000; // 2025-03-14T00:00:00Z
const MINUTE: i64 = 60_000_000_000;

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
}

fn sym(s: &str) -> Symbol {
    Symbol::new(s).unwrap()
}

/// Full-day source: every ticker has one row per minute.
fn source(tickers: &[&str], extra: &[String]) -> Vec<u8> {
    let mut text = String::from("window_start,ticker,open,high,low,close,volume\n");
    for minute in 0..1440i64 {
        for (i, ticker) in tickers.iter().enumerate() {
            let px = 50.0 * (i + 1) as f64 + (minute % 97) as f64 * 0.125;
            text.push_str(&format!(
                "{},{ticker},{px},{},{},{},{}\n",
                DAY_START + minute * MINUTE,
                px + 1.0,
                px - 1.0,
                px + 0.5,
                100 + minute % 13
            ));
        }
    }
    for line in extra {
        text.push_str(line);
        text.push('\n');
    }
    gzip(text.as_bytes()).unwrap()
}

fn seed(store: &dyn BlobStore, bytes: &[u8]) {
    store
        .put(&PathScheme::default().source_path(day()), bytes, GZIP_CONTENT_TYPE)
        .unwrap();
}

fn config() -> Config {
    let mut config = Config::default();
    config.sink.database_path = None;
    config.partition.chunk_rows = 1000;
    config
}

#[test]
fn test_four_symbols_partition_resample_load() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsBlobStore::new(dir.path());
    let sink = DuckDbSink::in_memory().unwrap();
    let tickers = ["AAPL", "MSFT", "GOOG", "AMZN"];
    seed(&store, &source(&tickers, &[]));

    let orchestrator = PipelineOrchestrator::new(&store, &sink, config()).unwrap();
    let report = orchestrator.run_day(day()).unwrap();

    assert!(report.is_success());
    let Some(DayState::Partitioned(completeness)) = &report.partition else {
        panic!("day not partitioned: {:?}", report.partition);
    };
    assert_eq!(completeness.observed.len(), 4);
    assert!(completeness.missing.is_empty());

    let paths = PathScheme::default();
    for ticker in tickers {
        assert!(store.exists(&paths.partition_path(&sym(ticker), day())).unwrap());
        for g in Granularity::ALL {
            assert!(store.exists(&paths.series_path(&sym(ticker), g, day())).unwrap());
        }
    }
    // Per symbol: 1440 + 288 + 144 + 96 + 48 + 24 + 6 + 1 points.
    assert_eq!(sink.count_points("stock").unwrap(), 4 * 2047);
}

#[test]
fn test_daily_bucket_matches_partition() {
    let store = MemoryBlobStore::new();
    let sink = MemorySink::new();
    seed(&store, &source(&["AAPL"], &[]));

    let orchestrator = PipelineOrchestrator::new(&store, &sink, config()).unwrap();
    orchestrator.run_day(day()).unwrap();

    let paths = PathScheme::default();
    let partition = decode_partition(
        day(),
        &sym("AAPL"),
        store.get(&paths.partition_path(&sym("AAPL"), day())).unwrap(),
    )
    .unwrap();
    let daily = decode_resampled(
        &sym("AAPL"),
        Granularity::D1,
        &store
            .get(&paths.series_path(&sym("AAPL"), Granularity::D1, day()))
            .unwrap(),
    )
    .unwrap();

    let rows = partition.records();
    assert_eq!(rows.len(), 1440);
    assert_eq!(daily.len(), 1);
    assert_eq!(daily[0].open, rows[0].open);
    assert_eq!(daily[0].close, rows[1439].close);
    assert_eq!(
        daily[0].high,
        rows.iter().map(|r| r.high).fold(f64::NEG_INFINITY, f64::max)
    );
    assert_eq!(daily[0].volume, rows.iter().map(|r| r.volume).sum::<u64>());
}

#[test]
fn test_invalid_symbol_rows_are_invisible() {
    let store = MemoryBlobStore::new();
    let sink = MemorySink::new();
    let blank = vec![
        format!("{},,1,1,1,1,1", DAY_START),
        format!("{},  ,1,1,1,1,1", DAY_START + MINUTE),
    ];
    seed(&store, &source(&["AAPL", "MSFT"], &blank));

    let orchestrator = PipelineOrchestrator::new(&store, &sink, config()).unwrap();
    let report = orchestrator.run_day(day()).unwrap();

    let Some(DayState::Partitioned(completeness)) = &report.partition else {
        panic!("day not partitioned");
    };
    assert_eq!(
        completeness.observed,
        BTreeSet::from([sym("AAPL"), sym("MSFT")])
    );
    assert!(completeness.missing.is_empty());
    assert_eq!(completeness.rows.invalid_keys, 2);
    let listed = store.list("stock/usa/").unwrap();
    assert!(listed.iter().all(|p| {
        p.contains("/AAPL/") || p.contains("/MSFT/") || p == "stock/usa/2025/03/2025-03-14.csv.gz"
    }));
}

/// Store whose writes fail for one symbol's partition.
struct FailingPartitionStore {
    inner: MemoryBlobStore,
    symbol: &'static str,
}

impl BlobStore for FailingPartitionStore {
    fn exists(&self, path: &str) -> Result<bool> {
        self.inner.exists(path)
    }

    fn get(&self, path: &str) -> Result<Vec<u8>> {
        self.inner.get(path)
    }

    fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        if path.contains(&format!("/{}/", self.symbol)) {
            return Err(Error::storage("connection reset"));
        }
        self.inner.put(path, bytes, content_type)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list(prefix)
    }
}

#[test]
fn test_missing_symbol_warns_by_default() {
    let store = FailingPartitionStore {
        inner: MemoryBlobStore::new(),
        symbol: "MSFT",
    };
    let sink = MemorySink::new();
    seed(&store, &source(&["AAPL", "MSFT"], &[]));

    let orchestrator = PipelineOrchestrator::new(&store, &sink, config()).unwrap();
    let report = orchestrator.run_day(day()).unwrap();

    let Some(DayState::Partitioned(completeness)) = &report.partition else {
        panic!("day should proceed under the warn policy");
    };
    assert_eq!(completeness.missing, BTreeSet::from([sym("MSFT")]));
    assert_eq!(report.symbols.len(), 1);
    assert!(report.symbols[&sym("AAPL")].is_done());
}

#[test]
fn test_missing_symbol_fails_day_under_fail_policy() {
    let store = FailingPartitionStore {
        inner: MemoryBlobStore::new(),
        symbol: "MSFT",
    };
    let sink = MemorySink::new();
    seed(&store, &source(&["AAPL", "MSFT"], &[]));
    let mut config = config();
    config.pipeline.missing_keys = MissingKeyPolicy::Fail;

    let orchestrator = PipelineOrchestrator::new(&store, &sink, config).unwrap();
    let report = orchestrator.run_day(day()).unwrap();

    assert!(matches!(report.partition, Some(DayState::PartitionFailed(_))));
    assert!(report.symbols.is_empty());
    assert!(!report.is_success());
    assert!(sink.points("stock").is_empty());
}

#[test]
fn test_forward_fill_over_day_extent() {
    let store = MemoryBlobStore::new();
    let sink = MemorySink::new();
    // One trade at 00:00 and one at 02:10; everything else is a gap.
    let rows = vec![
        format!("{},AAPL,10,11,9,10.5,5", DAY_START),
        format!("{},AAPL,12,13,11,12.5,7", DAY_START + 130 * MINUTE),
    ];
    let mut text = String::from("window_start,ticker,open,high,low,close,volume\n");
    for row in &rows {
        text.push_str(row);
        text.push('\n');
    }
    seed(&store, &gzip(text.as_bytes()).unwrap());
    let mut config = config();
    config.resample.granularities = vec![Granularity::H1];
    config.resample.fill_policy = FillPolicy::ForwardFill;
    config.resample.extent = Extent::Day;

    let orchestrator = PipelineOrchestrator::new(&store, &sink, config).unwrap();
    let report = orchestrator.run_day(day()).unwrap();
    assert!(report.is_success());

    let hourly = decode_resampled(
        &sym("AAPL"),
        Granularity::H1,
        &store
            .get(&PathScheme::default().series_path(&sym("AAPL"), Granularity::H1, day()))
            .unwrap(),
    )
    .unwrap();
    assert_eq!(hourly.len(), 24);
    assert_eq!((hourly[1].open, hourly[1].close, hourly[1].volume), (10.5, 10.5, 0));
    assert_eq!(hourly[2].open, 12.0);
    assert_eq!((hourly[23].close, hourly[23].volume), (12.5, 0));
}

#[test]
fn test_forward_fill_without_seed_fails_symbol() {
    let store = MemoryBlobStore::new();
    let sink = MemorySink::new();
    let text = format!(
        "window_start,ticker,open,high,low,close,volume\n{},AAPL,1,1,1,1,1\n",
        DAY_START + 5 * MINUTE
    );
    seed(&store, &gzip(text.as_bytes()).unwrap());
    let mut config = config();
    config.resample.granularities = vec![Granularity::M1];
    config.resample.fill_policy = FillPolicy::ForwardFill;
    config.resample.extent = Extent::Day;

    let orchestrator = PipelineOrchestrator::new(&store, &sink, config).unwrap();
    let report = orchestrator.run_day(day()).unwrap();

    assert!(matches!(
        report.symbols[&sym("AAPL")],
        SymbolState::ResampleFailed(_)
    ));
    assert_eq!(report.failed_symbols(), vec![&sym("AAPL")]);
    assert!(sink.points("stock").is_empty());
}

#[test]
fn test_launcher_runs_day_then_single_symbol() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("blobs");
    let db = dir.path().join("sink.duckdb");
    let config_path = dir.path().join("pipeline.toml");
    std::fs::write(
        &config_path,
        format!(
            "[storage]\nroot = {root:?}\n\n[sink]\ndatabase_path = {db:?}\n\n[resample]\ngranularities = [\"1h\", \"1d\"]\n"
        ),
    )
    .unwrap();
    seed(&FsBlobStore::new(&root), &source(&["AAPL", "MSFT"], &[]));

    let cli = Cli {
        year: 2025,
        month: 3,
        day: 14,
        symbol: None,
        config: Some(config_path.clone()),
    };
    assert_eq!(run(cli).unwrap(), ExitCode::SUCCESS);

    let cli = Cli {
        year: 2025,
        month: 3,
        day: 14,
        symbol: Some("MSFT".to_string()),
        config: Some(config_path),
    };
    assert_eq!(run(cli).unwrap(), ExitCode::SUCCESS);

    // Reloading MSFT replaces its points rather than duplicating them.
    let sink = DuckDbSink::open(&db).unwrap();
    assert_eq!(sink.count_points("stock").unwrap(), 2 * (24 + 1));
}

#[test]
fn test_launcher_missing_source_exits_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("blobs");
    let db = dir.path().join("sink.duckdb");
    let config_path = dir.path().join("pipeline.toml");
    std::fs::write(
        &config_path,
        format!("[storage]\nroot = {root:?}\n\n[sink]\ndatabase_path = {db:?}\n"),
    )
    .unwrap();

    let cli = Cli {
        year: 2025,
        month: 3,
        day: 15,
        symbol: None,
        config: Some(config_path),
    };
    assert_eq!(run(cli).unwrap(), ExitCode::SUCCESS);
    assert!(FsBlobStore::new(&root).list("").unwrap().is_empty());
}
