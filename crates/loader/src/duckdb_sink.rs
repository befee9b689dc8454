//! DuckDB-backed time-series sink.
//!
//! Points are stored narrow: one row per `(bucket, measurement, series, ts,
//! field)`, where `series` is the JSON encoding of the point's tags. Writing a
//! point that already exists replaces its values, so reloading a day is safe.

use std::path::Path;
use std::sync::Mutex;

use duckdb::{params, Connection};
use tracing::debug;

use ohlcv_core::{Error, FieldValue, Point, Result, TimeSeriesSink};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS points (
    bucket      VARCHAR NOT NULL,
    measurement VARCHAR NOT NULL,
    series      VARCHAR NOT NULL,
    ts_ns       BIGINT  NOT NULL,
    field       VARCHAR NOT NULL,
    value_f64   DOUBLE,
    value_u64   UBIGINT,
    PRIMARY KEY (bucket, measurement, series, ts_ns, field)
);
";

const UPSERT: &str = "
INSERT OR REPLACE INTO points (bucket, measurement, series, ts_ns, field, value_f64, value_u64)
VALUES (?, ?, ?, ?, ?, ?, ?)
";

/// Time-series sink persisting points in a DuckDB database.
pub struct DuckDbSink {
    conn: Mutex<Connection>,
}

impl DuckDbSink {
    /// Open (or create) a database file.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_error)?;
        Self::with_connection(conn)
    }

    /// Database living only as long as the sink.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_error)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).map_err(db_error)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Number of distinct points in `bucket`.
    pub fn count_points(&self, bucket: &str) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM (SELECT DISTINCT measurement, series, ts_ns FROM points WHERE bucket = ?)",
                params![bucket],
                |row| row.get(0),
            )
            .map_err(db_error)?;
        Ok(count as usize)
    }

    /// Float value of one field, if stored.
    pub fn float_field(&self, bucket: &str, series: &str, ts_ns: i64, field: &str) -> Result<Option<f64>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT value_f64 FROM points WHERE bucket = ? AND series = ? AND ts_ns = ? AND field = ?")
            .map_err(db_error)?;
        let mut rows = stmt
            .query_map(params![bucket, series, ts_ns, field], |row| row.get::<_, Option<f64>>(0))
            .map_err(db_error)?;
        let first = rows.next();
        match first {
            Some(value) => value.map_err(db_error),
            None => Ok(None),
        }
    }

    /// Series key stored for a point with these tags.
    pub fn series_key(point: &Point) -> Result<String> {
        Ok(serde_json::to_string(&point.tags)?)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::sink("duckdb connection lock poisoned"))
    }
}

impl TimeSeriesSink for DuckDbSink {
    fn write(&self, bucket: &str, points: &[Point]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_error)?;
        {
            let mut stmt = tx.prepare(UPSERT).map_err(db_error)?;
            for point in points {
                let series = Self::series_key(point)?;
                for (field, value) in &point.fields {
                    let (f, u) = match *value {
                        FieldValue::Float(v) => (Some(v), None),
                        FieldValue::UInt(v) => (None, Some(v)),
                    };
                    stmt.execute(params![
                        bucket,
                        point.measurement,
                        series,
                        point.timestamp_ns,
                        field,
                        f,
                        u
                    ])
                    .map_err(db_error)?;
                }
            }
        }
        // An early return drops `tx` uncommitted, rolling the batch back.
        tx.commit().map_err(db_error)?;
        debug!(bucket, points = points.len(), "duckdb batch committed");
        Ok(())
    }
}

fn db_error(e: duckdb::Error) -> Error {
    Error::sink(format!("duckdb: {e}"))
}
