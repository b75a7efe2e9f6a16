//! Source reader for SQLite databases
//!
//! Provides:
//! - SourceHandle: an opened, read-only source database
//! - SourceRows: lazy, forward-only row sequence fed by a blocking cursor
//!
//! The SQLite cursor is synchronous, so it runs on a blocking worker that
//! hands rows over a bounded channel. The worker owns the connection and
//! closes it when the cursor ends or the reader goes away.

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::security::quote_sqlite_identifier;
use crate::types::{SourceRow, SourceValue};

/// Rows buffered between the cursor worker and the reader
pub const ROW_CHANNEL_CAPACITY: usize = 64;

/// `SELECT * FROM "<table>"`
pub fn select_all_sql(table: &str) -> String {
    format!("SELECT * FROM {}", quote_sqlite_identifier(table))
}

/// An opened source database
pub struct SourceHandle {
    conn: Connection,
    path: PathBuf,
}

impl std::fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceHandle")
            .field("path", &self.path)
            .finish()
    }
}

impl SourceHandle {
    /// Open the database file read-only
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(path, flags)
            .map_err(|e| Error::connection(path.display().to_string(), e.to_string()))?;

        debug!(path = %path.display(), "source database opened");
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Path the handle was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `sql` and return its rows as a lazy sequence.
    ///
    /// The handle moves into the cursor worker. If the statement fails to
    /// prepare, the worker has closed the connection by the time the
    /// error is returned.
    pub async fn query(self, sql: impl Into<String>) -> Result<SourceRows> {
        let sql = sql.into();
        let Self { conn, path } = self;

        let (ready_tx, ready_rx) = oneshot::channel();
        let (row_tx, row_rx) = mpsc::channel(ROW_CHANNEL_CAPACITY);
        let worker_sql = sql.clone();
        let worker = tokio::task::spawn_blocking(move || {
            cursor_worker(conn, path, worker_sql, ready_tx, row_tx)
        });

        match ready_rx.await {
            Ok(Ok(columns)) => {
                debug!(sql = %sql, columns = ?columns, "source query started");
                Ok(SourceRows {
                    columns,
                    rx: row_rx,
                    worker: Some(worker),
                    delivered: 0,
                })
            }
            Ok(Err(e)) => {
                join_worker(worker).await?;
                Err(e)
            }
            Err(_) => {
                join_worker(worker).await?;
                Err(Error::internal(
                    "source worker exited before reporting columns",
                ))
            }
        }
    }

    /// Close without querying
    pub fn close(self) -> Result<()> {
        let path = self.path.display().to_string();
        self.conn
            .close()
            .map_err(|(_, e)| Error::connection(path, e.to_string()))
    }
}

/// Lazy, forward-only sequence of source rows
pub struct SourceRows {
    columns: Vec<String>,
    rx: mpsc::Receiver<Result<SourceRow>>,
    worker: Option<JoinHandle<()>>,
    delivered: u64,
}

impl std::fmt::Debug for SourceRows {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRows")
            .field("columns", &self.columns)
            .field("delivered", &self.delivered)
            .finish()
    }
}

impl SourceRows {
    /// Result-set column names
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows handed out so far
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Get the next row; `None` once the cursor is exhausted
    pub async fn next(&mut self) -> Result<Option<SourceRow>> {
        match self.rx.recv().await {
            Some(Ok(row)) => {
                self.delivered += 1;
                Ok(Some(row))
            }
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    /// Stop the cursor and wait until the source connection is closed
    pub async fn close(mut self) -> Result<()> {
        self.rx.close();
        while self.rx.try_recv().is_ok() {}

        match self.worker.take() {
            Some(worker) => join_worker(worker).await,
            None => Ok(()),
        }
    }
}

async fn join_worker(worker: JoinHandle<()>) -> Result<()> {
    worker
        .await
        .map_err(|e| Error::internal(format!("source worker failed: {}", e)))
}

fn cursor_worker(
    conn: Connection,
    path: PathBuf,
    sql: String,
    ready: oneshot::Sender<Result<Vec<String>>>,
    rows: mpsc::Sender<Result<SourceRow>>,
) {
    stream_rows(&conn, &sql, ready, &rows);

    match conn.close() {
        Ok(()) => debug!(path = %path.display(), "source database closed"),
        Err((_, e)) => warn!(path = %path.display(), error = %e, "failed to close source database"),
    }
}

fn stream_rows(
    conn: &Connection,
    sql: &str,
    ready: oneshot::Sender<Result<Vec<String>>>,
    tx: &mpsc::Sender<Result<SourceRow>>,
) {
    let mut stmt = match conn.prepare(sql) {
        Ok(stmt) => stmt,
        Err(e) => {
            let _ = ready.send(Err(Error::query_with_sql(e.to_string(), sql)));
            return;
        }
    };

    let columns: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(String::from)
        .collect();

    let mut cursor = match stmt.query([]) {
        Ok(cursor) => cursor,
        Err(e) => {
            let _ = ready.send(Err(Error::query_with_sql(e.to_string(), sql)));
            return;
        }
    };

    if ready.send(Ok(columns.clone())).is_err() {
        return;
    }

    loop {
        let item = match cursor.next() {
            Ok(Some(row)) => decode_row(row, &columns),
            Ok(None) => return,
            Err(e) => Err(Error::query_with_sql(e.to_string(), sql)),
        };

        let failed = item.is_err();
        // A closed channel means the reader is gone.
        if tx.blocking_send(item).is_err() || failed {
            return;
        }
    }
}

fn decode_row(row: &rusqlite::Row<'_>, columns: &[String]) -> Result<SourceRow> {
    let mut values = Vec::with_capacity(columns.len());
    for (idx, column) in columns.iter().enumerate() {
        let value = row.get_ref(idx).map_err(|e| Error::query(e.to_string()))?;
        values.push(render_value(value, column)?);
    }
    Ok(SourceRow::new(columns.to_vec(), values))
}

/// Render a SQLite cell as text, as `sqlite3_column_text` would
fn render_value(value: ValueRef<'_>, column: &str) -> Result<SourceValue> {
    match value {
        ValueRef::Null => Ok(SourceValue::Null),
        ValueRef::Integer(n) => Ok(SourceValue::Text(n.to_string())),
        ValueRef::Real(f) => Ok(SourceValue::Text(render_real(f))),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => std::str::from_utf8(bytes)
            .map(|s| SourceValue::Text(s.to_owned()))
            .map_err(|_| {
                Error::query(format!(
                    "column {} holds bytes that are not valid UTF-8",
                    column
                ))
            }),
    }
}

/// Render a REAL as SQLite's `%!.15g` conversion does: 15 significant
/// digits, a decimal point always present, exponent form outside 1e-4..1e15.
fn render_real(value: f64) -> String {
    if value == 0.0 {
        return "0.0".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Inf" } else { "-Inf" }.to_string();
    }

    let scientific = format!("{:.14e}", value);
    let (mantissa, exponent) = match scientific.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (scientific.as_str(), 0),
    };

    if !(-4..15).contains(&exponent) {
        format!(
            "{}e{}{:02}",
            trim_fraction(mantissa),
            if exponent < 0 { '-' } else { '+' },
            exponent.abs()
        )
    } else {
        let digits = (14 - exponent) as usize;
        trim_fraction(&format!("{:.*}", digits, value))
    }
}

/// Drop trailing fraction zeros, keeping at least one digit after the point
fn trim_fraction(text: &str) -> String {
    if !text.contains('.') {
        return format!("{}.0", text);
    }
    let trimmed = text.trim_end_matches('0');
    if trimmed.ends_with('.') {
        format!("{}0", trimmed)
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use tempfile::TempDir;

    fn fixture(rows: usize) -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("source.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE my_table (id INTEGER PRIMARY KEY, name TEXT, score REAL, note TEXT);",
        )
        .unwrap();
        for i in 0..rows {
            conn.execute(
                "INSERT INTO my_table (id, name, score, note) VALUES (?1, ?2, ?3, NULL)",
                rusqlite::params![i as i64 + 1, format!("row-{}", i), 2.5],
            )
            .unwrap();
        }
        (dir, path)
    }

    #[test]
    fn test_select_all_sql() {
        assert_eq!(select_all_sql("my_table"), "SELECT * FROM \"my_table\"");
    }

    #[tokio::test]
    async fn test_rows_are_self_describing_and_ordered() {
        let (_dir, path) = fixture(3);
        let handle = SourceHandle::open(&path).unwrap();
        let mut rows = handle.query(select_all_sql("my_table")).await.unwrap();

        assert_eq!(rows.columns(), &["id", "name", "score", "note"]);

        let mut seen = Vec::new();
        while let Some(row) = rows.next().await.unwrap() {
            assert_eq!(row.get_by_name("score"), Some(&SourceValue::from("2.5")));
            assert_eq!(row.get_by_name("note"), Some(&SourceValue::Null));
            seen.push(row.get_by_name("id").unwrap().to_string());
        }

        assert_eq!(seen, vec!["1", "2", "3"]);
        assert_eq!(rows.delivered(), 3);
        rows.close().await.unwrap();
    }

    #[test]
    fn test_open_missing_file_is_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SourceHandle::open(dir.path().join("absent.db")).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Connection);
    }

    #[tokio::test]
    async fn test_bad_query_is_query_error() {
        let (_dir, path) = fixture(1);
        let handle = SourceHandle::open(&path).unwrap();
        let err = handle.query("SELECT * FROM nope").await.unwrap_err();

        assert_eq!(err.category(), ErrorCategory::Query);
        assert!(err.to_string().contains("no such table"));
    }

    #[tokio::test]
    async fn test_close_before_exhaustion_stops_worker() {
        let (_dir, path) = fixture(ROW_CHANNEL_CAPACITY * 3);
        let handle = SourceHandle::open(&path).unwrap();
        let mut rows = handle.query(select_all_sql("my_table")).await.unwrap();

        assert!(rows.next().await.unwrap().is_some());
        rows.close().await.unwrap();
    }

    #[test]
    fn test_render_value() {
        assert_eq!(
            render_value(ValueRef::Integer(-42), "c").unwrap(),
            SourceValue::from("-42")
        );
        assert_eq!(render_value(ValueRef::Null, "c").unwrap(), SourceValue::Null);
        assert_eq!(
            render_value(ValueRef::Blob(b"abc"), "c").unwrap(),
            SourceValue::from("abc")
        );
        assert!(render_value(ValueRef::Blob(&[0xff, 0xfe]), "c").is_err());
        assert_eq!(
            render_value(ValueRef::Real(2.0), "c").unwrap(),
            SourceValue::from("2.0")
        );
    }

    #[test]
    fn test_render_real_matches_sqlite_text() {
        let conn = Connection::open_in_memory().unwrap();
        let samples = [
            2.0,
            2.5,
            -42.125,
            0.1,
            3.14159,
            123456.789,
            1e14,
            1e15,
            1e20,
            1e-5,
            0.0001,
            -0.0,
            1.5e300,
            -7.25e-12,
        ];

        for value in samples {
            let expected: String = conn
                .query_row("SELECT CAST(?1 AS TEXT)", [value], |r| r.get(0))
                .unwrap();
            assert_eq!(render_real(value), expected, "rendering {:?}", value);
        }
    }

    #[tokio::test]
    async fn test_whole_real_is_not_an_int() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reals.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch("CREATE TABLE t (amount REAL); INSERT INTO t VALUES (2.0);")
            .unwrap();
        drop(conn);

        let mut rows = SourceHandle::open(&path)
            .unwrap()
            .query(select_all_sql("t"))
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        let amount = row.get_by_name("amount").unwrap();

        assert_eq!(amount, &SourceValue::from("2.0"));
        assert!(crate::mapping::coerce_int("column2", amount).is_err());
        rows.close().await.unwrap();
    }
}
