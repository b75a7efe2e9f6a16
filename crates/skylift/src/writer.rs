//! Row writes against the target table
//!
//! Provides:
//! - InsertShape: the fixed positional insert statement
//! - WriteExecutor: bind, issue and await a single row insert
//! - Write statistics

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::cluster::{await_with_deadline, BoundStatement, ClusterSession};
use crate::error::{Error, Result};
use crate::schema::TableSpec;
use crate::types::TargetRow;

/// `INSERT INTO <ks>.<table> (<columns>) VALUES (?, ...)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertShape {
    table: String,
    columns: Vec<String>,
    cql: String,
}

impl InsertShape {
    /// Shape for a table spec, one slot per declared column
    pub fn for_table(spec: &TableSpec) -> Self {
        let columns: Vec<String> = spec.columns.iter().map(|c| c.name.clone()).collect();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let table = spec.qualified_name();
        let cql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders
        );
        Self {
            table,
            columns,
            cql,
        }
    }

    /// Statement text
    pub fn cql(&self) -> &str {
        &self.cql
    }

    /// Target table
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Number of bind slots
    pub fn arity(&self) -> usize {
        self.columns.len()
    }

    /// Bind a row's values positionally, in declared column order
    pub fn bind(&self, row: &TargetRow) -> Result<BoundStatement> {
        if row.len() != self.arity() {
            return Err(Error::internal(format!(
                "row has {} values but {} declares {} columns",
                row.len(),
                self.table,
                self.arity()
            )));
        }
        Ok(BoundStatement {
            cql: self.cql.clone(),
            values: row.values().to_vec(),
        })
    }
}

/// Write statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteStats {
    /// Rows written
    pub rows_written: u64,
    /// Rows that failed
    pub rows_failed: u64,
    /// Total time spent awaiting writes (milliseconds)
    pub total_write_time_ms: u64,
    /// Rows per second of write time
    pub rows_per_second: f64,
}

/// Atomic write statistics
#[derive(Debug, Default)]
#[allow(missing_docs)]
pub struct AtomicWriteStats {
    pub rows_written: AtomicU64,
    pub rows_failed: AtomicU64,
    pub total_write_time_ms: AtomicU64,
}

impl AtomicWriteStats {
    /// Record a successful write
    pub fn record_write(&self, duration: Duration) {
        self.rows_written.fetch_add(1, Ordering::Relaxed);
        self.total_write_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    /// Record a failed write
    pub fn record_failure(&self) {
        self.rows_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot
    pub fn snapshot(&self) -> WriteStats {
        let rows = self.rows_written.load(Ordering::Relaxed);
        let time_ms = self.total_write_time_ms.load(Ordering::Relaxed);
        let rps = if time_ms > 0 {
            (rows as f64 * 1000.0) / time_ms as f64
        } else {
            0.0
        };

        WriteStats {
            rows_written: rows,
            rows_failed: self.rows_failed.load(Ordering::Relaxed),
            total_write_time_ms: time_ms,
            rows_per_second: rps,
        }
    }
}

/// Executes row inserts
#[derive(Debug)]
pub struct WriteExecutor {
    shape: InsertShape,
    request_timeout: Option<Duration>,
    stats: Arc<AtomicWriteStats>,
}

impl WriteExecutor {
    /// Executor for the given insert shape
    pub fn new(shape: InsertShape) -> Self {
        Self {
            shape,
            request_timeout: None,
            stats: Arc::new(AtomicWriteStats::default()),
        }
    }

    /// Record into shared statistics
    pub fn with_stats(mut self, stats: Arc<AtomicWriteStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Bound each insert by a deadline
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Insert shape in use
    pub fn shape(&self) -> &InsertShape {
        &self.shape
    }

    /// Insert one row and wait for the store to acknowledge it
    pub async fn insert(&self, session: &dyn ClusterSession, row: &TargetRow) -> Result<()> {
        let statement = self.shape.bind(row)?;
        let start = Instant::now();

        let outcome = await_with_deadline("insert", self.request_timeout, session.execute(&statement))
            .await
            .and_then(|r| r.map_err(Error::write));

        match outcome {
            Ok(()) => {
                self.stats.record_write(start.elapsed());
                debug!(table = self.shape.table(), "row written");
                Ok(())
            }
            Err(e) => {
                self.stats.record_failure();
                debug!(table = self.shape.table(), error = %e, "row write failed");
                Err(e)
            }
        }
    }

    /// Get write statistics
    pub fn stats(&self) -> WriteStats {
        self.stats.snapshot()
    }
}
