//! Migration orchestration
//!
//! A run walks a fixed sequence of states:
//!
//! ```text
//! Init → SourceOpened → TargetConnected → SchemaReady → Migrating → Done
//!   └──────────┴──────────────┴────────────────┴────────────┴──→ Failed
//! ```
//!
//! Tables are copied one after another, each in source order. The first
//! failure stops the run; both terminal states release the source and the
//! session exactly once.

use futures::stream::{FuturesOrdered, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::cluster::{self, ClusterConnector, ClusterSession};
use crate::config::MigrationConfig;
use crate::error::{Error, ErrorCategory, Result};
use crate::mapping::{RowMapper, TypeMapper};
use crate::schema::{SchemaSynchronizer, TableSpec};
use crate::source::{select_all_sql, SourceHandle, SourceRows};
use crate::types::TargetRow;
use crate::writer::{AtomicWriteStats, InsertShape, WriteExecutor, WriteStats};

/// Pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Nothing acquired yet
    Init,
    /// Source database open
    SourceOpened,
    /// Session established
    TargetConnected,
    /// Keyspace and table exist
    SchemaReady,
    /// Copying rows
    Migrating,
    /// Every row written
    Done,
    /// Run aborted
    Failed {
        /// What failed
        category: ErrorCategory,
        /// Source row that failed, for row-level failures
        row: Option<u64>,
    },
}

impl PipelineState {
    /// Whether the run has ended
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed { .. })
    }
}

/// Per-table outcome of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableReport {
    /// Source table
    pub source: String,
    /// Target table, `keyspace.table`
    pub target: String,
    /// Rows read from the source
    pub rows_read: u64,
    /// Rows acknowledged by the target
    pub rows_written: u64,
}

/// Summary of a successful run
#[derive(Debug, Clone)]
pub struct MigrationReport {
    /// Rows read from the source, all tables
    pub rows_read: u64,
    /// Rows acknowledged by the target, all tables
    pub rows_written: u64,
    /// Tables in migration order
    pub tables: Vec<TableReport>,
    /// Wall time of the run
    pub elapsed: Duration,
    /// Writer statistics
    pub write_stats: WriteStats,
}

/// A resource given back during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleasedResource {
    /// Source database closed without being queried
    SourceDatabase,
    /// Source cursor stopped and its connection closed
    SourceCursor,
    /// Cluster session closed
    ClusterSession,
}

/// Resources acquired during a run, each released at most once
#[derive(Default)]
struct Resources {
    source: Option<SourceHandle>,
    rows: Option<SourceRows>,
    session: Option<Box<dyn ClusterSession>>,
    released: Vec<ReleasedResource>,
}

impl Resources {
    async fn close_rows(&mut self) {
        if let Some(rows) = self.rows.take() {
            if let Err(e) = rows.close().await {
                warn!(error = %e, "failed to stop source cursor");
            }
            self.released.push(ReleasedResource::SourceCursor);
        }
    }

    async fn teardown(&mut self) {
        self.close_rows().await;
        if let Some(source) = self.source.take() {
            if let Err(e) = source.close() {
                warn!(error = %e, "failed to close source database");
            }
            self.released.push(ReleasedResource::SourceDatabase);
        }
        if let Some(session) = self.session.take() {
            if let Err(e) = session.close().await {
                warn!(error = %e, "failed to close cluster session");
            }
            self.released.push(ReleasedResource::ClusterSession);
        }
        debug!("teardown complete");
    }
}

/// One table to copy
struct TableJob {
    source_table: String,
    spec: TableSpec,
    mapper: Arc<dyn RowMapper>,
    writer: WriteExecutor,
}

/// One-shot migration of source tables into the target cluster
pub struct Migration {
    config: MigrationConfig,
    connector: Box<dyn ClusterConnector>,
    jobs: Vec<TableJob>,
    stats: Arc<AtomicWriteStats>,
    state: PipelineState,
    history: Vec<PipelineState>,
    released: Vec<ReleasedResource>,
}

impl Migration {
    /// Create a migration using the configured column mapping
    pub fn new(config: MigrationConfig, connector: Box<dyn ClusterConnector>) -> Self {
        let stats = Arc::new(AtomicWriteStats::default());
        let jobs = config
            .table_plans()
            .into_iter()
            .map(|plan| TableJob {
                mapper: Arc::new(TypeMapper::for_columns(&plan.columns)),
                writer: WriteExecutor::new(InsertShape::for_table(&plan.spec))
                    .with_stats(stats.clone())
                    .with_request_timeout(config.cluster.request_timeout()),
                source_table: plan.source_table,
                spec: plan.spec,
            })
            .collect();

        Self {
            config,
            connector,
            jobs,
            stats,
            state: PipelineState::Init,
            history: vec![PipelineState::Init],
            released: Vec::new(),
        }
    }

    /// Replace the row mapper of every table
    pub fn with_mapper(mut self, mapper: Box<dyn RowMapper>) -> Self {
        let mapper: Arc<dyn RowMapper> = Arc::from(mapper);
        for job in &mut self.jobs {
            job.mapper = mapper.clone();
        }
        self
    }

    /// Current state
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Every state entered so far, in order
    pub fn history(&self) -> &[PipelineState] {
        &self.history
    }

    /// Resources released so far, in release order
    pub fn released(&self) -> &[ReleasedResource] {
        &self.released
    }

    /// Writer statistics, all tables
    pub fn write_stats(&self) -> WriteStats {
        self.stats.snapshot()
    }

    fn transition(&mut self, next: PipelineState) {
        info!(from = ?self.state, to = ?next, "pipeline state change");
        self.state = next;
        self.history.push(next);
    }

    /// Run the migration to completion or first failure
    pub async fn run(&mut self) -> Result<MigrationReport> {
        if self.state != PipelineState::Init {
            return Err(Error::internal("a migration can only be run once"));
        }

        let start = Instant::now();
        let mut resources = Resources::default();
        let outcome = self.drive(&mut resources).await;
        resources.teardown().await;
        self.released = std::mem::take(&mut resources.released);

        match outcome {
            Ok(tables) => {
                self.transition(PipelineState::Done);
                let report = MigrationReport {
                    rows_read: tables.iter().map(|t| t.rows_read).sum(),
                    rows_written: tables.iter().map(|t| t.rows_written).sum(),
                    tables,
                    elapsed: start.elapsed(),
                    write_stats: self.stats.snapshot(),
                };
                info!(
                    tables = report.tables.len(),
                    rows = report.rows_written,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "migration complete"
                );
                Ok(report)
            }
            Err(e) => {
                error!(stage = %e.category(), error = %e, "migration failed");
                self.transition(PipelineState::Failed {
                    category: e.category(),
                    row: e.row_index(),
                });
                Err(e)
            }
        }
    }

    async fn drive(&mut self, resources: &mut Resources) -> Result<Vec<TableReport>> {
        resources.source = Some(SourceHandle::open(&self.config.source.path)?);
        self.transition(PipelineState::SourceOpened);

        resources.session = Some(cluster::connect(self.connector.as_ref(), &self.config.cluster).await?);
        self.transition(PipelineState::TargetConnected);

        if let Some(session) = resources.session.as_deref() {
            let sync = SchemaSynchronizer::new(session)
                .with_request_timeout(self.config.cluster.request_timeout());
            sync.ensure_keyspace(&self.config.target.keyspace, &self.config.target.replication)
                .await?;
            for job in &self.jobs {
                sync.ensure_table(&job.spec.qualified_name(), &job.spec.columns)
                    .await?;
            }
        }
        self.transition(PipelineState::SchemaReady);

        self.transition(PipelineState::Migrating);
        let mut reports = Vec::with_capacity(self.jobs.len());
        for job in &self.jobs {
            let source = match resources.source.take() {
                Some(source) => source,
                None => SourceHandle::open(&self.config.source.path)?,
            };
            info!(source = %job.source_table, target = %job.spec.qualified_name(), "copying table");
            resources.rows = Some(source.query(select_all_sql(&job.source_table)).await?);

            let (Some(rows), Some(session)) =
                (resources.rows.as_mut(), resources.session.as_deref())
            else {
                return Err(Error::internal("pipeline resources missing"));
            };

            let written = migrate_rows(
                rows,
                session,
                job.mapper.as_ref(),
                &job.writer,
                self.config.target.max_in_flight,
            )
            .await?;
            let report = TableReport {
                source: job.source_table.clone(),
                target: job.spec.qualified_name(),
                rows_read: rows.delivered(),
                rows_written: written,
            };
            resources.close_rows().await;

            info!(target = %report.target, rows = report.rows_written, "table copied");
            reports.push(report);
        }
        Ok(reports)
    }
}

/// Copy every row, keeping at most `window` inserts in flight.
///
/// Inserts are issued in source order and their completions observed in the
/// same order. On the first failure no further rows are issued; writes
/// already in flight are drained and the lowest-index failure is returned.
async fn migrate_rows(
    rows: &mut SourceRows,
    session: &dyn ClusterSession,
    mapper: &dyn RowMapper,
    writer: &WriteExecutor,
    window: usize,
) -> Result<u64> {
    let window = window.max(1);
    let mut in_flight = FuturesOrdered::new();
    let mut next_index: u64 = 0;
    let mut written: u64 = 0;
    let mut exhausted = false;
    let mut failure: Option<Error> = None;

    while failure.is_none() && !(exhausted && in_flight.is_empty()) {
        while !exhausted && in_flight.len() < window {
            match rows.next().await {
                Ok(Some(row)) => {
                    let index = next_index;
                    next_index += 1;
                    debug!(index, "translating row");
                    match mapper.translate(&row) {
                        Ok(target) => in_flight.push_back(write_row(session, writer, index, target)),
                        Err(e) => {
                            failure = Some(Error::row(index, e));
                            break;
                        }
                    }
                }
                Ok(None) => exhausted = true,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if failure.is_some() {
            break;
        }

        if let Some(result) = in_flight.next().await {
            match result {
                Ok(()) => written += 1,
                Err(e) => failure = Some(e),
            }
        }
    }

    while let Some(result) = in_flight.next().await {
        match result {
            Ok(()) => written += 1,
            Err(e) => {
                let earlier = match (&failure, e.row_index()) {
                    (Some(current), Some(index)) => current.row_index().is_some_and(|c| index < c),
                    (None, _) => true,
                    _ => false,
                };
                if earlier {
                    failure = Some(e);
                }
            }
        }
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(written),
    }
}

async fn write_row(
    session: &dyn ClusterSession,
    writer: &WriteExecutor,
    index: u64,
    row: TargetRow,
) -> Result<()> {
    writer
        .insert(session, &row)
        .await
        .map_err(|e| Error::row(index, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(PipelineState::Done.is_terminal());
        assert!(PipelineState::Failed {
            category: ErrorCategory::Write,
            row: Some(2)
        }
        .is_terminal());
        assert!(!PipelineState::Migrating.is_terminal());
        assert!(!PipelineState::Init.is_terminal());
    }
}
