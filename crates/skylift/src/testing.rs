//! Testing utilities for migrations
//!
//! [`MockCluster`] is an in-memory stand-in for the target store. It keeps
//! keyspaces, tables and inserted rows, honours `IF NOT EXISTS`, and can be
//! told to fail at connect, at a schema statement, or at the n-th insert.
//!
//! # Example
//!
//! ```rust,ignore
//! use skylift::testing::MockCluster;
//!
//! let cluster = MockCluster::new();
//! let migration = Migration::new(config, Box::new(cluster.connector()));
//! migration.run().await?;
//!
//! assert_eq!(cluster.rows("my_keyspace.my_table").len(), 3);
//! assert_eq!(cluster.sessions_closed(), 1);
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::cluster::{BoundStatement, ClusterConfig, ClusterConnector, ClusterSession};
use crate::error::{StoreError, StoreResult};
use crate::types::TargetValue;

/// A statement as the mock received it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedStatement {
    /// Schema statement text
    Ddl(String),
    /// Bound insert
    Insert(BoundStatement),
}

#[derive(Debug, Default)]
struct ClusterState {
    keyspaces: BTreeSet<String>,
    tables: BTreeSet<String>,
    rows: HashMap<String, Vec<Vec<TargetValue>>>,
    statements: Vec<RecordedStatement>,
    connects: u64,
    sessions_closed: u64,
    inserts_attempted: u64,
    fail_connect: Option<String>,
    fail_ddl: Option<(String, String)>,
    fail_insert_at: Option<(u64, String)>,
}

/// In-memory target cluster
#[derive(Debug, Clone, Default)]
pub struct MockCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl MockCluster {
    /// Create an empty cluster
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse connections with the given message
    pub fn fail_connect(self, message: impl Into<String>) -> Self {
        self.state.lock().fail_connect = Some(message.into());
        self
    }

    /// Fail any schema statement containing `needle`
    pub fn fail_ddl_containing(self, needle: impl Into<String>, message: impl Into<String>) -> Self {
        self.state.lock().fail_ddl = Some((needle.into(), message.into()));
        self
    }

    /// Fail the insert with the given zero-based attempt number
    pub fn fail_insert_at(self, attempt: u64, message: impl Into<String>) -> Self {
        self.state.lock().fail_insert_at = Some((attempt, message.into()));
        self
    }

    /// Connector handing out sessions on this cluster
    pub fn connector(&self) -> MockConnector {
        MockConnector {
            state: self.state.clone(),
        }
    }

    /// Rows stored in `keyspace.table`, in arrival order
    pub fn rows(&self, table: &str) -> Vec<Vec<TargetValue>> {
        self.state.lock().rows.get(table).cloned().unwrap_or_default()
    }

    /// Every statement received, in order
    pub fn statements(&self) -> Vec<RecordedStatement> {
        self.state.lock().statements.clone()
    }

    /// Existing keyspaces
    pub fn keyspaces(&self) -> Vec<String> {
        self.state.lock().keyspaces.iter().cloned().collect()
    }

    /// Existing tables (`keyspace.table`)
    pub fn tables(&self) -> Vec<String> {
        self.state.lock().tables.iter().cloned().collect()
    }

    /// Successful connects
    pub fn connects(&self) -> u64 {
        self.state.lock().connects
    }

    /// Session close calls
    pub fn sessions_closed(&self) -> u64 {
        self.state.lock().sessions_closed
    }
}

/// Connector for [`MockCluster`]
#[derive(Debug, Clone)]
pub struct MockConnector {
    state: Arc<Mutex<ClusterState>>,
}

#[async_trait]
impl ClusterConnector for MockConnector {
    async fn connect(&self, _config: &ClusterConfig) -> StoreResult<Box<dyn ClusterSession>> {
        let mut state = self.state.lock();
        if let Some(msg) = &state.fail_connect {
            return Err(StoreError::new(msg.clone()));
        }
        state.connects += 1;
        Ok(Box::new(MockSession {
            state: self.state.clone(),
        }))
    }

    fn backend(&self) -> &'static str {
        "mock"
    }
}

/// Session on a [`MockCluster`]
#[derive(Debug)]
pub struct MockSession {
    state: Arc<Mutex<ClusterState>>,
}

/// Name following `KEYWORD [IF NOT EXISTS]` in a DDL statement
fn ddl_target(cql: &str, keyword: &str) -> Option<(String, bool)> {
    let tokens: Vec<&str> = cql.split_whitespace().collect();
    let pos = tokens
        .iter()
        .position(|t| t.eq_ignore_ascii_case(keyword))?;
    let rest = &tokens[pos + 1..];

    let if_not_exists = rest.len() >= 3
        && rest[0].eq_ignore_ascii_case("IF")
        && rest[1].eq_ignore_ascii_case("NOT")
        && rest[2].eq_ignore_ascii_case("EXISTS");
    let name = if if_not_exists { rest.get(3) } else { rest.first() }?;

    Some((name.trim_end_matches('(').to_string(), if_not_exists))
}

/// Table named in `INSERT INTO <table> (...)`
fn insert_target(cql: &str) -> Option<String> {
    let tokens: Vec<&str> = cql.split_whitespace().collect();
    let pos = tokens.iter().position(|t| t.eq_ignore_ascii_case("INTO"))?;
    tokens.get(pos + 1).map(|t| t.to_string())
}

#[async_trait]
impl ClusterSession for MockSession {
    async fn execute_ddl(&self, cql: &str) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.statements.push(RecordedStatement::Ddl(cql.to_string()));

        if let Some((needle, msg)) = &state.fail_ddl {
            if cql.contains(needle.as_str()) {
                return Err(StoreError::new(msg.clone()));
            }
        }

        if let Some((name, if_not_exists)) = ddl_target(cql, "KEYSPACE") {
            if !state.keyspaces.insert(name.clone()) && !if_not_exists {
                return Err(StoreError::new(format!("Keyspace {} already exists", name)));
            }
            return Ok(());
        }

        if let Some((name, if_not_exists)) = ddl_target(cql, "TABLE") {
            let keyspace = name.split('.').next().unwrap_or_default().to_string();
            if !state.keyspaces.contains(&keyspace) {
                return Err(StoreError::new(format!(
                    "Cannot add table '{}' to non existing keyspace '{}'",
                    name, keyspace
                )));
            }
            if !state.tables.insert(name.clone()) && !if_not_exists {
                return Err(StoreError::new(format!("Table {} already exists", name)));
            }
            return Ok(());
        }

        Err(StoreError::new(format!("line 1:0 no viable alternative at input '{}'", cql)))
    }

    async fn execute(&self, statement: &BoundStatement) -> StoreResult<()> {
        let mut state = self.state.lock();
        state
            .statements
            .push(RecordedStatement::Insert(statement.clone()));

        let attempt = state.inserts_attempted;
        state.inserts_attempted += 1;
        if let Some((at, msg)) = &state.fail_insert_at {
            if *at == attempt {
                return Err(StoreError::new(msg.clone()));
            }
        }

        let table = insert_target(&statement.cql)
            .ok_or_else(|| StoreError::new("line 1:0 mismatched input"))?;
        if !state.tables.contains(&table) {
            return Err(StoreError::new(format!("unconfigured table {}", table)));
        }

        state
            .rows
            .entry(table)
            .or_default()
            .push(statement.values.clone());
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        self.state.lock().sessions_closed += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ddl_target() {
        assert_eq!(
            ddl_target("CREATE KEYSPACE IF NOT EXISTS ks WITH replication = {}", "KEYSPACE"),
            Some(("ks".to_string(), true))
        );
        assert_eq!(
            ddl_target("CREATE TABLE ks.t (id uuid PRIMARY KEY)", "TABLE"),
            Some(("ks.t".to_string(), false))
        );
        assert_eq!(ddl_target("SELECT 1", "TABLE"), None);
    }

    #[tokio::test]
    async fn test_create_without_if_not_exists_conflicts() {
        let cluster = MockCluster::new();
        let session = cluster
            .connector()
            .connect(&ClusterConfig::default())
            .await
            .unwrap();

        session.execute_ddl("CREATE KEYSPACE ks WITH replication = {}").await.unwrap();
        let err = session
            .execute_ddl("CREATE KEYSPACE ks WITH replication = {}")
            .await
            .unwrap_err();
        assert!(err.message().contains("already exists"));
    }

    #[tokio::test]
    async fn test_insert_into_missing_table() {
        let cluster = MockCluster::new();
        let session = cluster
            .connector()
            .connect(&ClusterConfig::default())
            .await
            .unwrap();

        let err = session
            .execute(&BoundStatement {
                cql: "INSERT INTO ks.t (id) VALUES (?)".into(),
                values: vec![TargetValue::Null],
            })
            .await
            .unwrap_err();
        assert_eq!(err.message(), "unconfigured table ks.t");
    }
}
