//! Schema synchronization for the target cluster
//!
//! Provides:
//! - ReplicationSpec: keyspace replication strategy
//! - ColumnSpec / TableSpec: declared target table layout
//! - SchemaSynchronizer: idempotent `CREATE ... IF NOT EXISTS` bootstrap

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

use crate::cluster::{await_with_deadline, ClusterSession};
use crate::error::{Error, Result};
use crate::security::escape_string_literal;

/// Keyspace replication strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "class")]
pub enum ReplicationSpec {
    /// Single-datacenter placement
    SimpleStrategy {
        /// Copies of each partition
        replication_factor: u32,
    },
    /// Per-datacenter replication factors
    NetworkTopologyStrategy {
        /// Datacenter name to replication factor
        datacenters: BTreeMap<String, u32>,
    },
}

impl Default for ReplicationSpec {
    fn default() -> Self {
        Self::simple(1)
    }
}

impl ReplicationSpec {
    /// SimpleStrategy with the given factor
    pub fn simple(replication_factor: u32) -> Self {
        Self::SimpleStrategy { replication_factor }
    }

    /// Render the replication map used in `WITH replication = {...}`
    pub fn to_cql(&self) -> String {
        match self {
            Self::SimpleStrategy { replication_factor } => format!(
                "{{ 'class': 'SimpleStrategy', 'replication_factor': {} }}",
                replication_factor
            ),
            Self::NetworkTopologyStrategy { datacenters } => {
                let mut parts = vec!["'class': 'NetworkTopologyStrategy'".to_string()];
                parts.extend(
                    datacenters
                        .iter()
                        .map(|(dc, rf)| format!("'{}': {}", escape_string_literal(dc), rf)),
                );
                format!("{{ {} }}", parts.join(", "))
            }
        }
    }

    /// Check that every factor is at least 1
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::SimpleStrategy { replication_factor } if *replication_factor == 0 => {
                Err(Error::config("replication_factor must be at least 1"))
            }
            Self::NetworkTopologyStrategy { datacenters } if datacenters.is_empty() => Err(
                Error::config("NetworkTopologyStrategy needs at least one datacenter"),
            ),
            Self::NetworkTopologyStrategy { datacenters } => {
                match datacenters.iter().find(|(_, rf)| **rf == 0) {
                    Some((dc, _)) => Err(Error::config(format!(
                        "replication factor for datacenter '{}' must be at least 1",
                        dc
                    ))),
                    None => Ok(()),
                }
            }
            Self::SimpleStrategy { .. } => Ok(()),
        }
    }
}

/// CQL column types used by the target table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CqlType {
    /// 128-bit identifier
    Uuid,
    /// UTF-8 text
    Text,
    /// 32-bit signed integer
    Int,
}

impl fmt::Display for CqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uuid => write!(f, "uuid"),
            Self::Text => write!(f, "text"),
            Self::Int => write!(f, "int"),
        }
    }
}

/// Declared target column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    /// Column name
    pub name: String,
    /// Column type
    pub cql_type: CqlType,
    /// Part of the primary key
    pub primary_key: bool,
}

impl ColumnSpec {
    /// Regular column
    pub fn new(name: impl Into<String>, cql_type: CqlType) -> Self {
        Self {
            name: name.into(),
            cql_type,
            primary_key: false,
        }
    }

    /// Primary key column
    pub fn primary_key(name: impl Into<String>, cql_type: CqlType) -> Self {
        Self {
            name: name.into(),
            cql_type,
            primary_key: true,
        }
    }
}

/// Target table: keyspace, name and columns in declared order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    /// Keyspace
    pub keyspace: String,
    /// Table name
    pub name: String,
    /// Columns in declared order
    pub columns: Vec<ColumnSpec>,
}

impl TableSpec {
    /// The fixed migration layout: `id uuid PRIMARY KEY, column1 text, column2 int`
    pub fn standard(keyspace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            keyspace: keyspace.into(),
            name: name.into(),
            columns: vec![
                ColumnSpec::primary_key("id", CqlType::Uuid),
                ColumnSpec::new("column1", CqlType::Text),
                ColumnSpec::new("column2", CqlType::Int),
            ],
        }
    }

    /// `keyspace.table`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.keyspace, self.name)
    }

    /// Column names in declared order
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// `CREATE KEYSPACE IF NOT EXISTS` statement
pub fn keyspace_ddl(name: &str, replication: &ReplicationSpec) -> String {
    format!(
        "CREATE KEYSPACE IF NOT EXISTS {} WITH replication = {}",
        name,
        replication.to_cql()
    )
}

/// `CREATE TABLE IF NOT EXISTS` statement
pub fn table_ddl(qualified_name: &str, columns: &[ColumnSpec]) -> Result<String> {
    let pk: Vec<&str> = columns
        .iter()
        .filter(|c| c.primary_key)
        .map(|c| c.name.as_str())
        .collect();

    if pk.is_empty() {
        return Err(Error::config(format!(
            "table {} declares no primary key column",
            qualified_name
        )));
    }

    let mut defs: Vec<String> = columns
        .iter()
        .map(|c| {
            if c.primary_key && pk.len() == 1 {
                format!("{} {} PRIMARY KEY", c.name, c.cql_type)
            } else {
                format!("{} {}", c.name, c.cql_type)
            }
        })
        .collect();

    if pk.len() > 1 {
        defs.push(format!("PRIMARY KEY ({})", pk.join(", ")));
    }

    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        qualified_name,
        defs.join(", ")
    ))
}

/// Issues schema statements against an established session
pub struct SchemaSynchronizer<'a> {
    session: &'a dyn ClusterSession,
    request_timeout: Option<Duration>,
}

impl<'a> SchemaSynchronizer<'a> {
    /// Create a synchronizer over a session
    pub fn new(session: &'a dyn ClusterSession) -> Self {
        Self {
            session,
            request_timeout: None,
        }
    }

    /// Bound each statement by a deadline
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Create the keyspace unless it exists
    pub async fn ensure_keyspace(&self, name: &str, replication: &ReplicationSpec) -> Result<()> {
        let ddl = keyspace_ddl(name, replication);
        self.execute(ddl).await?;
        info!(keyspace = name, "keyspace ready");
        Ok(())
    }

    /// Create the table unless it exists
    pub async fn ensure_table(&self, qualified_name: &str, columns: &[ColumnSpec]) -> Result<()> {
        let ddl = table_ddl(qualified_name, columns)?;
        self.execute(ddl).await?;
        info!(table = qualified_name, "table ready");
        Ok(())
    }

    /// Ensure keyspace then table for a full spec
    pub async fn sync(&self, table: &TableSpec, replication: &ReplicationSpec) -> Result<()> {
        self.ensure_keyspace(&table.keyspace, replication).await?;
        self.ensure_table(&table.qualified_name(), &table.columns)
            .await
    }

    async fn execute(&self, ddl: String) -> Result<()> {
        debug!(statement = %ddl, "executing schema statement");
        let outcome = await_with_deadline(
            "schema statement",
            self.request_timeout,
            self.session.execute_ddl(&ddl),
        )
        .await?;
        outcome.map_err(|e| Error::schema(ddl, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyspace_ddl_simple() {
        let ddl = keyspace_ddl("my_keyspace", &ReplicationSpec::default());
        assert_eq!(
            ddl,
            "CREATE KEYSPACE IF NOT EXISTS my_keyspace WITH replication = \
             { 'class': 'SimpleStrategy', 'replication_factor': 1 }"
        );
    }

    #[test]
    fn test_keyspace_ddl_network_topology() {
        let mut dcs = BTreeMap::new();
        dcs.insert("dc1".to_string(), 3);
        dcs.insert("dc2".to_string(), 2);
        let spec = ReplicationSpec::NetworkTopologyStrategy { datacenters: dcs };

        assert_eq!(
            spec.to_cql(),
            "{ 'class': 'NetworkTopologyStrategy', 'dc1': 3, 'dc2': 2 }"
        );
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_replication_validation() {
        assert!(ReplicationSpec::simple(0).validate().is_err());
        assert!(ReplicationSpec::NetworkTopologyStrategy {
            datacenters: BTreeMap::new()
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_standard_table_ddl() {
        let table = TableSpec::standard("my_keyspace", "my_table");
        let ddl = table_ddl(&table.qualified_name(), &table.columns).unwrap();

        assert_eq!(
            ddl,
            "CREATE TABLE IF NOT EXISTS my_keyspace.my_table \
             (id uuid PRIMARY KEY, column1 text, column2 int)"
        );
        assert_eq!(table.column_names(), vec!["id", "column1", "column2"]);
    }

    #[test]
    fn test_compound_primary_key() {
        let columns = vec![
            ColumnSpec::primary_key("a", CqlType::Int),
            ColumnSpec::primary_key("b", CqlType::Text),
        ];
        let ddl = table_ddl("ks.t", &columns).unwrap();
        assert!(ddl.ends_with("(a int, b text, PRIMARY KEY (a, b))"));
    }

    #[test]
    fn test_table_without_primary_key_rejected() {
        let columns = vec![ColumnSpec::new("a", CqlType::Int)];
        assert!(table_ddl("ks.t", &columns).is_err());
    }

    #[test]
    fn test_replication_yaml() {
        let spec: ReplicationSpec =
            serde_yaml::from_str("class: SimpleStrategy\nreplication_factor: 3\n").unwrap();
        assert_eq!(spec, ReplicationSpec::simple(3));
    }
}
