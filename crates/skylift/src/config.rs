//! Configuration types for skylift
//!
//! A migration is described by five sections:
//!   source  → the SQLite file and table to read
//!   cluster → contact points and deadlines for the target
//!   target  → keyspace, table and replication to bootstrap
//!   mapping → where each non-key column takes its value from
//!   tables  → optional list of explicitly mapped tables, migrated in order
//!
//! Every field has a default, so an empty file is a valid configuration.
//! With no `tables` entries the single `source.table` is copied into the
//! standard `id, column1, column2` layout.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use validator::Validate;

use crate::cluster::ClusterConfig;
use crate::error::{Error, Result};
use crate::mapping::{ColumnMapping, ColumnSource, MappingConfig};
use crate::schema::{CqlType, ReplicationSpec, TableSpec};
use crate::security::{validate_cql_identifier, validate_sqlite_identifier};

/// Pattern: ${VAR} or ${VAR:-default}
static ENV_VAR_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var regex pattern is invalid - this is a bug")
});

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, Validate)]
pub struct MigrationConfig {
    /// Source database
    #[serde(default)]
    #[validate(nested)]
    pub source: SourceConfig,

    /// Target cluster connection
    #[serde(default)]
    #[validate(nested)]
    pub cluster: ClusterConfig,

    /// Target schema
    #[serde(default)]
    #[validate(nested)]
    pub target: TargetConfig,

    /// Column mapping
    #[serde(default)]
    pub mapping: MappingConfig,

    /// Explicitly mapped tables; replaces `source.table` / `target.table`
    #[serde(default)]
    #[validate(nested)]
    pub tables: Vec<TableMigration>,
}

/// One explicitly mapped table
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Validate)]
pub struct TableMigration {
    /// Source table
    #[validate(length(min = 1))]
    pub source: String,

    /// Target table; the source name when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Target columns in declared order
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    #[validate(length(min = 1))]
    pub columns: Vec<ColumnMapping>,
}

impl TableMigration {
    /// Target table name
    pub fn target_name(&self) -> &str {
        self.target.as_deref().unwrap_or(&self.source)
    }
}

/// A resolved table migration: what to read and how to write it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePlan {
    /// Source table
    pub source_table: String,
    /// Declared target table
    pub spec: TableSpec,
    /// Column plan, in `spec` column order
    pub columns: Vec<ColumnMapping>,
}

/// Source database configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Validate)]
pub struct SourceConfig {
    /// Path to the SQLite file
    #[serde(default = "default_source_path")]
    pub path: PathBuf,

    /// Table to migrate
    #[serde(default = "default_table")]
    #[validate(length(min = 1))]
    pub table: String,
}

fn default_source_path() -> PathBuf {
    PathBuf::from("test.db")
}

fn default_table() -> String {
    "my_table".to_string()
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: default_source_path(),
            table: default_table(),
        }
    }
}

/// Target schema configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Validate)]
pub struct TargetConfig {
    /// Keyspace to create and write into
    #[serde(default = "default_keyspace")]
    #[validate(length(min = 1))]
    pub keyspace: String,

    /// Table to create and write into
    #[serde(default = "default_table")]
    #[validate(length(min = 1))]
    pub table: String,

    /// Keyspace replication
    #[serde(default)]
    pub replication: ReplicationSpec,

    /// Inserts issued before the oldest one is awaited (1 = strictly sequential)
    #[serde(default = "default_max_in_flight")]
    #[validate(range(min = 1, max = 1024))]
    pub max_in_flight: usize,
}

fn default_keyspace() -> String {
    "my_keyspace".to_string()
}

fn default_max_in_flight() -> usize {
    1
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            keyspace: default_keyspace(),
            table: default_table(),
            replication: ReplicationSpec::default(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

impl TargetConfig {
    /// Declared target table
    pub fn table_spec(&self) -> TableSpec {
        TableSpec::standard(&self.keyspace, &self.table)
    }
}

impl MigrationConfig {
    /// Tables to migrate, in order
    pub fn table_plans(&self) -> Vec<TablePlan> {
        if self.tables.is_empty() {
            return vec![TablePlan {
                source_table: self.source.table.clone(),
                spec: self.target.table_spec(),
                columns: self.mapping.columns(),
            }];
        }

        self.tables
            .iter()
            .map(|t| TablePlan {
                source_table: t.source.clone(),
                spec: TableSpec {
                    keyspace: self.target.keyspace.clone(),
                    name: t.target_name().to_string(),
                    columns: t.columns.iter().map(ColumnMapping::spec).collect(),
                },
                columns: t.columns.clone(),
            })
            .collect()
    }

    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let expanded = Self::expand_env_vars(content);

        // An empty document deserializes as null rather than an empty map.
        let config: Self = if expanded.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(&expanded)
                .map_err(|e| Error::config(format!("failed to parse config: {}", e)))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Expand environment variables in the format ${VAR} or ${VAR:-default}
    fn expand_env_vars(content: &str) -> String {
        ENV_VAR_REGEX
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                let default = caps.get(2).map(|m| m.as_str());

                std::env::var(var_name).unwrap_or_else(|_| default.unwrap_or("").to_string())
            })
            .to_string()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(|e| Error::config(e.to_string()))?;

        validate_cql_identifier(&self.target.keyspace)?;
        self.target.replication.validate()?;

        let mut targets = HashSet::new();
        for plan in self.table_plans() {
            validate_sqlite_identifier(&plan.source_table)?;
            validate_cql_identifier(&plan.spec.name)?;
            if !targets.insert(plan.spec.name.clone()) {
                return Err(Error::config(format!(
                    "table {} is migrated more than once",
                    plan.spec.qualified_name()
                )));
            }
            Self::validate_columns(&plan)?;
        }

        if let Some(empty) = self.cluster.contact_points.iter().find(|p| p.trim().is_empty()) {
            return Err(Error::config(format!("invalid contact point '{}'", empty)));
        }

        Ok(())
    }

    fn validate_columns(plan: &TablePlan) -> Result<()> {
        let table = plan.spec.qualified_name();
        let mut names = HashSet::new();

        for column in &plan.columns {
            validate_cql_identifier(&column.name)?;
            if !names.insert(column.name.to_ascii_lowercase()) {
                return Err(Error::config(format!(
                    "column {} is declared twice in {}",
                    column.name, table
                )));
            }
            if column.value_source() == ColumnSource::Generated && column.cql_type != CqlType::Uuid {
                return Err(Error::config(format!(
                    "column {} in {} is generated but declared {}",
                    column.name, table, column.cql_type
                )));
            }
        }

        if !plan.columns.iter().any(|c| c.primary_key) {
            return Err(Error::config(format!(
                "table {} declares no primary key column",
                table
            )));
        }
        Ok(())
    }
}
