//! # skylift
//!
//! One-shot bulk migration of a SQLite table into a ScyllaDB / Cassandra
//! cluster.
//!
//! A run opens the source database read-only, connects to the cluster,
//! makes sure the target keyspace and table exist, then copies every source
//! row into the target table. Each row gets a fresh time-based UUID as its
//! key; the non-key columns come from the configured [`mapping`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use skylift::prelude::*;
//! use skylift::scylladb::ScyllaConnector;
//!
//! let config = MigrationConfig::from_file("skylift.yaml")?;
//! let mut migration = Migration::new(config, Box::new(ScyllaConnector::new()));
//! let report = migration.run().await?;
//! println!("{} rows migrated", report.rows_written);
//! ```
//!
//! ## Feature Flags
//!
//! - `scylla` (default) - ScyllaDB / Cassandra backend via the `scylla` driver

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod cluster;
pub mod config;
pub mod error;
pub mod mapping;
pub mod pipeline;
pub mod schema;
pub mod security;
pub mod source;
pub mod testing;
pub mod types;
pub mod writer;

#[cfg(feature = "scylla")]
pub mod scylladb;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, ErrorCategory, Result, StoreError, StoreResult};

    pub use crate::types::{SourceRow, SourceValue, TargetRow, TargetValue};

    pub use crate::cluster::{BoundStatement, ClusterConfig, ClusterConnector, ClusterSession};

    pub use crate::config::{MigrationConfig, SourceConfig, TableMigration, TablePlan, TargetConfig};

    pub use crate::mapping::{
        ColumnMapping, ColumnSource, IdGenerator, MappingConfig, RowMapper, TypeMapper,
    };

    pub use crate::schema::{ColumnSpec, CqlType, ReplicationSpec, SchemaSynchronizer, TableSpec};

    pub use crate::source::{SourceHandle, SourceRows};

    pub use crate::writer::{InsertShape, WriteExecutor, WriteStats};

    pub use crate::pipeline::{
        Migration, MigrationReport, PipelineState, ReleasedResource, TableReport,
    };
}

pub use error::{Error, Result};

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_prelude_imports() {
        let config = MigrationConfig::default();
        let spec = config.target.table_spec();
        assert_eq!(spec.qualified_name(), "my_keyspace.my_table");

        let shape = InsertShape::for_table(&spec);
        assert_eq!(shape.arity(), 3);

        let _mapper = TypeMapper::new(MappingConfig::default());
        let _value = SourceValue::from("x");
    }

    #[test]
    fn test_error_category_display() {
        let err = Error::config("bad");
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert_eq!(ErrorCategory::Connect.to_string(), "cluster_connect");
    }
}
