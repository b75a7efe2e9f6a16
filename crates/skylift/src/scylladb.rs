//! ScyllaDB / Cassandra backend for skylift
//!
//! Provides the `scylla` driver implementations:
//! - ScyllaConnector: builds a session from the contact points
//! - ScyllaSession: unprepared DDL, prepared-and-cached inserts

use async_trait::async_trait;
use scylla::frame::response::result::CqlValue;
use scylla::prepared_statement::PreparedStatement;
use scylla::{Session, SessionBuilder};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::cluster::{BoundStatement, ClusterConfig, ClusterConnector, ClusterSession};
use crate::error::{StoreError, StoreResult};
use crate::types::TargetValue;

/// Convert a bound value to the driver's dynamic CQL value
fn value_to_cql(value: &TargetValue) -> Option<CqlValue> {
    match value {
        TargetValue::Null => None,
        TargetValue::Uuid(u) => Some(CqlValue::Uuid(*u)),
        TargetValue::Text(s) => Some(CqlValue::Text(s.clone())),
        TargetValue::Int(n) => Some(CqlValue::Int(*n)),
    }
}

/// Connector for ScyllaDB and Cassandra clusters
#[derive(Debug, Default, Clone)]
pub struct ScyllaConnector;

impl ScyllaConnector {
    /// Create a new connector
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ClusterConnector for ScyllaConnector {
    async fn connect(&self, config: &ClusterConfig) -> StoreResult<Box<dyn ClusterSession>> {
        let mut builder = SessionBuilder::new().known_nodes(&config.contact_points);
        if let Some(timeout) = config.connect_timeout() {
            builder = builder.connection_timeout(timeout);
        }

        // On failure the builder has already dropped every partially opened
        // connection, so only the error is returned.
        let session = builder.build().await.map_err(StoreError::from_driver)?;
        Ok(Box::new(ScyllaSession::new(session)))
    }

    fn backend(&self) -> &'static str {
        "scylla"
    }
}

/// Session over a `scylla::Session`
pub struct ScyllaSession {
    session: Session,
    prepared: Mutex<HashMap<String, PreparedStatement>>,
}

impl ScyllaSession {
    /// Wrap an established driver session
    pub fn new(session: Session) -> Self {
        Self {
            session,
            prepared: Mutex::new(HashMap::new()),
        }
    }

    /// Prepare a statement once per session and reuse it afterwards
    async fn prepared(&self, cql: &str) -> StoreResult<PreparedStatement> {
        let mut cache = self.prepared.lock().await;
        if let Some(stmt) = cache.get(cql) {
            return Ok(stmt.clone());
        }

        debug!(statement = cql, "preparing statement");
        let stmt = self
            .session
            .prepare(cql)
            .await
            .map_err(StoreError::from_driver)?;
        cache.insert(cql.to_string(), stmt.clone());
        Ok(stmt)
    }

    /// Access the underlying driver session
    pub fn inner(&self) -> &Session {
        &self.session
    }
}

#[async_trait]
impl ClusterSession for ScyllaSession {
    async fn execute_ddl(&self, cql: &str) -> StoreResult<()> {
        self.session
            .query(cql, ())
            .await
            .map_err(StoreError::from_driver)?;
        Ok(())
    }

    async fn execute(&self, statement: &BoundStatement) -> StoreResult<()> {
        let prepared = self.prepared(&statement.cql).await?;
        let values: Vec<Option<CqlValue>> = statement.values.iter().map(value_to_cql).collect();

        self.session
            .execute(&prepared, values)
            .await
            .map_err(StoreError::from_driver)?;
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        // The driver closes its connection pool when the session is dropped;
        // drain the statement cache so nothing outlives the session.
        self.prepared.lock().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_value_to_cql() {
        let id = Uuid::new_v4();
        assert_eq!(
            value_to_cql(&TargetValue::Uuid(id)),
            Some(CqlValue::Uuid(id))
        );
        assert_eq!(
            value_to_cql(&TargetValue::Text("value1".into())),
            Some(CqlValue::Text("value1".into()))
        );
        assert_eq!(value_to_cql(&TargetValue::Int(100)), Some(CqlValue::Int(100)));
        assert_eq!(value_to_cql(&TargetValue::Null), None);
    }

    #[test]
    fn test_connector_backend_name() {
        assert_eq!(ScyllaConnector::new().backend(), "scylla");
    }
}
