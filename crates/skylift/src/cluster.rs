//! Cluster connection traits for skylift
//!
//! Core abstractions over the target wide-column store:
//! - ClusterConnector: establishes a session from contact points
//! - ClusterSession: executes schema statements and bound inserts
//! - BoundStatement: a parameterized statement with positional values
//!
//! Every call is issued and then awaited by the caller; an optional deadline
//! turns an unresolved await into [`Error::Timeout`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};
use validator::Validate;

use crate::error::{Error, Result, StoreResult};
use crate::types::TargetValue;

/// A statement with its positional bind values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundStatement {
    /// CQL text with `?` placeholders
    pub cql: String,
    /// Values for each placeholder, in order
    pub values: Vec<TargetValue>,
}

impl BoundStatement {
    /// Number of bound values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no values are bound
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A live session to the target cluster
#[async_trait]
pub trait ClusterSession: Send + Sync {
    /// Execute an unparameterized schema statement
    async fn execute_ddl(&self, cql: &str) -> StoreResult<()>;

    /// Execute a bound statement
    async fn execute(&self, statement: &BoundStatement) -> StoreResult<()>;

    /// Release the session
    async fn close(&self) -> StoreResult<()>;
}

/// Factory for target sessions
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    /// Open a session against the configured contact points
    async fn connect(&self, config: &ClusterConfig) -> StoreResult<Box<dyn ClusterSession>>;

    /// Backend name used in logs
    fn backend(&self) -> &'static str;
}

/// Target cluster configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ClusterConfig {
    /// Contact points (`host` or `host:port`)
    #[serde(default = "default_contact_points")]
    #[validate(length(min = 1, message = "at least one contact point is required"))]
    pub contact_points: Vec<String>,

    /// Deadline for the connect request; waits indefinitely when unset
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,

    /// Deadline for each schema/insert request; waits indefinitely when unset
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
}

fn default_contact_points() -> Vec<String> {
    vec!["127.0.0.1".to_string()]
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            contact_points: default_contact_points(),
            connect_timeout_ms: None,
            request_timeout_ms: None,
        }
    }
}

impl ClusterConfig {
    /// Create configuration for the given contact points
    pub fn new(contact_points: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            contact_points: contact_points.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Set connect deadline
    pub fn with_connect_timeout(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = Some(ms);
        self
    }

    /// Set per-request deadline
    pub fn with_request_timeout(mut self, ms: u64) -> Self {
        self.request_timeout_ms = Some(ms);
        self
    }

    /// Connect deadline as a duration
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    /// Per-request deadline as a duration
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

/// Await a store call, optionally bounded by a deadline.
///
/// The outer result carries the timeout, the inner one the store's own answer.
pub async fn await_with_deadline<T, F>(
    operation: &str,
    deadline: Option<Duration>,
    fut: F,
) -> Result<StoreResult<T>>
where
    F: Future<Output = StoreResult<T>>,
{
    match deadline {
        Some(after) => tokio::time::timeout(after, fut)
            .await
            .map_err(|_| Error::timeout(operation, after)),
        None => Ok(fut.await),
    }
}

/// Connect to the cluster, blocking until the attempt resolves.
///
/// The connector owns cleanup of anything it built before failing; nothing
/// is handed back on the error path.
pub async fn connect(
    connector: &dyn ClusterConnector,
    config: &ClusterConfig,
) -> Result<Box<dyn ClusterSession>> {
    info!(
        backend = connector.backend(),
        contact_points = ?config.contact_points,
        "connecting to cluster"
    );

    match await_with_deadline("cluster connect", config.connect_timeout(), connector.connect(config))
        .await
    {
        Ok(Ok(session)) => {
            info!(backend = connector.backend(), "connected to cluster");
            Ok(session)
        }
        Ok(Err(e)) => Err(Error::connect(e)),
        Err(e) => {
            warn!(backend = connector.backend(), "cluster connect timed out");
            Err(e)
        }
    }
}
