//! Error types for skylift
//!
//! Every failure is terminal for a migration run. The error taxonomy follows
//! the pipeline stages so the final diagnostic can name where the run died:
//! - Source errors (open, query)
//! - Target errors (connect, schema, write)
//! - Translation errors (type coercion)

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type for skylift operations
pub type Result<T> = std::result::Result<T, Error>;

/// Result type for raw target-store calls
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The source database could not be opened
    Connection,
    /// The source query failed to parse or execute
    Query,
    /// The target cluster could not be reached
    Connect,
    /// A schema statement failed on the target
    Schema,
    /// A source value could not be coerced to the target column type
    TypeConversion,
    /// A row insert failed on the target
    Write,
    /// An awaited operation exceeded its deadline
    Timeout,
    /// Configuration error
    Configuration,
    /// Unknown/other errors
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "source_open"),
            Self::Query => write!(f, "source_query"),
            Self::Connect => write!(f, "cluster_connect"),
            Self::Schema => write!(f, "schema_sync"),
            Self::TypeConversion => write!(f, "type_conversion"),
            Self::Write => write!(f, "write"),
            Self::Timeout => write!(f, "timeout"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Error reported by the target store client, kept verbatim.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct StoreError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl StoreError {
    /// Create a store error from the client's message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create a store error that keeps the driver error as its source
    pub fn from_driver(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// The client's error text
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Main error type for skylift
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Source database could not be opened
    #[error("cannot open source database {path}: {message}")]
    Connection { path: String, message: String },

    /// Source query failed
    #[error("source query failed: {message}")]
    Query { message: String, sql: Option<String> },

    /// Target cluster could not be reached
    #[error("unable to connect to cluster: '{source}'")]
    Connect {
        #[source]
        source: StoreError,
    },

    /// Schema statement failed
    #[error("schema statement failed: {source}")]
    Schema {
        statement: String,
        #[source]
        source: StoreError,
    },

    /// Value could not be coerced to the declared column type
    #[error("cannot map column {column}: {message}")]
    TypeConversion { column: String, message: String },

    /// Row insert failed
    #[error("insert failed: {source}")]
    Write {
        #[source]
        source: StoreError,
    },

    /// Operation did not resolve before its deadline
    #[error("{operation} did not complete within {after:?}")]
    Timeout {
        operation: String,
        after: Duration,
    },

    /// Configuration error
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Failure attributed to a single source row
    #[error("row {index}: {source}")]
    Row {
        index: u64,
        #[source]
        source: Box<Error>,
    },

    /// Internal error
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Get the error category. Row failures report the category of their cause.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Query { .. } => ErrorCategory::Query,
            Self::Connect { .. } => ErrorCategory::Connect,
            Self::Schema { .. } => ErrorCategory::Schema,
            Self::TypeConversion { .. } => ErrorCategory::TypeConversion,
            Self::Write { .. } => ErrorCategory::Write,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Row { source, .. } => source.category(),
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Zero-based source position of the failing row, if any
    pub fn row_index(&self) -> Option<u64> {
        match self {
            Self::Row { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// Create a source open error
    pub fn connection(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a query error
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: None,
        }
    }

    /// Create a query error with SQL
    pub fn query_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(sql.into()),
        }
    }

    /// Create a cluster connect error
    pub fn connect(source: StoreError) -> Self {
        Self::Connect { source }
    }

    /// Create a schema error for the given statement
    pub fn schema(statement: impl Into<String>, source: StoreError) -> Self {
        Self::Schema {
            statement: statement.into(),
            source,
        }
    }

    /// Create a type conversion error
    pub fn type_conversion(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TypeConversion {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create a write error
    pub fn write(source: StoreError) -> Self {
        Self::Write { source }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Attribute an error to a source row
    pub fn row(index: u64, source: Error) -> Self {
        Self::Row {
            index,
            source: Box::new(source),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_error_reports_cause_category() {
        let err = Error::row(7, Error::type_conversion("column2", "not an integer"));
        assert_eq!(err.category(), ErrorCategory::TypeConversion);
        assert_eq!(err.row_index(), Some(7));

        let err = Error::row(0, Error::write(StoreError::new("unconfigured table")));
        assert_eq!(err.category(), ErrorCategory::Write);
    }

    #[test]
    fn test_store_message_is_verbatim() {
        let err = Error::connect(StoreError::new("Control connection pool error"));
        assert_eq!(
            err.to_string(),
            "unable to connect to cluster: 'Control connection pool error'"
        );
    }

    #[test]
    fn test_error_display() {
        let err = Error::query_with_sql("no such table: my_table", "SELECT * FROM \"my_table\"");
        assert!(err.to_string().contains("no such table"));

        let err = Error::timeout("insert", Duration::from_millis(250));
        assert!(err.to_string().contains("250ms"));
        assert_eq!(err.category(), ErrorCategory::Timeout);
    }

    #[test]
    fn test_category_display() {
        assert_eq!(ErrorCategory::Connect.to_string(), "cluster_connect");
        assert_eq!(ErrorCategory::Schema.to_string(), "schema_sync");
        assert_eq!(ErrorCategory::TypeConversion.to_string(), "type_conversion");
    }
}
