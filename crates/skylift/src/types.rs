//! Value types for skylift
//!
//! Two type systems meet here:
//! - Source side: self-describing rows of nullable UTF-8 text
//! - Target side: typed records written to the cluster tables

use std::fmt;
use uuid::Uuid;

/// A single source cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceValue {
    /// SQL NULL
    Null,
    /// Text rendering of the stored value
    Text(String),
}

impl SourceValue {
    /// Check if value is NULL
    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Borrow the text, if any
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.as_str()),
            Self::Null => None,
        }
    }
}

impl From<&str> for SourceValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for SourceValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T: Into<SourceValue>> From<Option<T>> for SourceValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Self::Null,
        }
    }
}

impl fmt::Display for SourceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Source row as ordered (column, value) pairs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRow {
    columns: Vec<String>,
    values: Vec<SourceValue>,
}

impl SourceRow {
    /// Create a new row
    pub fn new(columns: Vec<String>, values: Vec<SourceValue>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Get column count
    #[inline]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Check if row is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Get column names
    #[inline]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Get all values
    #[inline]
    pub fn values(&self) -> &[SourceValue] {
        &self.values
    }

    /// Get value by column index
    #[inline]
    pub fn get(&self, idx: usize) -> Option<&SourceValue> {
        self.values.get(idx)
    }

    /// Get value by column name (case-insensitive, like SQLite)
    pub fn get_by_name(&self, name: &str) -> Option<&SourceValue> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .and_then(|idx| self.values.get(idx))
    }

    /// Iterate (column, value) pairs in result-set order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SourceValue)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

/// A value bound into a target statement slot
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetValue {
    /// CQL null
    Null,
    /// CQL uuid
    Uuid(Uuid),
    /// CQL text
    Text(String),
    /// CQL int
    Int(i32),
}

impl TargetValue {
    /// CQL type name of the value
    pub fn cql_type(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Uuid(_) => "uuid",
            Self::Text(_) => "text",
            Self::Int(_) => "int",
        }
    }
}

impl From<Uuid> for TargetValue {
    fn from(v: Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl From<Option<String>> for TargetValue {
    fn from(v: Option<String>) -> Self {
        v.map_or(Self::Null, Self::Text)
    }
}

impl From<Option<i32>> for TargetValue {
    fn from(v: Option<i32>) -> Self {
        v.map_or(Self::Null, Self::Int)
    }
}

/// Record written to the target table, values in declared column order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRow {
    values: Vec<TargetValue>,
}

impl TargetRow {
    /// Create a row from its column values
    pub fn new(values: Vec<TargetValue>) -> Self {
        Self { values }
    }

    /// Get column count
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if row is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get value by declared column position
    #[inline]
    pub fn get(&self, idx: usize) -> Option<&TargetValue> {
        self.values.get(idx)
    }

    /// All values in declared column order
    #[inline]
    pub fn values(&self) -> &[TargetValue] {
        &self.values
    }

    /// Consume the row into its values
    pub fn into_values(self) -> Vec<TargetValue> {
        self.values
    }
}
