//! Translation from source rows to target rows
//!
//! A table is translated column by column. Each target column takes its value
//! from a [`ColumnSource`]: a configured constant, a named source column,
//! null, or a freshly minted time-based identifier. Values are coerced to the
//! declared CQL type with no silent truncation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::schema::{ColumnSpec, CqlType};
use crate::types::{SourceRow, SourceValue, TargetRow, TargetValue};

/// Where a target column takes its value from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnSource {
    /// The same literal for every row
    Constant(String),
    /// The named column of the source row
    Column(String),
    /// Always null
    #[serde(rename = "none")]
    Null,
    /// A fresh version 1 UUID per row
    Generated,
}

/// Non-key column mapping of the standard `id, column1, column2` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingConfig {
    /// Source of the `text` column
    #[serde(
        default = "default_column1",
        with = "serde_yaml::with::singleton_map"
    )]
    pub column1: ColumnSource,
    /// Source of the `int` column
    #[serde(
        default = "default_column2",
        with = "serde_yaml::with::singleton_map"
    )]
    pub column2: ColumnSource,
}

fn default_column1() -> ColumnSource {
    ColumnSource::Constant("value1".to_string())
}

fn default_column2() -> ColumnSource {
    ColumnSource::Constant("100".to_string())
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            column1: default_column1(),
            column2: default_column2(),
        }
    }
}

impl MappingConfig {
    /// Column plan of the standard table: generated key, then column1 and column2
    pub fn columns(&self) -> Vec<ColumnMapping> {
        vec![
            ColumnMapping::new("id", CqlType::Uuid)
                .primary_key()
                .from_source(ColumnSource::Generated),
            ColumnMapping::new("column1", CqlType::Text).from_source(self.column1.clone()),
            ColumnMapping::new("column2", CqlType::Int).from_source(self.column2.clone()),
        ]
    }
}

/// One declared target column and where its value comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    /// Target column name
    pub name: String,

    /// Target column type
    #[serde(rename = "type")]
    pub cql_type: CqlType,

    /// Part of the primary key
    #[serde(default)]
    pub primary_key: bool,

    /// Value source; the source column of the same name when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ColumnSource>,
}

impl ColumnMapping {
    /// Column copied from the source column of the same name
    pub fn new(name: impl Into<String>, cql_type: CqlType) -> Self {
        Self {
            name: name.into(),
            cql_type,
            primary_key: false,
            source: None,
        }
    }

    /// Mark as part of the primary key
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Take the value from `source`
    pub fn from_source(mut self, source: ColumnSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Effective value source
    pub fn value_source(&self) -> ColumnSource {
        self.source
            .clone()
            .unwrap_or_else(|| ColumnSource::Column(self.name.clone()))
    }

    /// Declared column for the table DDL
    pub fn spec(&self) -> ColumnSpec {
        ColumnSpec {
            name: self.name.clone(),
            cql_type: self.cql_type,
            primary_key: self.primary_key,
        }
    }
}

/// Translates a source row into a target row
pub trait RowMapper: Send + Sync {
    /// Translate one row; fails with a type conversion error
    fn translate(&self, row: &SourceRow) -> Result<TargetRow>;
}

/// Mints version 1 (time-based) UUIDs
#[derive(Debug, Clone)]
pub struct IdGenerator {
    node_id: [u8; 6],
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator {
    /// Generator with a random node id (multicast bit set, RFC 4122 §4.5)
    pub fn new() -> Self {
        let seed = Uuid::new_v4();
        let mut node_id = [0u8; 6];
        node_id.copy_from_slice(&seed.as_bytes()[..6]);
        node_id[0] |= 0x01;
        Self { node_id }
    }

    /// Generator with a fixed node id
    pub fn with_node_id(node_id: [u8; 6]) -> Self {
        Self { node_id }
    }

    /// Next identifier
    pub fn next_id(&self) -> Uuid {
        Uuid::now_v1(&self.node_id)
    }
}

/// Coerce to a `text` column
pub fn coerce_text(value: &SourceValue) -> Option<String> {
    value.as_str().map(str::to_owned)
}

/// Coerce to an `int` column: decimal text that fits in 32 bits
pub fn coerce_int(column: &str, value: &SourceValue) -> Result<Option<i32>> {
    let Some(text) = value.as_str() else {
        return Ok(None);
    };

    let wide: i64 = text.trim().parse().map_err(|_| {
        Error::type_conversion(column, format!("'{}' is not a 32-bit integer", text))
    })?;

    i32::try_from(wide).map(Some).map_err(|_| {
        Error::type_conversion(
            column,
            format!("{} is out of range for a 32-bit integer", wide),
        )
    })
}

/// Coerce to a `uuid` column: the hyphenated or simple text form
pub fn coerce_uuid(column: &str, value: &SourceValue) -> Result<Option<Uuid>> {
    let Some(text) = value.as_str() else {
        return Ok(None);
    };

    Uuid::parse_str(text.trim())
        .map(Some)
        .map_err(|e| Error::type_conversion(column, format!("'{}' is not a uuid: {}", text, e)))
}

/// Coerce a source value to the declared column type
pub fn coerce(column: &str, cql_type: CqlType, value: &SourceValue) -> Result<TargetValue> {
    Ok(match cql_type {
        CqlType::Text => coerce_text(value).into(),
        CqlType::Int => coerce_int(column, value)?.into(),
        CqlType::Uuid => coerce_uuid(column, value)?.map_or(TargetValue::Null, TargetValue::Uuid),
    })
}

#[derive(Debug, Clone)]
struct PlannedColumn {
    name: String,
    cql_type: CqlType,
    source: ColumnSource,
}

/// The configured row mapper
#[derive(Debug, Clone)]
pub struct TypeMapper {
    ids: IdGenerator,
    columns: Vec<PlannedColumn>,
}

impl Default for TypeMapper {
    fn default() -> Self {
        Self::new(MappingConfig::default())
    }
}

impl TypeMapper {
    /// Mapper for the standard table
    pub fn new(config: MappingConfig) -> Self {
        Self::for_columns(&config.columns())
    }

    /// Mapper for an explicit column plan, values emitted in plan order
    pub fn for_columns(columns: &[ColumnMapping]) -> Self {
        Self {
            ids: IdGenerator::new(),
            columns: columns
                .iter()
                .map(|c| PlannedColumn {
                    name: c.name.clone(),
                    cql_type: c.cql_type,
                    source: c.value_source(),
                })
                .collect(),
        }
    }

    /// Use a specific id generator
    pub fn with_id_generator(mut self, ids: IdGenerator) -> Self {
        self.ids = ids;
        self
    }

    /// Target column names in emitted order
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    fn resolve(&self, column: &PlannedColumn, row: &SourceRow) -> Result<TargetValue> {
        let value = match &column.source {
            ColumnSource::Generated => {
                return match column.cql_type {
                    CqlType::Uuid => Ok(TargetValue::Uuid(self.ids.next_id())),
                    other => Err(Error::type_conversion(
                        &column.name,
                        format!("generated values need a uuid column, not {}", other),
                    )),
                };
            }
            ColumnSource::Constant(text) => SourceValue::Text(text.clone()),
            ColumnSource::Null => SourceValue::Null,
            ColumnSource::Column(name) => row.get_by_name(name).cloned().ok_or_else(|| {
                Error::type_conversion(
                    &column.name,
                    format!("source row has no column named '{}'", name),
                )
            })?,
        };
        coerce(&column.name, column.cql_type, &value)
    }
}

impl RowMapper for TypeMapper {
    fn translate(&self, row: &SourceRow) -> Result<TargetRow> {
        self.columns
            .iter()
            .map(|column| self.resolve(column, row))
            .collect::<Result<Vec<_>>>()
            .map(TargetRow::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use std::collections::HashSet;

    fn row(pairs: &[(&str, Option<&str>)]) -> SourceRow {
        SourceRow::new(
            pairs.iter().map(|(c, _)| c.to_string()).collect(),
            pairs.iter().map(|(_, v)| SourceValue::from(*v)).collect(),
        )
    }

    fn key(target: &TargetRow) -> Uuid {
        match target.get(0) {
            Some(TargetValue::Uuid(id)) => *id,
            other => panic!("expected uuid key, got {:?}", other),
        }
    }

    #[test]
    fn test_default_mapping_writes_constants() {
        let mapper = TypeMapper::default();
        let target = mapper
            .translate(&row(&[("anything", Some("ignored"))]))
            .unwrap();

        assert_eq!(target.len(), 3);
        assert_eq!(target.get(1), Some(&TargetValue::Text("value1".into())));
        assert_eq!(target.get(2), Some(&TargetValue::Int(100)));
        assert_eq!(key(&target).get_version_num(), 1);
        assert_eq!(mapper.column_names(), vec!["id", "column1", "column2"]);
    }

    #[test]
    fn test_ids_are_unique() {
        let mapper = TypeMapper::default();
        let source = row(&[]);
        let ids: HashSet<Uuid> = (0..10_000)
            .map(|_| key(&mapper.translate(&source).unwrap()))
            .collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn test_projection_by_name() {
        let mapper = TypeMapper::new(MappingConfig {
            column1: ColumnSource::Column("title".into()),
            column2: ColumnSource::Column("artist_id".into()),
        });

        let target = mapper
            .translate(&row(&[("Title", Some("Let There Be Rock")), ("artist_id", Some(" 1 "))]))
            .unwrap();

        assert_eq!(target.get(1), Some(&TargetValue::Text("Let There Be Rock".into())));
        assert_eq!(target.get(2), Some(&TargetValue::Int(1)));
    }

    #[test]
    fn test_null_passes_through() {
        let mapper = TypeMapper::new(MappingConfig {
            column1: ColumnSource::Column("a".into()),
            column2: ColumnSource::Null,
        });

        let target = mapper.translate(&row(&[("a", None)])).unwrap();
        assert_eq!(target.get(1), Some(&TargetValue::Null));
        assert_eq!(target.get(2), Some(&TargetValue::Null));
    }

    #[test]
    fn test_missing_column_is_type_error() {
        let mapper = TypeMapper::new(MappingConfig {
            column1: ColumnSource::Column("absent".into()),
            column2: ColumnSource::Null,
        });

        let err = mapper.translate(&row(&[("a", Some("x"))])).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::TypeConversion);
    }

    #[test]
    fn test_coerce_int_rejects_non_numeric_and_overflow() {
        let err = coerce_int("column2", &SourceValue::from("abc")).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::TypeConversion);

        let err = coerce_int("column2", &SourceValue::from("2147483648")).unwrap_err();
        assert!(err.to_string().contains("out of range"));

        assert_eq!(
            coerce_int("column2", &SourceValue::from("-2147483648")).unwrap(),
            Some(i32::MIN)
        );
        assert!(coerce_int("column2", &SourceValue::from("1.5")).is_err());
        assert!(coerce_int("column2", &SourceValue::from("2.0")).is_err());
    }

    #[test]
    fn test_explicit_columns_keep_source_key() {
        let mapper = TypeMapper::for_columns(&[
            ColumnMapping::new("album_id", CqlType::Int)
                .primary_key()
                .from_source(ColumnSource::Column("AlbumId".into())),
            ColumnMapping::new("title", CqlType::Text),
        ]);

        let target = mapper
            .translate(&row(&[("AlbumId", Some("7")), ("Title", Some("Big Ones"))]))
            .unwrap();
        assert_eq!(
            target.values(),
            &[TargetValue::Int(7), TargetValue::Text("Big Ones".into())]
        );
    }

    #[test]
    fn test_uuid_column_from_source_text() {
        let id = Uuid::new_v4();
        let mapper = TypeMapper::for_columns(&[ColumnMapping::new("id", CqlType::Uuid)]);

        let target = mapper
            .translate(&row(&[("id", Some(id.to_string().as_str()))]))
            .unwrap();
        assert_eq!(target.get(0), Some(&TargetValue::Uuid(id)));

        let err = mapper.translate(&row(&[("id", Some("nope"))])).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::TypeConversion);
    }

    #[test]
    fn test_generated_needs_uuid_column() {
        let mapper = TypeMapper::for_columns(&[
            ColumnMapping::new("n", CqlType::Int).from_source(ColumnSource::Generated)
        ]);
        let err = mapper.translate(&row(&[])).unwrap_err();
        assert!(err.to_string().contains("uuid"));
    }

    #[test]
    fn test_mapping_yaml() {
        let config: MappingConfig =
            serde_yaml::from_str("column1:\n  column: name\ncolumn2: none\n").unwrap();
        assert_eq!(config.column1, ColumnSource::Column("name".into()));
        assert_eq!(config.column2, ColumnSource::Null);

        let config: MappingConfig =
            serde_yaml::from_str("column1:\n  constant: hello\n").unwrap();
        assert_eq!(config.column1, ColumnSource::Constant("hello".into()));
        assert_eq!(config.column2, ColumnSource::Constant("100".into()));

        let config: MappingConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, MappingConfig::default());
    }
}
