//! Identifier validation and quoting for statements skylift builds as text.
//!
//! Keyspace, table and datacenter names are interpolated into CQL DDL, and the
//! source table name into the SQLite query, so they are validated up front
//! when the configuration is loaded.

use crate::error::Error;

/// Maximum length of a Cassandra/Scylla keyspace or table name.
pub const MAX_CQL_IDENTIFIER_LEN: usize = 48;

/// Validate a CQL identifier (keyspace and table names).
///
/// - Must not be empty
/// - At most 48 characters
/// - Must start with an ASCII letter or underscore
/// - May only contain ASCII alphanumeric characters and underscores
///
/// # Examples
///
/// ```
/// use skylift::security::validate_cql_identifier;
///
/// assert!(validate_cql_identifier("my_keyspace").is_ok());
/// assert!(validate_cql_identifier("x; DROP KEYSPACE system--").is_err());
/// assert!(validate_cql_identifier("").is_err());
/// ```
pub fn validate_cql_identifier(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(Error::config("CQL identifier cannot be empty"));
    }

    if name.len() > MAX_CQL_IDENTIFIER_LEN {
        return Err(Error::config(format!(
            "CQL identifier too long: {} chars (max {})",
            name.len(),
            MAX_CQL_IDENTIFIER_LEN
        )));
    }

    check_identifier_chars(name, "CQL")
}

/// Validate a SQLite table name before it is quoted into the source query.
pub fn validate_sqlite_identifier(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(Error::config("SQLite identifier cannot be empty"));
    }

    if name.len() > 255 {
        return Err(Error::config(format!(
            "SQLite identifier too long: {} chars (max 255)",
            name.len()
        )));
    }

    check_identifier_chars(name, "SQLite")
}

fn check_identifier_chars(name: &str, dialect: &str) -> crate::Result<()> {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => {
            return Err(Error::config(format!(
                "Invalid {} identifier '{}': must start with a letter or underscore",
                dialect, name
            )));
        }
    }

    for c in chars {
        if !c.is_ascii_alphanumeric() && c != '_' {
            return Err(Error::config(format!(
                "Invalid {} identifier '{}': contains invalid character '{}'",
                dialect, name, c
            )));
        }
    }

    Ok(())
}

/// Quote an identifier for SQLite (`"name"`, embedded quotes doubled).
pub fn quote_sqlite_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Escape a value for a single-quoted CQL string literal.
///
/// ```
/// use skylift::security::escape_string_literal;
///
/// assert_eq!(escape_string_literal("dc1"), "dc1");
/// assert_eq!(escape_string_literal("o'hare"), "o''hare");
/// ```
pub fn escape_string_literal(value: &str) -> String {
    if !value.contains('\'') {
        return value.to_string();
    }
    value.replace('\'', "''")
}
