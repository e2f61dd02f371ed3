//! SQL identifier sanitization
//!
//! Table names carry the `$` tenant delimiter, so every identifier is quoted
//! rather than emitted bare.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Result, TableStoreError};
use crate::table::TableSpec;

/// PostgreSQL reserved keywords that cannot be used as unquoted identifiers
pub const POSTGRES_RESERVED_WORDS: &[&str] = &[
    "ALL",
    "ANALYSE",
    "ANALYZE",
    "AND",
    "ANY",
    "ARRAY",
    "AS",
    "ASC",
    "ASYMMETRIC",
    "BOTH",
    "CASE",
    "CAST",
    "CHECK",
    "COLLATE",
    "COLUMN",
    "CONSTRAINT",
    "CREATE",
    "CURRENT_CATALOG",
    "CURRENT_DATE",
    "CURRENT_ROLE",
    "CURRENT_TIME",
    "CURRENT_TIMESTAMP",
    "CURRENT_USER",
    "DEFAULT",
    "DEFERRABLE",
    "DESC",
    "DISTINCT",
    "DO",
    "ELSE",
    "END",
    "EXCEPT",
    "FALSE",
    "FETCH",
    "FOR",
    "FOREIGN",
    "FROM",
    "GRANT",
    "GROUP",
    "HAVING",
    "IN",
    "INITIALLY",
    "INTERSECT",
    "INTO",
    "LATERAL",
    "LEADING",
    "LIMIT",
    "LOCALTIME",
    "LOCALTIMESTAMP",
    "NOT",
    "NULL",
    "OFFSET",
    "ON",
    "ONLY",
    "OR",
    "ORDER",
    "PLACING",
    "PRIMARY",
    "REFERENCES",
    "RETURNING",
    "SELECT",
    "SESSION_USER",
    "SOME",
    "SYMMETRIC",
    "TABLE",
    "THEN",
    "TO",
    "TRAILING",
    "TRUE",
    "UNION",
    "UNIQUE",
    "USER",
    "USING",
    "VARIADIC",
    "WHEN",
    "WHERE",
    "WINDOW",
    "WITH",
];

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("identifier pattern is valid"));

/// Quote an identifier, doubling embedded quotes
///
/// Tenant tables always need quoting since `$` is not valid unquoted.
///
/// # Example
/// ```
/// use runtara_table_store::sql::quote_identifier;
///
/// assert_eq!(quote_identifier("acme$products"), "\"acme$products\"");
/// ```
pub fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Render a JSON path literal for the `#>>` operator
///
/// Segments are expected to be pre-validated; quotes are still doubled.
///
/// # Example
/// ```
/// use runtara_table_store::sql::json_path_literal;
///
/// assert_eq!(json_path_literal(&["color", "name"]), "'{color,name}'");
/// ```
pub fn json_path_literal(segments: &[&str]) -> String {
    format!("'{{{}}}'", segments.join(",").replace('\'', "''"))
}

/// Validate a column or index name of a table spec
///
/// Names are lowercase snake case, start with a letter, are not PostgreSQL
/// keywords and are not listed in `reserved_columns`.
///
/// # Example
/// ```
/// use runtara_table_store::sql::validate_identifier;
///
/// assert!(validate_identifier("started_at", &[]).is_ok());
/// assert!(validate_identifier("select", &[]).is_err());
/// assert!(validate_identifier("id", &["id"]).is_err());
/// ```
pub fn validate_identifier(name: &str, reserved_columns: &[&str]) -> std::result::Result<(), String> {
    if name.is_empty() {
        return Err("Column name is empty".to_string());
    }
    if !IDENTIFIER_RE.is_match(name) {
        return Err(format!("Column '{}' must be lowercase snake case", name));
    }
    if POSTGRES_RESERVED_WORDS.contains(&name.to_uppercase().as_str()) {
        return Err(format!("Column '{}' is a PostgreSQL keyword", name));
    }
    if reserved_columns.contains(&name) {
        return Err(format!("Column '{}' is managed by the store", name));
    }

    Ok(())
}

/// Validate every column and index name of a table spec
pub fn validate_spec(spec: &TableSpec) -> Result<()> {
    let names = spec
        .columns()
        .iter()
        .map(|c| c.name.as_str())
        .chain(spec.indexes().iter().map(|i| i.name.as_str()));
    for name in names {
        validate_identifier(name, &[]).map_err(TableStoreError::validation)?;
    }

    for index in spec.indexes() {
        if let Some(missing) = index.columns.iter().find(|c| !spec.has_column(c)) {
            return Err(TableStoreError::validation(format!(
                "Index '{}' names unknown column '{}'",
                index.name, missing
            )));
        }
    }

    Ok(())
}
