//! DDL generation for tenant tables
//!
//! Every tenant table is created from the same [`TableSpec`]; statements are
//! idempotent so tables can be ensured lazily on first use.

use crate::sql::sanitize::quote_identifier;
use crate::table::TableSpec;
use crate::types::{ColumnDefinition, IndexDefinition};

/// DDL generator for one table layout
pub struct DdlGenerator<'a> {
    spec: &'a TableSpec,
}

impl<'a> DdlGenerator<'a> {
    pub fn new(spec: &'a TableSpec) -> Self {
        Self { spec }
    }

    /// Generate the CREATE TABLE statement
    pub fn generate_create_table(&self, table_name: &str) -> String {
        let column_defs: Vec<String> = self
            .spec
            .columns()
            .iter()
            .map(Self::format_column_definition)
            .collect();

        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_identifier(table_name),
            column_defs.join(", ")
        )
    }

    /// Generate CREATE INDEX statements for every index of the layout
    pub fn generate_create_indexes(&self, table_name: &str) -> Vec<String> {
        self.spec
            .indexes()
            .iter()
            .map(|index| Self::generate_create_index(table_name, index))
            .collect()
    }

    /// Generate one CREATE INDEX statement
    ///
    /// The index name is prefixed with the table name so indexes of
    /// different tenants never collide.
    pub fn generate_create_index(table_name: &str, index: &IndexDefinition) -> String {
        let quoted_columns: Vec<String> = index
            .columns
            .iter()
            .map(|col| quote_identifier(col))
            .collect();

        let unique_clause = if index.unique { "UNIQUE " } else { "" };

        format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {}({})",
            unique_clause,
            quote_identifier(&format!("{}_{}", table_name, index.name)),
            quote_identifier(table_name),
            quoted_columns.join(", ")
        )
    }

    /// Generate DROP TABLE statement
    pub fn generate_drop_table(&self, table_name: &str) -> String {
        format!("DROP TABLE IF EXISTS {} CASCADE", quote_identifier(table_name))
    }

    /// Generate TRUNCATE statement; the surrogate key sequence restarts
    pub fn generate_truncate(&self, table_name: &str) -> String {
        format!(
            "TRUNCATE TABLE {} RESTART IDENTITY",
            quote_identifier(table_name)
        )
    }

    /// Format a single column definition for CREATE TABLE
    pub fn format_column_definition(col: &ColumnDefinition) -> String {
        let mut parts = vec![quote_identifier(&col.name), col.column_type.to_sql_type()];

        if col.unique {
            parts.push("UNIQUE".to_string());
        }

        if !col.nullable {
            parts.push("NOT NULL".to_string());
        }

        if let Some(default) = &col.default_value {
            parts.push(format!("DEFAULT {}", default));
        }

        parts.join(" ")
    }
}
