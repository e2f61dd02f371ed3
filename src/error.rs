//! Error types for table store operations

use std::collections::BTreeMap;

use serde_json::json;
use thiserror::Error;

/// Errors that can occur during table store operations
#[derive(Debug, Error)]
pub enum TableStoreError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid table: {0}")]
    InvalidTable(String),

    #[error("Tenant is required")]
    TenantRequired,

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Inputs failed their field rules
    #[error("The given data was invalid")]
    FieldErrors(BTreeMap<String, Vec<String>>),

    /// An imported row failed its field rules. Nothing was persisted.
    #[error("Row {row_number} failed validation")]
    RowValidation {
        row_number: usize,
        row: serde_json::Value,
        errors: BTreeMap<String, Vec<String>>,
    },

    /// The import holds more rows than the configured limit. Nothing was persisted.
    #[error("Import exceeds the limit of {limit} rows")]
    ImportLimit { limit: usize, count: usize },

    /// Persisting an imported row failed and the batch was rolled back.
    #[error("Row {row_number} could not be saved: {message}")]
    ImportRow {
        row_number: usize,
        row: serde_json::Value,
        message: String,
    },

    #[error("The file field is required")]
    MissingFile,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl TableStoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_table(msg: impl Into<String>) -> Self {
        Self::InvalidTable(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// HTTP status code a caller should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::TenantRequired => 403,
            Self::Conflict(_) => 409,
            Self::Validation(_)
            | Self::FieldErrors(_)
            | Self::InvalidTable(_)
            | Self::RowValidation { .. }
            | Self::ImportLimit { .. }
            | Self::ImportRow { .. }
            | Self::MissingFile
            | Self::Csv(_) => 422,
            Self::Database(_) | Self::Connection(_) | Self::Sql(_) | Self::Json(_) => 500,
        }
    }

    /// JSON response body for this error
    ///
    /// Not-found is always the generic `{"error": "not found"}`; row level
    /// import failures carry `rowno` and the offending `row`.
    pub fn error_body(&self) -> serde_json::Value {
        match self {
            Self::NotFound(_) => json!({ "error": "not found" }),
            Self::FieldErrors(errors) => json!({ "error": errors }),
            Self::RowValidation {
                row_number,
                row,
                errors,
            } => json!({ "error": errors, "rowno": row_number, "row": row }),
            Self::ImportRow {
                row_number,
                row,
                message,
            } => json!({ "error": message, "rowno": row_number, "row": row }),
            Self::ImportLimit { limit, count } => json!({
                "error": format!("import is limited to {} rows", limit),
                "limit": limit,
                "count": count,
            }),
            Self::MissingFile => json!({ "error": { "file": ["The file field is required."] } }),
            other => json!({ "error": other.to_string() }),
        }
    }
}

pub type Result<T> = std::result::Result<T, TableStoreError>;
