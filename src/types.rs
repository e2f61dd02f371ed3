//! Column types of dynamic tables
//!
//! Includes column types, column definitions, and index definitions, plus the
//! value coercion every repository applies before persisting an attribute.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::query::descriptor::is_numeric;

// ============================================================================
// Typed Column Definitions
// ============================================================================

/// Column type definition with coercion and SQL mapping
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ColumnType {
    /// Auto-incrementing surrogate key (maps to BIGSERIAL PRIMARY KEY)
    Serial,

    /// Unbounded text, `TEXT`
    String,

    /// Bounded text field (maps to VARCHAR(n))
    Varchar { length: u32 },

    /// 64-bit integer, `BIGINT`
    Integer,

    /// Exact numeric, `NUMERIC(precision,scale)`
    Decimal {
        /// Significant digits, 19 unless given
        #[serde(default = "default_precision")]
        precision: u8,
        /// Fractional digits, 4 unless given
        #[serde(default = "default_scale")]
        scale: u8,
    },

    /// `BOOLEAN`
    Boolean,

    /// UTC timestamp, `TIMESTAMP WITH TIME ZONE` (`started_at`, `ended_at`)
    Timestamp,

    /// Free-form document, `JSONB` (`meta`, `data`)
    Json,
}

fn default_precision() -> u8 {
    19
}

fn default_scale() -> u8 {
    4
}

/// Parse the timestamp formats accepted from callers and CSV files
///
/// RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) and `YYYY-MM-DD` (midnight UTC).
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(ts.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ts| ts.and_utc())
}

/// Whether a filter literal compares as a finite number
pub fn is_numeric_literal(raw: &str) -> bool {
    is_numeric(raw) && raw.trim().parse::<f64>().is_ok_and(f64::is_finite)
}

/// Parse the boolean spellings PostgreSQL accepts
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "y" | "on" => Some(true),
        "false" | "f" | "0" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

/// Text rendering of a JSON value as PostgreSQL's `::text` would show it
pub fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

impl ColumnType {
    /// Shorthand for [`ColumnType::Decimal`]
    pub fn decimal(precision: u8, scale: u8) -> Self {
        ColumnType::Decimal { precision, scale }
    }

    /// Create a Varchar type with the given maximum length
    pub fn varchar(length: u32) -> Self {
        ColumnType::Varchar { length }
    }

    /// PostgreSQL type used in `CREATE TABLE`
    pub fn to_sql_type(&self) -> String {
        match self {
            ColumnType::Serial => "BIGSERIAL PRIMARY KEY".to_string(),
            ColumnType::String => "TEXT".to_string(),
            ColumnType::Varchar { length } => format!("VARCHAR({})", length),
            ColumnType::Integer => "BIGINT".to_string(),
            ColumnType::Decimal { precision, scale } => {
                format!("NUMERIC({},{})", precision, scale)
            }
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::Timestamp => "TIMESTAMP WITH TIME ZONE".to_string(),
            ColumnType::Json => "JSONB".to_string(),
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, ColumnType::String | ColumnType::Varchar { .. })
    }

    /// Cast used for typed filter comparisons, if the column has one
    pub fn filter_cast(&self) -> Option<&'static str> {
        match self {
            ColumnType::Serial | ColumnType::Integer | ColumnType::Decimal { .. } => {
                Some("numeric")
            }
            ColumnType::Boolean => Some("boolean"),
            ColumnType::Timestamp => Some("timestamptz"),
            ColumnType::String | ColumnType::Varchar { .. } | ColumnType::Json => None,
        }
    }

    /// Whether a raw filter value can be compared with the column's own type
    ///
    /// Values that fail fall back to a text comparison instead of an error.
    pub fn accepts_filter_literal(&self, raw: &str) -> bool {
        match self {
            ColumnType::Serial | ColumnType::Integer | ColumnType::Decimal { .. } => {
                is_numeric_literal(raw)
            }
            ColumnType::Boolean => parse_bool(raw).is_some(),
            ColumnType::Timestamp => parse_timestamp(raw).is_some(),
            ColumnType::String | ColumnType::Varchar { .. } | ColumnType::Json => false,
        }
    }

    /// Coerce a JSON value into the shape this column stores
    ///
    /// Empty strings become NULL for non-text columns; numeric and boolean
    /// strings are parsed (common when importing from CSV); timestamps are
    /// normalized to RFC 3339 UTC.
    pub fn coerce_value(&self, value: &Value) -> Result<Value, String> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        if !self.is_text() && value.as_str().is_some_and(|s| s.trim().is_empty()) {
            return Ok(Value::Null);
        }

        match (self, value) {
            (ColumnType::String, _) => Ok(value_to_text(value)
                .map(Value::String)
                .unwrap_or(Value::Null)),
            (ColumnType::Varchar { length }, _) => {
                let text = value_to_text(value).unwrap_or_default();
                if text.chars().count() > *length as usize {
                    Err(format!(
                        "value too long for type character varying({})",
                        length
                    ))
                } else {
                    Ok(Value::String(text))
                }
            }
            (ColumnType::Serial | ColumnType::Integer, Value::Number(n)) => n
                .as_i64()
                .map(Value::from)
                .ok_or_else(|| format!("Cannot convert '{}' to integer", n)),
            // Allow string-to-integer coercion (common when importing from CSV)
            (ColumnType::Serial | ColumnType::Integer, Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| format!("Cannot convert '{}' to integer", s)),
            (ColumnType::Decimal { .. }, Value::Number(_)) => Ok(value.clone()),
            (ColumnType::Decimal { .. }, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| format!("Cannot convert '{}' to decimal", s)),
            (ColumnType::Boolean, Value::Bool(_)) => Ok(value.clone()),
            (ColumnType::Boolean, Value::Number(n)) => match n.as_i64() {
                Some(0) => Ok(Value::Bool(false)),
                Some(1) => Ok(Value::Bool(true)),
                _ => Err(format!("Cannot convert '{}' to boolean", n)),
            },
            (ColumnType::Boolean, Value::String(s)) => parse_bool(s)
                .map(Value::Bool)
                .ok_or_else(|| format!("Cannot convert '{}' to boolean", s)),
            (ColumnType::Timestamp, Value::String(s)) => parse_timestamp(s)
                .map(|ts| Value::String(ts.to_rfc3339()))
                .ok_or_else(|| format!("Invalid timestamp format: '{}'", s)),
            (ColumnType::Json, _) => Ok(value.clone()),
            _ => Err(format!(
                "Type mismatch: expected {:?}, got {}",
                self, value
            )),
        }
    }
}

fn default_nullable() -> bool {
    true
}

/// Column definition of a dynamic table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnDefinition {
    /// Column name, checked by `validate_identifier`
    pub name: String,

    /// Column type with coercion rules
    #[serde(flatten)]
    pub column_type: ColumnType,

    /// Nullable unless marked otherwise
    #[serde(default = "default_nullable")]
    pub nullable: bool,

    /// Adds a column-level UNIQUE constraint
    #[serde(default)]
    pub unique: bool,

    /// Raw SQL default expression such as `NOW()`
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "default")]
    pub default_value: Option<String>,
}

impl ColumnDefinition {
    /// Nullable, non-unique column without a default
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            unique: false,
            default_value: None,
        }
    }

    /// Mark NOT NULL
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Mark UNIQUE
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Set the SQL default expression
    pub fn default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Coerce a value for this column, enforcing NOT NULL
    pub fn coerce(&self, value: &Value) -> Result<Value, String> {
        let coerced = self
            .column_type
            .coerce_value(value)
            .map_err(|e| format!("column \"{}\": {}", self.name, e))?;
        if coerced.is_null() && !self.nullable {
            return Err(format!(
                "null value in column \"{}\" violates not-null constraint",
                self.name
            ));
        }
        Ok(coerced)
    }
}

/// Index definition of a dynamic table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexDefinition {
    /// Index name, suffixed to the table name
    pub name: String,

    /// Indexed columns, in order
    pub columns: Vec<String>,

    /// Creates a UNIQUE index
    #[serde(default)]
    pub unique: bool,
}

impl IndexDefinition {
    /// Non-unique index over `columns`
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            unique: false,
        }
    }

    /// Mark UNIQUE
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}
