//! CSV import validation
//!
//! Reads every row before anything is persisted. Each cell is trimmed, the
//! null tokens become null and numeric strings become numbers. The first row
//! over the limit or failing its rules aborts the whole import.

use std::io::Read;

use serde_json::{Map, Number, Value};

use crate::error::{Result, TableStoreError};
use crate::import::dotted::undot;
use crate::import::rules::FieldRules;
use crate::query::descriptor::is_numeric;
use crate::types::value_to_text;

/// Cell values read as null, compared case-insensitively after trimming
pub const NULL_TOKENS: &[&str] = &["null", "nil", "undefined"];

/// Column holding the batch identifier on every imported record
pub const IMPORT_ID_COLUMN: &str = "import_id";

/// One validated CSV row
#[derive(Debug, Clone, PartialEq)]
pub struct ImportRow {
    /// 1-based, counting from the first data row
    pub row_number: usize,
    /// Normalized cells keyed by their (possibly dotted) header
    pub values: Map<String, Value>,
    pub import_id: String,
}

impl ImportRow {
    /// The row un-dotted into record attributes, tagged with the import id
    pub fn attributes(&self) -> Map<String, Value> {
        let mut attributes = undot(&self.values);
        attributes.insert(
            IMPORT_ID_COLUMN.to_string(),
            Value::String(self.import_id.clone()),
        );
        attributes
    }

    /// Value of the id column as text, if present and not blank
    pub fn id(&self, id_field: &str) -> Option<String> {
        self.values
            .get(id_field)
            .and_then(value_to_text)
            .filter(|id| !id.trim().is_empty())
    }

    /// The raw row as JSON, as reported in errors
    pub fn to_json(&self) -> Value {
        Value::Object(self.values.clone())
    }
}

/// Normalize one cell
pub fn normalize_cell(raw: &str) -> Value {
    let trimmed = raw.trim();
    let lowered = trimmed.to_lowercase();
    if NULL_TOKENS.contains(&lowered.as_str()) {
        return Value::Null;
    }

    if is_numeric(trimmed) {
        if let Ok(n) = trimmed.parse::<i64>() {
            return Value::Number(n.into());
        }
        if let Some(n) = trimmed.parse::<f64>().ok().and_then(Number::from_f64) {
            return Value::Number(n);
        }
    }

    Value::String(trimmed.to_string())
}

/// Validates import rows against field rules and a row limit
#[derive(Debug, Clone)]
pub struct ImportValidator<'a> {
    rules: &'a FieldRules,
    limit: usize,
}

impl<'a> ImportValidator<'a> {
    pub fn new(rules: &'a FieldRules, limit: usize) -> Self {
        Self { rules, limit }
    }

    /// Validate a CSV stream whose first line is the header
    pub fn validate_csv<R: Read>(&self, source: R, import_id: &str) -> Result<Vec<ImportRow>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(source);
        let headers = reader.headers()?.clone();

        let records = reader.records().map(|record| -> Result<Vec<(String, String)>> {
            let record = record?;
            Ok(headers
                .iter()
                .zip(record.iter())
                .map(|(header, cell)| (header.trim().to_string(), cell.to_string()))
                .collect::<Vec<_>>())
        });
        self.validate_records(records, import_id)
    }

    /// Validate rows already split into `(header, cell)` pairs
    ///
    /// Runs without I/O, so fixtures can be fed straight in.
    pub fn validate_records<I, K, V>(&self, records: I, import_id: &str) -> Result<Vec<ImportRow>>
    where
        I: IntoIterator<Item = Result<Vec<(K, V)>>>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let mut rows = Vec::new();

        for (index, record) in records.into_iter().enumerate() {
            let row_number = index + 1;
            let values: Map<String, Value> = record?
                .into_iter()
                .map(|(header, cell)| (header.into(), normalize_cell(cell.as_ref())))
                .collect();

            if row_number > self.limit {
                tracing::debug!(limit = self.limit, "import exceeds the row limit");
                return Err(TableStoreError::ImportLimit {
                    limit: self.limit,
                    count: row_number,
                });
            }

            if !self.rules.is_empty() {
                let errors = self.rules.validate(&values);
                if !errors.is_empty() {
                    tracing::debug!(row_number, fields = errors.len(), "import row failed validation");
                    return Err(TableStoreError::RowValidation {
                        row_number,
                        row: Value::Object(values),
                        errors,
                    });
                }
            }

            rows.push(ImportRow {
                row_number,
                values,
                import_id: import_id.to_string(),
            });
        }

        Ok(rows)
    }
}
