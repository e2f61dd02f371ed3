//! CSV export of records

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::{Result, TableStoreError};
use crate::import::dotted::{flatten, get_path};
use crate::record::Record;
use crate::tenant::TableName;

/// Download name of an export of `table` taken at `now`
pub fn export_file_name(table: &TableName, now: DateTime<Utc>) -> String {
    format!("{}-{}.csv", table.table(), now.timestamp())
}

/// Render records as CSV
///
/// Records are flattened to dotted keys. Without explicit `headings` the
/// header is every flattened key in encounter order; a heading naming a
/// whole JSON column exports it as one JSON cell. Missing values and nulls
/// are empty cells; arrays and objects are written as JSON.
pub fn export_csv(records: &[Record], headings: Option<&[String]>) -> Result<Vec<u8>> {
    let rows: Vec<(Map<String, Value>, Map<String, Value>)> = records
        .iter()
        .map(|record| match record.to_json() {
            Value::Object(map) => (flatten(&map), map),
            _ => (Map::new(), Map::new()),
        })
        .collect();

    let headings: Vec<String> = match headings {
        Some(headings) => headings.to_vec(),
        None => {
            let mut keys: Vec<String> = Vec::new();
            for (flat, _) in &rows {
                for key in flat.keys() {
                    if !keys.contains(key) {
                        keys.push(key.clone());
                    }
                }
            }
            keys
        }
    };

    let mut writer = csv::Writer::from_writer(Vec::new());
    if !headings.is_empty() {
        writer.write_record(&headings)?;
    }
    for (flat, nested) in &rows {
        let cells: Vec<String> = headings
            .iter()
            .map(|heading| {
                flat.get(heading)
                    .or_else(|| get_path(nested, heading))
                    .map(cell)
                    .unwrap_or_default()
            })
            .collect();
        writer.write_record(&cells)?;
    }

    writer
        .into_inner()
        .map_err(|e| TableStoreError::Csv(csv::Error::from(e.into_error())))
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}
