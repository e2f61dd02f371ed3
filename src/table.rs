//! Column layout shared by every dynamic table
//!
//! All tenant tables are created from one [`TableSpec`]. The default spec is
//! the generic record table: a surrogate key, a public id, a schedule window,
//! four JSON documents and bookkeeping columns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{ColumnDefinition, ColumnType, IndexDefinition, parse_timestamp};

/// Surrogate key column
pub const ID_COLUMN: &str = "id";
/// Columns managed by the repository, never written by callers
pub const MANAGED_COLUMNS: &[&str] = &["id", "created_at", "updated_at"];

const STARTED_AT: &str = "started_at";
const ENDED_AT: &str = "ended_at";

/// A column named by a filter or sort, possibly a path into a JSON column
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef<'a> {
    pub column: &'a ColumnDefinition,
    /// Path segments inside a JSON column; empty for the column itself
    pub path: Vec<&'a str>,
}

impl ColumnRef<'_> {
    /// Whether this names a value nested in a JSON document
    pub fn is_nested(&self) -> bool {
        !self.path.is_empty()
    }
}

/// Columns and indexes of a dynamic table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    id_field: String,
    columns: Vec<ColumnDefinition>,
    indexes: Vec<IndexDefinition>,
}

impl Default for TableSpec {
    fn default() -> Self {
        Self::records("uid")
    }
}

impl TableSpec {
    /// An empty spec holding only the surrogate key and `id_field`
    pub fn new(id_field: impl Into<String>) -> Self {
        let id_field = id_field.into();
        Self {
            columns: vec![
                ColumnDefinition::new(ID_COLUMN, ColumnType::Serial).not_null(),
                ColumnDefinition::new(id_field.clone(), ColumnType::varchar(50))
                    .not_null()
                    .unique(),
            ],
            indexes: Vec::new(),
            id_field,
        }
    }

    /// The generic record table
    pub fn records(id_field: impl Into<String>) -> Self {
        Self::new(id_field)
            .with_column(ColumnDefinition::new(STARTED_AT, ColumnType::Timestamp))
            .with_column(ColumnDefinition::new(ENDED_AT, ColumnType::Timestamp))
            .with_column(ColumnDefinition::new("private", ColumnType::Json))
            .with_column(ColumnDefinition::new("public", ColumnType::Json))
            .with_column(ColumnDefinition::new("meta", ColumnType::Json))
            .with_column(ColumnDefinition::new("data", ColumnType::Json))
            .with_column(ColumnDefinition::new("import_id", ColumnType::String))
            .with_column(
                ColumnDefinition::new("created_at", ColumnType::Timestamp).default("NOW()"),
            )
            .with_column(
                ColumnDefinition::new("updated_at", ColumnType::Timestamp).default("NOW()"),
            )
            .with_index(IndexDefinition::new(
                "started_at",
                vec![STARTED_AT.to_string()],
            ))
            .with_index(IndexDefinition::new("ended_at", vec![ENDED_AT.to_string()]))
            .with_index(IndexDefinition::new(
                "import_id",
                vec!["import_id".to_string()],
            ))
    }

    /// Add or replace a column
    pub fn with_column(mut self, column: ColumnDefinition) -> Self {
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(existing) => *existing = column,
            None => self.columns.push(column),
        }
        self
    }

    pub fn with_index(mut self, index: IndexDefinition) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    pub fn indexes(&self) -> &[IndexDefinition] {
        &self.indexes
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Keep only attributes naming a writable column
    ///
    /// Unknown keys and the managed columns are dropped.
    pub fn fillable(&self, attributes: Map<String, Value>) -> Map<String, Value> {
        attributes
            .into_iter()
            .filter(|(key, _)| self.has_column(key) && !MANAGED_COLUMNS.contains(&key.as_str()))
            .collect()
    }

    /// Resolve a possibly dotted column name
    ///
    /// `data.color.name` resolves to the `data` JSON column with path
    /// `["color", "name"]`. Paths into non-JSON columns, unknown columns and
    /// path segments outside `[A-Za-z0-9_-]` resolve to `None`.
    pub fn column_ref<'a>(&'a self, name: &'a str) -> Option<ColumnRef<'a>> {
        if let Some(column) = self.column(name) {
            return Some(ColumnRef {
                column,
                path: Vec::new(),
            });
        }

        let mut segments = name.split('.');
        let column = self.column(segments.next()?)?;
        if column.column_type != ColumnType::Json {
            return None;
        }

        let path: Vec<&str> = segments.collect();
        let valid = path.iter().all(|s| {
            !s.is_empty()
                && s.chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        });
        if path.is_empty() || !valid {
            return None;
        }

        Some(ColumnRef { column, path })
    }

    /// Prepare attributes of a record about to be inserted
    ///
    /// Assigns a UUID v4 id when none is given, defaults `started_at` to now
    /// and truncates the schedule window to the start of its day.
    pub fn prepare_insert(&self, attributes: &mut Map<String, Value>) {
        let missing_id = match attributes.get(&self.id_field) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(_) => false,
        };
        if missing_id {
            attributes.insert(
                self.id_field.clone(),
                Value::String(uuid::Uuid::new_v4().to_string()),
            );
        }

        if self.has_column(STARTED_AT)
            && attributes.get(STARTED_AT).is_none_or(Value::is_null)
        {
            attributes.insert(
                STARTED_AT.to_string(),
                Value::String(Utc::now().to_rfc3339()),
            );
        }

        self.prepare_update(attributes);
    }

    /// Prepare attributes of a record about to be updated
    ///
    /// Truncates `started_at` and `ended_at` to the start of their day.
    /// Values that do not parse are left for the repository to reject.
    pub fn prepare_update(&self, attributes: &mut Map<String, Value>) {
        for key in [STARTED_AT, ENDED_AT] {
            if !self.has_column(key) {
                continue;
            }
            let parsed = attributes
                .get(key)
                .and_then(Value::as_str)
                .and_then(parse_timestamp);
            if let Some(ts) = parsed {
                attributes.insert(key.to_string(), Value::String(start_of_day(ts).to_rfc3339()));
            }
        }
    }
}

fn start_of_day(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|d| d.and_utc())
        .unwrap_or(ts)
}
