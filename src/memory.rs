//! In-memory record repository
//!
//! Answers the same contract as [`crate::store::PgRecordStore`] without a
//! database: columns are coerced with the column types, NOT NULL and UNIQUE
//! are enforced, and named check constraints can be added to simulate
//! persistence failures.
//!
//! A transaction holds the store lock until it commits or rolls back and
//! works on copies of the tables it touches, so a rollback leaves no trace.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, MutexGuard};

use crate::error::{Result, TableStoreError};
use crate::query::descriptor::{QueryDescriptor, SortSpec};
use crate::query::eval;
use crate::query::filter::FilterGroup;
use crate::record::Record;
use crate::repository::{Page, RecordRepository, RecordTransaction};
use crate::sql::sanitize::validate_spec;
use crate::table::{ID_COLUMN, TableSpec};
use crate::tenant::TableName;
use crate::types::{ColumnType, value_to_text};

type Check = Arc<dyn Fn(&Map<String, Value>) -> bool + Send + Sync>;

#[derive(Debug, Clone)]
struct MemoryTable {
    next_id: i64,
    rows: BTreeMap<i64, Map<String, Value>>,
}

impl Default for MemoryTable {
    fn default() -> Self {
        Self {
            next_id: 1,
            rows: BTreeMap::new(),
        }
    }
}

type Tables = HashMap<String, MemoryTable>;

/// Record repository kept in process memory
pub struct MemoryStore {
    spec: TableSpec,
    tables: Mutex<Tables>,
    checks: Vec<(String, Check)>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// A store using the default record layout
    pub fn new() -> Self {
        Self {
            spec: TableSpec::default(),
            tables: Mutex::new(HashMap::new()),
            checks: Vec::new(),
        }
    }

    /// A store using a custom layout
    pub fn with_spec(spec: TableSpec) -> Result<Self> {
        validate_spec(&spec)?;
        Ok(Self {
            spec,
            ..Self::new()
        })
    }

    /// Add a named check every written row must pass
    pub fn with_check<F>(mut self, name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> bool + Send + Sync + 'static,
    {
        self.checks.push((name.into(), Arc::new(check)));
        self
    }

    /// Physical names of the existing tables, sorted
    pub async fn table_names(&self) -> Vec<String> {
        let tables = self.tables.lock().await;
        let mut names: Vec<String> = tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of rows in a table, zero when it does not exist
    pub async fn row_count(&self, table: &TableName) -> usize {
        let tables = self.tables.lock().await;
        tables
            .get(&table.physical())
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }

    /// Filter groups with clauses on unknown columns removed
    fn known_filters(&self, filters: &FilterGroup) -> FilterGroup {
        let mut known = FilterGroup::new();
        for group in filters.groups() {
            known.push_group(
                group
                    .iter()
                    .filter(|clause| self.spec.column_ref(&clause.column).is_some())
                    .cloned()
                    .collect(),
            );
        }
        known
    }

    fn known_sorts(&self, sorts: &[SortSpec]) -> Vec<SortSpec> {
        sorts
            .iter()
            .filter(|sort| self.spec.column_ref(&sort.column).is_some())
            .cloned()
            .collect()
    }

    /// Matching rows as JSON objects, surrogate id first, in query order
    fn matching_rows(
        &self,
        table: &MemoryTable,
        filters: &FilterGroup,
        sorts: &[SortSpec],
    ) -> Vec<Map<String, Value>> {
        let filters = self.known_filters(filters);
        let mut rows: Vec<Map<String, Value>> = table
            .rows
            .iter()
            .map(|(id, attributes)| stored_row(*id, attributes))
            .filter(|row| eval::matches(&filters, row))
            .collect();
        eval::sort_rows(&mut rows, &self.known_sorts(sorts));
        rows
    }

    fn find_in(table: &MemoryTable, field: &str, value: &str) -> Option<Record> {
        table.rows.iter().find_map(|(id, attributes)| {
            let matched = eval::lookup(attributes, field)
                .and_then(value_to_text)
                .is_some_and(|text| text == value);
            matched.then(|| Record::from_stored(*id, attributes.clone()))
        })
    }

    /// Coerce, complete and constrain a row before it is stored
    fn write_row(
        &self,
        table_name: &str,
        table: &mut MemoryTable,
        id: Option<i64>,
        attributes: &Map<String, Value>,
    ) -> Result<(i64, Map<String, Value>)> {
        let now = Value::String(Utc::now().to_rfc3339());

        let mut row = match id {
            Some(id) => table.rows.get(&id).cloned().ok_or_else(|| {
                TableStoreError::not_found(format!("{} id={}", table_name, id))
            })?,
            None => self
                .spec
                .columns()
                .iter()
                .filter(|c| c.name != ID_COLUMN)
                .map(|c| {
                    let value = match c.default_value.as_deref() {
                        Some(expr) => default_value(expr, &now),
                        None => Value::Null,
                    };
                    (c.name.clone(), value)
                })
                .collect(),
        };

        for (key, value) in attributes {
            let column = self.spec.column(key).ok_or_else(|| {
                TableStoreError::database(format!(
                    "column \"{}\" of relation \"{}\" does not exist",
                    key, table_name
                ))
            })?;
            let coerced = column
                .coerce(value)
                .map_err(TableStoreError::database)?;
            row.insert(key.clone(), coerced);
        }

        if id.is_some() && self.spec.has_column("updated_at") {
            row.insert("updated_at".to_string(), now.clone());
        }

        for column in self.spec.columns() {
            if column.column_type == ColumnType::Serial || column.nullable {
                continue;
            }
            if row.get(&column.name).is_none_or(Value::is_null) {
                return Err(TableStoreError::database(format!(
                    "null value in column \"{}\" of relation \"{}\" violates not-null constraint",
                    column.name, table_name
                )));
            }
        }

        for column in self.spec.columns().iter().filter(|c| c.unique) {
            let Some(text) = row.get(&column.name).and_then(value_to_text) else {
                continue;
            };
            let duplicate = table.rows.iter().any(|(other_id, other)| {
                Some(*other_id) != id
                    && other.get(&column.name).and_then(value_to_text).as_deref() == Some(text.as_str())
            });
            if duplicate {
                return Err(TableStoreError::conflict(format!(
                    "duplicate key value violates unique constraint \"{}_{}_key\"",
                    table_name, column.name
                )));
            }
        }

        for (name, check) in &self.checks {
            if !check(&row) {
                return Err(TableStoreError::database(format!(
                    "new row for relation \"{}\" violates check constraint \"{}\"",
                    table_name, name
                )));
            }
        }

        let id = match id {
            Some(id) => id,
            None => {
                let id = table.next_id;
                table.next_id += 1;
                id
            }
        };
        table.rows.insert(id, row.clone());
        Ok((id, row))
    }
}

fn table_mut<'t>(tables: &'t mut Tables, table: &TableName) -> Result<&'t mut MemoryTable> {
    tables.get_mut(&table.physical()).ok_or_else(|| missing_relation(table))
}

fn missing_relation(table: &TableName) -> TableStoreError {
    TableStoreError::database(format!("relation \"{}\" does not exist", table))
}

fn stored_row(id: i64, attributes: &Map<String, Value>) -> Map<String, Value> {
    match Record::from_stored(id, attributes.clone()).to_json() {
        Value::Object(row) => row,
        _ => Map::new(),
    }
}

/// Value of a column default expression
fn default_value(expr: &str, now: &Value) -> Value {
    let expr = expr.trim();
    if expr.eq_ignore_ascii_case("now()") || expr.eq_ignore_ascii_case("current_timestamp") {
        return now.clone();
    }
    if let Some(text) = expr.strip_prefix('\'').and_then(|e| e.strip_suffix('\'')) {
        return Value::String(text.replace("''", "'"));
    }
    serde_json::from_str(&expr.to_lowercase()).unwrap_or_else(|_| Value::String(expr.to_string()))
}

impl RecordRepository for MemoryStore {
    type Tx<'a> = MemoryTransaction<'a>;

    fn spec(&self) -> &TableSpec {
        &self.spec
    }

    async fn ensure_table(&self, table: &TableName) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.entry(table.physical()).or_insert_with(|| {
            tracing::info!(table = %table, "created table");
            MemoryTable::default()
        });
        Ok(())
    }

    async fn drop_table(&self, table: &TableName) -> Result<()> {
        self.tables.lock().await.remove(&table.physical());
        Ok(())
    }

    async fn truncate(&self, table: &TableName) -> Result<()> {
        let mut tables = self.tables.lock().await;
        *table_mut(&mut tables, table)? = MemoryTable::default();
        Ok(())
    }

    async fn begin(&self) -> Result<MemoryTransaction<'_>> {
        let guard = self.tables.lock().await;
        Ok(MemoryTransaction {
            store: self,
            guard,
            working: Tables::new(),
        })
    }

    async fn find(&self, table: &TableName, field: &str, value: &str) -> Result<Option<Record>> {
        let mut tables = self.tables.lock().await;
        let table = table_mut(&mut tables, table)?;
        Ok(Self::find_in(table, field, value))
    }

    async fn paginate(&self, table: &TableName, descriptor: &QueryDescriptor) -> Result<Page> {
        let mut tables = self.tables.lock().await;
        let table = table_mut(&mut tables, table)?;
        let rows = self.matching_rows(table, &descriptor.filters, &descriptor.sorts);
        let total = rows.len() as u64;

        let mut columns: Vec<String> = descriptor
            .selected_columns
            .iter()
            .filter(|c| *c == "*" || self.spec.has_column(c))
            .cloned()
            .collect();
        if columns.is_empty() {
            columns.push("*".to_string());
        }

        let data = rows
            .into_iter()
            .skip(usize::try_from(descriptor.offset()).unwrap_or(usize::MAX))
            .take(descriptor.page_size as usize)
            .map(|row| eval::project(row, &columns))
            .collect();

        Ok(Page::new(descriptor, total, data))
    }

    async fn select_all(
        &self,
        table: &TableName,
        filters: &FilterGroup,
        sorts: &[SortSpec],
    ) -> Result<Vec<Record>> {
        let mut tables = self.tables.lock().await;
        let table = table_mut(&mut tables, table)?;
        Ok(self
            .matching_rows(table, filters, sorts)
            .into_iter()
            .filter_map(|row| {
                let id = row.get(ID_COLUMN).and_then(Value::as_i64)?;
                Some(Record::from_stored(id, row))
            })
            .collect())
    }

    async fn delete_where(&self, table: &TableName, filters: &FilterGroup) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let table = table_mut(&mut tables, table)?;
        let filters = self.known_filters(filters);
        let before = table.rows.len();
        table
            .rows
            .retain(|id, attributes| !eval::matches(&filters, &stored_row(*id, attributes)));
        Ok((before - table.rows.len()) as u64)
    }
}

/// Transaction over a [`MemoryStore`]
pub struct MemoryTransaction<'a> {
    store: &'a MemoryStore,
    guard: MutexGuard<'a, Tables>,
    working: Tables,
}

impl MemoryTransaction<'_> {
    /// Working copy of `table`, taken from the store on first use
    fn working_table(&mut self, table: &TableName) -> Result<&mut MemoryTable> {
        let name = table.physical();
        if !self.working.contains_key(&name) {
            let original = self.guard.get(&name).ok_or_else(|| missing_relation(table))?;
            self.working.insert(name, original.clone());
        }
        table_mut(&mut self.working, table)
    }

    /// Number of tables copied into this transaction
    pub fn touched_tables(&self) -> usize {
        self.working.len()
    }
}

impl RecordTransaction for MemoryTransaction<'_> {
    async fn find(&mut self, table: &TableName, field: &str, value: &str) -> Result<Option<Record>> {
        let table = self.working_table(table)?;
        Ok(MemoryStore::find_in(table, field, value))
    }

    async fn insert(&mut self, table: &TableName, record: &mut Record) -> Result<()> {
        let name = table.physical();
        let store = self.store;
        let memory_table = self.working_table(table)?;
        let (id, row) = store.write_row(&name, memory_table, None, record.attributes())?;
        record.mark_saved(id, row);
        Ok(())
    }

    async fn update(&mut self, table: &TableName, record: &mut Record) -> Result<()> {
        let Some(id) = record.id() else {
            return Err(TableStoreError::database("cannot update a record that was never saved"));
        };
        let name = table.physical();
        let store = self.store;
        let memory_table = self.working_table(table)?;
        let (id, row) = store.write_row(&name, memory_table, Some(id), record.attributes())?;
        record.mark_saved(id, row);
        Ok(())
    }

    async fn delete(&mut self, table: &TableName, record: &Record) -> Result<()> {
        let memory_table = self.working_table(table)?;
        if let Some(id) = record.id() {
            memory_table.rows.remove(&id);
        }
        Ok(())
    }

    async fn commit(mut self) -> Result<()> {
        let working = std::mem::take(&mut self.working);
        self.guard.extend(working);
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::descriptor::QueryParams;
    use serde_json::json;

    fn table() -> TableName {
        TableName::new("acme", "orders").unwrap()
    }

    fn attrs(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    async fn seeded(rows: &[Value]) -> MemoryStore {
        let store = MemoryStore::new();
        store.ensure_table(&table()).await.unwrap();
        let mut tx = store.begin().await.unwrap();
        for row in rows {
            let mut record = Record::new(attrs(row.clone()));
            tx.insert(&table(), &mut record).await.unwrap();
        }
        tx.commit().await.unwrap();
        store
    }

    // =========================================================================
    // Write Tests
    // =========================================================================

    #[tokio::test]
    async fn test_insert_assigns_ids_and_timestamps() {
        let store = seeded(&[json!({ "uid": "a" }), json!({ "uid": "b" })]).await;
        let record = store.find(&table(), "uid", "b").await.unwrap().unwrap();
        assert_eq!(record.id(), Some(2));
        assert!(record.get("created_at").unwrap().is_string());
        assert_eq!(record.get("data"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_duplicate_uid_is_conflict() {
        let store = seeded(&[json!({ "uid": "a" })]).await;
        let mut tx = store.begin().await.unwrap();
        let mut record = Record::new(attrs(json!({ "uid": "a" })));
        let err = tx.insert(&table(), &mut record).await.unwrap_err();
        assert_eq!(err.status_code(), 409);
    }

    #[tokio::test]
    async fn test_unknown_column_and_bad_type_fail() {
        let store = seeded(&[]).await;
        let mut tx = store.begin().await.unwrap();

        let mut record = Record::new(attrs(json!({ "uid": "a", "nope": 1 })));
        assert!(tx.insert(&table(), &mut record).await.is_err());

        let mut record = Record::new(attrs(json!({ "uid": "b", "started_at": "soon" })));
        assert!(tx.insert(&table(), &mut record).await.is_err());
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let store = seeded(&[]).await;
        let mut tx = store.begin().await.unwrap();
        let mut record = Record::new(attrs(json!({ "uid": "a" })));
        tx.insert(&table(), &mut record).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(store.row_count(&table()).await, 0);
    }

    #[tokio::test]
    async fn test_transaction_copies_only_touched_tables() {
        let store = seeded(&[json!({ "uid": "a" })]).await;
        let other = TableName::new("globex", "orders").unwrap();
        store.ensure_table(&other).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.touched_tables(), 0);
        let mut record = Record::new(attrs(json!({ "uid": "b" })));
        tx.insert(&table(), &mut record).await.unwrap();
        assert_eq!(tx.touched_tables(), 1);
        tx.commit().await.unwrap();

        assert_eq!(store.row_count(&table()).await, 2);
        assert_eq!(store.row_count(&other).await, 0);
    }

    #[tokio::test]
    async fn test_check_constraint() {
        let store = MemoryStore::new().with_check("no_bad", |row| {
            row.get("uid").and_then(Value::as_str) != Some("bad")
        });
        store.ensure_table(&table()).await.unwrap();
        let mut tx = store.begin().await.unwrap();
        let mut record = Record::new(attrs(json!({ "uid": "bad" })));
        let err = tx.insert(&table(), &mut record).await.unwrap_err();
        assert!(err.to_string().contains("no_bad"));
    }

    #[tokio::test]
    async fn test_update_changes_attributes() {
        let store = seeded(&[json!({ "uid": "a", "data": { "x": 1 } })]).await;
        let mut tx = store.begin().await.unwrap();
        let mut record = tx.find(&table(), "uid", "a").await.unwrap().unwrap();
        record.fill(attrs(json!({ "data": { "x": 2 } })));
        tx.update(&table(), &mut record).await.unwrap();
        tx.commit().await.unwrap();

        let record = store.find(&table(), "uid", "a").await.unwrap().unwrap();
        assert_eq!(record.get("data"), Some(&json!({ "x": 2 })));
        assert_eq!(store.row_count(&table()).await, 1);
    }

    #[tokio::test]
    async fn test_missing_table_is_error() {
        let store = MemoryStore::new();
        assert!(store.find(&table(), "uid", "a").await.is_err());
    }

    // =========================================================================
    // Query Tests
    // =========================================================================

    #[tokio::test]
    async fn test_paginate_filters_sorts_and_projects() {
        let store = seeded(&[
            json!({ "uid": "a", "data": { "n": 3 } }),
            json!({ "uid": "b", "data": { "n": 1 } }),
            json!({ "uid": "c", "data": { "n": 2 } }),
        ])
        .await;

        let params = QueryParams::parse("filter[]=data.n:gte:2&sort[]=data.n:asc&select=uid,nope");
        let descriptor = QueryDescriptor::build(&params, "GET");
        let page = store.paginate(&table(), &descriptor).await.unwrap();

        assert_eq!(page.total, 2);
        assert_eq!(
            page.data,
            vec![attrs(json!({ "uid": "c" })), attrs(json!({ "uid": "a" }))]
        );
    }

    #[tokio::test]
    async fn test_unknown_filter_column_is_ignored() {
        let store = seeded(&[json!({ "uid": "a" }), json!({ "uid": "b" })]).await;
        let descriptor = QueryDescriptor::build(&QueryParams::parse("filter[]=nope:eq:1"), "GET");
        let page = store.paginate(&table(), &descriptor).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.data[0]["id"], json!(1));
    }

    #[tokio::test]
    async fn test_delete_where() {
        let store = seeded(&[json!({ "uid": "a" }), json!({ "uid": "b" })]).await;
        let descriptor = QueryDescriptor::build(&QueryParams::parse("filter[]=uid:eq:a"), "DELETE");
        let deleted = store.delete_where(&table(), &descriptor.filters).await.unwrap();
        assert_eq!(deleted, 1);

        let deleted = store.delete_where(&table(), &FilterGroup::new()).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.row_count(&table()).await, 0);
    }

    #[tokio::test]
    async fn test_truncate_restarts_ids() {
        let store = seeded(&[json!({ "uid": "a" })]).await;
        store.truncate(&table()).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let mut record = Record::new(attrs(json!({ "uid": "z" })));
        tx.insert(&table(), &mut record).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(record.id(), Some(1));
    }

    #[tokio::test]
    async fn test_drop_table() {
        let store = seeded(&[]).await;
        assert_eq!(store.table_names().await, vec!["acme$orders".to_string()]);
        store.drop_table(&table()).await.unwrap();
        assert!(store.table_names().await.is_empty());
    }
}
