//! PgRecordStore - PostgreSQL record repository
//!
//! Every tenant table is created from the store's [`TableSpec`] on first use.
//! Table existence is remembered for the configured TTL so hot paths skip the
//! DDL round trip.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Column, PgPool, Postgres, Row};

use crate::config::StoreConfig;
use crate::error::{Result, TableStoreError};
use crate::query::descriptor::{QueryDescriptor, SortSpec};
use crate::query::filter::FilterGroup;
use crate::record::Record;
use crate::repository::{Page, RecordRepository, RecordTransaction};
use crate::sql::condition::{
    SqlParams, build_condition_clause, build_order_by_clause, build_select_list,
    column_expression,
};
use crate::sql::ddl::DdlGenerator;
use crate::sql::sanitize::{quote_identifier, validate_spec};
use crate::table::{ID_COLUMN, TableSpec};
use crate::tenant::TableName;
use crate::types::{ColumnDefinition, ColumnType, value_to_text};

const UNIQUE_VIOLATION: &str = "23505";

/// Remembers which tables are known to exist
#[derive(Debug)]
pub struct TableCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, Instant>>,
}

impl TableCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Whether `table` was seen within the TTL; a stale entry is evicted
    pub fn is_fresh(&self, table: &str) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(table) {
            Some(seen) if seen.elapsed() < self.ttl => true,
            Some(_) => {
                entries.remove(table);
                false
            }
            None => false,
        }
    }

    /// Record `table` as existing, sweeping every expired entry
    pub fn remember(&self, table: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let ttl = self.ttl;
        entries.retain(|_, seen| seen.elapsed() < ttl);
        entries.insert(table.to_string(), Instant::now());
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn forget(&self, table: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(table);
    }
}

/// PostgreSQL-backed record repository
pub struct PgRecordStore {
    /// Database connection pool
    pool: PgPool,
    /// Store configuration
    config: StoreConfig,
    spec: TableSpec,
    cache: TableCache,
}

impl PgRecordStore {
    /// Connect using the configured database URL
    pub async fn new(config: StoreConfig) -> Result<Self> {
        let pool = PgPool::connect(&config.database_url).await.map_err(|e| {
            TableStoreError::Connection(format!("Database connection failed: {}", e))
        })?;

        Ok(Self::from_pool(pool, config))
    }

    /// Create a store from an existing pool
    ///
    /// Tables use the generic record layout keyed by `config.id_field`.
    pub fn from_pool(pool: PgPool, config: StoreConfig) -> Self {
        let spec = TableSpec::records(config.id_field.clone());
        let cache = TableCache::new(config.table_cache_ttl);
        Self {
            pool,
            config,
            spec,
            cache,
        }
    }

    /// Replace the table layout
    pub fn with_spec(mut self, spec: TableSpec) -> Result<Self> {
        validate_spec(&spec)?;
        self.spec = spec;
        Ok(self)
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Get a reference to the configuration
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn where_clause(&self, filters: &FilterGroup, params: &mut SqlParams) -> String {
        build_condition_clause(filters, &self.spec, params)
            .map(|condition| format!(" WHERE {}", condition))
            .unwrap_or_default()
    }

    fn order_clause(&self, sorts: &[SortSpec]) -> String {
        build_order_by_clause(sorts, &self.spec)
            .unwrap_or_else(|| format!("{} ASC", quote_identifier(ID_COLUMN)))
    }
}

impl RecordRepository for PgRecordStore {
    type Tx<'a> = PgTransaction<'a>;

    fn spec(&self) -> &TableSpec {
        &self.spec
    }

    async fn ensure_table(&self, table: &TableName) -> Result<()> {
        let name = table.physical();
        if self.cache.is_fresh(&name) {
            tracing::debug!(table = %name, "table cache hit");
            return Ok(());
        }

        let ddl = DdlGenerator::new(&self.spec);
        let mut tx = self.pool.begin().await?;
        sqlx::query(&ddl.generate_create_table(&name))
            .execute(&mut *tx)
            .await?;
        for statement in ddl.generate_create_indexes(&name) {
            sqlx::query(&statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        tracing::info!(table = %name, "ensured table");
        self.cache.remember(&name);
        Ok(())
    }

    async fn drop_table(&self, table: &TableName) -> Result<()> {
        let name = table.physical();
        let sql = DdlGenerator::new(&self.spec).generate_drop_table(&name);
        sqlx::query(&sql).execute(&self.pool).await?;
        self.cache.forget(&name);
        tracing::info!(table = %name, "dropped table");
        Ok(())
    }

    async fn truncate(&self, table: &TableName) -> Result<()> {
        let sql = DdlGenerator::new(&self.spec).generate_truncate(&table.physical());
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn begin(&self) -> Result<PgTransaction<'_>> {
        let tx = self.pool.begin().await?;
        Ok(PgTransaction {
            tx,
            spec: &self.spec,
        })
    }

    async fn find(&self, table: &TableName, field: &str, value: &str) -> Result<Option<Record>> {
        let Some(sql) = find_sql(&self.spec, table, field) else {
            return Ok(None);
        };
        let row = sqlx::query(&sql)
            .bind(value.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| row_to_record(&row, &self.spec)).transpose()
    }

    async fn paginate(&self, table: &TableName, descriptor: &QueryDescriptor) -> Result<Page> {
        let quoted_table = quote_identifier(&table.physical());
        let mut params = SqlParams::new();
        let where_clause = self.where_clause(&descriptor.filters, &mut params);

        let count_sql = format!("SELECT COUNT(*) FROM {}{}", quoted_table, where_clause);
        let select_sql = format!(
            "SELECT {} FROM {}{} ORDER BY {} LIMIT ${} OFFSET ${}",
            build_select_list(&descriptor.selected_columns, &self.spec),
            quoted_table,
            where_clause,
            self.order_clause(&descriptor.sorts),
            params.next_index(),
            params.next_index() + 1
        );

        let mut count_query = sqlx::query_as::<_, (i64,)>(&count_sql);
        for param in params.values() {
            count_query = count_query.bind(param.clone());
        }
        let (total,) = count_query.fetch_one(&self.pool).await?;

        let mut select_query = sqlx::query(&select_sql);
        for param in params.values() {
            select_query = select_query.bind(param.clone());
        }
        let rows = select_query
            .bind(i64::from(descriptor.page_size))
            .bind(i64::try_from(descriptor.offset()).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        let data = rows
            .iter()
            .map(|row| row_to_map(row, &self.spec))
            .collect();

        Ok(Page::new(
            descriptor,
            u64::try_from(total).unwrap_or_default(),
            data,
        ))
    }

    async fn select_all(
        &self,
        table: &TableName,
        filters: &FilterGroup,
        sorts: &[SortSpec],
    ) -> Result<Vec<Record>> {
        let mut params = SqlParams::new();
        let sql = format!(
            "SELECT * FROM {}{} ORDER BY {}",
            quote_identifier(&table.physical()),
            self.where_clause(filters, &mut params),
            self.order_clause(sorts)
        );

        let mut query = sqlx::query(&sql);
        for param in params.values() {
            query = query.bind(param.clone());
        }
        let rows = query.fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| row_to_record(row, &self.spec))
            .collect()
    }

    async fn delete_where(&self, table: &TableName, filters: &FilterGroup) -> Result<u64> {
        let mut params = SqlParams::new();
        let sql = format!(
            "DELETE FROM {}{}",
            quote_identifier(&table.physical()),
            self.where_clause(filters, &mut params)
        );

        let mut query = sqlx::query(&sql);
        for param in params.values() {
            query = query.bind(param.clone());
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

/// Transaction over a [`PgRecordStore`]
pub struct PgTransaction<'a> {
    tx: sqlx::Transaction<'static, Postgres>,
    spec: &'a TableSpec,
}

impl RecordTransaction for PgTransaction<'_> {
    async fn find(&mut self, table: &TableName, field: &str, value: &str) -> Result<Option<Record>> {
        let Some(sql) = find_sql(self.spec, table, field) else {
            return Ok(None);
        };
        let row = sqlx::query(&sql)
            .bind(value.to_string())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(|row| row_to_record(&row, self.spec)).transpose()
    }

    async fn insert(&mut self, table: &TableName, record: &mut Record) -> Result<()> {
        let quoted_table = quote_identifier(&table.physical());
        let values = coerce_attributes(self.spec, table, record.attributes().iter())?;

        let sql = if values.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES RETURNING *", quoted_table)
        } else {
            let columns: Vec<String> = values
                .iter()
                .map(|(col, _)| quote_identifier(&col.name))
                .collect();
            let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("${}", i)).collect();
            format!(
                "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
                quoted_table,
                columns.join(", "),
                placeholders.join(", ")
            )
        };

        let mut query = sqlx::query(&sql);
        for (col, value) in values {
            query = bind_value(query, &col.column_type, &col.name, value)?;
        }
        let row = query
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_write_error)?;

        let (id, attributes) = split_id(row_to_map(&row, self.spec))?;
        record.mark_saved(id, attributes);
        Ok(())
    }

    async fn update(&mut self, table: &TableName, record: &mut Record) -> Result<()> {
        let Some(id) = record.id() else {
            return Err(TableStoreError::database("cannot update a record that was never saved"));
        };
        let changes = record.changes();
        if changes.is_empty() {
            return Ok(());
        }

        let values = coerce_attributes(
            self.spec,
            table,
            changes.iter().map(|change| (&change.key, &change.new)),
        )?;
        let mut assignments: Vec<String> = values
            .iter()
            .enumerate()
            .map(|(i, (col, _))| format!("{} = ${}", quote_identifier(&col.name), i + 1))
            .collect();
        if self.spec.has_column("updated_at") && !changes.iter().any(|c| c.key == "updated_at") {
            assignments.push(format!("{} = NOW()", quote_identifier("updated_at")));
        }

        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ${} RETURNING *",
            quote_identifier(&table.physical()),
            assignments.join(", "),
            quote_identifier(ID_COLUMN),
            values.len() + 1
        );

        let mut query = sqlx::query(&sql);
        for (col, value) in values {
            query = bind_value(query, &col.column_type, &col.name, value)?;
        }
        let row = query
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_write_error)?
            .ok_or_else(|| TableStoreError::not_found(format!("{} id={}", table, id)))?;

        let (id, attributes) = split_id(row_to_map(&row, self.spec))?;
        record.mark_saved(id, attributes);
        Ok(())
    }

    async fn delete(&mut self, table: &TableName, record: &Record) -> Result<()> {
        let Some(id) = record.id() else {
            return Ok(());
        };
        let sql = format!(
            "DELETE FROM {} WHERE {} = $1",
            quote_identifier(&table.physical()),
            quote_identifier(ID_COLUMN)
        );
        sqlx::query(&sql).bind(id).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

/// `SELECT` of the first row whose `field` equals `$1` as text
fn find_sql(spec: &TableSpec, table: &TableName, field: &str) -> Option<String> {
    let column = spec.column_ref(field)?;
    Some(format!(
        "SELECT * FROM {} WHERE {}::text = $1 ORDER BY {} ASC LIMIT 1",
        quote_identifier(&table.physical()),
        column_expression(&column),
        quote_identifier(ID_COLUMN)
    ))
}

/// Coerce attributes to their columns; unknown columns fail like PostgreSQL
fn coerce_attributes<'s, 'v, I>(
    spec: &'s TableSpec,
    table: &TableName,
    attributes: I,
) -> Result<Vec<(&'s ColumnDefinition, Value)>>
where
    I: Iterator<Item = (&'v String, &'v Value)>,
{
    attributes
        .filter(|(key, _)| key.as_str() != ID_COLUMN)
        .map(|(key, value)| {
            let column = spec.column(key).ok_or_else(|| {
                TableStoreError::database(format!(
                    "column \"{}\" of relation \"{}\" does not exist",
                    key, table
                ))
            })?;
            let value = column.coerce(value).map_err(TableStoreError::database)?;
            Ok((column, value))
        })
        .collect()
}

fn map_write_error(error: sqlx::Error) -> TableStoreError {
    if let sqlx::Error::Database(db) = &error {
        if db.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return TableStoreError::conflict(db.message().to_string());
        }
    }
    TableStoreError::Sql(error)
}

fn split_id(mut row: Map<String, Value>) -> Result<(i64, Map<String, Value>)> {
    let id = row
        .get(ID_COLUMN)
        .and_then(Value::as_i64)
        .ok_or_else(|| TableStoreError::database("row has no surrogate id"))?;
    row.retain(|key, _| key != ID_COLUMN);
    Ok((id, row))
}

fn row_to_record(row: &PgRow, spec: &TableSpec) -> Result<Record> {
    let (id, attributes) = split_id(row_to_map(row, spec))?;
    Ok(Record::from_stored(id, attributes))
}

/// Spec columns present in the row, in spec order
fn row_to_map(row: &PgRow, spec: &TableSpec) -> Map<String, Value> {
    let present: Vec<&str> = row.columns().iter().map(|c| c.name()).collect();
    spec.columns()
        .iter()
        .filter(|col| present.contains(&col.name.as_str()))
        .map(|col| {
            (
                col.name.clone(),
                extract_column_value(row, col).unwrap_or(Value::Null),
            )
        })
        .collect()
}

fn extract_column_value(row: &PgRow, col: &ColumnDefinition) -> Option<Value> {
    match &col.column_type {
        ColumnType::String | ColumnType::Varchar { .. } => row
            .try_get::<Option<String>, _>(col.name.as_str())
            .ok()
            .flatten()
            .map(Value::String),
        ColumnType::Serial | ColumnType::Integer => row
            .try_get::<Option<i64>, _>(col.name.as_str())
            .ok()
            .flatten()
            .map(Value::from),
        ColumnType::Decimal { .. } => {
            use rust_decimal::prelude::ToPrimitive;
            row.try_get::<Option<rust_decimal::Decimal>, _>(col.name.as_str())
                .ok()
                .flatten()
                .and_then(|d| d.to_f64())
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
        }
        ColumnType::Boolean => row
            .try_get::<Option<bool>, _>(col.name.as_str())
            .ok()
            .flatten()
            .map(Value::Bool),
        ColumnType::Timestamp => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(col.name.as_str())
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_rfc3339())),
        ColumnType::Json => row
            .try_get::<Option<Value>, _>(col.name.as_str())
            .ok()
            .flatten(),
    }
}

/// Bind an already coerced value with the column's SQL type
fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    column_type: &ColumnType,
    column_name: &str,
    value: Value,
) -> Result<Query<'q, Postgres, PgArguments>> {
    let mismatch = |expected: &str| {
        TableStoreError::validation(format!("Column '{}' expected {}", column_name, expected))
    };

    Ok(match column_type {
        ColumnType::String | ColumnType::Varchar { .. } => query.bind(value_to_text(&value)),
        ColumnType::Serial | ColumnType::Integer => {
            if value.is_null() {
                query.bind(None::<i64>)
            } else {
                query.bind(value.as_i64().ok_or_else(|| mismatch("integer"))?)
            }
        }
        ColumnType::Decimal { .. } => {
            if value.is_null() {
                query.bind(None::<rust_decimal::Decimal>)
            } else {
                let text = value_to_text(&value).unwrap_or_default();
                let decimal = rust_decimal::Decimal::from_str(&text)
                    .or_else(|_| rust_decimal::Decimal::from_scientific(&text))
                    .map_err(|_| mismatch("decimal"))?;
                query.bind(decimal)
            }
        }
        ColumnType::Boolean => {
            if value.is_null() {
                query.bind(None::<bool>)
            } else {
                query.bind(value.as_bool().ok_or_else(|| mismatch("boolean"))?)
            }
        }
        ColumnType::Timestamp => {
            if value.is_null() {
                query.bind(None::<chrono::DateTime<chrono::Utc>>)
            } else {
                let text = value.as_str().ok_or_else(|| mismatch("timestamp string"))?;
                let timestamp = chrono::DateTime::parse_from_rfc3339(text)
                    .map_err(|_| mismatch("timestamp"))?
                    .with_timezone(&chrono::Utc);
                query.bind(timestamp)
            }
        }
        ColumnType::Json => {
            if value.is_null() {
                query.bind(None::<Value>)
            } else {
                query.bind(value)
            }
        }
    })
}
