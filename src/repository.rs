//! Data-access traits
//!
//! The service and the import engine talk to storage only through these
//! traits. [`crate::store::PgRecordStore`] implements them on PostgreSQL and
//! [`crate::memory::MemoryStore`] in memory.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::query::descriptor::{QueryDescriptor, SortSpec};
use crate::query::filter::FilterGroup;
use crate::record::Record;
use crate::table::TableSpec;
use crate::tenant::TableName;

/// One page of rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub current_page: u32,
    pub per_page: u32,
    pub total: u64,
    pub last_page: u64,
    /// 1-based position of the first row on this page, `None` when empty
    pub from: Option<u64>,
    /// 1-based position of the last row on this page, `None` when empty
    pub to: Option<u64>,
    pub data: Vec<Map<String, Value>>,
}

impl Page {
    /// Assemble a page from the rows of `descriptor`'s page and the total
    pub fn new(descriptor: &QueryDescriptor, total: u64, data: Vec<Map<String, Value>>) -> Self {
        let per_page = descriptor.page_size.max(1);
        let offset = descriptor.offset();
        let (from, to) = if data.is_empty() {
            (None, None)
        } else {
            (Some(offset + 1), Some(offset + data.len() as u64))
        };

        Self {
            current_page: descriptor.page,
            per_page,
            total,
            last_page: total.div_ceil(u64::from(per_page)).max(1),
            from,
            to,
            data,
        }
    }
}

/// Result of a list request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ListOutcome {
    Page(Page),
    /// Rows removed by a DELETE list request
    Deleted(u64),
}

/// Unit of work over one or more tables
///
/// Dropping a transaction without committing discards its writes.
#[allow(async_fn_in_trait)]
pub trait RecordTransaction {
    /// First record whose `field` equals `value` as text
    async fn find(&mut self, table: &TableName, field: &str, value: &str) -> Result<Option<Record>>;

    /// Insert a new record and write back its id and stored attributes
    async fn insert(&mut self, table: &TableName, record: &mut Record) -> Result<()>;

    /// Persist the changed attributes of a stored record
    async fn update(&mut self, table: &TableName, record: &mut Record) -> Result<()>;

    async fn delete(&mut self, table: &TableName, record: &Record) -> Result<()>;

    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}

/// Storage of tenant tables
#[allow(async_fn_in_trait)]
pub trait RecordRepository {
    type Tx<'a>: RecordTransaction
    where
        Self: 'a;

    /// Layout every table is created with
    fn spec(&self) -> &TableSpec;

    /// Create the table when missing
    async fn ensure_table(&self, table: &TableName) -> Result<()>;

    async fn drop_table(&self, table: &TableName) -> Result<()>;

    /// Remove every row and restart the surrogate key
    async fn truncate(&self, table: &TableName) -> Result<()>;

    async fn begin(&self) -> Result<Self::Tx<'_>>;

    /// First record whose `field` equals `value` as text
    async fn find(&self, table: &TableName, field: &str, value: &str) -> Result<Option<Record>>;

    /// Rows of the descriptor's page with the total match count
    async fn paginate(&self, table: &TableName, descriptor: &QueryDescriptor) -> Result<Page>;

    /// Every matching record, unpaginated
    async fn select_all(
        &self,
        table: &TableName,
        filters: &FilterGroup,
        sorts: &[SortSpec],
    ) -> Result<Vec<Record>>;

    /// Delete every matching row; an empty filter deletes all rows
    async fn delete_where(&self, table: &TableName, filters: &FilterGroup) -> Result<u64>;
}
