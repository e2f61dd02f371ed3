//! # runtara-table-store
//!
//! Multi-tenant dynamic tables on PostgreSQL.
//!
//! Every tenant gets its own physical table per logical table name
//! (`tenant$table`), created on first use. Tables are read and written
//! through a URL query grammar, bulk loaded from CSV in a single
//! transaction and exported back to CSV.
//!
//! ## Features
//!
//! - **Query Grammar**: `filter[]=col:op:value`, `sort[]=col:dir`, `select`, `limit`/`per_page`/`page`
//! - **Transactional CSV Import**: validate every row first, then upsert all rows or none
//! - **Tenant Isolation**: deterministic `tenant$table` physical names
//! - **Auditing**: per-record change logs and aggregate import events through a pluggable sink
//! - **SQL Injection Prevention**: identifiers are quoted and every value is a bound parameter
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use runtara_table_store::{
//!     FieldRules, PgRecordStore, QueryParams, RequestContext, StoreConfig, TableService,
//!     TracingAuditSink,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = StoreConfig::builder("postgres://localhost/mydb").build();
//!     let store = PgRecordStore::new(config.clone()).await?;
//!     let service = TableService::new(store, TracingAuditSink, config)?;
//!
//!     let ctx = RequestContext::new("POST", "/orders/import").tenant("acme");
//!     let csv = "uid,data.color,data.qty\na-1,red,3\na-2,blue,5\n";
//!     let response = service
//!         .import(&ctx, "orders", csv.as_bytes(), &FieldRules::new())
//!         .await?;
//!     println!("inserted {:?}", response.inserted);
//!
//!     let ctx = RequestContext::new("GET", "/orders").tenant("acme");
//!     let params = QueryParams::parse("filter[]=data.qty:gte:4&sort[]=uid:desc&limit=10");
//!     let page = service.list(&ctx, "orders", &params).await?;
//!     println!("{}", serde_json::to_string(&page)?);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! ```rust
//! use runtara_table_store::StoreConfig;
//!
//! let config = StoreConfig::builder("postgres://localhost/mydb")
//!     .id_field("uid")          // Public record identifier (default)
//!     .import_limit(5000)       // Rows accepted per import
//!     .default_page_size(15)    // Page size without limit/per_page
//!     .without_audit()          // Disable audit events
//!     .build();
//! ```
//!
//! ## Multi-Tenancy
//!
//! Tenants share one database. The tenant is part of every physical table
//! name; it comes from the [`RequestContext`] or, when absent, from the
//! service's [`TenantResolver`].

pub mod audit;
pub mod config;
pub mod error;
pub mod export;
pub mod import;
pub mod memory;
pub mod query;
pub mod record;
pub mod repository;
pub mod service;
pub mod sql;
pub mod store;
pub mod table;
pub mod tenant;
pub mod types;

// Re-export main types for convenience
pub use audit::{
    AuditAction, AuditEvent, AuditPolicy, AuditSink, AuditedTransaction, Auditor, MemoryAuditSink,
    TracingAuditSink,
};
pub use config::{AuditConfig, StoreConfig, StoreConfigBuilder};
pub use error::{Result, TableStoreError};
pub use export::{export_csv, export_file_name};
pub use import::{FieldRule, FieldRules, ImportRow, ImportSummary, ImportValidator, reconcile};
pub use memory::MemoryStore;
pub use query::{
    ColumnMap, DescriptorBuilder, FilterGroup, FilterOperator, QueryDescriptor, QueryParams,
    SortDirection, SortSpec,
};
pub use record::{Change, Record};
pub use repository::{ListOutcome, Page, RecordRepository, RecordTransaction};
pub use service::{CsvExport, ImportResponse, RequestContext, TableService};
pub use store::PgRecordStore;
pub use table::TableSpec;
pub use tenant::{ResolveWith, TableName, TenantResolver, resolve, slug};
pub use types::{ColumnDefinition, ColumnType, IndexDefinition};

// Re-export SQL utilities for advanced users
pub use sql::condition::{build_condition_clause, build_order_by_clause};
pub use sql::ddl::DdlGenerator;
pub use sql::sanitize::{quote_identifier, validate_identifier};
