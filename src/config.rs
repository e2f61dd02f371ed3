//! Configuration for TableStore
//!
//! Provides a builder pattern for configuring the table store.

use std::time::Duration;

/// Tables that cannot be used as logical table names
pub const DEFAULT_RESERVED_TABLES: &[&str] = &["profile", "user", "recipe", "tables"];

/// Which tenants and tables produce audit events
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Regex a tenant slug must match to be audited
    pub include_tenant: Option<String>,
    /// Regex a table slug must match to be audited
    pub include_table: Option<String>,
    /// Tenants matching this regex are never audited
    pub exclude_tenant: Option<String>,
    /// Tables matching this regex are never audited
    pub exclude_table: Option<String>,
    /// Attributes whose values are masked in change logs
    pub hidden_fields: Vec<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            include_tenant: Some(".*".to_string()),
            include_table: Some(".*".to_string()),
            exclude_tenant: None,
            exclude_table: Some("(log.*|cache)".to_string()),
            hidden_fields: Vec::new(),
        }
    }
}

/// Configuration for the table store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Connection string of the database holding every tenant table
    pub database_url: String,
    /// Public identifier column of every record (default: "uid")
    pub id_field: String,
    /// Maximum number of rows accepted by a single CSV import
    pub import_limit: usize,
    /// Page size used when neither `limit` nor `per_page` is given
    pub default_page_size: u32,
    /// Logical table names callers may not use
    pub reserved_tables: Vec<String>,
    /// How long a provisioned table is remembered before re-checking
    pub table_cache_ttl: Duration,
    /// Application name recorded in audit events
    pub app_name: String,
    /// Audit include/exclude rules
    pub audit: AuditConfig,
}

impl StoreConfig {
    /// Start a builder; every other setting has a default
    pub fn builder(database_url: impl Into<String>) -> StoreConfigBuilder {
        StoreConfigBuilder::new(database_url)
    }
}

/// Fluent builder for [`StoreConfig`]
#[derive(Debug)]
pub struct StoreConfigBuilder {
    database_url: String,
    id_field: String,
    import_limit: usize,
    default_page_size: u32,
    reserved_tables: Vec<String>,
    table_cache_ttl: Duration,
    app_name: String,
    audit: AuditConfig,
}

impl StoreConfigBuilder {
    /// Builder with defaults for everything but the URL
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            id_field: "uid".to_string(),
            import_limit: 9999,
            default_page_size: 15,
            reserved_tables: DEFAULT_RESERVED_TABLES
                .iter()
                .map(|t| t.to_string())
                .collect(),
            table_cache_ttl: Duration::from_secs(60 * 60 * 12),
            app_name: "runtara-table-store".to_string(),
            audit: AuditConfig::default(),
        }
    }

    /// Set the public id column (default: "uid")
    pub fn id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    /// Set the maximum rows per import (default: 9999)
    pub fn import_limit(mut self, limit: usize) -> Self {
        self.import_limit = limit;
        self
    }

    /// Set the default page size (default: 15)
    pub fn default_page_size(mut self, size: u32) -> Self {
        self.default_page_size = size.max(1);
        self
    }

    /// Replace the reserved table names
    pub fn reserved_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reserved_tables = tables.into_iter().map(Into::into).collect();
        self
    }

    /// Set how long table existence is cached (default: 12 hours)
    pub fn table_cache_ttl(mut self, ttl: Duration) -> Self {
        self.table_cache_ttl = ttl;
        self
    }

    /// Set the application name recorded in audit events
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Replace the audit configuration
    pub fn audit(mut self, audit: AuditConfig) -> Self {
        self.audit = audit;
        self
    }

    /// Disable auditing for every tenant and table
    pub fn without_audit(mut self) -> Self {
        self.audit.include_tenant = None;
        self.audit.include_table = None;
        self
    }

    /// Finish the builder
    pub fn build(self) -> StoreConfig {
        StoreConfig {
            database_url: self.database_url,
            id_field: self.id_field,
            import_limit: self.import_limit,
            default_page_size: self.default_page_size,
            reserved_tables: self.reserved_tables,
            table_cache_ttl: self.table_cache_ttl,
            app_name: self.app_name,
            audit: self.audit,
        }
    }
}
