//! Tenant-scoped table names
//!
//! Every dynamic table is physically `"{tenant_slug}${table_slug}"`. Both
//! parts go through [`slug`], which keeps only `[a-z0-9_]`, so the `$`
//! delimiter can never occur inside either part.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Result, TableStoreError};

/// Delimiter between the tenant and table parts of a physical name
pub const TABLE_DELIMITER: char = '$';

static TABLE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9_]{3,30}$").expect("table name pattern is valid")
});

/// Lowercase and strip everything outside `[a-z0-9_]`
pub fn slug(value: &str) -> String {
    value
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
        .collect()
}

/// Physical table name for a tenant and a logical table name
///
/// Pure: the same inputs always produce the same output.
///
/// # Example
/// ```
/// use runtara_table_store::tenant::resolve;
///
/// assert_eq!(resolve("Acme Corp!", "My-Table"), "acmecorp$mytable");
/// ```
pub fn resolve(tenant: &str, logical_name: &str) -> String {
    format!("{}{}{}", slug(tenant), TABLE_DELIMITER, slug(logical_name))
}

/// Validate a logical table name supplied by a caller
///
/// Names must be 3 to 30 characters of `[a-z0-9_]` and must not be reserved.
pub fn validate_table_name(name: &str, reserved: &[String]) -> Result<()> {
    if !TABLE_NAME_RE.is_match(name) {
        return Err(TableStoreError::invalid_table(format!(
            "Table '{}' must be 3 to 30 characters of lowercase letters, numbers and underscores",
            name
        )));
    }

    if reserved.iter().any(|r| r == name) {
        return Err(TableStoreError::invalid_table(format!(
            "Table '{}' is reserved",
            name
        )));
    }

    Ok(())
}

/// Source of the ambient tenant when a caller does not name one
pub trait TenantResolver {
    fn resolve_tenant(&self) -> Option<String>;
}

impl TenantResolver for str {
    fn resolve_tenant(&self) -> Option<String> {
        Some(self.to_string())
    }
}

impl TenantResolver for String {
    fn resolve_tenant(&self) -> Option<String> {
        Some(self.clone())
    }
}

impl TenantResolver for Option<String> {
    fn resolve_tenant(&self) -> Option<String> {
        self.clone()
    }
}

/// Adapts a closure into a [`TenantResolver`]
pub struct ResolveWith<F>(pub F);

impl<F> TenantResolver for ResolveWith<F>
where
    F: Fn() -> Option<String>,
{
    fn resolve_tenant(&self) -> Option<String> {
        (self.0)()
    }
}

/// A resolved tenant table
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    tenant: String,
    table: String,
}

impl TableName {
    /// Build from a tenant and a logical table name, slugging both
    pub fn new(tenant: &str, logical_name: &str) -> Result<Self> {
        let tenant = slug(tenant);
        if tenant.is_empty() {
            return Err(TableStoreError::TenantRequired);
        }

        let table = slug(logical_name);
        if table.is_empty() {
            return Err(TableStoreError::invalid_table(format!(
                "Table '{}' has no usable characters",
                logical_name
            )));
        }

        Ok(Self { tenant, table })
    }

    /// Build using `tenant` when given, else the resolver's tenant
    pub fn resolve<R>(tenant: Option<&str>, logical_name: &str, resolver: &R) -> Result<Self>
    where
        R: TenantResolver + ?Sized,
    {
        let tenant = match tenant {
            Some(t) => t.to_string(),
            None => resolver
                .resolve_tenant()
                .ok_or(TableStoreError::TenantRequired)?,
        };
        Self::new(&tenant, logical_name)
    }

    /// Split a physical name back into tenant and table parts
    pub fn parse(physical: &str) -> Result<Self> {
        let (tenant, table) = physical.split_once(TABLE_DELIMITER).ok_or_else(|| {
            TableStoreError::invalid_table(format!("'{}' is not a tenant table", physical))
        })?;
        if tenant != slug(tenant) || table != slug(table) {
            return Err(TableStoreError::invalid_table(format!(
                "'{}' is not a tenant table",
                physical
            )));
        }
        Self::new(tenant, table)
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// The physical identifier, e.g. `acme$products`
    pub fn physical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.tenant, TABLE_DELIMITER, self.table)
    }
}
