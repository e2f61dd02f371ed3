//! Change auditing
//!
//! [`AuditedTransaction`] wraps any [`RecordTransaction`] and queues one
//! event per created, updated or deleted record. Events reach the
//! [`AuditSink`] only after the wrapped transaction commits.
//!
//! Event paths follow the blob layout used by revision storage:
//! - per record: `{table}/{uid}/index.json`
//! - aggregate: `{table}/{9999-year}{99-month}{99-day}_revts.json`, which
//!   sorts newest first

use std::sync::Mutex;
use std::sync::PoisonError;

use chrono::{DateTime, Datelike, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::AuditConfig;
use crate::error::{Result, TableStoreError};
use crate::record::{Change, Record};
use crate::repository::RecordTransaction;
use crate::service::RequestContext;
use crate::tenant::TableName;

/// Replacement for values of hidden fields in change logs
pub const HIDDEN_VALUE: &str = "***HIDDEN***";

/// Audited action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Import,
}

/// Decides which tables are audited and which fields are masked
#[derive(Debug, Clone, Default)]
pub struct AuditPolicy {
    include_tenant: Option<Regex>,
    include_table: Option<Regex>,
    exclude_tenant: Option<Regex>,
    exclude_table: Option<Regex>,
    hidden_fields: Vec<String>,
}

impl AuditPolicy {
    /// Compile the configured patterns
    ///
    /// Patterns are unanchored: `log` excludes `changelog` too.
    pub fn from_config(config: &AuditConfig) -> Result<Self> {
        let compile = |pattern: &Option<String>| -> Result<Option<Regex>> {
            pattern
                .as_deref()
                .filter(|p| !p.is_empty())
                .map(|p| {
                    Regex::new(p).map_err(|e| {
                        TableStoreError::validation(format!("Invalid audit pattern '{}': {}", p, e))
                    })
                })
                .transpose()
        };

        Ok(Self {
            include_tenant: compile(&config.include_tenant)?,
            include_table: compile(&config.include_table)?,
            exclude_tenant: compile(&config.exclude_tenant)?,
            exclude_table: compile(&config.exclude_table)?,
            hidden_fields: config.hidden_fields.clone(),
        })
    }

    /// A policy that audits nothing
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Whether changes to `table` are audited
    ///
    /// Both include patterns must be set and match; neither exclude pattern
    /// may match.
    pub fn is_audited(&self, table: &TableName) -> bool {
        let (Some(include_tenant), Some(include_table)) = (&self.include_tenant, &self.include_table)
        else {
            return false;
        };
        if !include_tenant.is_match(table.tenant()) || !include_table.is_match(table.table()) {
            return false;
        }
        let excluded = |pattern: &Option<Regex>, value: &str| {
            pattern.as_ref().is_some_and(|re| re.is_match(value))
        };
        !excluded(&self.exclude_tenant, table.tenant()) && !excluded(&self.exclude_table, table.table())
    }

    /// Mask the values of hidden fields
    pub fn mask(&self, changes: Vec<Change>) -> Vec<Change> {
        changes
            .into_iter()
            .map(|change| {
                if self.hidden_fields.contains(&change.key) {
                    Change {
                        key: change.key,
                        old: Value::String(HIDDEN_VALUE.to_string()),
                        new: Value::String(HIDDEN_VALUE.to_string()),
                    }
                } else {
                    change
                }
            })
            .collect()
    }
}

/// One audit record and where it is stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub path: String,
    pub body: Value,
}

impl AuditEvent {
    /// Path of the per-record revision document
    pub fn record_path(table: &TableName, uid: &str) -> String {
        format!("{}/{}/index.json", table, uid)
    }

    /// Path of the aggregate document of `now`'s day
    pub fn aggregate_path(table: &TableName, now: DateTime<Utc>) -> String {
        format!(
            "{}/{}{}{}_revts.json",
            table,
            9999 - now.year(),
            99 - now.month(),
            99 - now.day()
        )
    }
}

/// Destination of audit events
#[allow(async_fn_in_trait)]
pub trait AuditSink {
    async fn write(&self, event: AuditEvent) -> Result<()>;
}

/// Writes events as `info` records on the `audit` target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    async fn write(&self, event: AuditEvent) -> Result<()> {
        tracing::info!(target: "audit", path = %event.path, body = %event.body, "audit event");
        Ok(())
    }
}

/// Keeps events in memory
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events written so far, oldest first
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AuditSink for MemoryAuditSink {
    async fn write(&self, event: AuditEvent) -> Result<()> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        Ok(())
    }
}

/// Builds and emits audit events for one request
pub struct Auditor<'a, S> {
    sink: &'a S,
    policy: &'a AuditPolicy,
    app_name: &'a str,
    id_field: &'a str,
    context: &'a RequestContext,
}

impl<S> Clone for Auditor<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for Auditor<'_, S> {}

impl<'a, S: AuditSink> Auditor<'a, S> {
    pub fn new(
        sink: &'a S,
        policy: &'a AuditPolicy,
        app_name: &'a str,
        id_field: &'a str,
        context: &'a RequestContext,
    ) -> Self {
        Self {
            sink,
            policy,
            app_name,
            id_field,
            context,
        }
    }

    pub fn is_audited(&self, table: &TableName) -> bool {
        self.policy.is_audited(table)
    }

    /// Wrap a transaction so its writes are audited on commit
    pub fn wrap<T: RecordTransaction>(&self, inner: T) -> AuditedTransaction<'a, T, S> {
        AuditedTransaction {
            inner,
            auditor: *self,
            pending: Vec::new(),
        }
    }

    fn body(&self, table: &TableName, action: AuditAction, log: Vec<Change>) -> serde_json::Map<String, Value> {
        let body = json!({
            "app_name": self.app_name,
            "table_name": table.physical(),
            "tenant": table.tenant(),
            "table": table.table(),
            "action": action,
            "log": log,
            "created_at": Utc::now().timestamp(),
            "ip_address": self.context.ip,
            "user_agent": self.context.user_agent,
            "method": self.context.method,
            "path": self.context.path,
        });
        match body {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        }
    }

    /// Event for one record; `None` for records without an id or uid
    pub fn record_event(
        &self,
        table: &TableName,
        action: AuditAction,
        record: &Record,
        log: Vec<Change>,
    ) -> Option<AuditEvent> {
        let id = record.id()?;
        let uid = record.uid(self.id_field)?;

        let mut body = self.body(table, action, self.policy.mask(log));
        body.insert("uid".to_string(), Value::String(uid.clone()));
        body.insert("model_id".to_string(), Value::from(id));
        body.insert("model".to_string(), record.to_json());

        Some(AuditEvent {
            path: AuditEvent::record_path(table, &uid),
            body: Value::Object(body),
        })
    }

    /// Event not tied to one record, e.g. a bulk import
    pub fn aggregate_event(&self, table: &TableName, action: AuditAction, custom: Value) -> AuditEvent {
        let mut body = self.body(table, action, Vec::new());
        body.insert("custom".to_string(), custom);
        AuditEvent {
            path: AuditEvent::aggregate_path(table, Utc::now()),
            body: Value::Object(body),
        }
    }

    /// Write events to the sink
    ///
    /// Sink failures are logged; the audited work has already happened.
    pub async fn emit(&self, events: Vec<AuditEvent>) {
        for event in events {
            let path = event.path.clone();
            if let Err(e) = self.sink.write(event).await {
                tracing::warn!(path = %path, error = %e, "failed to write audit event");
            }
        }
    }
}

/// Transaction decorator that audits record writes
pub struct AuditedTransaction<'a, T, S> {
    inner: T,
    auditor: Auditor<'a, S>,
    pending: Vec<AuditEvent>,
}

impl<T, S> AuditedTransaction<'_, T, S>
where
    T: RecordTransaction,
    S: AuditSink,
{
    fn queue(&mut self, table: &TableName, action: AuditAction, record: &Record, log: Vec<Change>) {
        if !record.is_audited() || !self.auditor.is_audited(table) {
            return;
        }
        if let Some(event) = self.auditor.record_event(table, action, record, log) {
            self.pending.push(event);
        }
    }

    /// Number of events waiting for commit
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl<T, S> RecordTransaction for AuditedTransaction<'_, T, S>
where
    T: RecordTransaction,
    S: AuditSink,
{
    async fn find(&mut self, table: &TableName, field: &str, value: &str) -> Result<Option<Record>> {
        self.inner.find(table, field, value).await
    }

    async fn insert(&mut self, table: &TableName, record: &mut Record) -> Result<()> {
        self.inner.insert(table, record).await?;
        self.queue(table, AuditAction::Create, record, Vec::new());
        Ok(())
    }

    async fn update(&mut self, table: &TableName, record: &mut Record) -> Result<()> {
        let changes = record.changes();
        self.inner.update(table, record).await?;
        if !changes.is_empty() {
            self.queue(table, AuditAction::Update, record, changes);
        }
        Ok(())
    }

    async fn delete(&mut self, table: &TableName, record: &Record) -> Result<()> {
        self.inner.delete(table, record).await?;
        self.queue(table, AuditAction::Delete, record, Vec::new());
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.inner.commit().await?;
        self.auditor.emit(self.pending).await;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.inner.rollback().await
    }
}
