//! Table service
//!
//! [`TableService`] is the uniform contract every tenant table is served
//! through: list (or bulk delete), retrieve, create, upsert, delete, CSV
//! import and export, truncate and drop. Request metadata travels in an
//! explicit [`RequestContext`]; nothing is read from globals.

use std::io::Read;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditPolicy, AuditSink, Auditor, TracingAuditSink};
use crate::config::StoreConfig;
use crate::error::{Result, TableStoreError};
use crate::export::{export_csv, export_file_name};
use crate::import::dotted::undot;
use crate::import::reconcile::reconcile;
use crate::import::rules::FieldRules;
use crate::import::validate::{ImportRow, ImportValidator};
use crate::query::descriptor::{DescriptorBuilder, QueryParams};
use crate::query::filter::ColumnMap;
use crate::record::Record;
use crate::repository::{ListOutcome, RecordRepository, RecordTransaction};
use crate::tenant::{TableName, TenantResolver, validate_table_name};

/// Per-row veto applied during imports
pub type SkipHook = Box<dyn Fn(&ImportRow, Option<&Record>) -> bool + Send + Sync>;

/// Metadata of the request being served
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Explicit tenant; falls back to the service's resolver when `None`
    pub tenant: Option<String>,
    pub method: String,
    pub path: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into().to_uppercase(),
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

/// Response of a successful import
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportResponse {
    pub inserted: Vec<String>,
    pub updated: Vec<String>,
    pub skipped: Vec<Option<String>>,
    pub import_id: String,
}

/// A rendered CSV export
#[derive(Debug, Clone, PartialEq)]
pub struct CsvExport {
    pub file_name: String,
    pub content: Vec<u8>,
}

fn skip_none(_: &ImportRow, _: Option<&Record>) -> bool {
    false
}

/// CRUD, import and export over tenant tables
pub struct TableService<R, S = TracingAuditSink> {
    repository: R,
    sink: S,
    config: StoreConfig,
    policy: AuditPolicy,
    descriptors: DescriptorBuilder,
    resolver: Box<dyn TenantResolver + Send + Sync>,
    skip: Option<SkipHook>,
}

impl<R, S> TableService<R, S>
where
    R: RecordRepository,
    S: AuditSink,
{
    /// Create a service; fails when an audit pattern does not compile
    pub fn new(repository: R, sink: S, config: StoreConfig) -> Result<Self> {
        let policy = AuditPolicy::from_config(&config.audit)?;
        let descriptors = DescriptorBuilder::new().default_page_size(config.default_page_size);
        Ok(Self {
            repository,
            sink,
            config,
            policy,
            descriptors,
            resolver: Box::new(None::<String>),
            skip: None,
        })
    }

    /// Set the source of the tenant for requests that name none
    pub fn with_resolver(mut self, resolver: impl TenantResolver + Send + Sync + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    /// Set the alias map applied to filter and sort columns
    pub fn with_column_map(mut self, columns: ColumnMap) -> Self {
        self.descriptors = self.descriptors.column_map(columns);
        self
    }

    /// Set the hook that may veto individual import rows
    pub fn with_skip_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ImportRow, Option<&Record>) -> bool + Send + Sync + 'static,
    {
        self.skip = Some(Box::new(hook));
        self
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn id_field(&self) -> &str {
        self.repository.spec().id_field()
    }

    fn auditor<'a>(&'a self, ctx: &'a RequestContext) -> Auditor<'a, S> {
        Auditor::new(
            &self.sink,
            &self.policy,
            &self.config.app_name,
            self.id_field(),
            ctx,
        )
    }

    /// Validate and resolve a logical table name
    pub fn table_name(&self, ctx: &RequestContext, table: &str) -> Result<TableName> {
        validate_table_name(table, &self.config.reserved_tables)?;
        TableName::resolve(ctx.tenant.as_deref(), table, &*self.resolver)
    }

    async fn open(&self, ctx: &RequestContext, table: &str) -> Result<TableName> {
        let table = self.table_name(ctx, table)?;
        self.repository.ensure_table(&table).await?;
        Ok(table)
    }

    /// List a page of rows, or delete every matching row for DELETE requests
    pub async fn list(&self, ctx: &RequestContext, table: &str, params: &QueryParams) -> Result<ListOutcome> {
        let table = self.open(ctx, table).await?;
        let descriptor = self.descriptors.build(params, &ctx.method);

        if descriptor.is_delete {
            let deleted = self.repository.delete_where(&table, &descriptor.filters).await?;
            info!(table = %table, deleted, "deleted matching rows");
            return Ok(ListOutcome::Deleted(deleted));
        }

        let page = self.repository.paginate(&table, &descriptor).await?;
        Ok(ListOutcome::Page(page))
    }

    /// The record whose id field equals `id`
    pub async fn retrieve(&self, ctx: &RequestContext, table: &str, id: &str) -> Result<Record> {
        let table = self.open(ctx, table).await?;
        match self.repository.find(&table, self.id_field(), id).await? {
            Some(record) => Ok(record),
            None => {
                debug!(table = %table, id, "record not found");
                Err(TableStoreError::not_found(format!("{} {}", table, id)))
            }
        }
    }

    /// Insert a new record
    pub async fn create(
        &self,
        ctx: &RequestContext,
        table: &str,
        inputs: Map<String, Value>,
        rules: &FieldRules,
    ) -> Result<Record> {
        self.upsert(ctx, table, None, inputs, rules).await
    }

    /// Update the record with `id`, or insert one carrying it
    ///
    /// `inputs` may use dotted keys; rules are checked against them before
    /// they are expanded. Top-level attributes replace existing ones.
    pub async fn upsert(
        &self,
        ctx: &RequestContext,
        table: &str,
        id: Option<&str>,
        inputs: Map<String, Value>,
        rules: &FieldRules,
    ) -> Result<Record> {
        rules.check(&inputs)?;
        let table = self.open(ctx, table).await?;
        let spec = self.repository.spec();
        let mut attributes = spec.fillable(undot(&inputs));

        let mut tx = self.auditor(ctx).wrap(self.repository.begin().await?);
        let existing = match id {
            Some(id) => tx.find(&table, spec.id_field(), id).await?,
            None => None,
        };

        let record = match existing {
            Some(mut record) => {
                spec.prepare_update(&mut attributes);
                record.fill(attributes);
                if record.is_dirty() {
                    tx.update(&table, &mut record).await?;
                }
                record
            }
            None => {
                if let Some(id) = id {
                    attributes.insert(spec.id_field().to_string(), Value::String(id.to_string()));
                }
                spec.prepare_insert(&mut attributes);
                let mut record = Record::new(attributes);
                tx.insert(&table, &mut record).await?;
                record
            }
        };

        tx.commit().await?;
        Ok(record)
    }

    /// Delete the record with `id` and return it
    pub async fn delete(&self, ctx: &RequestContext, table: &str, id: &str) -> Result<Record> {
        let table = self.open(ctx, table).await?;
        let mut tx = self.auditor(ctx).wrap(self.repository.begin().await?);

        let Some(record) = tx.find(&table, self.id_field(), id).await? else {
            debug!(table = %table, id, "record not found");
            tx.rollback().await?;
            return Err(TableStoreError::not_found(format!("{} {}", table, id)));
        };

        tx.delete(&table, &record).await?;
        tx.commit().await?;
        Ok(record)
    }

    /// Import a CSV file whose first line is the header
    ///
    /// Every row is validated before any is written; rows are then applied
    /// in one transaction.
    pub async fn import<Src: Read>(
        &self,
        ctx: &RequestContext,
        table: &str,
        source: Src,
        rules: &FieldRules,
    ) -> Result<ImportResponse> {
        let table = self.open(ctx, table).await?;
        let import_id = Uuid::new_v4().to_string();
        info!(table = %table, import_id = %import_id, "import started");

        let rows = ImportValidator::new(rules, self.config.import_limit).validate_csv(source, &import_id)?;

        let tx = self.repository.begin().await?;
        let spec = self.repository.spec();
        let summary = match &self.skip {
            Some(hook) => reconcile(tx, spec, &table, &rows, &**hook).await?,
            None => reconcile(tx, spec, &table, &rows, &skip_none).await?,
        };

        info!(
            table = %table,
            import_id = %import_id,
            inserted = summary.inserted.len(),
            updated = summary.updated.len(),
            skipped = summary.skipped.len(),
            "import finished"
        );

        let auditor = self.auditor(ctx);
        if auditor.is_audited(&table) {
            let event = auditor.aggregate_event(
                &table,
                AuditAction::Import,
                json!({
                    "import_id": import_id,
                    "inserted": &summary.inserted,
                    "updated": &summary.updated,
                    "skipped": &summary.skipped,
                    "rows": summary.row_count,
                }),
            );
            auditor.emit(vec![event]).await;
        }

        Ok(ImportResponse {
            inserted: summary.inserted,
            updated: summary.updated,
            skipped: summary.skipped,
            import_id,
        })
    }

    /// Import an uploaded file, rejecting a missing upload
    pub async fn import_file<Src: Read>(
        &self,
        ctx: &RequestContext,
        table: &str,
        file: Option<Src>,
        rules: &FieldRules,
    ) -> Result<ImportResponse> {
        let file = file.ok_or(TableStoreError::MissingFile)?;
        self.import(ctx, table, file, rules).await
    }

    /// Every row matching the request's filters and sorts as CSV
    ///
    /// Without `headings`, an explicit `select` names the columns.
    pub async fn export(
        &self,
        ctx: &RequestContext,
        table: &str,
        params: &QueryParams,
        headings: Option<&[String]>,
    ) -> Result<CsvExport> {
        let table = self.open(ctx, table).await?;
        let descriptor = self.descriptors.build(params, "GET");
        let records = self
            .repository
            .select_all(&table, &descriptor.filters, &descriptor.sorts)
            .await?;

        let content = match headings {
            Some(headings) => export_csv(&records, Some(headings))?,
            None if !descriptor.selects_all() => {
                export_csv(&records, Some(descriptor.selected_columns.as_slice()))?
            }
            None => export_csv(&records, None)?,
        };

        debug!(table = %table, rows = records.len(), "exported rows");
        Ok(CsvExport {
            file_name: export_file_name(&table, Utc::now()),
            content,
        })
    }

    /// Remove every row of a table
    pub async fn truncate(&self, ctx: &RequestContext, table: &str) -> Result<()> {
        let table = self.open(ctx, table).await?;
        self.repository.truncate(&table).await?;
        info!(table = %table, "truncated table");
        Ok(())
    }

    /// Drop a table
    pub async fn drop_table(&self, ctx: &RequestContext, table: &str) -> Result<()> {
        let table = self.table_name(ctx, table)?;
        self.repository.drop_table(&table).await?;
        info!(table = %table, "dropped table");
        Ok(())
    }
}
