//! Bulk reconciliation of validated import rows
//!
//! Every row is applied inside one transaction: rows whose id already exists
//! update that record, all others insert. The first failing row rolls the
//! whole batch back.

use serde::Serialize;

use crate::error::{Result, TableStoreError};
use crate::import::validate::ImportRow;
use crate::record::Record;
use crate::repository::RecordTransaction;
use crate::table::TableSpec;
use crate::tenant::TableName;

/// Ids touched by a successful import, in row order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportSummary {
    pub inserted: Vec<String>,
    pub updated: Vec<String>,
    /// Ids of vetoed rows; `None` for rows that carried no id
    pub skipped: Vec<Option<String>>,
    pub row_count: usize,
}

/// Apply `rows` to `table` inside `tx`
///
/// `skip` sees each row with its existing record (if any) and may veto the
/// write. Imported records are exempt from per-record audit.
pub async fn reconcile<T, F>(
    mut tx: T,
    spec: &TableSpec,
    table: &TableName,
    rows: &[ImportRow],
    skip: &F,
) -> Result<ImportSummary>
where
    T: RecordTransaction,
    F: Fn(&ImportRow, Option<&Record>) -> bool + ?Sized,
{
    let mut summary = ImportSummary {
        row_count: rows.len(),
        ..ImportSummary::default()
    };

    for row in rows {
        if let Err(e) = apply_row(&mut tx, spec, table, row, skip, &mut summary).await {
            tracing::warn!(
                table = %table,
                row_number = row.row_number,
                error = %e,
                "import row failed, rolling back batch"
            );
            if let Err(rollback_error) = tx.rollback().await {
                tracing::warn!(table = %table, error = %rollback_error, "rollback failed");
            }
            return Err(TableStoreError::ImportRow {
                row_number: row.row_number,
                row: row.to_json(),
                message: e.to_string(),
            });
        }
    }

    tx.commit().await?;
    Ok(summary)
}

async fn apply_row<T, F>(
    tx: &mut T,
    spec: &TableSpec,
    table: &TableName,
    row: &ImportRow,
    skip: &F,
    summary: &mut ImportSummary,
) -> Result<()>
where
    T: RecordTransaction,
    F: Fn(&ImportRow, Option<&Record>) -> bool + ?Sized,
{
    let id = row.id(spec.id_field());
    let existing = match &id {
        Some(id) => tx.find(table, spec.id_field(), id).await?,
        None => None,
    };

    if skip(row, existing.as_ref()) {
        summary.skipped.push(id);
        return Ok(());
    }

    let mut attributes = spec.fillable(row.attributes());
    match existing {
        Some(record) => {
            spec.prepare_update(&mut attributes);
            let mut record = record.without_audit();
            record.fill(attributes);
            tx.update(table, &mut record).await?;
            summary
                .updated
                .push(record.uid(spec.id_field()).or(id).unwrap_or_default());
        }
        None => {
            spec.prepare_insert(&mut attributes);
            let mut record = Record::new(attributes).without_audit();
            tx.insert(table, &mut record).await?;
            summary
                .inserted
                .push(record.uid(spec.id_field()).or(id).unwrap_or_default());
        }
    }

    Ok(())
}
