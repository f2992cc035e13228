// 📤 Batch Upsert Exporter - Top bucket → date-stamped sink table
//
// Idempotency: the sink is keyed by customer id and every write is an upsert,
// so re-running the pipeline never duplicates a customer; the latest run's
// contact and revenue overwrite the previous values.
//
// Atomicity is PER BATCH: each batch runs in its own transaction. A failing
// batch rolls back entirely and aborts the run; batches committed before it
// stay committed. A batch wider than SQLite's bound-variable limit is written
// as several multi-row INSERTs inside that one transaction.

use crate::config::is_plain_identifier;
use crate::error::PipelineError;
use crate::records::RankedCustomer;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use serde::{Deserialize, Serialize};

// ============================================================================
// SINK SCHEMA
// ============================================================================

/// Create the sink table if absent. Never drops or recreates it.
///
/// Revenue is stored as fixed 2-decimal text ("24.98"), not REAL.
pub fn ensure_export_table(conn: &Connection, table: &str) -> Result<()> {
    if !is_plain_identifier(table) {
        bail!("invalid sink table name '{}'", table);
    }

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {} (
                customer_id INTEGER NOT NULL PRIMARY KEY,
                contact_value TEXT,
                revenue TEXT NOT NULL
            )",
            table
        ),
        [],
    )
    .with_context(|| format!("Failed to create sink table {}", table))?;

    Ok(())
}

/// Audit trail of export runs (append-only)
pub fn ensure_audit_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS export_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT UNIQUE NOT NULL,
            table_name TEXT NOT NULL,
            exported_rows INTEGER NOT NULL,
            batches INTEGER NOT NULL,
            finished_at TEXT NOT NULL,
            details TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_export_runs_table ON export_runs(table_name)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// EXPORT
// ============================================================================

/// Bound parameters per upserted row
const COLUMNS_PER_ROW: usize = 3;

/// SQLITE_MAX_VARIABLE_NUMBER of SQLite builds before 3.32, the lowest default
const MAX_VARIABLES_PER_STATEMENT: usize = 999;

/// Rows per INSERT statement; a batch spans as many statements as needed
pub const MAX_ROWS_PER_STATEMENT: usize = MAX_VARIABLES_PER_STATEMENT / COLUMNS_PER_ROW;

/// Optional progress hooks for the export stage
pub trait ExportObserver {
    fn on_export_start(&mut self, _total_rows: usize) {}

    fn on_batch_committed(&mut self, _batch_index: usize, _rows: usize) {}
}

/// What one export call wrote
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportSummary {
    pub table: String,
    pub rows: usize,
    pub batches: usize,
}

/// Upsert the top bucket into `table` in batches of `batch_size`
///
/// The sink table is created even when membership is empty; no rows are
/// written in that case.
pub fn export_top_customers(
    conn: &mut Connection,
    table: &str,
    top: &[RankedCustomer],
    batch_size: usize,
) -> Result<ExportSummary, PipelineError> {
    export_top_customers_observed(conn, table, top, batch_size, &mut crate::pipeline::Silent)
}

pub fn export_top_customers_observed(
    conn: &mut Connection,
    table: &str,
    top: &[RankedCustomer],
    batch_size: usize,
    observer: &mut dyn ExportObserver,
) -> Result<ExportSummary, PipelineError> {
    let mut summary = ExportSummary {
        table: table.to_string(),
        ..ExportSummary::default()
    };

    if batch_size == 0 {
        return Err(PipelineError::Config("batch size must be positive".to_string()));
    }

    ensure_export_table(conn, table).map_err(|source| PipelineError::ExportSetup {
        table: table.to_string(),
        source,
    })?;

    if top.is_empty() {
        tracing::info!(table, "no top customers to export");
        return Ok(summary);
    }

    tracing::info!(stage = "EXPORT", table, count = top.len(), batch_size, "exporting top customers");
    observer.on_export_start(top.len());

    for (batch_index, batch) in top.chunks(batch_size).enumerate() {
        upsert_batch(conn, table, batch).map_err(|source| PipelineError::Export {
            table: table.to_string(),
            batch_index,
            source,
        })?;

        summary.rows += batch.len();
        summary.batches += 1;
        observer.on_batch_committed(batch_index, batch.len());
        tracing::debug!(batch_index, rows = batch.len(), "batch committed");
    }

    tracing::info!(table, rows = summary.rows, batches = summary.batches, "export finished");
    Ok(summary)
}

/// One batch = one transaction, split into statements of at most
/// `MAX_ROWS_PER_STATEMENT` rows
fn upsert_batch(conn: &mut Connection, table: &str, batch: &[RankedCustomer]) -> Result<()> {
    // Dropping `tx` without commit rolls the whole batch back
    let tx = conn.transaction()?;
    for rows in batch.chunks(MAX_ROWS_PER_STATEMENT) {
        upsert_rows(&tx, table, rows)?;
    }
    tx.commit().context("Failed to commit batch")?;

    Ok(())
}

fn upsert_rows(conn: &Connection, table: &str, rows: &[RankedCustomer]) -> Result<()> {
    let placeholders = vec!["(?, ?, ?)"; rows.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} (customer_id, contact_value, revenue) VALUES {}
         ON CONFLICT(customer_id) DO UPDATE SET
            contact_value = excluded.contact_value,
            revenue = excluded.revenue",
        table, placeholders
    );

    let mut values: Vec<Value> = Vec::with_capacity(rows.len() * COLUMNS_PER_ROW);
    for customer in rows {
        values.push(Value::Integer(customer.customer_id));
        values.push(match &customer.contact_value {
            Some(contact) => Value::Text(contact.clone()),
            None => Value::Null,
        });
        values.push(Value::Text(customer.revenue_2dp()));
    }

    conn.execute(&sql, params_from_iter(values.iter()))
        .context("Failed to upsert batch")?;

    Ok(())
}

// ============================================================================
// AUDIT TRAIL
// ============================================================================

/// One completed export, as recorded in `export_runs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRun {
    pub run_id: String,
    pub table_name: String,
    pub exported_rows: usize,
    pub batches: usize,
    pub finished_at: DateTime<Utc>,
    pub details: serde_json::Value,
}

impl ExportRun {
    pub fn new(summary: &ExportSummary, details: serde_json::Value) -> Self {
        ExportRun {
            run_id: uuid::Uuid::new_v4().to_string(),
            table_name: summary.table.clone(),
            exported_rows: summary.rows,
            batches: summary.batches,
            finished_at: Utc::now(),
            details,
        }
    }
}

pub fn record_export_run(conn: &Connection, run: &ExportRun) -> Result<()> {
    ensure_audit_table(conn)?;

    conn.execute(
        "INSERT INTO export_runs (run_id, table_name, exported_rows, batches, finished_at, details)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            run.run_id,
            run.table_name,
            run.exported_rows as i64,
            run.batches as i64,
            run.finished_at.to_rfc3339(),
            serde_json::to_string(&run.details)?,
        ],
    )?;

    Ok(())
}

/// Export runs for a table, newest first
pub fn get_export_runs(conn: &Connection, table: &str) -> Result<Vec<ExportRun>> {
    ensure_audit_table(conn)?;

    let mut stmt = conn.prepare(
        "SELECT run_id, table_name, exported_rows, batches, finished_at, details
         FROM export_runs
         WHERE table_name = ?1
         ORDER BY id DESC",
    )?;

    let rows = stmt
        .query_map(params![table], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut runs = Vec::with_capacity(rows.len());
    for (run_id, table_name, exported_rows, batches, finished_at, details) in rows {
        runs.push(ExportRun {
            finished_at: DateTime::parse_from_rfc3339(&finished_at)
                .with_context(|| format!("run {}: bad finished_at", run_id))?
                .with_timezone(&Utc),
            details: serde_json::from_str(&details)?,
            run_id,
            table_name,
            exported_rows: exported_rows.max(0) as usize,
            batches: batches.max(0) as usize,
        });
    }

    Ok(runs)
}

// ============================================================================
// SINK READBACK
// ============================================================================

/// A row as stored in the sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkRow {
    pub customer_id: i64,
    pub contact_value: Option<String>,
    pub revenue: String,
}

/// All sink rows ordered by customer id
pub fn get_sink_rows(conn: &Connection, table: &str) -> Result<Vec<SinkRow>> {
    if !is_plain_identifier(table) {
        bail!("invalid sink table name '{}'", table);
    }

    let mut stmt = conn.prepare(&format!(
        "SELECT customer_id, contact_value, revenue FROM {} ORDER BY customer_id",
        table
    ))?;

    let rows = stmt
        .query_map([], |row| {
            Ok(SinkRow {
                customer_id: row.get(0)?,
                contact_value: row.get(1)?,
                revenue: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rows)
}

pub fn count_sink_rows(conn: &Connection, table: &str) -> Result<i64> {
    if !is_plain_identifier(table) {
        bail!("invalid sink table name '{}'", table);
    }

    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
    Ok(count)
}

// ============================================================================
// TESTS
// ============================================================================
