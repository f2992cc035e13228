// 🔁 Pipeline - Load → Resolve → Aggregate → Rank → Bucket → Export
//
// Strictly linear, single pass, synchronous. Every stage before export is an
// in-memory transform, so a failure there leaves the sink untouched.

use crate::config::{PipelineConfig, QuantileFraction};
use crate::error::PipelineError;
use crate::export::{self, ExportObserver, ExportRun, ExportSummary};
use crate::quantile::{self, Bucket};
use crate::ranking;
use crate::records::RankedCustomer;
use crate::resolver;
use crate::revenue::{self, AggregationObserver, MissingPriceReport};
use crate::source::{self, SourceData};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;
use std::time::Instant;

/// Progress hooks for both long stages; all optional
pub trait PipelineObserver: AggregationObserver + ExportObserver {}

impl<T: AggregationObserver + ExportObserver> PipelineObserver for T {}

/// No-op observer for every stage, for callers that want no progress output
pub struct Silent;

impl AggregationObserver for Silent {}
impl ExportObserver for Silent {}

// ============================================================================
// COMPUTE (pure)
// ============================================================================

/// Result of the in-memory stages
#[derive(Debug, Clone)]
pub struct Computed {
    pub ranked: Vec<RankedCustomer>,
    pub report: MissingPriceReport,
    pub price_map_size: usize,
    pub contact_map_size: usize,
}

/// Resolve reference data, aggregate revenue and rank customers
pub fn compute<O: AggregationObserver>(data: &SourceData, sample_size: usize, observer: &mut O) -> Computed {
    let prices = resolver::build_price_map(&data.prices);
    tracing::info!(price_map_size = prices.len(), "price map built");

    let contacts = resolver::build_contact_map(&data.contacts);
    tracing::info!(contact_map_size = contacts.len(), "contact map built");

    let aggregation = revenue::aggregate_revenue_observed(&data.events, &prices, observer);
    aggregation.report.log();
    tracing::info!(customers_with_revenue = aggregation.customer_count(), "computed revenue per customer");

    if sample_size > 0 {
        ranking::log_samples(&aggregation.totals, sample_size, &mut rand::rng());
    }

    let ranked = ranking::rank_customers(&aggregation.totals, &contacts);

    Computed {
        ranked,
        report: aggregation.report,
        price_map_size: prices.len(),
        contact_map_size: contacts.len(),
    }
}

// ============================================================================
// RUN
// ============================================================================

/// Outcome of a full run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub table: String,
    pub loaded_events: usize,
    pub customers_with_revenue: usize,
    pub missing_prices: MissingPriceReport,
    pub buckets: Vec<Bucket>,
    pub bucket_size: usize,
    pub top_size: usize,
    pub export: ExportSummary,

    /// Audit id, present when something was exported
    pub run_id: Option<String>,
}

impl RunReport {
    pub fn summary(&self) -> String {
        format!(
            "{} events → {} customers → {} buckets, top {} exported to {} in {} batches",
            self.loaded_events,
            self.customers_with_revenue,
            self.buckets.len(),
            self.top_size,
            self.table,
            self.export.batches
        )
    }
}

/// Run the whole pipeline against a source and a sink database
///
/// `run_date` stamps the sink table name.
pub fn run_pipeline<O: PipelineObserver>(
    source_conn: &Connection,
    sink_conn: &mut Connection,
    config: &PipelineConfig,
    run_date: NaiveDate,
    observer: &mut O,
) -> Result<RunReport, PipelineError> {
    let start = Instant::now();
    config.validate()?;
    let q = config.quantile_fraction()?;
    let table = config.table_name(run_date);

    tracing::info!(
        stage = "START",
        quantile = q.value(),
        since = %config.since,
        table = %table,
        "starting process"
    );

    // LOAD
    let data = source::load_all(source_conn, config)?;

    // COMPUTE
    let computed = compute(&data, config.sample_size, observer);
    let analysis = quantile::compute_quantiles(&computed.ranked, q);

    let (buckets, bucket_size, top): (Vec<Bucket>, usize, &[RankedCustomer]) = match &analysis {
        Some(analysis) => {
            analysis.log(q);
            (analysis.buckets.clone(), analysis.bucket_size, analysis.top)
        }
        None => {
            tracing::warn!("no quantile stats (no customers)");
            (Vec::new(), 0, &[])
        }
    };

    // EXPORT
    let summary = export::export_top_customers_observed(sink_conn, &table, top, config.batch_size, observer)?;
    let run_id = if summary.rows > 0 {
        Some(record_run(sink_conn, &summary, config, q, bucket_size, &computed.report)?)
    } else {
        None
    };

    let report = RunReport {
        table,
        loaded_events: data.events.len(),
        customers_with_revenue: computed.ranked.len(),
        missing_prices: computed.report,
        buckets,
        bucket_size,
        top_size: top.len(),
        export: summary,
        run_id,
    };

    tracing::info!(duration = ?start.elapsed(), "process finished");
    Ok(report)
}

fn record_run(
    conn: &Connection,
    summary: &ExportSummary,
    config: &PipelineConfig,
    q: QuantileFraction,
    bucket_size: usize,
    report: &MissingPriceReport,
) -> Result<String, PipelineError> {
    let run = ExportRun::new(
        summary,
        serde_json::json!({
            "quantile": q.value(),
            "since": config.since.to_string(),
            "bucket_count": q.bucket_count(),
            "bucket_size": bucket_size,
            "events_skipped": report.skipped_events(),
        }),
    );

    export::record_export_run(conn, &run).map_err(|source| PipelineError::Audit {
        table: summary.table.clone(),
        source,
    })?;

    Ok(run.run_id)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{insert_contact_row, insert_event_row, insert_price_row, setup_source_schema};

    fn run_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 31).unwrap()
    }

    fn config(quantile: f64) -> PipelineConfig {
        PipelineConfig {
            quantile,
            sample_size: 0,
            ..PipelineConfig::default()
        }
    }

    /// Ten customers 1..=10, customer i buys i units of content 10 at 10.00
    fn seed_ten_customers(conn: &Connection) {
        setup_source_schema(conn).unwrap();
        insert_price_row(conn, 10, "4.00", "2020-01-01 00:00:00").unwrap();
        insert_price_row(conn, 10, "10.00", "2021-01-01 00:00:00").unwrap();
        for customer in 1..=10 {
            insert_event_row(conn, customer, 10, 6, "2021-06-01 12:00:00", customer).unwrap();
            insert_contact_row(conn, customer, 1, &format!("old{}@example.com", customer), "2020-01-01 00:00:00")
                .unwrap();
            insert_contact_row(conn, customer, 1, &format!("c{}@example.com", customer), "2022-01-01 00:00:00")
                .unwrap();
        }
        // Out of window and wrong type: ignored
        insert_event_row(conn, 1, 10, 6, "2019-01-01 00:00:00", 1000).unwrap();
        insert_event_row(conn, 2, 10, 3, "2021-06-01 12:00:00", 1000).unwrap();
    }

    #[test]
    fn test_end_to_end_exports_top_bucket() {
        let source = Connection::open_in_memory().unwrap();
        seed_ten_customers(&source);
        let mut sink = Connection::open_in_memory().unwrap();

        let report = run_pipeline(&source, &mut sink, &config(0.25), run_date(), &mut Silent).unwrap();

        assert_eq!(report.table, "top_customers_20250131");
        assert_eq!(report.loaded_events, 10);
        assert_eq!(report.customers_with_revenue, 10);
        assert_eq!(report.buckets.len(), 4);
        assert_eq!(report.top_size, 3);
        assert!(report.missing_prices.is_clean());
        assert!(report.run_id.is_some());

        let rows = export::get_sink_rows(&sink, &report.table).unwrap();
        let exported: Vec<(i64, String, Option<String>)> = rows
            .into_iter()
            .map(|r| (r.customer_id, r.revenue, r.contact_value))
            .collect();
        assert_eq!(
            exported,
            vec![
                (8, "80.00".to_string(), Some("c8@example.com".to_string())),
                (9, "90.00".to_string(), Some("c9@example.com".to_string())),
                (10, "100.00".to_string(), Some("c10@example.com".to_string())),
            ]
        );

        println!("Run: {}", report.summary());
    }

    #[test]
    fn test_rerun_overwrites_without_duplicates() {
        let source = Connection::open_in_memory().unwrap();
        seed_ten_customers(&source);
        let mut sink = Connection::open_in_memory().unwrap();

        run_pipeline(&source, &mut sink, &config(0.25), run_date(), &mut Silent).unwrap();

        // New price and a new email for customer 10
        insert_price_row(&source, 10, "12.50", "2023-01-01 00:00:00").unwrap();
        insert_contact_row(&source, 10, 1, "vip@example.com", "2023-01-01 00:00:00").unwrap();
        let report = run_pipeline(&source, &mut sink, &config(0.25), run_date(), &mut Silent).unwrap();

        let rows = export::get_sink_rows(&sink, &report.table).unwrap();
        assert_eq!(rows.len(), 3);
        let ten = rows.iter().find(|r| r.customer_id == 10).unwrap();
        assert_eq!(ten.revenue, "125.00");
        assert_eq!(ten.contact_value.as_deref(), Some("vip@example.com"));

        assert_eq!(export::get_export_runs(&sink, &report.table).unwrap().len(), 2);
    }

    #[test]
    fn test_no_customers_exports_nothing() {
        let source = Connection::open_in_memory().unwrap();
        setup_source_schema(&source).unwrap();
        insert_event_row(&source, 1, 99, 6, "2021-06-01 12:00:00", 3).unwrap();
        let mut sink = Connection::open_in_memory().unwrap();

        let report = run_pipeline(&source, &mut sink, &config(0.25), run_date(), &mut Silent).unwrap();

        assert!(report.buckets.is_empty());
        assert_eq!(report.top_size, 0);
        assert_eq!(report.export.rows, 0);
        assert_eq!(report.missing_prices.skipped_percentage(), 100.0);
        assert!(report.run_id.is_none());
        assert_eq!(export::count_sink_rows(&sink, &report.table).unwrap(), 0);
    }

    #[test]
    fn test_audit_failure_reported_after_rows_committed() {
        let source = Connection::open_in_memory().unwrap();
        seed_ten_customers(&source);
        let mut sink = Connection::open_in_memory().unwrap();
        export::ensure_audit_table(&sink).unwrap();
        sink.execute_batch(
            "CREATE TRIGGER reject_runs BEFORE INSERT ON export_runs
             BEGIN SELECT RAISE(ABORT, 'audit disabled'); END;",
        )
        .unwrap();

        let err = run_pipeline(&source, &mut sink, &config(0.25), run_date(), &mut Silent).unwrap_err();

        assert!(matches!(err, PipelineError::Audit { .. }));
        assert!(!err.is_export());
        assert!(err.to_string().contains("failed to record the run"));
        assert_eq!(export::count_sink_rows(&sink, "top_customers_20250131").unwrap(), 3);
    }

    #[test]
    fn test_load_failure_is_fatal_and_writes_nothing() {
        let source = Connection::open_in_memory().unwrap();
        let mut sink = Connection::open_in_memory().unwrap();

        let err = run_pipeline(&source, &mut sink, &config(0.25), run_date(), &mut Silent).unwrap_err();

        assert!(err.is_load());
        assert!(export::count_sink_rows(&sink, "top_customers_20250131").is_err());
    }

    #[test]
    fn test_invalid_config_rejected_before_load() {
        let source = Connection::open_in_memory().unwrap();
        let mut sink = Connection::open_in_memory().unwrap();

        let err = run_pipeline(&source, &mut sink, &config(0.0), run_date(), &mut Silent).unwrap_err();

        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_file_backed_source_and_sink_can_be_the_same_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shop.db");

        let source = Connection::open(&path).unwrap();
        seed_ten_customers(&source);
        let mut sink = Connection::open(&path).unwrap();

        let report = run_pipeline(&source, &mut sink, &config(0.5), run_date(), &mut Silent).unwrap();

        assert_eq!(report.top_size, 5);
        assert_eq!(export::count_sink_rows(&source, &report.table).unwrap(), 5);
    }

    #[test]
    fn test_compute_is_pure_over_loaded_data() {
        let source = Connection::open_in_memory().unwrap();
        seed_ten_customers(&source);
        let data = source::load_all(&source, &config(0.25)).unwrap();

        let a = compute(&data, 0, &mut Silent);
        let b = compute(&data, 0, &mut Silent);

        assert_eq!(a.ranked, b.ranked);
        assert_eq!(a.price_map_size, 1);
        assert_eq!(a.contact_map_size, 10);
        assert_eq!(a.ranked[0].customer_id, 10);
    }
}
