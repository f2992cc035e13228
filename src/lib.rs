// Top Customers - Core Library
// Revenue per customer → quantile buckets → idempotent export of the top bucket

pub mod records;
pub mod config;
pub mod error;
pub mod resolver;   // Latest-wins resolution of reference data
pub mod revenue;    // Revenue aggregation + missing price report
pub mod ranking;    // Contact join, ordering, diagnostic sampling
pub mod quantile;   // Equal-sized quantile buckets
pub mod source;     // SQLite input streams
pub mod export;     // Batch upsert into the sink table
pub mod pipeline;

// Re-export commonly used types
pub use records::{
    ContactRecord, ContentId, CustomerId, PriceRecord, PricedEvent, RankedCustomer, RevenueTotal,
    format_money,
};
pub use config::{PipelineConfig, QuantileFraction, DEFAULT_BATCH_SIZE, DEFAULT_QUANTILE};
pub use error::PipelineError;
pub use resolver::{build_contact_map, build_price_map, resolve_latest, Versioned};
pub use revenue::{
    aggregate_revenue, aggregate_revenue_observed, Aggregation, AggregationObserver,
    MissingPriceReport,
};
pub use ranking::{rank_customers, sample_revenue};
pub use quantile::{compute_quantiles, Bucket, QuantileAnalysis};
pub use source::{load_all, SourceData};
pub use export::{
    ensure_export_table, export_top_customers, export_top_customers_observed, get_export_runs,
    get_sink_rows, ExportObserver, ExportRun, ExportSummary, SinkRow,
};
pub use pipeline::{compute, run_pipeline, PipelineObserver, RunReport, Silent};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
