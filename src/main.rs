// Top Customers - CLI entry point
//
// Usage example:
//   top-customers --source-db shop.db --quantile 0.025 --since 2020-04-01

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use std::path::PathBuf;

use top_customers::{
    run_pipeline, AggregationObserver, ExportObserver, PipelineConfig, DEFAULT_BATCH_SIZE,
    DEFAULT_QUANTILE,
};

#[derive(Parser, Debug)]
#[command(name = "top-customers", version, about = "Export the top revenue quantile of customers")]
struct Args {
    /// SQLite database holding CustomerEventData, ContentPrice and CustomerData
    #[arg(long, env = "SOURCE_DB")]
    source_db: PathBuf,

    /// SQLite database receiving the export (defaults to the source database)
    #[arg(long, env = "SINK_DB")]
    sink_db: Option<PathBuf>,

    /// Quantile fraction, e.g. 0.025 for the top 2.5%
    #[arg(long, default_value_t = DEFAULT_QUANTILE)]
    quantile: f64,

    /// EventDate lower bound (YYYY-MM-DD)
    #[arg(long, default_value = "2020-04-01")]
    since: NaiveDate,

    /// Rows per export transaction
    #[arg(long, env = "EXPORT_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Sink table prefix; the run date (YYYYMMDD) is appended
    #[arg(long, default_value = "top_customers_")]
    table_prefix: String,

    /// Random revenue samples to log (0 disables)
    #[arg(long, default_value_t = 10)]
    sample_size: usize,

    /// Debug logging
    #[arg(long, env = "VERBOSE")]
    verbose: bool,

    /// Hide progress bars
    #[arg(long)]
    no_progress: bool,
}

impl Args {
    fn to_config(&self) -> PipelineConfig {
        PipelineConfig {
            quantile: self.quantile,
            since: self.since,
            batch_size: self.batch_size,
            table_prefix: self.table_prefix.clone(),
            sample_size: self.sample_size,
            ..PipelineConfig::default()
        }
    }
}

// ============================================================================
// PROGRESS BARS
// ============================================================================

struct ProgressBars {
    enabled: bool,
    current: Option<ProgressBar>,
}

impl ProgressBars {
    fn new(enabled: bool) -> Self {
        ProgressBars {
            enabled,
            current: None,
        }
    }

    fn start(&mut self, total: usize, message: &'static str) {
        if !self.enabled {
            return;
        }
        let pb = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar().template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})") {
            pb.set_style(style);
        }
        pb.set_message(message);
        self.current = Some(pb);
    }

    fn finish(&mut self) {
        if let Some(pb) = self.current.take() {
            pb.finish_and_clear();
        }
    }
}

impl AggregationObserver for ProgressBars {
    fn on_start(&mut self, total_events: usize) {
        self.start(total_events, "computing revenue");
    }

    fn on_event(&mut self, processed: usize) {
        if let Some(pb) = &self.current {
            pb.set_position(processed as u64);
        }
    }

    fn on_finish(&mut self) {
        self.finish();
    }
}

impl ExportObserver for ProgressBars {
    fn on_export_start(&mut self, total_rows: usize) {
        self.start(total_rows, "exporting batches");
    }

    fn on_batch_committed(&mut self, _batch_index: usize, rows: usize) {
        let done = match &self.current {
            Some(pb) => {
                pb.inc(rows as u64);
                pb.position() >= pb.length().unwrap_or(0)
            }
            None => false,
        };
        if done {
            self.finish();
        }
    }
}

// ============================================================================
// MAIN
// ============================================================================

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = args.to_config();
    let run_date: NaiveDate = Local::now().date_naive();

    let source = Connection::open(&args.source_db)
        .with_context(|| format!("Failed to open source database {}", args.source_db.display()))?;
    let sink_path = args.sink_db.clone().unwrap_or_else(|| args.source_db.clone());
    let mut sink = Connection::open(&sink_path)
        .with_context(|| format!("Failed to open sink database {}", sink_path.display()))?;

    let mut progress = ProgressBars::new(!args.no_progress);
    let report = run_pipeline(&source, &mut sink, &config, run_date, &mut progress)?;

    println!("{}", report.summary());
    if !report.missing_prices.is_clean() {
        println!("⚠️  {}", report.missing_prices.summary());
    }

    Ok(())
}
