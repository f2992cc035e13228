// ⚙️ Pipeline Configuration - Plain values, no sourcing mechanism
// The binary fills these from flags / environment; tests build them directly.

use crate::error::PipelineError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Default quantile fraction: top 2.5%
pub const DEFAULT_QUANTILE: f64 = 0.025;

/// Default rows per export transaction
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// EventTypeID of purchase events
pub const PURCHASE_EVENT_TYPE: i64 = 6;

/// ChannelTypeID of email contacts
pub const EMAIL_CHANNEL_TYPE: i64 = 1;

/// Upper bound on round(1 / q); every bucket is materialized
pub const MAX_BUCKETS: usize = 1_000_000;

// ============================================================================
// QUANTILE FRACTION
// ============================================================================

/// Fraction `q` in (0, 1] selecting bucket width
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f64")]
pub struct QuantileFraction(f64);

impl TryFrom<f64> for QuantileFraction {
    type Error = PipelineError;

    fn try_from(q: f64) -> Result<Self, Self::Error> {
        QuantileFraction::new(q)
    }
}

impl QuantileFraction {
    pub fn new(q: f64) -> Result<Self, PipelineError> {
        if !q.is_finite() || q <= 0.0 || q > 1.0 {
            return Err(PipelineError::Config(format!(
                "quantile must be in (0, 1], got {}",
                q
            )));
        }

        let k = (1.0 / q).round();
        if k > MAX_BUCKETS as f64 {
            return Err(PipelineError::Config(format!(
                "quantile {} gives {} buckets, at most {} allowed",
                q, k, MAX_BUCKETS
            )));
        }

        Ok(QuantileFraction(q))
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    /// Number of buckets: round(1 / q), at least 1
    pub fn bucket_count(&self) -> usize {
        let k = (1.0 / self.0).round();
        if k < 1.0 {
            1
        } else {
            k as usize
        }
    }
}

// ============================================================================
// PIPELINE CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Quantile fraction `q`
    pub quantile: f64,

    /// Lower bound on event date (inclusive)
    pub since: NaiveDate,

    /// Rows per export transaction
    pub batch_size: usize,

    /// Event kind kept by the loader
    pub event_type_id: i64,

    /// Contact channel kept by the loader
    pub channel_type_id: i64,

    /// Sink table name prefix; the run date is appended
    pub table_prefix: String,

    /// Random revenue samples logged for diagnostics (0 disables)
    pub sample_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            quantile: DEFAULT_QUANTILE,
            since: NaiveDate::from_ymd_opt(2020, 4, 1).unwrap_or_default(),
            batch_size: DEFAULT_BATCH_SIZE,
            event_type_id: PURCHASE_EVENT_TYPE,
            channel_type_id: EMAIL_CHANNEL_TYPE,
            table_prefix: "top_customers_".to_string(),
            sample_size: 10,
        }
    }
}

impl PipelineConfig {
    /// Check every value before anything is loaded
    pub fn validate(&self) -> Result<(), PipelineError> {
        QuantileFraction::new(self.quantile)?;

        if self.batch_size == 0 {
            return Err(PipelineError::Config("batch size must be positive".to_string()));
        }

        if !is_plain_identifier(&self.table_prefix) {
            return Err(PipelineError::Config(format!(
                "table prefix '{}' is not a plain SQL identifier",
                self.table_prefix
            )));
        }

        Ok(())
    }

    pub fn quantile_fraction(&self) -> Result<QuantileFraction, PipelineError> {
        QuantileFraction::new(self.quantile)
    }

    /// Date-stamped sink table, e.g. `top_customers_20250131`
    pub fn table_name(&self, run_date: NaiveDate) -> String {
        format!("{}{}", self.table_prefix, run_date.format("%Y%m%d"))
    }
}

/// Letters, digits and underscores, not starting with a digit
///
/// Table names are spliced into SQL text, so nothing else is accepted.
pub fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
