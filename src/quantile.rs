// 📊 Quantile Bucketer - Equal-sized slices of the ranked population
//
// Input is ranked by revenue descending. With K = round(1/q) buckets and
// S = ceil(N/K) members per bucket, bucket i covers positions [i*S, (i+1)*S),
// clipped to N. Trailing buckets may come out empty when N is not a multiple
// of S; they are kept with zero stats.
//
// Deterministic: no sampling, no refinement.

use crate::config::QuantileFraction;
use crate::records::{format_money, RankedCustomer};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ============================================================================
// BUCKET
// ============================================================================

/// Summary of one contiguous slice of the ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    /// 0 = highest revenue
    pub index: usize,
    pub min_revenue: Decimal,
    pub max_revenue: Decimal,
    pub member_count: usize,
}

impl Bucket {
    fn empty(index: usize) -> Self {
        Bucket {
            index,
            min_revenue: Decimal::ZERO,
            max_revenue: Decimal::ZERO,
            member_count: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.member_count == 0
    }

    /// Midpoint of the revenue range
    pub fn midpoint(&self) -> Decimal {
        (self.min_revenue + self.max_revenue) / Decimal::TWO
    }

    /// Nominal population range, e.g. "0.0% - 2.5%"
    pub fn range_label(&self, q: QuantileFraction) -> String {
        let start = self.index as f64 * q.value() * 100.0;
        let end = (self.index + 1) as f64 * q.value() * 100.0;
        format!("{:.1}% - {:.1}%", start, end)
    }
}

// ============================================================================
// ANALYSIS
// ============================================================================

/// Buckets over a non-empty ranking, plus the top bucket's members
#[derive(Debug, Clone, PartialEq)]
pub struct QuantileAnalysis<'a> {
    pub buckets: Vec<Bucket>,

    /// Members per bucket (S)
    pub bucket_size: usize,

    /// Bucket 0's membership: the first min(S, N) ranked customers
    pub top: &'a [RankedCustomer],
}

impl<'a> QuantileAnalysis<'a> {
    /// Total members across all buckets (equals N)
    pub fn covered(&self) -> usize {
        self.buckets.iter().map(|b| b.member_count).sum()
    }

    pub fn top_bucket(&self) -> Option<&Bucket> {
        self.buckets.first()
    }

    /// One structured line per bucket, then the top-bucket size
    pub fn log(&self, q: QuantileFraction) {
        tracing::info!("========== QUANTILE ANALYSIS ==========");
        for bucket in &self.buckets {
            tracing::info!(
                quantile_index = bucket.index,
                quantile_range = %bucket.range_label(q),
                nb_clients = bucket.member_count,
                min_revenue = %format_money(bucket.min_revenue),
                max_revenue = %format_money(bucket.max_revenue),
                mid_revenue = %format_money(bucket.midpoint()),
                "quantile summary"
            );
        }
        tracing::info!("=======================================");
        tracing::info!(top_quantile_size = self.top.len(), "top quantile extracted");
    }
}

/// Partition the ranked population into quantile buckets
///
/// Returns `None` when there is nobody to rank: no buckets and no top bucket.
pub fn compute_quantiles(ranked: &[RankedCustomer], q: QuantileFraction) -> Option<QuantileAnalysis<'_>> {
    let n = ranked.len();
    if n == 0 {
        return None;
    }

    let k = q.bucket_count();
    let size = n.div_ceil(k);

    let buckets = (0..k)
        .map(|index| {
            let start = index * size;
            if start >= n {
                return Bucket::empty(index);
            }
            let end = (start + size).min(n);
            let slice = &ranked[start..end];

            Bucket {
                index,
                min_revenue: slice[slice.len() - 1].accumulated_revenue,
                max_revenue: slice[0].accumulated_revenue,
                member_count: slice.len(),
            }
        })
        .collect();

    Some(QuantileAnalysis {
        buckets,
        bucket_size: size,
        top: &ranked[..size.min(n)],
    })
}

// ============================================================================
// TESTS
// ============================================================================
