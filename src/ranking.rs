// 🏆 Ranking - Join revenue with contacts, order by revenue descending
//
// Ties on revenue are ordered by ascending customer id, so bucket
// membership is fully determined by the inputs.

use crate::records::{format_money, CustomerId, RankedCustomer, RevenueTotal};
use rand::seq::IndexedRandom;
use rand::Rng;
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Build the ranked population: one entry per customer with revenue
///
/// A missing or blank contact becomes `None`.
pub fn rank_customers(
    totals: &HashMap<CustomerId, Decimal>,
    contacts: &HashMap<CustomerId, String>,
) -> Vec<RankedCustomer> {
    let mut ranked: Vec<RankedCustomer> = totals
        .iter()
        .map(|(customer_id, revenue)| RankedCustomer {
            customer_id: *customer_id,
            contact_value: contacts
                .get(customer_id)
                .filter(|value| !value.trim().is_empty())
                .cloned(),
            accumulated_revenue: *revenue,
        })
        .collect();

    ranked.sort_by(compare_ranked);
    ranked
}

/// Revenue descending, then customer id ascending
pub fn compare_ranked(a: &RankedCustomer, b: &RankedCustomer) -> Ordering {
    b.accumulated_revenue
        .cmp(&a.accumulated_revenue)
        .then_with(|| a.customer_id.cmp(&b.customer_id))
}

// ============================================================================
// SAMPLING (diagnostics only)
// ============================================================================

/// Pick up to `n` distinct customers at random from the finished totals
///
/// Reads `totals` only; the randomness comes from the caller's RNG.
pub fn sample_revenue<R: Rng + ?Sized>(
    totals: &HashMap<CustomerId, Decimal>,
    n: usize,
    rng: &mut R,
) -> Vec<RevenueTotal> {
    // HashMap order is not stable across runs; sort so a seeded RNG repeats
    let mut ids: Vec<CustomerId> = totals.keys().copied().collect();
    ids.sort_unstable();

    ids.choose_multiple(rng, n)
        .map(|customer_id| RevenueTotal {
            customer_id: *customer_id,
            accumulated_revenue: totals[customer_id],
        })
        .collect()
}

/// Log a random sample of revenue totals at info level
pub fn log_samples<R: Rng + ?Sized>(totals: &HashMap<CustomerId, Decimal>, n: usize, rng: &mut R) {
    if totals.is_empty() {
        tracing::info!("no revenue entries to sample");
        return;
    }

    tracing::info!(requested = n, total = totals.len(), "random revenue samples");
    for (index, sample) in sample_revenue(totals, n, rng).iter().enumerate() {
        tracing::info!(
            sample = index + 1,
            customer_id = sample.customer_id,
            revenue = %format_money(sample.accumulated_revenue),
            "revenue sample"
        );
    }
}
