// 💰 Revenue Aggregator - Quantity × current price, summed per customer
//
// Pure function of (events, price map). The running totals are a local
// accumulator owned by one call and handed back as an immutable result.
//
// Events whose content has no current price are NOT revenue: they are skipped
// and counted in a MissingPriceReport, never treated as zero-priced.
// Money is accumulated in rust_decimal, so hundreds of thousands of additions
// never drift the way f64 sums do.

use crate::records::{format_money, ContentId, CustomerId, PricedEvent, RevenueTotal};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

// ============================================================================
// OBSERVER
// ============================================================================

/// Optional side channel for progress / telemetry during aggregation
///
/// Never required for correctness. Every hook defaults to a no-op.
pub trait AggregationObserver {
    /// Called once before the pass with the number of input events
    fn on_start(&mut self, _total_events: usize) {}

    /// Called after each event with the count processed so far
    fn on_event(&mut self, _processed: usize) {}

    /// Called for each event skipped for lack of a price
    fn on_missing_price(&mut self, _event: &PricedEvent) {}

    /// Called once after the pass
    fn on_finish(&mut self) {}
}

// ============================================================================
// MISSING PRICE REPORT
// ============================================================================

/// Data-quality report: events that could not be priced
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MissingPriceReport {
    /// Number of events in the aggregation input
    pub total_events: usize,

    /// Skipped event count per unpriced content id
    pub missing: BTreeMap<ContentId, usize>,
}

impl MissingPriceReport {
    /// Number of distinct content ids without a price
    pub fn distinct_content_ids(&self) -> usize {
        self.missing.len()
    }

    /// Total events excluded from revenue
    pub fn skipped_events(&self) -> usize {
        self.missing.values().sum()
    }

    /// Share of input events skipped, in percent (0.0 for an empty input)
    pub fn skipped_percentage(&self) -> f64 {
        if self.total_events == 0 {
            return 0.0;
        }
        self.skipped_events() as f64 / self.total_events as f64 * 100.0
    }

    /// True when every event had a price
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty()
    }

    pub fn summary(&self) -> String {
        if self.is_clean() {
            return format!("all {} events had corresponding prices", self.total_events);
        }
        format!(
            "{} events skipped ({:.2}%) across {} content ids without price",
            self.skipped_events(),
            self.skipped_percentage(),
            self.distinct_content_ids()
        )
    }

    /// Surface the report: warning when anything was skipped, confirmation otherwise
    pub fn log(&self) {
        if self.is_clean() {
            tracing::info!(total_events = self.total_events, "all events had corresponding prices");
            return;
        }

        tracing::warn!(
            unique_content_ids = self.distinct_content_ids(),
            total_events_skipped = self.skipped_events(),
            percentage_skipped = %format!("{:.2}%", self.skipped_percentage()),
            "missing prices detected"
        );

        for (content_id, count) in &self.missing {
            tracing::debug!(content_id, events_skipped = count, "missing price detail");
        }
    }
}

// ============================================================================
// AGGREGATION RESULT
// ============================================================================

/// Output of one aggregation pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregation {
    /// Revenue per customer; customers with no priced event are absent
    pub totals: HashMap<CustomerId, Decimal>,

    pub report: MissingPriceReport,
}

impl Aggregation {
    /// Number of customers with revenue
    pub fn customer_count(&self) -> usize {
        self.totals.len()
    }

    pub fn revenue_of(&self, customer_id: CustomerId) -> Option<Decimal> {
        self.totals.get(&customer_id).copied()
    }

    /// Totals as records, ordered by customer id
    pub fn revenue_totals(&self) -> Vec<RevenueTotal> {
        let mut out: Vec<RevenueTotal> = self
            .totals
            .iter()
            .map(|(customer_id, revenue)| RevenueTotal {
                customer_id: *customer_id,
                accumulated_revenue: *revenue,
            })
            .collect();
        out.sort_by_key(|t| t.customer_id);
        out
    }

    /// Sum of all customers' revenue, at 2 decimals
    pub fn grand_total_2dp(&self) -> String {
        format_money(self.totals.values().copied().sum())
    }
}

// ============================================================================
// AGGREGATION
// ============================================================================

/// Aggregate revenue per customer
pub fn aggregate_revenue(
    events: &[PricedEvent],
    prices: &HashMap<ContentId, Decimal>,
) -> Aggregation {
    aggregate_revenue_observed(events, prices, &mut crate::pipeline::Silent)
}

/// Aggregate revenue per customer, reporting progress to `observer`
pub fn aggregate_revenue_observed(
    events: &[PricedEvent],
    prices: &HashMap<ContentId, Decimal>,
    observer: &mut dyn AggregationObserver,
) -> Aggregation {
    let mut totals: HashMap<CustomerId, Decimal> = HashMap::new();
    let mut missing: BTreeMap<ContentId, usize> = BTreeMap::new();

    observer.on_start(events.len());

    for (index, event) in events.iter().enumerate() {
        match prices.get(&event.content_id) {
            Some(unit_price) => {
                let line = Decimal::from(event.quantity) * *unit_price;
                *totals.entry(event.customer_id).or_insert(Decimal::ZERO) += line;
            }
            None => {
                *missing.entry(event.content_id).or_insert(0) += 1;
                observer.on_missing_price(event);
            }
        }
        observer.on_event(index + 1);
    }

    observer.on_finish();

    Aggregation {
        totals,
        report: MissingPriceReport {
            total_events: events.len(),
            missing,
        },
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn dec(value: &str) -> Decimal {
        Decimal::from_str(value).unwrap()
    }

    fn event(customer_id: CustomerId, content_id: ContentId, quantity: u32) -> PricedEvent {
        PricedEvent {
            customer_id,
            content_id,
            quantity,
            event_timestamp: NaiveDate::from_ymd_opt(2024, 5, 1)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
        }
    }

    fn prices(entries: &[(ContentId, &str)]) -> HashMap<ContentId, Decimal> {
        entries.iter().map(|(id, p)| (*id, dec(p))).collect()
    }

    #[test]
    fn test_scenario_a_two_customers() {
        let events = vec![event(100, 10, 2), event(100, 11, 1), event(101, 10, 1)];
        let price_map = prices(&[(10, "9.99"), (11, "5.00")]);

        let result = aggregate_revenue(&events, &price_map);

        assert_eq!(result.customer_count(), 2);
        assert_eq!(result.revenue_of(100), Some(dec("24.98")));
        assert_eq!(result.revenue_of(101), Some(dec("9.99")));
        assert!(result.report.is_clean());
        assert_eq!(result.report.skipped_percentage(), 0.0);
    }

    #[test]
    fn test_scenario_c_all_prices_missing() {
        let events = vec![event(100, 99, 1), event(101, 99, 3), event(102, 99, 2)];
        let price_map = prices(&[(10, "1.00")]);

        let result = aggregate_revenue(&events, &price_map);

        assert!(result.totals.is_empty());
        assert_eq!(result.report.distinct_content_ids(), 1);
        assert_eq!(result.report.skipped_events(), 3);
        assert_eq!(result.report.skipped_percentage(), 100.0);
        assert!(!result.report.is_clean());
    }

    #[test]
    fn test_unpriced_events_excluded_not_zeroed() {
        let events = vec![event(100, 10, 1), event(100, 77, 5), event(200, 77, 1)];
        let price_map = prices(&[(10, "2.50")]);

        let result = aggregate_revenue(&events, &price_map);

        // Customer 200 only has unpriced events: absent, not zero
        assert_eq!(result.revenue_of(200), None);
        assert_eq!(result.revenue_of(100), Some(dec("2.50")));
        assert_eq!(result.report.missing.get(&77), Some(&2));
        assert_eq!(result.report.total_events, 3);

        println!("Report: {}", result.report.summary());
    }

    #[test]
    fn test_zero_quantity_contributes_zero() {
        let events = vec![event(100, 10, 0)];
        let price_map = prices(&[(10, "9.99")]);

        let result = aggregate_revenue(&events, &price_map);

        assert_eq!(result.revenue_of(100), Some(Decimal::ZERO));
        assert!(result.report.is_clean());
    }

    #[test]
    fn test_additivity_is_order_independent() {
        let mut events = vec![
            event(1, 10, 3),
            event(1, 11, 7),
            event(1, 12, 1),
            event(1, 10, 2),
        ];
        let price_map = prices(&[(10, "0.10"), (11, "19.99"), (12, "0.01")]);

        let forward = aggregate_revenue(&events, &price_map);
        events.reverse();
        let backward = aggregate_revenue(&events, &price_map);

        // 5 * 0.10 + 7 * 19.99 + 1 * 0.01
        assert_eq!(forward.revenue_of(1), Some(dec("140.44")));
        assert_eq!(forward.totals, backward.totals);
    }

    #[test]
    fn test_no_float_drift_over_many_additions() {
        let events: Vec<PricedEvent> = (0..100_000).map(|_| event(1, 10, 1)).collect();
        let price_map = prices(&[(10, "0.10")]);

        let result = aggregate_revenue(&events, &price_map);

        assert_eq!(result.revenue_of(1), Some(dec("10000.00")));
        assert_eq!(result.grand_total_2dp(), "10000.00");
    }

    #[test]
    fn test_empty_events() {
        let result = aggregate_revenue(&[], &prices(&[(10, "1.00")]));

        assert!(result.totals.is_empty());
        assert!(result.report.is_clean());
        assert_eq!(result.report.skipped_percentage(), 0.0);
        assert!(result.report.summary().contains("all 0 events"));
    }

    #[derive(Default)]
    struct CountingObserver {
        started_with: usize,
        last_processed: usize,
        missing: Vec<ContentId>,
        finished: bool,
    }

    impl AggregationObserver for CountingObserver {
        fn on_start(&mut self, total_events: usize) {
            self.started_with = total_events;
        }

        fn on_event(&mut self, processed: usize) {
            self.last_processed = processed;
        }

        fn on_missing_price(&mut self, event: &PricedEvent) {
            self.missing.push(event.content_id);
        }

        fn on_finish(&mut self) {
            self.finished = true;
        }
    }

    #[test]
    fn test_observer_sees_progress_without_changing_result() {
        let events = vec![event(1, 10, 1), event(2, 42, 1), event(3, 10, 4)];
        let price_map = prices(&[(10, "3.00")]);
        let mut observer = CountingObserver::default();

        let observed = aggregate_revenue_observed(&events, &price_map, &mut observer);
        let plain = aggregate_revenue(&events, &price_map);

        assert_eq!(observed, plain);
        assert_eq!(observer.started_with, 3);
        assert_eq!(observer.last_processed, 3);
        assert_eq!(observer.missing, vec![42]);
        assert!(observer.finished);
    }

    #[test]
    fn test_revenue_totals_sorted_by_customer() {
        let events = vec![event(30, 10, 1), event(10, 10, 1), event(20, 10, 1)];
        let result = aggregate_revenue(&events, &prices(&[(10, "1.00")]));

        let ids: Vec<CustomerId> = result.revenue_totals().iter().map(|t| t.customer_id).collect();
        assert_eq!(ids, vec![10, 20, 30]);
    }
}
