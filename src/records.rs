// 📦 Records - Plain in-memory rows flowing through the pipeline
// Inputs come from the loader, outputs go to the exporter.
//
// Every record is a VALUE: created once per run, never mutated after loading.

use chrono::NaiveDateTime;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Opaque customer identifier, stable across a run
pub type CustomerId = i64;

/// Key into the price reference set
pub type ContentId = i64;

// ============================================================================
// INPUT STREAM A: EVENTS
// ============================================================================

/// Purchase event, already filtered upstream to one event kind + time window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricedEvent {
    pub customer_id: CustomerId,
    pub content_id: ContentId,
    pub quantity: u32,

    /// Only used by the upstream filter, never by the core
    pub event_timestamp: NaiveDateTime,
}

// ============================================================================
// INPUT STREAM B: PRICES
// ============================================================================

/// Historical unit price for a content item
/// Several records may share `content_id`; the latest `inserted_at` is current
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    /// Source row id, used as secondary key when `inserted_at` ties
    pub record_id: i64,
    pub content_id: ContentId,
    pub unit_price: Decimal,
    pub inserted_at: NaiveDateTime,
}

// ============================================================================
// INPUT STREAM C: CONTACTS
// ============================================================================

/// Historical contact value (email) for a customer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactRecord {
    /// Source row id, used as secondary key when `inserted_at` ties
    pub record_id: i64,
    pub customer_id: CustomerId,
    pub contact_value: String,
    pub inserted_at: NaiveDateTime,
}

// ============================================================================
// DERIVED VALUES
// ============================================================================

/// Accumulated revenue for one customer over the window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevenueTotal {
    pub customer_id: CustomerId,
    pub accumulated_revenue: Decimal,
}

/// Customer joined with its contact, ready for ranking and export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCustomer {
    pub customer_id: CustomerId,

    /// Absent contact is not an error
    pub contact_value: Option<String>,

    pub accumulated_revenue: Decimal,
}

impl RankedCustomer {
    /// Revenue as written to the sink: fixed 2-decimal precision
    pub fn revenue_2dp(&self) -> String {
        format_money(self.accumulated_revenue)
    }
}

/// Format a money value at fixed 2-decimal precision ("24.98", "10.00")
/// Half-cents round away from zero, like a DECIMAL(18,2) column would
pub fn format_money(value: Decimal) -> String {
    let mut rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_format_money_pads_and_rounds() {
        assert_eq!(format_money(Decimal::from(10)), "10.00");
        assert_eq!(format_money(Decimal::from_str("24.98").unwrap()), "24.98");
        assert_eq!(format_money(Decimal::from_str("1.005").unwrap()), "1.01");
        assert_eq!(format_money(Decimal::from_str("1.0151").unwrap()), "1.02");
    }

    #[test]
    fn test_ranked_customer_revenue_2dp() {
        let customer = RankedCustomer {
            customer_id: 7,
            contact_value: None,
            accumulated_revenue: Decimal::from_str("9.9").unwrap(),
        };

        assert_eq!(customer.revenue_2dp(), "9.90");
    }
}
