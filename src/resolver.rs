// ⏳ Latest-Record Resolver - "Latest wins" over historical reference rows
//
// A price or an email is an IDENTITY with many values over time.
// The source tables keep every value ever inserted; the pipeline only wants
// the current one per key.
//
// Rule: keep the record with the greatest `inserted_at`.
// Ties on `inserted_at` go to the greater `record_id` (source row id), so the
// result does not depend on the order rows come back from the loader.
// Only a full tie (same timestamp AND same row id) falls back to "later in the
// pass wins".

use crate::records::{ContactRecord, ContentId, CustomerId, PriceRecord};
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::hash::Hash;

// ============================================================================
// VERSIONED TRAIT
// ============================================================================

/// A record that is one historical value of some business key
pub trait Versioned {
    type Key: Eq + Hash;

    /// Business key the record belongs to
    fn key(&self) -> Self::Key;

    /// When this value was recorded
    fn inserted_at(&self) -> NaiveDateTime;

    /// Secondary ordering for equal `inserted_at`
    fn record_id(&self) -> i64;

    /// True if `self` should replace `current` as the latest value
    fn supersedes(&self, current: &Self) -> bool
    where
        Self: Sized,
    {
        (self.inserted_at(), self.record_id()) >= (current.inserted_at(), current.record_id())
    }
}

impl Versioned for PriceRecord {
    type Key = ContentId;

    fn key(&self) -> ContentId {
        self.content_id
    }

    fn inserted_at(&self) -> NaiveDateTime {
        self.inserted_at
    }

    fn record_id(&self) -> i64 {
        self.record_id
    }
}

impl Versioned for ContactRecord {
    type Key = CustomerId;

    fn key(&self) -> CustomerId {
        self.customer_id
    }

    fn inserted_at(&self) -> NaiveDateTime {
        self.inserted_at
    }

    fn record_id(&self) -> i64 {
        self.record_id
    }
}

// ============================================================================
// RESOLUTION
// ============================================================================

/// Collapse records to one per key, keeping the latest
///
/// Single pass. Empty input gives an empty map.
pub fn resolve_latest<'a, R, I>(records: I) -> HashMap<R::Key, &'a R>
where
    R: Versioned + 'a,
    I: IntoIterator<Item = &'a R>,
{
    let mut latest: HashMap<R::Key, &'a R> = HashMap::new();

    for record in records {
        let key = record.key();
        let replace = match latest.get(&key) {
            Some(current) => record.supersedes(current),
            None => true,
        };

        if replace {
            latest.insert(key, record);
        }
    }

    latest
}

/// Current unit price per content id
pub fn build_price_map(prices: &[PriceRecord]) -> HashMap<ContentId, Decimal> {
    resolve_latest(prices)
        .into_iter()
        .map(|(content_id, record)| (content_id, record.unit_price))
        .collect()
}

/// Current contact value per customer id
pub fn build_contact_map(contacts: &[ContactRecord]) -> HashMap<CustomerId, String> {
    resolve_latest(contacts)
        .into_iter()
        .map(|(customer_id, record)| (customer_id, record.contact_value.clone()))
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn ts(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn price(record_id: i64, content_id: ContentId, amount: &str, inserted_at: NaiveDateTime) -> PriceRecord {
        PriceRecord {
            record_id,
            content_id,
            unit_price: Decimal::from_str(amount).unwrap(),
            inserted_at,
        }
    }

    fn contact(record_id: i64, customer_id: CustomerId, email: &str, inserted_at: NaiveDateTime) -> ContactRecord {
        ContactRecord {
            record_id,
            customer_id,
            contact_value: email.to_string(),
            inserted_at,
        }
    }

    #[test]
    fn test_empty_input_gives_empty_map() {
        let prices: Vec<PriceRecord> = Vec::new();
        assert!(build_price_map(&prices).is_empty());
        assert!(resolve_latest(&prices).is_empty());
    }

    #[test]
    fn test_latest_price_wins() {
        let prices = vec![
            price(1, 10, "5.00", ts(1, 9)),
            price(2, 10, "9.99", ts(3, 9)),
            price(3, 10, "7.50", ts(2, 9)),
            price(4, 11, "5.00", ts(1, 9)),
        ];

        let map = build_price_map(&prices);

        assert_eq!(map.len(), 2);
        assert_eq!(map[&10], Decimal::from_str("9.99").unwrap());
        assert_eq!(map[&11], Decimal::from_str("5.00").unwrap());
    }

    #[test]
    fn test_resolution_is_order_independent() {
        let mut prices = vec![
            price(1, 10, "1.00", ts(1, 9)),
            price(2, 10, "2.00", ts(5, 9)),
            price(3, 10, "3.00", ts(3, 9)),
        ];

        let forward = build_price_map(&prices);
        prices.reverse();
        let backward = build_price_map(&prices);

        assert_eq!(forward, backward);
        assert_eq!(forward[&10], Decimal::from_str("2.00").unwrap());
    }

    #[test]
    fn test_equal_timestamps_break_on_record_id() {
        let a = contact(7, 100, "old@example.com", ts(1, 12));
        let b = contact(9, 100, "new@example.com", ts(1, 12));

        let forward = build_contact_map(&[a.clone(), b.clone()]);
        let backward = build_contact_map(&[b, a]);

        assert_eq!(forward[&100], "new@example.com");
        assert_eq!(backward[&100], "new@example.com");
    }

    #[test]
    fn test_full_tie_later_record_wins() {
        let a = contact(5, 100, "first@example.com", ts(1, 12));
        let b = contact(5, 100, "second@example.com", ts(1, 12));

        let map = build_contact_map(&[a, b]);

        assert_eq!(map[&100], "second@example.com");
    }

    #[test]
    fn test_resolver_idempotent_on_unique_keys() {
        let contacts = vec![
            contact(1, 100, "a@example.com", ts(1, 1)),
            contact(2, 101, "b@example.com", ts(2, 1)),
            contact(3, 102, "c@example.com", ts(3, 1)),
        ];

        let resolved = resolve_latest(&contacts);

        assert_eq!(resolved.len(), 3);
        for record in &contacts {
            assert_eq!(resolved[&record.customer_id], record);
        }

        // Resolving the resolved set again changes nothing
        let again: Vec<ContactRecord> = resolved.values().map(|r| (*r).clone()).collect();
        let map_once = build_contact_map(&contacts);
        let map_twice = build_contact_map(&again);
        assert_eq!(map_once, map_twice);
    }

    #[test]
    fn test_unrelated_keys_do_not_interfere() {
        let prices = vec![
            price(1, 10, "1.00", ts(9, 0)),
            price(2, 11, "2.00", ts(1, 0)),
            price(3, 11, "2.50", ts(2, 0)),
        ];

        let resolved = resolve_latest(&prices);

        assert_eq!(resolved[&10].record_id, 1);
        assert_eq!(resolved[&11].record_id, 3);

        // The winner per key carries the max timestamp among that key's records
        for (key, winner) in &resolved {
            let max_ts = prices
                .iter()
                .filter(|p| p.content_id == *key)
                .map(|p| p.inserted_at)
                .max()
                .unwrap();
            assert_eq!(winner.inserted_at, max_ts);
        }
    }
}
