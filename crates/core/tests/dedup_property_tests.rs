//! Property-based tests for transfer deduplication.
//!
//! Whatever mix of duplicates is staged, each `(symbol, observed_at)` must
//! end up persisted exactly once, carrying the latest fetch.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;

use finpipe_core::quotes::{dedup_latest, CacheEntry, CacheKey, QuoteRecord};

// =============================================================================
// Generators
// =============================================================================

fn arb_symbol() -> impl Strategy<Value = String> {
    prop_oneof![Just("AAPL"), Just("MSFT"), Just("NVDA")].prop_map(str::to_string)
}

/// Entries drawn from a small key space so collisions are common.
fn arb_entry() -> impl Strategy<Value = CacheEntry> {
    (arb_symbol(), 0i64..4, 0i64..6, 1.0f64..500.0, "[a-f0-9]{8}").prop_map(
        |(symbol, observed, fetched, price, id)| {
            let fetched_at = Utc.timestamp_opt(1_000 + fetched, 0).unwrap();
            CacheEntry {
                key: CacheKey::from_raw(format!(
                    "{}:{}:{}",
                    symbol,
                    fetched_at.timestamp_millis(),
                    id
                )),
                record: QuoteRecord {
                    symbol,
                    observed_at: Utc.timestamp_opt(observed * 60, 0).unwrap(),
                    price,
                    open: None,
                    high: None,
                    low: None,
                    previous_close: None,
                    change: None,
                    change_percent: None,
                    volume: None,
                    source: "PROP".to_string(),
                    fetched_at,
                },
            }
        },
    )
}

// =============================================================================
// Property Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Each natural key appears once, with the maximum `fetched_at` for it.
    #[test]
    fn prop_dedup_keeps_latest_fetch(entries in proptest::collection::vec(arb_entry(), 0..40)) {
        let batch = dedup_latest(&entries);

        let mut latest: HashMap<(String, DateTime<Utc>), DateTime<Utc>> = HashMap::new();
        for entry in &entries {
            let key = (entry.record.symbol.clone(), entry.record.observed_at);
            let slot = latest.entry(key).or_insert(entry.record.fetched_at);
            if entry.record.fetched_at > *slot {
                *slot = entry.record.fetched_at;
            }
        }

        prop_assert_eq!(batch.len(), latest.len());
        for winner in &batch {
            let key = (winner.record.symbol.clone(), winner.record.observed_at);
            prop_assert_eq!(Some(&winner.record.fetched_at), latest.get(&key));
        }
    }

    /// The winner does not depend on the order entries were staged in.
    #[test]
    fn prop_dedup_is_order_independent(entries in proptest::collection::vec(arb_entry(), 0..30)) {
        let forward: Vec<CacheKey> = dedup_latest(&entries).iter().map(|e| e.key.clone()).collect();

        let mut reversed = entries.clone();
        reversed.reverse();
        let backward: Vec<CacheKey> = dedup_latest(&reversed).iter().map(|e| e.key.clone()).collect();

        prop_assert_eq!(forward, backward);
    }
}
