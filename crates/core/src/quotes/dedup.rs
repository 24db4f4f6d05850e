use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::model::CacheEntry;

/// Collapse entries sharing `(symbol, observed_at)` to the one fetched last.
///
/// Ties on `fetched_at` go to the larger cache key, so the result does not
/// depend on input order. Output is sorted by `(symbol, observed_at)`.
pub fn dedup_latest(entries: &[CacheEntry]) -> Vec<&CacheEntry> {
    let mut winners: HashMap<(&str, DateTime<Utc>), &CacheEntry> = HashMap::new();

    for entry in entries {
        winners
            .entry(entry.record.natural_key())
            .and_modify(|current| {
                if supersedes(entry, *current) {
                    *current = entry;
                }
            })
            .or_insert(entry);
    }

    let mut batch: Vec<&CacheEntry> = winners.into_values().collect();
    batch.sort_by(|a, b| a.record.natural_key().cmp(&b.record.natural_key()));
    batch
}

fn supersedes(candidate: &CacheEntry, current: &CacheEntry) -> bool {
    (candidate.record.fetched_at, &candidate.key) > (current.record.fetched_at, &current.key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quotes::model::{CacheKey, QuoteRecord};
    use chrono::TimeZone;

    fn entry(key: &str, symbol: &str, observed: i64, fetched: i64, price: f64) -> CacheEntry {
        CacheEntry {
            key: CacheKey::from_raw(key),
            record: QuoteRecord {
                symbol: symbol.to_string(),
                observed_at: Utc.timestamp_opt(observed, 0).unwrap(),
                price,
                open: None,
                high: None,
                low: None,
                previous_close: None,
                change: None,
                change_percent: None,
                volume: None,
                source: "TEST".to_string(),
                fetched_at: Utc.timestamp_opt(fetched, 0).unwrap(),
            },
        }
    }

    #[test]
    fn test_later_fetch_wins() {
        let entries = vec![
            entry("AAPL:2000:b", "AAPL", 100, 2, 2.0),
            entry("AAPL:1000:a", "AAPL", 100, 1, 1.0),
            entry("MSFT:1000:c", "MSFT", 100, 1, 9.0),
        ];
        let batch = dedup_latest(&entries);

        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].record.symbol, "AAPL");
        assert_eq!(batch[0].record.price, 2.0);
        assert_eq!(batch[1].record.symbol, "MSFT");
    }

    #[test]
    fn test_fetch_time_tie_breaks_on_key() {
        let a = entry("AAPL:1000:a", "AAPL", 100, 1, 1.0);
        let b = entry("AAPL:1000:b", "AAPL", 100, 1, 2.0);

        let forward = dedup_latest(&[a.clone(), b.clone()])[0].record.price;
        let backward = dedup_latest(&[b, a])[0].record.price;
        assert_eq!(forward, 2.0);
        assert_eq!(backward, 2.0);
    }

    #[test]
    fn test_empty_input() {
        assert!(dedup_latest(&[]).is_empty());
    }
}
