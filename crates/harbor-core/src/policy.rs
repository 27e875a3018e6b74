//! # Sync Policy
//!
//! Fixed policy constants and the pure functions built on them.
//!
//! ## Policy Summary
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Sync Policy                                    │
//! │                                                                         │
//! │  LINK QUALITY                   EVICTION                                │
//! │  ────────────                   ────────                                │
//! │  < 100ms   excellent            candidates: synchronized entries only  │
//! │  < 250ms   good                 order:      oldest created_at first    │
//! │  < 500ms   fair                 quantity:   ceil(25% of candidates)    │
//! │  else      poor                                                         │
//! │  no reply  offline              DELIVERY ORDER                          │
//! │                                 ──────────────                          │
//! │                                 high < medium < low,                   │
//! │                                 ties by created_at (stable)            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::types::CacheEntry;

// =============================================================================
// Constants
// =============================================================================

/// Upper bound (exclusive) for an excellent link.
pub const EXCELLENT_LATENCY_MS: u128 = 100;

/// Upper bound (exclusive) for a good link.
pub const GOOD_LATENCY_MS: u128 = 250;

/// Upper bound (exclusive) for a fair link.
pub const FAIR_LATENCY_MS: u128 = 500;

/// Share of the synchronized subset removed by one eviction, in percent.
pub const EVICTION_PERCENT: u64 = 25;

/// Size of an empty serialized collection (`[]`).
pub const EMPTY_COLLECTION_BYTES: u64 = 2;

// =============================================================================
// Eviction
// =============================================================================

/// Number of synchronized entries one eviction removes: `ceil(25% of n)`.
pub fn eviction_count(synchronized: u64) -> u64 {
    (synchronized * EVICTION_PERCENT).div_ceil(100)
}

// =============================================================================
// Size Accounting
// =============================================================================

/// Serialized size of a collection whose records sum to `records_bytes`.
///
/// `[` + records joined by `,` + `]`.
pub fn collection_size(count: u64, records_bytes: u64) -> u64 {
    EMPTY_COLLECTION_BYTES + records_bytes + count.saturating_sub(1)
}

/// Usage of `capacity` in percent. Zero capacity reports 100% when non-empty.
pub fn usage_percent(size_bytes: u64, capacity_bytes: u64) -> f64 {
    if capacity_bytes == 0 {
        return if size_bytes == 0 { 0.0 } else { 100.0 };
    }
    size_bytes as f64 / capacity_bytes as f64 * 100.0
}

// =============================================================================
// Delivery Order
// =============================================================================

/// Stable-sorts entries for delivery: priority first, then `created_at`.
pub fn sort_for_delivery(entries: &mut [CacheEntry]) {
    entries.sort_by(|a, b| {
        a.effective_priority()
            .cmp(&b.effective_priority())
            .then_with(|| a.created_at.cmp(&b.created_at))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MutationKind, Priority};
    use chrono::{DateTime, Utc};

    fn entry(id: &str, priority: Option<Priority>, millis: i64) -> CacheEntry {
        CacheEntry {
            id: id.to_string(),
            kind: MutationKind::Create,
            module: "fleet".to_string(),
            data: serde_json::Value::Null,
            priority,
            synchronized: false,
            attempts: 0,
            last_error: None,
            created_at: DateTime::<Utc>::from_timestamp_millis(millis).unwrap(),
            synchronized_at: None,
        }
    }

    #[test]
    fn test_eviction_count_rounds_up() {
        assert_eq!(eviction_count(0), 0);
        assert_eq!(eviction_count(1), 1);
        assert_eq!(eviction_count(4), 1);
        assert_eq!(eviction_count(5), 2);
        assert_eq!(eviction_count(8), 2);
        assert_eq!(eviction_count(10), 3);
        assert_eq!(eviction_count(100), 25);
    }

    #[test]
    fn test_collection_size() {
        assert_eq!(collection_size(0, 0), 2);
        assert_eq!(collection_size(1, 10), 12);
        assert_eq!(collection_size(3, 30), 34);
    }

    #[test]
    fn test_usage_percent_zero_capacity() {
        assert_eq!(usage_percent(0, 0), 0.0);
        assert_eq!(usage_percent(5, 0), 100.0);
    }

    #[test]
    fn test_sort_for_delivery() {
        let mut entries = vec![
            entry("low-old", Some(Priority::Low), 1),
            entry("none-new", None, 5),
            entry("high-new", Some(Priority::High), 4),
            entry("medium-old", Some(Priority::Medium), 2),
            entry("high-old", Some(Priority::High), 3),
        ];
        sort_for_delivery(&mut entries);
        let ids: Vec<_> = entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["high-old", "high-new", "medium-old", "none-new", "low-old"]
        );
    }

    #[test]
    fn test_sort_is_stable_for_equal_keys() {
        let mut entries = vec![
            entry("first", Some(Priority::Low), 7),
            entry("second", Some(Priority::Low), 7),
        ];
        sort_for_delivery(&mut entries);
        assert_eq!(entries[0].id, "first");
        assert_eq!(entries[1].id, "second");
    }
}
