//! Hot-key accounting
//!
//! A bounded LRU of per-key access statistics; rarely-touched keys age
//! out so the map tracks the working set, not history.

use std::num::NonZeroUsize;

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Per-key access statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotKeyStat {
    pub key: String,
    pub access_count: u64,
    pub last_access: DateTime<Utc>,
    pub hit_rate: f64,
    pub avg_size: f64,
    hits: u64,
}

/// Tracks the most-accessed keys
pub struct HotKeyTracker {
    entries: Mutex<LruCache<String, HotKeyStat>>,
}

impl HotKeyTracker {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Record one observed access
    pub fn record(&self, key: &str, hit: bool, size: Option<u64>) {
        let mut entries = self.entries.lock();
        if let Some(stat) = entries.get_mut(key) {
            stat.access_count += 1;
            if hit {
                stat.hits += 1;
            }
            stat.hit_rate = stat.hits as f64 / stat.access_count as f64;
            if let Some(size) = size {
                // Running mean over accesses that reported a size
                stat.avg_size += (size as f64 - stat.avg_size) / stat.access_count as f64;
            }
            stat.last_access = Utc::now();
        } else {
            entries.put(
                key.to_string(),
                HotKeyStat {
                    key: key.to_string(),
                    access_count: 1,
                    last_access: Utc::now(),
                    hit_rate: if hit { 1.0 } else { 0.0 },
                    avg_size: size.unwrap_or(0) as f64,
                    hits: u64::from(hit),
                },
            );
        }
    }

    /// Top `limit` keys by access count
    pub fn top(&self, limit: usize) -> Vec<HotKeyStat> {
        let entries = self.entries.lock();
        let mut stats: Vec<HotKeyStat> = entries.iter().map(|(_, s)| s.clone()).collect();
        stats.sort_by(|a, b| b.access_count.cmp(&a.access_count));
        stats.truncate(limit);
        stats
    }

    /// Tracked key count
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_counting_and_hit_rate() {
        let tracker = HotKeyTracker::new(100);
        tracker.record("product:1", true, None);
        tracker.record("product:1", true, None);
        tracker.record("product:1", false, None);

        let top = tracker.top(10);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].access_count, 3);
        assert!((top[0].hit_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_top_orders_by_access_count() {
        let tracker = HotKeyTracker::new(100);
        for _ in 0..5 {
            tracker.record("hot", true, None);
        }
        for _ in 0..2 {
            tracker.record("warm", true, None);
        }
        tracker.record("cold", false, None);

        let top = tracker.top(2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].key, "hot");
        assert_eq!(top[1].key, "warm");
    }

    #[test]
    fn test_capacity_evicts_least_recent() {
        let tracker = HotKeyTracker::new(2);
        tracker.record("a", true, None);
        tracker.record("b", true, None);
        tracker.record("c", true, None);
        assert_eq!(tracker.len(), 2);
        let keys: Vec<String> = tracker.top(10).into_iter().map(|s| s.key).collect();
        assert!(!keys.contains(&"a".to_string()));
    }

    #[test]
    fn test_avg_size_running_mean() {
        let tracker = HotKeyTracker::new(10);
        tracker.record("k", true, Some(100));
        tracker.record("k", true, Some(200));
        let top = tracker.top(1);
        assert!((top[0].avg_size - 150.0).abs() < 1e-9);
    }
}
