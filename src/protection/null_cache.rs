//! Null-value cache
//!
//! Process-local record of keys recently observed absent from the
//! authoritative store. Entries are soft: they expire after the null TTL
//! and the oldest is evicted under capacity pressure.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::NullCacheConfig;

/// Bounded map of absence observations
pub struct NullValueCache {
    entries: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
    max_keys: usize,
}

impl NullValueCache {
    pub fn new(config: &NullCacheConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: Duration::from_secs(config.ttl_secs),
            max_keys: config.max_null_keys,
        }
    }

    /// Record that `key` was observed absent
    pub fn insert(&self, key: &str) {
        let mut entries = self.entries.lock();
        if !entries.contains_key(key) && entries.len() >= self.max_keys {
            // Evict the entry observed longest ago
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, seen)| **seen)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest);
            }
        }
        entries.insert(key.to_string(), Instant::now());
    }

    /// Whether `key` has a fresh absence observation
    pub fn contains(&self, key: &str) -> bool {
        let entries = self.entries.lock();
        entries
            .get(key)
            .map_or(false, |seen| seen.elapsed() <= self.ttl)
    }

    /// Forget an observation (the key was seen to exist again)
    pub fn remove(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    /// Drop stale observations; returns how many were removed
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, seen| seen.elapsed() <= self.ttl);
        before - entries.len()
    }

    /// Current entry count
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
