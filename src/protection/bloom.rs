//! Bloom filter over a store-resident bit array
//!
//! Bits live in a single bitmap key so every process shares one filter.
//! The `k` probe offsets for a key are derived by double hashing:
//! `(h1 + i * h2) mod m` with FNV-64 and FNV-64a. There is no removal;
//! the filter is periodically rebuilt from an external truth source.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::adapter::KvAdapter;
use crate::config::BloomConfig;
use crate::error::CacheResult;
use crate::protection::hash::{fnv1_64, fnv1a_64};

/// Supplies the set of known-present keys when the filter is rebuilt
#[async_trait]
pub trait BloomReloader: Send + Sync {
    /// Return every key that must test positive after the refresh
    async fn reload(&self) -> CacheResult<Vec<String>>;
}

/// Store-backed bloom filter
pub struct BloomFilter {
    adapter: Arc<KvAdapter>,
    key: String,
    bit_count: u64,
    hash_count: u32,
    insertions: AtomicU64,
}

impl BloomFilter {
    /// Derive filter parameters from the configuration
    ///
    /// Explicit `bit_array_size` / `hash_functions` override the values
    /// derived from `expected_elements` and `false_positive_rate`.
    pub fn new(adapter: Arc<KvAdapter>, config: &BloomConfig) -> Self {
        let n = config.expected_elements.max(1) as f64;
        let p = config.false_positive_rate.clamp(1e-9, 0.5);
        let ln2 = std::f64::consts::LN_2;

        let bit_count = if config.bit_array_size > 0 {
            config.bit_array_size
        } else {
            (-(n * p.ln()) / (ln2 * ln2)).ceil() as u64
        };
        let hash_count = if config.hash_functions > 0 {
            config.hash_functions
        } else {
            ((bit_count as f64 / n) * ln2).round().max(1.0) as u32
        };

        Self {
            adapter,
            key: config.redis_key.clone(),
            bit_count,
            hash_count,
            insertions: AtomicU64::new(0),
        }
    }

    /// Configured bit-array size
    pub fn bit_count(&self) -> u64 {
        self.bit_count
    }

    /// Configured hash-function count
    pub fn hash_count(&self) -> u32 {
        self.hash_count
    }

    /// Keys added since construction or last refresh
    pub fn insertions(&self) -> u64 {
        self.insertions.load(Ordering::Relaxed)
    }

    fn offsets(&self, key: &str) -> Vec<u64> {
        let h1 = fnv1_64(key.as_bytes());
        let h2 = fnv1a_64(key.as_bytes());
        (0..u64::from(self.hash_count))
            .map(|i| h1.wrapping_add(i.wrapping_mul(h2)) % self.bit_count)
            .collect()
    }

    /// Mark a key as present; all `k` bits are set in one pipelined write
    pub async fn add(&self, key: &str) -> CacheResult<()> {
        self.adapter.set_bits(&self.key, &self.offsets(key)).await?;
        self.insertions.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Probe a key; `false` means definitely absent
    pub async fn might_contain(&self, key: &str) -> CacheResult<bool> {
        let bits = self.adapter.get_bits(&self.key, &self.offsets(key)).await?;
        Ok(bits.iter().all(|b| *b))
    }

    /// Whether the bit array exists in the store at all
    ///
    /// A cold filter answers `false` to every probe, which callers must
    /// treat as inconclusive rather than proof of absence.
    pub async fn is_primed(&self) -> CacheResult<bool> {
        self.adapter.exists(&self.key).await
    }

    /// Rebuild the filter from the reloader's key set
    pub async fn refresh(&self, reloader: &dyn BloomReloader) -> CacheResult<usize> {
        let keys = reloader.reload().await?;
        self.adapter.del(&self.key).await?;
        self.insertions.store(0, Ordering::Relaxed);
        for key in &keys {
            self.add(key).await?;
        }
        info!(keys = keys.len(), "bloom filter refreshed");
        Ok(keys.len())
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("key", &self.key)
            .field("bit_count", &self.bit_count)
            .field("hash_count", &self.hash_count)
            .finish()
    }
}
