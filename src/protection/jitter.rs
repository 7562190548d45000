//! Deterministic jittered TTL
//!
//! Spreads expirations across `[min, max]` so a mass warm does not expire
//! as a single wave. The jitter is a pure function of the key, so
//! rewriting the same key always yields the same TTL and warmup stays
//! idempotent.

use std::time::Duration;

use crate::config::RandomTtlConfig;
use crate::protection::hash::fnv1_64;

/// Deterministic TTL jitter
#[derive(Debug, Clone)]
pub struct TtlJitter {
    config: RandomTtlConfig,
}

impl TtlJitter {
    pub fn new(config: RandomTtlConfig) -> Self {
        Self { config }
    }

    /// TTL for `key`: `clamp(base + (fnv64(key) mod range), min, max)`
    ///
    /// A zero jitter range yields exactly `base`.
    pub fn ttl(&self, key: &str) -> Duration {
        self.ttl_with_base(key, Duration::from_secs(self.config.base_secs))
    }

    /// Jitter around a caller-supplied base (per-domain TTLs)
    pub fn ttl_with_base(&self, key: &str, base: Duration) -> Duration {
        let jitter_secs = if self.config.range_secs == 0 {
            0
        } else {
            fnv1_64(key.as_bytes()) % self.config.range_secs
        };
        let total = base.as_secs().saturating_add(jitter_secs);
        Duration::from_secs(total.clamp(self.config.min_secs, self.config.max_secs))
    }
}
