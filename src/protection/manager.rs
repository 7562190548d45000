//! Protected read flow
//!
//! Composes the bloom filter, null-cache, distributed lock, jittered TTL
//! and circuit breaker in front of the loader. The null-cache is probed
//! before the bloom filter: it is process-local and already records keys
//! the filter proved absent, so repeat offenders never reach the store.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, warn};

use crate::adapter::KvAdapter;
use crate::config::ProtectionConfig;
use crate::error::{CacheError, CacheResult};
use crate::protection::bloom::{BloomFilter, BloomReloader};
use crate::protection::breaker::{BreakerState, CircuitBreaker};
use crate::protection::jitter::TtlJitter;
use crate::protection::lock::DistributedLock;
use crate::protection::null_cache::NullValueCache;

#[derive(Debug, Default)]
struct ResponseTimes {
    count: u64,
    total_ms: f64,
    min_ms: f64,
    max_ms: f64,
}

/// Cumulative protection counters
#[derive(Debug, Default)]
pub struct ProtectionMetrics {
    total_requests: AtomicU64,
    penetration_attempts: AtomicU64,
    penetration_blocked: AtomicU64,
    bloom_hits: AtomicU64,
    bloom_misses: AtomicU64,
    breakdown_attempts: AtomicU64,
    breakdown_blocked: AtomicU64,
    lock_acquisitions: AtomicU64,
    lock_timeouts: AtomicU64,
    avalanche_detected: AtomicU64,
    avalanche_prevented: AtomicU64,
    loader_invocations: AtomicU64,
    response_times: Mutex<ResponseTimes>,
}

impl ProtectionMetrics {
    fn observe_response(&self, elapsed: Duration) {
        let ms = elapsed.as_secs_f64() * 1000.0;
        let mut rt = self.response_times.lock();
        if rt.count == 0 || ms < rt.min_ms {
            rt.min_ms = ms;
        }
        if ms > rt.max_ms {
            rt.max_ms = ms;
        }
        rt.count += 1;
        rt.total_ms += ms;
    }
}

/// Point-in-time protection counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectionMetricsSnapshot {
    pub total_requests: u64,
    pub protected_requests: u64,
    pub protection_rate: f64,
    pub penetration_attempts: u64,
    pub penetration_blocked: u64,
    pub bloom_hits: u64,
    pub bloom_misses: u64,
    pub breakdown_attempts: u64,
    pub breakdown_blocked: u64,
    pub lock_acquisitions: u64,
    pub lock_timeouts: u64,
    pub avalanche_detected: u64,
    pub avalanche_prevented: u64,
    pub breaker_trips: u64,
    pub breaker_state: BreakerState,
    pub loader_invocations: u64,
    pub avg_response_ms: f64,
    pub min_response_ms: f64,
    pub max_response_ms: f64,
}

/// Penetration / breakdown / avalanche defense front
pub struct ProtectionManager {
    adapter: Arc<KvAdapter>,
    config: ProtectionConfig,
    jitter: TtlJitter,
    breaker: CircuitBreaker,
    null_cache: Arc<NullValueCache>,
    bloom: Option<Arc<BloomFilter>>,
    lock: Option<DistributedLock>,
    reloader: Option<Arc<dyn BloomReloader>>,
    metrics: Arc<ProtectionMetrics>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ProtectionManager {
    pub fn new(adapter: Arc<KvAdapter>, config: ProtectionConfig) -> Self {
        let strategy = |name: &str| {
            config.enabled && config.strategies.iter().any(|s| s == name)
        };
        let bloom = if strategy("bloom_filter") {
            Some(Arc::new(BloomFilter::new(Arc::clone(&adapter), &config.bloom)))
        } else {
            None
        };
        let lock = if strategy("distributed_lock") {
            Some(DistributedLock::new(Arc::clone(&adapter), config.lock.clone()))
        } else {
            None
        };
        let (shutdown, _) = watch::channel(false);
        Self {
            jitter: TtlJitter::new(config.random_ttl.clone()),
            breaker: CircuitBreaker::new(config.breaker.clone()),
            null_cache: Arc::new(NullValueCache::new(&config.null_cache)),
            bloom,
            lock,
            reloader: None,
            metrics: Arc::new(ProtectionMetrics::default()),
            shutdown,
            tasks: Mutex::new(Vec::new()),
            adapter,
            config,
        }
    }

    /// Install the truth source used to rebuild the bloom filter
    pub fn with_bloom_reloader(mut self, reloader: Arc<dyn BloomReloader>) -> Self {
        self.reloader = Some(reloader);
        self
    }

    fn strategy_enabled(&self, name: &str) -> bool {
        self.config.enabled && self.config.strategies.iter().any(|s| s == name)
    }

    /// Spawn the null-cache sweeper and the bloom refresh ticker
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();

        let null_cache = Arc::clone(&self.null_cache);
        let sweep_every = Duration::from_secs(self.config.null_cache.cleanup_interval_secs);
        let mut stop = self.shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            let mut ticker = interval(sweep_every);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = null_cache.sweep();
                        if removed > 0 {
                            debug!(removed, "null-cache sweep");
                        }
                    }
                    _ = stop.changed() => break,
                }
            }
        }));

        if let (Some(bloom), Some(reloader)) = (self.bloom.clone(), self.reloader.clone()) {
            let refresh_every = Duration::from_secs(self.config.bloom.refresh_interval_secs);
            let mut stop = self.shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                let mut ticker = interval(refresh_every);
                ticker.tick().await; // first tick fires immediately; skip it
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = bloom.refresh(reloader.as_ref()).await {
                                warn!(error = %e, "bloom refresh failed");
                            }
                        }
                        _ = stop.changed() => break,
                    }
                }
            }));
        }
    }

    /// Stop background tasks
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
    }

    /// Bloom filter handle, when the strategy is enabled
    pub fn bloom(&self) -> Option<&Arc<BloomFilter>> {
        self.bloom.as_ref()
    }

    /// Breaker state, for health surfaces
    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    /// Jittered TTL for `key` around the configured base
    pub fn ttl_for(&self, key: &str) -> Duration {
        if self.strategy_enabled("random_ttl") {
            self.jitter.ttl(key)
        } else {
            Duration::from_secs(self.config.random_ttl.base_secs)
        }
    }

    /// Jittered TTL for `key` around a per-domain base
    pub fn ttl_with_base(&self, key: &str, base: Duration) -> Duration {
        if self.strategy_enabled("random_ttl") {
            self.jitter.ttl_with_base(key, base)
        } else {
            base
        }
    }

    /// Write a loaded value back with the anti-avalanche TTL
    pub async fn write_back(&self, key: &str, value: &Value, base: Duration) -> CacheResult<()> {
        let ttl = self.ttl_with_base(key, base);
        self.adapter.set(key, value, Some(ttl)).await?;
        if self.config.random_ttl.range_secs > 0 && self.strategy_enabled("random_ttl") {
            self.metrics.avalanche_prevented.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(bloom) = &self.bloom {
            bloom.add(key).await?;
        }
        self.null_cache.remove(key);
        Ok(())
    }

    /// Protected read: cache, then defenses, then the loader
    ///
    /// Returns `Ok(None)` when the loader itself observes absence;
    /// `Err(Absent)` when a defense proves absence without the loader.
    pub async fn protected_get<F, Fut>(&self, key: &str, loader: F) -> CacheResult<Option<Value>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<Option<Value>>>,
    {
        let started = Instant::now();
        let result = self.protected_get_inner(key, loader).await;
        self.metrics.observe_response(started.elapsed());
        result
    }

    async fn protected_get_inner<F, Fut>(&self, key: &str, loader: F) -> CacheResult<Option<Value>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<Option<Value>>>,
    {
        let breaker_on = self.strategy_enabled("circuit_breaker");
        if breaker_on && !self.breaker.allow() {
            return Err(CacheError::BreakerOpen);
        }

        if let Some(value) = self.adapter.get(key).await? {
            if breaker_on {
                self.breaker.record_success();
            }
            return Ok(Some(value));
        }

        self.metrics.total_requests.fetch_add(1, Ordering::Relaxed);
        self.metrics.penetration_attempts.fetch_add(1, Ordering::Relaxed);

        if self.strategy_enabled("null_cache") && self.null_cache.contains(key) {
            self.metrics.penetration_blocked.fetch_add(1, Ordering::Relaxed);
            return Err(CacheError::Absent(key.to_string()));
        }

        if let Some(bloom) = &self.bloom {
            if bloom.might_contain(key).await? {
                self.metrics.bloom_hits.fetch_add(1, Ordering::Relaxed);
            } else if bloom.is_primed().await? {
                self.metrics.bloom_misses.fetch_add(1, Ordering::Relaxed);
                self.metrics.penetration_blocked.fetch_add(1, Ordering::Relaxed);
                self.null_cache.insert(key);
                return Err(CacheError::Absent(key.to_string()));
            }
            // A cold filter is inconclusive; fall through to the loader
        }

        if let Some(lock) = &self.lock {
            self.metrics.breakdown_attempts.fetch_add(1, Ordering::Relaxed);
            let lock_key = format!("lock:{}", key);
            match lock.acquire(&lock_key).await {
                Ok(guard) => {
                    self.metrics.lock_acquisitions.fetch_add(1, Ordering::Relaxed);
                    // Double-checked: another holder may have loaded it
                    if let Some(value) = self.adapter.get(key).await? {
                        self.metrics.breakdown_blocked.fetch_add(1, Ordering::Relaxed);
                        if let Err(e) = guard.release().await {
                            warn!(key, error = %e, "lock release after double-check hit");
                        }
                        if breaker_on {
                            self.breaker.record_success();
                        }
                        return Ok(Some(value));
                    }
                    let result = self.run_loader(key, loader, breaker_on).await;
                    if let Err(e) = guard.release().await {
                        warn!(key, error = %e, "lock release after load");
                    }
                    result
                }
                Err(CacheError::LockContended(_)) => {
                    self.metrics.lock_timeouts.fetch_add(1, Ordering::Relaxed);
                    self.metrics.avalanche_detected.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(Duration::from_millis(self.config.lock.retry_interval_ms))
                        .await;
                    let value = self.adapter.get(key).await?;
                    if value.is_some() {
                        self.metrics.breakdown_blocked.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(value)
                }
                Err(e) => Err(e),
            }
        } else {
            self.run_loader(key, loader, breaker_on).await
        }
    }

    async fn run_loader<F, Fut>(&self, key: &str, loader: F, breaker_on: bool) -> CacheResult<Option<Value>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<Option<Value>>>,
    {
        self.metrics.loader_invocations.fetch_add(1, Ordering::Relaxed);
        match loader().await {
            Ok(Some(value)) => {
                let base = Duration::from_secs(self.config.random_ttl.base_secs);
                self.write_back(key, &value, base).await?;
                if breaker_on {
                    self.breaker.record_success();
                }
                Ok(Some(value))
            }
            Ok(None) => {
                if self.strategy_enabled("null_cache") {
                    self.null_cache.insert(key);
                }
                if breaker_on {
                    self.breaker.record_success();
                }
                Ok(None)
            }
            Err(e) => {
                if breaker_on {
                    self.breaker.record_failure();
                }
                if self.strategy_enabled("null_cache") {
                    self.null_cache.insert(key);
                }
                Err(e)
            }
        }
    }

    /// Point-in-time counters
    pub fn metrics(&self) -> ProtectionMetricsSnapshot {
        let m = &self.metrics;
        let total = m.total_requests.load(Ordering::Relaxed);
        let penetration_blocked = m.penetration_blocked.load(Ordering::Relaxed);
        let breakdown_blocked = m.breakdown_blocked.load(Ordering::Relaxed);
        let protected = penetration_blocked + breakdown_blocked;
        let rt = m.response_times.lock();
        ProtectionMetricsSnapshot {
            total_requests: total,
            protected_requests: protected,
            protection_rate: if total > 0 {
                protected as f64 / total as f64
            } else {
                0.0
            },
            penetration_attempts: m.penetration_attempts.load(Ordering::Relaxed),
            penetration_blocked,
            bloom_hits: m.bloom_hits.load(Ordering::Relaxed),
            bloom_misses: m.bloom_misses.load(Ordering::Relaxed),
            breakdown_attempts: m.breakdown_attempts.load(Ordering::Relaxed),
            breakdown_blocked,
            lock_acquisitions: m.lock_acquisitions.load(Ordering::Relaxed),
            lock_timeouts: m.lock_timeouts.load(Ordering::Relaxed),
            avalanche_detected: m.avalanche_detected.load(Ordering::Relaxed),
            avalanche_prevented: m.avalanche_prevented.load(Ordering::Relaxed),
            breaker_trips: self.breaker.trips(),
            breaker_state: self.breaker.state(),
            loader_invocations: m.loader_invocations.load(Ordering::Relaxed),
            avg_response_ms: if rt.count > 0 {
                rt.total_ms / rt.count as f64
            } else {
                0.0
            },
            min_response_ms: rt.min_ms,
            max_response_ms: rt.max_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryBackend;
    use crate::config::{BreakerConfig, LockConfig, RandomTtlConfig};
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    fn manager_with(config: ProtectionConfig) -> ProtectionManager {
        let adapter = Arc::new(KvAdapter::new(Arc::new(MemoryBackend::new())));
        ProtectionManager::new(adapter, config)
    }

    fn full_config() -> ProtectionConfig {
        ProtectionConfig {
            random_ttl: RandomTtlConfig {
                base_secs: 3600,
                range_secs: 1800,
                min_secs: 1800,
                max_secs: 5400,
            },
            lock: LockConfig {
                acquire_timeout_ms: 200,
                retry_interval_ms: 10,
                ..LockConfig::default()
            },
            ..ProtectionConfig::default()
        }
    }

    #[tokio::test]
    async fn test_miss_load_then_hit() {
        let manager = manager_with(full_config());
        let invocations = Arc::new(AtomicU32::new(0));

        let counting = Arc::clone(&invocations);
        let value = manager
            .protected_get("product:42", move || async move {
                counting.fetch_add(1, Ordering::SeqCst);
                Ok(Some(json!({"id": 42, "version": 7})))
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value["id"], 42);

        // Second call is a plain cache hit; the loader must not run
        let counting = Arc::clone(&invocations);
        let value = manager
            .protected_get("product:42", move || async move {
                counting.fetch_add(1, Ordering::SeqCst);
                Ok(Some(json!({"id": 0})))
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value["id"], 42);
        assert_eq!(invocations.load(Ordering::SeqCst), 1);

        // TTL landed inside the jitter window
        let ttl = manager.ttl_for("product:42");
        assert!(ttl >= Duration::from_secs(1800) && ttl <= Duration::from_secs(5400));
    }

    #[tokio::test]
    async fn test_penetration_blocked_without_loader() {
        let manager = manager_with(full_config());
        // Prime the filter so negative probes are conclusive
        manager.bloom().unwrap().add("product:1").await.unwrap();

        // Key never added to the bloom filter; loader must not run
        let result = manager
            .protected_get("product:9999", || async {
                panic!("loader must not be invoked")
            })
            .await;
        assert!(matches!(result, Err(CacheError::Absent(_))));

        let metrics = manager.metrics();
        assert_eq!(metrics.loader_invocations, 0);
        assert_eq!(metrics.penetration_blocked, 1);
        assert_eq!(metrics.bloom_misses, 1);

        // Null-cached now: the second call blocks without a bloom probe
        let result = manager
            .protected_get("product:9999", || async {
                panic!("loader must not be invoked")
            })
            .await;
        assert!(matches!(result, Err(CacheError::Absent(_))));
        let metrics = manager.metrics();
        assert_eq!(metrics.bloom_misses, 1);
        assert_eq!(metrics.penetration_blocked, 2);
    }

    #[tokio::test]
    async fn test_loader_absence_is_null_cached() {
        let mut config = full_config();
        // Bloom off so the loader path is reachable for an unknown key
        config.strategies.retain(|s| s != "bloom_filter");
        let manager = manager_with(config);

        let result = manager
            .protected_get("product:1", || async { Ok(None) })
            .await
            .unwrap();
        assert!(result.is_none());

        // Absence observation now short-circuits
        let result = manager
            .protected_get("product:1", || async {
                panic!("loader must not be invoked")
            })
            .await;
        assert!(matches!(result, Err(CacheError::Absent(_))));
    }

    #[tokio::test]
    async fn test_breaker_trips_and_recovers() {
        let mut config = full_config();
        config.strategies.retain(|s| s != "bloom_filter" && s != "null_cache");
        config.breaker = BreakerConfig {
            failure_threshold: 3,
            recovery_timeout_ms: 50,
            half_open_requests: 1,
            monitoring_period_secs: 60,
        };
        let manager = manager_with(config);

        for _ in 0..3 {
            let result = manager
                .protected_get("flaky", || async {
                    Err(CacheError::Backend("db down".to_string()))
                })
                .await;
            assert!(matches!(result, Err(CacheError::Backend(_))));
        }
        assert_eq!(manager.breaker_state(), BreakerState::Open);

        // Fourth call rejected without invoking the loader
        let before = manager.metrics().loader_invocations;
        let result = manager
            .protected_get("flaky", || async { Ok(Some(json!(1))) })
            .await;
        assert!(matches!(result, Err(CacheError::BreakerOpen)));
        assert_eq!(manager.metrics().loader_invocations, before);

        // After recovery, a probe succeeds and closes the breaker
        tokio::time::sleep(Duration::from_millis(80)).await;
        let value = manager
            .protected_get("healthy", || async { Ok(Some(json!({"ok": true}))) })
            .await
            .unwrap();
        assert!(value.is_some());
        assert_eq!(manager.breaker_state(), BreakerState::Closed);

        // A fresh failure streak reopens it
        for _ in 0..3 {
            let _ = manager
                .protected_get("flaky2", || async {
                    Err(CacheError::Backend("still down".to_string()))
                })
                .await;
        }
        assert_eq!(manager.breaker_state(), BreakerState::Open);
        assert_eq!(manager.metrics().breaker_trips, 2);
    }

    #[tokio::test]
    async fn test_loader_failure_propagates_with_diagnostic() {
        let mut config = full_config();
        config.strategies.retain(|s| s != "bloom_filter");
        let manager = manager_with(config);
        let err = manager
            .protected_get("product:5", || async {
                Err(CacheError::Backend("timeout talking to mysql".to_string()))
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("mysql"));
    }

    #[tokio::test]
    async fn test_metrics_snapshot_consistency() {
        let manager = manager_with(full_config());
        let _ = manager
            .protected_get("product:1", || async { Ok(Some(json!({"id": 1}))) })
            .await;
        let _ = manager
            .protected_get("product:404", || async { Ok(None) })
            .await;
        let metrics = manager.metrics();
        assert!(metrics.total_requests >= 1);
        assert!(metrics.avg_response_ms >= 0.0);
        assert!(metrics.min_response_ms <= metrics.max_response_ms);
        assert!(metrics.protection_rate >= 0.0 && metrics.protection_rate <= 1.0);
    }
}
