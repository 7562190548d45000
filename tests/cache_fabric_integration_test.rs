//! End-to-end scenarios across the fabric's managers

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use cachefabric::adapter::{CachedRecord, KvAdapter, MemoryBackend};
use cachefabric::config::{
    BreakerConfig, ConsistencyConfig, LockConfig, MonitoringConfig, ProtectionConfig,
    RandomTtlConfig, SyncStrategy, WarmupConfig,
};
use cachefabric::consistency::{
    ChangeEvent, ChangeType, ConsistencyManager, MemoryStore, OptimisticLockService,
};
use cachefabric::error::{CacheError, CacheResult};
use cachefabric::keys::{KeyRegistry, TtlRegistry};
use cachefabric::monitoring::{MetricKind, MonitoringManager, StatsSource};
use cachefabric::protection::{BreakerState, ProtectionManager};
use cachefabric::warmup::{StaticDetector, WarmupLoader, WarmupManager, WarmupStrategy};

fn memory_adapter() -> Arc<KvAdapter> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
    Arc::new(KvAdapter::new(Arc::new(MemoryBackend::new())))
}

struct ProductLoader;

#[async_trait]
impl WarmupLoader for ProductLoader {
    async fn load(&self, _strategy: WarmupStrategy, id: u64) -> CacheResult<Option<Value>> {
        Ok(Some(json!({"id": id, "version": 1, "price": "19.99"})))
    }
}

#[tokio::test]
async fn protected_miss_loads_once_then_hits() {
    let adapter = memory_adapter();
    let protection = ProtectionManager::new(
        Arc::clone(&adapter),
        ProtectionConfig {
            random_ttl: RandomTtlConfig {
                base_secs: 3600,
                range_secs: 1800,
                min_secs: 1800,
                max_secs: 5400,
            },
            ..ProtectionConfig::default()
        },
    );

    let invocations = Arc::new(AtomicU32::new(0));
    for _ in 0..3 {
        let counting = Arc::clone(&invocations);
        let value = protection
            .protected_get("mall:product:42", move || async move {
                counting.fetch_add(1, Ordering::SeqCst);
                Ok(Some(json!({"id": 42, "version": 7})))
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value["id"], 42);
    }
    assert_eq!(invocations.load(Ordering::SeqCst), 1);

    // The cached entry carries a TTL inside the jitter window (1 s slack
    // for the elapsed read time)
    let ttl = adapter.ttl("mall:product:42").await.unwrap().unwrap();
    assert!(ttl >= Duration::from_secs(1799) && ttl <= Duration::from_secs(5400));
}

#[tokio::test]
async fn penetration_is_blocked_before_the_loader() {
    let adapter = memory_adapter();
    let protection = ProtectionManager::new(Arc::clone(&adapter), ProtectionConfig::default());
    // Prime the filter with a legitimate key
    protection.bloom().unwrap().add("mall:product:1").await.unwrap();

    for _ in 0..2 {
        let result = protection
            .protected_get("mall:product:9999", || async {
                panic!("loader must never run for a proven-absent key")
            })
            .await;
        assert!(matches!(result, Err(CacheError::Absent(_))));
    }
    let metrics = protection.metrics();
    assert_eq!(metrics.loader_invocations, 0);
    assert_eq!(metrics.penetration_blocked, 2);
    // The second block came from the null-cache, not another bloom probe
    assert_eq!(metrics.bloom_misses, 1);
}

#[tokio::test]
async fn write_through_conflict_never_regresses_the_cache() {
    let adapter = memory_adapter();
    let store = Arc::new(MemoryStore::new());
    let manager = ConsistencyManager::new(
        Arc::clone(&adapter),
        Arc::clone(&store) as Arc<dyn OptimisticLockService>,
        Arc::new(TtlRegistry::new()),
        ConsistencyConfig {
            strategy: SyncStrategy::WriteThrough,
            ..ConsistencyConfig::default()
        },
    );

    let cached = CachedRecord::new(json!({"id": 1}), 5);
    adapter.set_json("mall:product:1", &cached, None).await.unwrap();
    // A concurrent actor already moved the store to version 7
    store.put("products", "1", 7, json!({"id": 1}));

    manager.start();
    manager
        .publish(
            ChangeEvent::new(ChangeType::Update, "products", "1")
                .with_versions(5, 6)
                .with_data(json!({"id": 1, "name": "stale write"}))
                .with_cache_key("mall:product:1"),
        )
        .unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    manager.stop().await;

    let record: CachedRecord = adapter.get_json("mall:product:1").await.unwrap().unwrap();
    assert!(record.version >= 5, "cache regressed to {}", record.version);
    assert_eq!(manager.get_stats().sync_conflicts, 1);
}

#[tokio::test]
async fn warmed_ttls_spread_across_the_jitter_window() {
    let adapter = memory_adapter();
    let jitter = RandomTtlConfig {
        base_secs: 3600,
        range_secs: 1800,
        min_secs: 3600,
        max_secs: 5400,
    };
    let manager = WarmupManager::new(
        Arc::clone(&adapter),
        Arc::new(KeyRegistry::new("mall")),
        Arc::new(TtlRegistry::new()),
        Arc::new(ProductLoader),
        WarmupConfig {
            batch_size: 500,
            batch_interval_ms: 0,
            progress_report: false,
            ..WarmupConfig::default()
        },
        jitter,
    );
    let ids: Vec<u64> = (0..2000).collect();
    manager.register_detector(Arc::new(StaticDetector::new(
        WarmupStrategy::HotProducts,
        ids.clone(),
    )));

    let report = manager.run().await.unwrap();
    assert_eq!(report.entries_warmed, 2000);

    let mut ttls = Vec::with_capacity(ids.len());
    for id in &ids {
        let ttl = adapter
            .ttl(&format!("mall:product:{}", id))
            .await
            .unwrap()
            .unwrap();
        let secs = ttl.as_secs();
        assert!((3599..=5400).contains(&secs), "ttl {} out of window", secs);
        ttls.push(secs as f64);
    }
    let mean = ttls.iter().sum::<f64>() / ttls.len() as f64;
    let variance = ttls.iter().map(|t| (t - mean) * (t - mean)).sum::<f64>() / ttls.len() as f64;
    let stddev = variance.sqrt();
    // Uniform spread over the 1800 s window: stddev ~ range / sqrt(12)
    let uniform = 1800.0 / 12f64.sqrt();
    assert!(
        stddev >= uniform * 0.9,
        "expirations not spread: stddev {:.1} vs uniform {:.1}",
        stddev,
        uniform
    );
}

#[tokio::test]
async fn breaker_trips_then_recovers_through_half_open() {
    let adapter = memory_adapter();
    let mut config = ProtectionConfig {
        breaker: BreakerConfig {
            failure_threshold: 3,
            recovery_timeout_ms: 50,
            half_open_requests: 1,
            monitoring_period_secs: 60,
        },
        lock: LockConfig {
            acquire_timeout_ms: 100,
            ..LockConfig::default()
        },
        ..ProtectionConfig::default()
    };
    config
        .strategies
        .retain(|s| s != "bloom_filter" && s != "null_cache");
    let protection = ProtectionManager::new(Arc::clone(&adapter), config);

    for _ in 0..3 {
        let result = protection
            .protected_get("mall:stock:1", || async {
                Err(CacheError::Backend("origin down".to_string()))
            })
            .await;
        assert!(matches!(result, Err(CacheError::Backend(_))));
    }
    assert_eq!(protection.breaker_state(), BreakerState::Open);

    // Rejected without touching the loader
    let result = protection
        .protected_get("mall:stock:1", || async { Ok(Some(json!(1))) })
        .await;
    assert!(matches!(result, Err(CacheError::BreakerOpen)));
    assert_eq!(protection.metrics().loader_invocations, 3);

    tokio::time::sleep(Duration::from_millis(80)).await;
    // Half-open probe succeeds and closes the breaker
    let value = protection
        .protected_get("mall:stock:2", || async { Ok(Some(json!({"qty": 3}))) })
        .await
        .unwrap();
    assert!(value.is_some());
    assert_eq!(protection.breaker_state(), BreakerState::Closed);

    // A fresh failure run reopens it
    for _ in 0..3 {
        let _ = protection
            .protected_get("mall:stock:3", || async {
                Err(CacheError::Backend("origin down again".to_string()))
            })
            .await;
    }
    assert_eq!(protection.breaker_state(), BreakerState::Open);
}

#[tokio::test]
async fn monitoring_samples_the_other_managers() {
    let adapter = memory_adapter();
    let monitoring = Arc::new(MonitoringManager::new(MonitoringConfig {
        max_data_points: 5,
        ..MonitoringConfig::default()
    }));

    // Generate some adapter traffic
    adapter.set_raw("mall:product:1", "{\"id\":1}", None).await.unwrap();
    adapter.get("mall:product:1").await.unwrap();
    adapter.get("mall:product:2").await.unwrap();

    monitoring.register_source("adapter", adapter.stats_handle() as Arc<dyn StatsSource>);
    for _ in 0..7 {
        monitoring.collect_once().await;
    }

    // Ring capped at the last five samples, in order
    let points = monitoring.series().series(MetricKind::HitRate);
    assert_eq!(points.len(), 5);
    for pair in points.windows(2) {
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }
    assert_eq!(monitoring.series().latest(MetricKind::HitRate), Some(0.5));

    monitoring.record_hot_key("mall:product:1", true);
    monitoring.record_hot_key("mall:product:1", true);
    monitoring.record_hot_key("mall:product:2", false);
    let hot = monitoring.get_hot_keys(1);
    assert_eq!(hot[0].key, "mall:product:1");
    assert_eq!(hot[0].access_count, 2);

    let report = monitoring.generate_performance_report(3600);
    assert!((report.hit_rate - 0.5).abs() < 1e-9);
    assert!(!report.recommendations.is_empty());
}

#[tokio::test]
async fn warmup_then_protected_reads_hit_without_loading() {
    let adapter = memory_adapter();
    let registry = Arc::new(KeyRegistry::new("mall"));
    let warmup = WarmupManager::new(
        Arc::clone(&adapter),
        Arc::clone(&registry),
        Arc::new(TtlRegistry::new()),
        Arc::new(ProductLoader),
        WarmupConfig {
            batch_interval_ms: 0,
            progress_report: false,
            ..WarmupConfig::default()
        },
        RandomTtlConfig::default(),
    );
    warmup.register_detector(Arc::new(StaticDetector::new(
        WarmupStrategy::HotProducts,
        vec![1, 2, 3],
    )));
    warmup.run().await.unwrap();

    let protection = ProtectionManager::new(Arc::clone(&adapter), ProtectionConfig::default());
    for id in 1..=3u64 {
        let value = protection
            .protected_get(&registry.product(id), || async {
                panic!("warmed keys must be served from cache")
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value["id"], id);
        // Monetary fields stay decimal strings on the wire
        assert_eq!(value["price"], "19.99");
    }
    assert_eq!(protection.metrics().loader_invocations, 0);
}
