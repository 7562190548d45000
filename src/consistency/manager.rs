//! Change-event queue, worker pool and sync strategies

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::adapter::{CachedRecord, KvAdapter};
use crate::config::{ConsistencyConfig, SyncStrategy};
use crate::consistency::event::{ChangeEvent, ChangeType};
use crate::consistency::optimistic::{OptimisticLockService, UpdateResult};
use crate::error::{CacheError, CacheResult};
use crate::keys::TtlRegistry;

/// One cache entry to verify against the authoritative store
#[derive(Debug, Clone)]
pub struct CheckTarget {
    pub cache_key: String,
    pub table: String,
    pub record_id: String,
}

/// Supplies key samples for the periodic consistency check
///
/// The check stays dormant until an enumerator is installed.
#[async_trait]
pub trait KeyEnumerator: Send + Sync {
    async fn sample(&self, batch_size: usize) -> CacheResult<Vec<CheckTarget>>;
}

/// Bounded set of processed event ids
struct SeenSet {
    set: HashSet<String>,
    order: VecDeque<String>,
    cap: usize,
}

impl SeenSet {
    fn new(cap: usize) -> Self {
        Self {
            set: HashSet::new(),
            order: VecDeque::new(),
            cap,
        }
    }

    /// Returns false when the id was already recorded
    fn insert(&mut self, id: &str) -> bool {
        if !self.set.insert(id.to_string()) {
            return false;
        }
        self.order.push_back(id.to_string());
        if self.order.len() > self.cap {
            if let Some(evicted) = self.order.pop_front() {
                self.set.remove(&evicted);
            }
        }
        true
    }
}

#[derive(Debug, Default)]
struct Stats {
    events_total: AtomicU64,
    events_processed: AtomicU64,
    events_failed: AtomicU64,
    events_pending: AtomicU64,
    checks_total: AtomicU64,
    checks_consistent: AtomicU64,
    checks_inconsistent: AtomicU64,
    syncs_successful: AtomicU64,
    syncs_failed: AtomicU64,
    sync_conflicts: AtomicU64,
    sync_latency_us_total: AtomicU64,
    sync_latency_count: AtomicU64,
}

/// Point-in-time consistency counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyStatsSnapshot {
    pub events_total: u64,
    pub events_processed: u64,
    pub events_failed: u64,
    pub events_pending: u64,
    pub checks_total: u64,
    pub checks_consistent: u64,
    pub checks_inconsistent: u64,
    pub consistency_rate: f64,
    pub syncs_successful: u64,
    pub syncs_failed: u64,
    pub sync_conflicts: u64,
    pub sync_success_rate: f64,
    pub avg_sync_latency_ms: f64,
}

struct WorkerCtx {
    adapter: Arc<KvAdapter>,
    store: Arc<dyn OptimisticLockService>,
    ttls: Arc<TtlRegistry>,
    config: ConsistencyConfig,
    stats: Stats,
    seen: parking_lot::Mutex<SeenSet>,
}

impl WorkerCtx {
    async fn process(self: Arc<Self>, event: ChangeEvent) {
        let fresh = self.seen.lock().insert(&event.id);
        if !fresh {
            debug!(id = %event.id, "duplicate event skipped");
            self.stats.events_pending.fetch_sub(1, Ordering::Relaxed);
            return;
        }

        let result = match event.change_type {
            ChangeType::Delete => self.invalidate(&event).await,
            ChangeType::Create | ChangeType::Update => match self.config.strategy {
                SyncStrategy::WriteThrough => self.write_through(&event).await,
                SyncStrategy::WriteBehind => Arc::clone(&self).write_behind(&event).await,
                SyncStrategy::CacheAside => self.invalidate(&event).await,
                SyncStrategy::RefreshAhead => self.refresh_ahead(&event).await,
            },
        };

        self.stats.events_pending.fetch_sub(1, Ordering::Relaxed);
        match result {
            Ok(()) => {
                self.stats.events_processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.stats.events_failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    id = %event.id,
                    table = %event.table,
                    record_id = %event.record_id,
                    error = %e,
                    "event processing failed"
                );
            }
        }
    }

    /// Delete the affected keys; safe to repeat
    async fn invalidate(&self, event: &ChangeEvent) -> CacheResult<()> {
        if self.config.invalidate_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.invalidate_delay_ms)).await;
        }
        self.adapter.mdel(&event.cache_keys).await?;
        Ok(())
    }

    /// Store first via the optimistic service, then cache
    async fn write_through(&self, event: &ChangeEvent) -> CacheResult<()> {
        let started = Instant::now();
        let outcome = self
            .store
            .update_with_optimistic_lock(
                &event.table,
                &event.record_id,
                &event.data,
                event.old_version,
            )
            .await;
        match outcome {
            Ok(UpdateResult::Applied { new_version }) => {
                self.observe_sync(started);
                self.stats.syncs_successful.fetch_add(1, Ordering::Relaxed);
                let record = CachedRecord::new(event.data.clone(), new_version);
                for key in &event.cache_keys {
                    self.write_guarded(key, &record).await?;
                }
                Ok(())
            }
            Ok(UpdateResult::Conflict { current_version }) => {
                // The next event carries the winning version; leave the
                // cache alone
                self.stats.sync_conflicts.fetch_add(1, Ordering::Relaxed);
                debug!(
                    table = %event.table,
                    record_id = %event.record_id,
                    current_version,
                    "optimistic conflict, cache untouched"
                );
                Ok(())
            }
            Err(e) => {
                self.stats.syncs_failed.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Cache first, store write as a best-effort background task
    ///
    /// There is no compensating cache revert: a failed store write leaves
    /// the cached value alive for one TTL.
    async fn write_behind(self: Arc<Self>, event: &ChangeEvent) -> CacheResult<()> {
        let record = CachedRecord::new(event.data.clone(), event.payload_version());
        for key in &event.cache_keys {
            self.write_guarded(key, &record).await?;
        }

        let ctx = Arc::clone(&self);
        let event = event.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            match ctx
                .store
                .update_with_optimistic_lock(
                    &event.table,
                    &event.record_id,
                    &event.data,
                    event.old_version,
                )
                .await
            {
                Ok(UpdateResult::Applied { .. }) => {
                    ctx.observe_sync(started);
                    ctx.stats.syncs_successful.fetch_add(1, Ordering::Relaxed);
                }
                Ok(UpdateResult::Conflict { current_version }) => {
                    ctx.stats.sync_conflicts.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        table = %event.table,
                        record_id = %event.record_id,
                        current_version,
                        "write-behind lost the version race"
                    );
                }
                Err(e) => {
                    ctx.stats.syncs_failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        table = %event.table,
                        record_id = %event.record_id,
                        error = %e,
                        "write-behind store sync failed"
                    );
                }
            }
        });
        Ok(())
    }

    /// Rewrite the cache with a doubled TTL; no store write
    async fn refresh_ahead(&self, event: &ChangeEvent) -> CacheResult<()> {
        let record = CachedRecord::new(event.data.clone(), event.payload_version());
        for key in &event.cache_keys {
            let ttl = self.ttls.ttl_for_key(key) * 2;
            self.write_guarded_with_ttl(key, &record, ttl).await?;
        }
        Ok(())
    }

    async fn write_guarded(&self, key: &str, record: &CachedRecord) -> CacheResult<()> {
        let ttl = self.ttls.ttl_for_key(key);
        self.write_guarded_with_ttl(key, record, ttl).await
    }

    /// Write unless the cache already holds a newer version
    async fn write_guarded_with_ttl(
        &self,
        key: &str,
        record: &CachedRecord,
        ttl: Duration,
    ) -> CacheResult<()> {
        if let Some(raw) = self.adapter.get_raw(key).await? {
            if let Ok(existing) = CachedRecord::parse(&raw) {
                if existing.version > record.version {
                    debug!(
                        key,
                        cached = existing.version,
                        incoming = record.version,
                        "stale event, keeping newer cache entry"
                    );
                    return Ok(());
                }
            }
        }
        self.adapter.set_json(key, record, Some(ttl)).await
    }

    /// Compare cached and authoritative versions for one entry
    async fn check(&self, target: &CheckTarget) -> CacheResult<bool> {
        let cached = match self.adapter.get_raw(&target.cache_key).await? {
            Some(raw) => CachedRecord::parse(&raw).ok().map(|r| r.version),
            None => None,
        };
        let authoritative = self
            .store
            .current_version(&target.table, &target.record_id)
            .await?;

        let consistent = match (cached, authoritative) {
            // A cache miss is not divergence
            (None, _) => true,
            (Some(c), Some(a)) => c <= a,
            // Cache still serves a row the store deleted
            (Some(_), None) => false,
        };

        self.stats.checks_total.fetch_add(1, Ordering::Relaxed);
        if consistent {
            self.stats.checks_consistent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.checks_inconsistent.fetch_add(1, Ordering::Relaxed);
            warn!(
                key = %target.cache_key,
                table = %target.table,
                record_id = %target.record_id,
                "cache diverged from authoritative store"
            );
        }
        Ok(consistent)
    }

    fn observe_sync(&self, started: Instant) {
        self.stats
            .sync_latency_us_total
            .fetch_add(started.elapsed().as_micros() as u64, Ordering::Relaxed);
        self.stats.sync_latency_count.fetch_add(1, Ordering::Relaxed);
    }
}

/// Event-driven propagation of database changes to the cache
pub struct ConsistencyManager {
    ctx: Arc<WorkerCtx>,
    tx: mpsc::Sender<ChangeEvent>,
    rx: parking_lot::Mutex<Option<mpsc::Receiver<ChangeEvent>>>,
    shutdown: watch::Sender<bool>,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    enumerator: Option<Arc<dyn KeyEnumerator>>,
}

impl ConsistencyManager {
    pub fn new(
        adapter: Arc<KvAdapter>,
        store: Arc<dyn OptimisticLockService>,
        ttls: Arc<TtlRegistry>,
        config: ConsistencyConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.event_buffer_size.max(1));
        let (shutdown, _) = watch::channel(false);
        Self {
            ctx: Arc::new(WorkerCtx {
                adapter,
                store,
                ttls,
                config,
                stats: Stats::default(),
                seen: parking_lot::Mutex::new(SeenSet::new(8192)),
            }),
            tx,
            rx: parking_lot::Mutex::new(Some(rx)),
            shutdown,
            workers: parking_lot::Mutex::new(Vec::new()),
            enumerator: None,
        }
    }

    /// Install a key enumerator, arming the periodic check
    pub fn with_enumerator(mut self, enumerator: Arc<dyn KeyEnumerator>) -> Self {
        self.enumerator = Some(enumerator);
        self
    }

    /// Spawn the worker pool and, when armed, the periodic check ticker
    pub fn start(&self) {
        let rx = match self.rx.lock().take() {
            Some(rx) => Arc::new(AsyncMutex::new(rx)),
            None => return, // already started
        };

        let mut workers = self.workers.lock();
        for worker_id in 0..self.ctx.config.event_workers.max(1) {
            let ctx = Arc::clone(&self.ctx);
            let rx = Arc::clone(&rx);
            let mut stop = self.shutdown.subscribe();
            workers.push(tokio::spawn(async move {
                debug!(worker_id, "consistency worker started");
                loop {
                    enum Next {
                        Event(Option<ChangeEvent>),
                        Drain(Vec<ChangeEvent>),
                    }
                    let next = {
                        let mut guard = rx.lock().await;
                        tokio::select! {
                            event = guard.recv() => Next::Event(event),
                            _ = stop.changed() => {
                                let mut drained = Vec::new();
                                while let Ok(event) = guard.try_recv() {
                                    drained.push(event);
                                }
                                Next::Drain(drained)
                            }
                        }
                    };
                    match next {
                        Next::Event(Some(event)) => Arc::clone(&ctx).process(event).await,
                        Next::Event(None) => break,
                        Next::Drain(events) => {
                            for event in events {
                                Arc::clone(&ctx).process(event).await;
                            }
                            break;
                        }
                    }
                }
                debug!(worker_id, "consistency worker stopped");
            }));
        }

        if let Some(enumerator) = self.enumerator.clone() {
            let ctx = Arc::clone(&self.ctx);
            let mut stop = self.shutdown.subscribe();
            let every = Duration::from_secs(ctx.config.check_interval_secs.max(1));
            let batch = ctx.config.check_batch_size;
            workers.push(tokio::spawn(async move {
                let mut ticker = interval(every);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            match enumerator.sample(batch).await {
                                Ok(targets) => {
                                    for target in targets {
                                        if let Err(e) = ctx.check(&target).await {
                                            warn!(error = %e, "consistency check errored");
                                        }
                                    }
                                }
                                Err(e) => warn!(error = %e, "key enumeration failed"),
                            }
                        }
                        _ = stop.changed() => break,
                    }
                }
            }));
        }
    }

    /// Publish a change event; non-blocking
    ///
    /// The manager stamps `id` (when empty), `timestamp` and
    /// `origin_node_id`. A saturated channel fails fast with
    /// `BufferFull`.
    pub fn publish(&self, mut event: ChangeEvent) -> CacheResult<()> {
        if event.id.is_empty() {
            event.id = Uuid::new_v4().to_string();
        }
        event.timestamp = chrono::Utc::now();
        event.origin_node_id = self.ctx.config.node_id.clone();

        match self.tx.try_send(event) {
            Ok(()) => {
                self.ctx.stats.events_total.fetch_add(1, Ordering::Relaxed);
                self.ctx.stats.events_pending.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(CacheError::BufferFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(CacheError::Cancelled),
        }
    }

    /// On-demand consistency check for one entry
    pub async fn check_consistency(
        &self,
        cache_key: &str,
        table: &str,
        record_id: &str,
    ) -> CacheResult<bool> {
        self.ctx
            .check(&CheckTarget {
                cache_key: cache_key.to_string(),
                table: table.to_string(),
                record_id: record_id.to_string(),
            })
            .await
    }

    /// Point-in-time counters
    pub fn get_stats(&self) -> ConsistencyStatsSnapshot {
        let s = &self.ctx.stats;
        let checks_total = s.checks_total.load(Ordering::Relaxed);
        let checks_consistent = s.checks_consistent.load(Ordering::Relaxed);
        let syncs_ok = s.syncs_successful.load(Ordering::Relaxed);
        let syncs_failed = s.syncs_failed.load(Ordering::Relaxed);
        let latency_count = s.sync_latency_count.load(Ordering::Relaxed);
        ConsistencyStatsSnapshot {
            events_total: s.events_total.load(Ordering::Relaxed),
            events_processed: s.events_processed.load(Ordering::Relaxed),
            events_failed: s.events_failed.load(Ordering::Relaxed),
            events_pending: s.events_pending.load(Ordering::Relaxed),
            checks_total,
            checks_consistent,
            checks_inconsistent: s.checks_inconsistent.load(Ordering::Relaxed),
            consistency_rate: if checks_total > 0 {
                checks_consistent as f64 / checks_total as f64
            } else {
                1.0
            },
            syncs_successful: syncs_ok,
            syncs_failed,
            sync_conflicts: s.sync_conflicts.load(Ordering::Relaxed),
            sync_success_rate: if syncs_ok + syncs_failed > 0 {
                syncs_ok as f64 / (syncs_ok + syncs_failed) as f64
            } else {
                1.0
            },
            avg_sync_latency_ms: if latency_count > 0 {
                s.sync_latency_us_total.load(Ordering::Relaxed) as f64
                    / latency_count as f64
                    / 1000.0
            } else {
                0.0
            },
        }
    }

    /// Zero every counter
    pub fn reset_stats(&self) {
        let s = &self.ctx.stats;
        s.events_total.store(0, Ordering::Relaxed);
        s.events_processed.store(0, Ordering::Relaxed);
        s.events_failed.store(0, Ordering::Relaxed);
        s.events_pending.store(0, Ordering::Relaxed);
        s.checks_total.store(0, Ordering::Relaxed);
        s.checks_consistent.store(0, Ordering::Relaxed);
        s.checks_inconsistent.store(0, Ordering::Relaxed);
        s.syncs_successful.store(0, Ordering::Relaxed);
        s.syncs_failed.store(0, Ordering::Relaxed);
        s.sync_conflicts.store(0, Ordering::Relaxed);
        s.sync_latency_us_total.store(0, Ordering::Relaxed);
        s.sync_latency_count.store(0, Ordering::Relaxed);
    }

    /// Signal shutdown and join the workers, draining queued events
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for worker in workers {
            let _ = worker.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryBackend;
    use crate::consistency::optimistic::MemoryStore;
    use serde_json::json;

    fn fixture(strategy: SyncStrategy) -> (Arc<KvAdapter>, Arc<MemoryStore>, ConsistencyManager) {
        let adapter = Arc::new(KvAdapter::new(Arc::new(MemoryBackend::new())));
        let store = Arc::new(MemoryStore::new());
        let config = ConsistencyConfig {
            strategy,
            event_workers: 3,
            ..ConsistencyConfig::default()
        };
        let manager = ConsistencyManager::new(
            Arc::clone(&adapter),
            Arc::clone(&store) as Arc<dyn OptimisticLockService>,
            Arc::new(TtlRegistry::new()),
            config,
        );
        (adapter, store, manager)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(60)).await;
    }

    #[tokio::test]
    async fn test_write_through_updates_store_then_cache() {
        let (adapter, store, manager) = fixture(SyncStrategy::WriteThrough);
        store.put("products", "1", 5, json!({"id": 1}));
        manager.start();

        manager
            .publish(
                ChangeEvent::new(ChangeType::Update, "products", "1")
                    .with_versions(5, 6)
                    .with_data(json!({"id": 1, "name": "widget"}))
                    .with_cache_key("mall:product:1"),
            )
            .unwrap();
        settle().await;

        assert_eq!(store.current_version("products", "1").await.unwrap(), Some(6));
        let record: CachedRecord = adapter.get_json("mall:product:1").await.unwrap().unwrap();
        assert_eq!(record.version, 6);
        assert_eq!(record.fields["name"], "widget");

        let stats = manager.get_stats();
        assert_eq!(stats.events_processed, 1);
        assert_eq!(stats.syncs_successful, 1);
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_write_through_conflict_leaves_cache_alone() {
        let (adapter, store, manager) = fixture(SyncStrategy::WriteThrough);
        // Cache holds version 5; a concurrent actor already moved the
        // store to 7
        let cached = CachedRecord::new(json!({"id": 1}), 5);
        adapter.set_json("mall:product:1", &cached, None).await.unwrap();
        store.put("products", "1", 7, json!({"id": 1}));
        manager.start();

        manager
            .publish(
                ChangeEvent::new(ChangeType::Update, "products", "1")
                    .with_versions(5, 6)
                    .with_data(json!({"id": 1, "name": "stale"}))
                    .with_cache_key("mall:product:1"),
            )
            .unwrap();
        settle().await;

        // Never regressed below 5
        let record: CachedRecord = adapter.get_json("mall:product:1").await.unwrap().unwrap();
        assert!(record.version >= 5);
        assert_eq!(store.current_version("products", "1").await.unwrap(), Some(7));
        assert_eq!(manager.get_stats().sync_conflicts, 1);
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_version_guard_keeps_newer_entry() {
        let (adapter, store, manager) = fixture(SyncStrategy::RefreshAhead);
        let newer = CachedRecord::new(json!({"id": 1}), 9);
        adapter.set_json("mall:product:1", &newer, None).await.unwrap();
        store.put("products", "1", 9, json!({"id": 1}));
        manager.start();

        manager
            .publish(
                ChangeEvent::new(ChangeType::Update, "products", "1")
                    .with_versions(5, 6)
                    .with_data(json!({"id": 1, "name": "old"}))
                    .with_cache_key("mall:product:1"),
            )
            .unwrap();
        settle().await;

        let record: CachedRecord = adapter.get_json("mall:product:1").await.unwrap().unwrap();
        assert_eq!(record.version, 9);
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_cache_aside_invalidates() {
        let (adapter, _store, manager) = fixture(SyncStrategy::CacheAside);
        adapter.set_raw("mall:product:1", "stale", None).await.unwrap();
        manager.start();

        manager
            .publish(
                ChangeEvent::new(ChangeType::Update, "products", "1")
                    .with_versions(1, 2)
                    .with_data(json!({"id": 1}))
                    .with_cache_key("mall:product:1"),
            )
            .unwrap();
        settle().await;

        assert_eq!(adapter.get("mall:product:1").await.unwrap(), None);
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_delete_invalidates_under_every_strategy() {
        let (adapter, _store, manager) = fixture(SyncStrategy::WriteThrough);
        adapter.set_raw("mall:product:1", "gone soon", None).await.unwrap();
        manager.start();

        manager
            .publish(
                ChangeEvent::new(ChangeType::Delete, "products", "1")
                    .with_cache_key("mall:product:1"),
            )
            .unwrap();
        settle().await;

        assert_eq!(adapter.get("mall:product:1").await.unwrap(), None);
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_write_behind_caches_then_syncs() {
        let (adapter, store, manager) = fixture(SyncStrategy::WriteBehind);
        store.put("products", "1", 3, json!({"id": 1}));
        manager.start();

        manager
            .publish(
                ChangeEvent::new(ChangeType::Update, "products", "1")
                    .with_versions(3, 4)
                    .with_data(json!({"id": 1, "name": "fast"}))
                    .with_cache_key("mall:product:1"),
            )
            .unwrap();
        settle().await;

        let record: CachedRecord = adapter.get_json("mall:product:1").await.unwrap().unwrap();
        assert_eq!(record.version, 4);
        // The background sync landed too
        assert_eq!(store.current_version("products", "1").await.unwrap(), Some(4));
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_refresh_ahead_skips_store() {
        let (adapter, store, manager) = fixture(SyncStrategy::RefreshAhead);
        manager.start();

        manager
            .publish(
                ChangeEvent::new(ChangeType::Update, "products", "1")
                    .with_versions(1, 2)
                    .with_data(json!({"id": 1}))
                    .with_cache_key("mall:product:1"),
            )
            .unwrap();
        settle().await;

        let record: CachedRecord = adapter.get_json("mall:product:1").await.unwrap().unwrap();
        assert_eq!(record.version, 2);
        // No store write happened
        assert_eq!(store.current_version("products", "1").await.unwrap(), None);
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_duplicate_publish_is_idempotent() {
        let (adapter, store, manager) = fixture(SyncStrategy::WriteThrough);
        store.put("products", "1", 0, json!({}));
        manager.start();

        let event = ChangeEvent::new(ChangeType::Update, "products", "1")
            .with_versions(0, 1)
            .with_data(json!({"id": 1}))
            .with_cache_key("mall:product:1");
        let mut stamped = event.clone();
        stamped.id = "evt-1".to_string();
        manager.publish(stamped.clone()).unwrap();
        manager.publish(stamped).unwrap();
        settle().await;

        // The second copy was skipped, so the store moved exactly once
        assert_eq!(store.current_version("products", "1").await.unwrap(), Some(1));
        let record: CachedRecord = adapter.get_json("mall:product:1").await.unwrap().unwrap();
        assert_eq!(record.version, 1);
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_full_buffer_fails_fast() {
        let adapter = Arc::new(KvAdapter::new(Arc::new(MemoryBackend::new())));
        let store = Arc::new(MemoryStore::new());
        let config = ConsistencyConfig {
            event_buffer_size: 2,
            ..ConsistencyConfig::default()
        };
        let manager = ConsistencyManager::new(
            adapter,
            store as Arc<dyn OptimisticLockService>,
            Arc::new(TtlRegistry::new()),
            config,
        );
        // Workers not started, so the channel only drains on capacity
        for i in 0..2 {
            manager
                .publish(
                    ChangeEvent::new(ChangeType::Update, "products", i.to_string())
                        .with_cache_key(format!("mall:product:{}", i)),
                )
                .unwrap();
        }
        let err = manager
            .publish(ChangeEvent::new(ChangeType::Update, "products", "9"))
            .unwrap_err();
        assert!(matches!(err, CacheError::BufferFull));
    }

    #[tokio::test]
    async fn test_periodic_check_counts_divergence() {
        let (adapter, store, manager) = fixture(SyncStrategy::CacheAside);
        let record = CachedRecord::new(json!({"id": 1}), 9);
        adapter.set_json("mall:product:1", &record, None).await.unwrap();
        store.put("products", "1", 4, json!({"id": 1}));

        // Cache ahead of the store is divergence
        let consistent = manager
            .check_consistency("mall:product:1", "products", "1")
            .await
            .unwrap();
        assert!(!consistent);

        store.put("products", "1", 9, json!({"id": 1}));
        let consistent = manager
            .check_consistency("mall:product:1", "products", "1")
            .await
            .unwrap();
        assert!(consistent);

        let stats = manager.get_stats();
        assert_eq!(stats.checks_total, 2);
        assert_eq!(stats.checks_inconsistent, 1);
        assert!((stats.consistency_rate - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_reset_stats_zeroes() {
        let (_adapter, _store, manager) = fixture(SyncStrategy::CacheAside);
        manager
            .publish(ChangeEvent::new(ChangeType::Update, "products", "1"))
            .unwrap();
        assert_eq!(manager.get_stats().events_total, 1);
        manager.reset_stats();
        assert_eq!(manager.get_stats().events_total, 0);
    }

    #[tokio::test]
    async fn test_stop_drains_queued_events() {
        let (adapter, _store, manager) = fixture(SyncStrategy::CacheAside);
        adapter.set_raw("mall:product:5", "stale", None).await.unwrap();
        manager.start();
        manager
            .publish(
                ChangeEvent::new(ChangeType::Update, "products", "5")
                    .with_cache_key("mall:product:5"),
            )
            .unwrap();
        manager.stop().await;
        assert_eq!(adapter.get("mall:product:5").await.unwrap(), None);
        assert_eq!(manager.get_stats().events_pending, 0);
    }
}
