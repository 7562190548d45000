//! Warmup execution: batching, priorities, concurrency and progress

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio::time::{interval, sleep, timeout};
use tracing::{debug, info, warn};

use crate::adapter::{CachedRecord, KvAdapter};
use crate::config::{RandomTtlConfig, WarmupConfig, WarmupMode};
use crate::error::{CacheError, CacheResult};
use crate::keys::{KeyRegistry, TtlRegistry};
use crate::protection::TtlJitter;
use crate::warmup::detector::{HotDataDetector, WarmupLoader};
use crate::warmup::task::{WarmupStatus, WarmupStrategy, WarmupTask};

/// Per-strategy execution counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyStats {
    pub execution_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub total_time_ms: u64,
    pub average_time_ms: f64,
    pub total_data_warmed: u64,
}

/// Progress of the current run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WarmupProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub running: usize,
    pub pending: usize,
    pub progress_rate: f64,
    pub elapsed_ms: u64,
    pub estimated_remaining_ms: u64,
}

#[derive(Debug, Default)]
struct ProgressInner {
    total: usize,
    completed: usize,
    failed: usize,
    cancelled: usize,
    running: usize,
    started: Option<Instant>,
}

impl ProgressInner {
    fn snapshot(&self) -> WarmupProgress {
        let finished = self.completed + self.failed + self.cancelled;
        let pending = self.total.saturating_sub(finished + self.running);
        let elapsed = self.started.map_or(Duration::ZERO, |s| s.elapsed());
        let avg_per_task = if finished > 0 {
            elapsed.as_millis() as f64 / finished as f64
        } else {
            0.0
        };
        WarmupProgress {
            total: self.total,
            completed: self.completed,
            failed: self.failed,
            cancelled: self.cancelled,
            running: self.running,
            pending,
            progress_rate: if self.total > 0 {
                finished as f64 / self.total as f64
            } else {
                0.0
            },
            elapsed_ms: elapsed.as_millis() as u64,
            estimated_remaining_ms: (avg_per_task * pending as f64) as u64,
        }
    }
}

/// Outcome of one warmup run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupReport {
    pub total_tasks: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub entries_warmed: u64,
    pub duration_ms: u64,
    pub tasks: Vec<WarmupTask>,
}

struct WarmCtx {
    adapter: Arc<KvAdapter>,
    registry: Arc<KeyRegistry>,
    ttls: Arc<TtlRegistry>,
    jitter: TtlJitter,
    loader: Arc<dyn WarmupLoader>,
    config: WarmupConfig,
    stats: Mutex<HashMap<WarmupStrategy, StrategyStats>>,
    progress: Mutex<ProgressInner>,
    shutdown: watch::Sender<bool>,
}

impl WarmCtx {
    fn key_for(&self, strategy: WarmupStrategy, id: u64) -> String {
        match strategy {
            WarmupStrategy::HotProducts
            | WarmupStrategy::PromotionProducts
            | WarmupStrategy::NewProducts => self.registry.product(id),
            WarmupStrategy::ActiveUsers | WarmupStrategy::ShoppingCarts => self.registry.cart(id),
            WarmupStrategy::CategoryTop => self.registry.category_products(id, None),
            WarmupStrategy::UserPreferences => self.registry.user_preference(id),
        }
    }

    /// Warm every id in the batch; fails on the first id whose retries
    /// are exhausted
    async fn warm_batch(
        &self,
        task: &WarmupTask,
        stop: &watch::Receiver<bool>,
    ) -> CacheResult<u64> {
        let mut warmed = 0u64;
        let base_ttl = self.ttls.ttl_for(&task.data_type);
        for id in &task.data_ids {
            if *stop.borrow() {
                return Err(CacheError::Cancelled);
            }
            let mut attempt = 0u32;
            loop {
                match self.loader.load(task.strategy, *id).await {
                    Ok(Some(payload)) => {
                        let version = payload
                            .get("version")
                            .and_then(serde_json::Value::as_u64)
                            .unwrap_or(0);
                        let key = self.key_for(task.strategy, *id);
                        let record = CachedRecord::new(payload, version);
                        let ttl = self.jitter.ttl_with_base(&key, base_ttl);
                        self.adapter.set_json(&key, &record, Some(ttl)).await?;
                        warmed += 1;
                        break;
                    }
                    Ok(None) => {
                        // Entity vanished between detection and load
                        debug!(strategy = task.strategy.name(), id, "nothing to warm");
                        break;
                    }
                    Err(e) if attempt < self.config.retry_attempts => {
                        attempt += 1;
                        debug!(
                            strategy = task.strategy.name(),
                            id,
                            attempt,
                            error = %e,
                            "warmup load retry"
                        );
                        sleep(Duration::from_millis(self.config.retry_interval_ms)).await;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(warmed)
    }

    async fn execute_task(&self, mut task: WarmupTask, stop: watch::Receiver<bool>) -> WarmupTask {
        task.start();
        {
            let mut progress = self.progress.lock();
            progress.running += 1;
        }

        let started = Instant::now();
        let deadline = Duration::from_secs(self.config.timeout_secs.max(1));
        let outcome = timeout(deadline, self.warm_batch(&task, &stop)).await;

        let mut warmed = 0u64;
        match outcome {
            Ok(Ok(count)) => {
                warmed = count;
                task.complete();
            }
            Ok(Err(CacheError::Cancelled)) => task.cancel(),
            Ok(Err(e)) => task.fail(e.to_string()),
            Err(_) => task.fail("batch timed out"),
        }

        let elapsed = started.elapsed();
        {
            let mut stats = self.stats.lock();
            let entry = stats.entry(task.strategy).or_default();
            entry.execution_count += 1;
            entry.total_time_ms += elapsed.as_millis() as u64;
            entry.average_time_ms = entry.total_time_ms as f64 / entry.execution_count as f64;
            entry.total_data_warmed += warmed;
            match task.status {
                WarmupStatus::Completed => entry.success_count += 1,
                WarmupStatus::Failed => entry.failure_count += 1,
                _ => {}
            }
        }
        {
            let mut progress = self.progress.lock();
            progress.running -= 1;
            match task.status {
                WarmupStatus::Completed => progress.completed += 1,
                WarmupStatus::Failed => progress.failed += 1,
                WarmupStatus::Cancelled => progress.cancelled += 1,
                _ => {}
            }
        }

        if task.status == WarmupStatus::Failed {
            warn!(
                strategy = task.strategy.name(),
                batch = task.batch_index,
                error = task.error.as_deref().unwrap_or(""),
                "warmup task failed"
            );
            if self.config.stop_on_failure {
                let _ = self.shutdown.send(true);
            }
        }
        task
    }
}

/// Batched, prioritized cache pre-population
pub struct WarmupManager {
    ctx: Arc<WarmCtx>,
    detectors: Mutex<Vec<Arc<dyn HotDataDetector>>>,
}

impl WarmupManager {
    pub fn new(
        adapter: Arc<KvAdapter>,
        registry: Arc<KeyRegistry>,
        ttls: Arc<TtlRegistry>,
        loader: Arc<dyn WarmupLoader>,
        config: WarmupConfig,
        jitter_config: RandomTtlConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            ctx: Arc::new(WarmCtx {
                adapter,
                registry,
                ttls,
                jitter: TtlJitter::new(jitter_config),
                loader,
                config,
                stats: Mutex::new(HashMap::new()),
                progress: Mutex::new(ProgressInner::default()),
                shutdown,
            }),
            detectors: Mutex::new(Vec::new()),
        }
    }

    /// Register a hot-data detector
    pub fn register_detector(&self, detector: Arc<dyn HotDataDetector>) {
        self.detectors.lock().push(detector);
    }

    /// Build the prioritized task list from the enabled detectors
    ///
    /// Each detector's id list is partitioned into `batch_size` batches in
    /// submission order; the final list is sorted by priority with the
    /// original order preserved within a priority.
    pub async fn build_tasks(&self) -> CacheResult<Vec<WarmupTask>> {
        let detectors: Vec<_> = self.detectors.lock().clone();
        let config = &self.ctx.config;
        let mut tasks = Vec::new();
        for detector in detectors {
            let strategy = detector.strategy();
            if !config.strategies.iter().any(|s| s == strategy.name()) {
                continue;
            }
            let ids = detector.identify(&config.hot_data_config).await?;
            if ids.is_empty() {
                continue;
            }
            let batch_size = config.batch_size.max(1);
            let total_batches = ids.len().div_ceil(batch_size);
            for (batch_index, chunk) in ids.chunks(batch_size).enumerate() {
                let mut task =
                    WarmupTask::new(strategy, chunk.to_vec(), batch_index, total_batches);
                task.cache_keys = chunk
                    .iter()
                    .map(|id| self.ctx.key_for(strategy, *id))
                    .collect();
                tasks.push(task);
            }
        }
        tasks.sort_by_key(|t| t.priority);
        Ok(tasks)
    }

    /// Execute a full warmup run
    pub async fn run(&self) -> CacheResult<WarmupReport> {
        if !self.ctx.config.enabled {
            return Ok(WarmupReport {
                total_tasks: 0,
                completed: 0,
                failed: 0,
                cancelled: 0,
                entries_warmed: 0,
                duration_ms: 0,
                tasks: Vec::new(),
            });
        }

        let tasks = self.build_tasks().await?;
        let started = Instant::now();
        {
            let mut progress = self.ctx.progress.lock();
            *progress = ProgressInner {
                total: tasks.len(),
                started: Some(started),
                ..ProgressInner::default()
            };
        }
        info!(tasks = tasks.len(), mode = ?self.ctx.config.mode, "warmup run starting");

        let (done_tx, done_rx) = watch::channel(false);
        let reporter = if self.ctx.config.progress_report {
            let ctx = Arc::clone(&self.ctx);
            let every = Duration::from_secs(self.ctx.config.report_interval_secs.max(1));
            let mut done = done_rx;
            Some(tokio::spawn(async move {
                let mut ticker = interval(every);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let progress = ctx.progress.lock().snapshot();
                            info!(
                                completed = progress.completed,
                                failed = progress.failed,
                                pending = progress.pending,
                                rate = format!("{:.1}%", progress.progress_rate * 100.0),
                                eta_ms = progress.estimated_remaining_ms,
                                "warmup progress"
                            );
                        }
                        _ = done.changed() => break,
                    }
                }
            }))
        } else {
            None
        };

        let stop = self.ctx.shutdown.subscribe();
        let finished = match self.ctx.config.mode {
            WarmupMode::Sync => {
                let mut finished = Vec::with_capacity(tasks.len());
                for mut task in tasks {
                    if *stop.borrow() {
                        task.cancel();
                        let mut progress = self.ctx.progress.lock();
                        progress.cancelled += 1;
                        finished.push(task);
                        continue;
                    }
                    finished.push(self.ctx.execute_task(task, stop.clone()).await);
                    sleep(Duration::from_millis(self.ctx.config.batch_interval_ms)).await;
                }
                finished
            }
            WarmupMode::Async => {
                let semaphore = Arc::new(Semaphore::new(self.ctx.config.max_concurrency.max(1)));
                let futures: Vec<_> = tasks
                    .into_iter()
                    .map(|task| {
                        let ctx = Arc::clone(&self.ctx);
                        let semaphore = Arc::clone(&semaphore);
                        let stop = stop.clone();
                        async move {
                            let _permit = semaphore.acquire().await;
                            ctx.execute_task(task, stop).await
                        }
                    })
                    .collect();
                join_all(futures).await
            }
        };

        let _ = done_tx.send(true);
        if let Some(reporter) = reporter {
            let _ = reporter.await;
        }

        let report = WarmupReport {
            total_tasks: finished.len(),
            completed: finished
                .iter()
                .filter(|t| t.status == WarmupStatus::Completed)
                .count(),
            failed: finished
                .iter()
                .filter(|t| t.status == WarmupStatus::Failed)
                .count(),
            cancelled: finished
                .iter()
                .filter(|t| t.status == WarmupStatus::Cancelled)
                .count(),
            entries_warmed: self
                .ctx
                .stats
                .lock()
                .values()
                .map(|s| s.total_data_warmed)
                .sum(),
            duration_ms: started.elapsed().as_millis() as u64,
            tasks: finished,
        };
        info!(
            completed = report.completed,
            failed = report.failed,
            cancelled = report.cancelled,
            duration_ms = report.duration_ms,
            "warmup run finished"
        );
        Ok(report)
    }

    /// Signal cancellation; in-flight tasks observe it at their next id
    /// boundary
    pub fn stop(&self) {
        let _ = self.ctx.shutdown.send(true);
    }

    /// Current run progress
    pub fn get_progress(&self) -> WarmupProgress {
        self.ctx.progress.lock().snapshot()
    }

    /// Per-strategy execution counters
    pub fn get_stats(&self) -> HashMap<WarmupStrategy, StrategyStats> {
        self.ctx.stats.lock().clone()
    }
}
