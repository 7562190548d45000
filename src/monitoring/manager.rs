//! Collection ticks, cleaning, export and reporting

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::adapter::AdapterStats;
use crate::config::MonitoringConfig;
use crate::consistency::ConsistencyManager;
use crate::error::CacheResult;
use crate::monitoring::alerts::{Alert, AlertEngine};
use crate::monitoring::hotkeys::{HotKeyStat, HotKeyTracker};
use crate::monitoring::report::{classify_trend, PerformanceReport, Trend};
use crate::monitoring::response_time::{ResponseTimeStats, ResponseTimeTracker};
use crate::monitoring::timeseries::TimeSeriesStore;
use crate::monitoring::{Granularity, MetricKind};
use crate::protection::ProtectionManager;
use crate::warmup::WarmupManager;

const HOT_KEY_CAPACITY: usize = 1024;

/// Provides metric samples for the collection tick
///
/// Implementations must return from in-memory snapshots; the tick never
/// performs blocking I/O.
pub trait StatsSource: Send + Sync {
    fn sample(&self) -> Vec<(MetricKind, f64)>;
}

impl StatsSource for AdapterStats {
    fn sample(&self) -> Vec<(MetricKind, f64)> {
        let s = self.snapshot();
        let error_rate = if s.total_ops > 0 {
            s.errors as f64 / s.total_ops as f64
        } else {
            0.0
        };
        vec![
            (MetricKind::HitRate, s.hit_rate),
            (MetricKind::MissRate, 1.0 - s.hit_rate),
            (MetricKind::TotalOps, s.total_ops as f64),
            (MetricKind::ErrorRate, error_rate),
        ]
    }
}

impl StatsSource for ProtectionManager {
    fn sample(&self) -> Vec<(MetricKind, f64)> {
        let m = self.metrics();
        vec![
            (MetricKind::ProtectionRate, m.protection_rate),
            (MetricKind::PenetrationBlocked, m.penetration_blocked as f64),
            (MetricKind::BreakerTrips, m.breaker_trips as f64),
        ]
    }
}

impl StatsSource for ConsistencyManager {
    fn sample(&self) -> Vec<(MetricKind, f64)> {
        let s = self.get_stats();
        vec![
            (MetricKind::EventsPending, s.events_pending as f64),
            (MetricKind::EventsFailed, s.events_failed as f64),
            (MetricKind::SyncFailures, s.syncs_failed as f64),
            (MetricKind::ConsistencyRate, s.consistency_rate),
        ]
    }
}

impl StatsSource for WarmupManager {
    fn sample(&self) -> Vec<(MetricKind, f64)> {
        let progress = self.get_progress();
        let failures: u64 = self.get_stats().values().map(|s| s.failure_count).sum();
        vec![
            (MetricKind::WarmupProgress, progress.progress_rate),
            (MetricKind::WarmupFailures, failures as f64),
        ]
    }
}

/// Payload handed to exporters on each export tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsExport {
    pub generated_at: chrono::DateTime<Utc>,
    pub metrics: HashMap<MetricKind, f64>,
    pub response_time: ResponseTimeStats,
}

/// Pushes collected metrics somewhere else
#[async_trait]
pub trait MetricExporter: Send + Sync {
    async fn export(&self, export: &MetricsExport) -> CacheResult<()>;
}

/// Exporter writing the payload to the log
pub struct LogExporter;

#[async_trait]
impl MetricExporter for LogExporter {
    async fn export(&self, export: &MetricsExport) -> CacheResult<()> {
        debug!(payload = %serde_json::to_string(export)?, "metrics export");
        Ok(())
    }
}

struct Inner {
    config: MonitoringConfig,
    series: TimeSeriesStore,
    response_times: ResponseTimeTracker,
    hot_keys: HotKeyTracker,
    alerts: AlertEngine,
    sources: RwLock<Vec<(String, Arc<dyn StatsSource>)>>,
    exporters: RwLock<Vec<Arc<dyn MetricExporter>>>,
}

impl Inner {
    fn metric_enabled(&self, kind: MetricKind) -> bool {
        self.config.enabled_metrics.is_empty() || self.config.enabled_metrics.contains(&kind)
    }

    fn granularity(&self) -> Granularity {
        self.config
            .granularities
            .first()
            .copied()
            .unwrap_or(Granularity::Minute)
    }

    async fn collect_once(&self) {
        if !self.config.enabled {
            return;
        }
        let granularity = self.granularity();
        let sources: Vec<_> = self.sources.read().clone();
        let mut latest: HashMap<MetricKind, f64> = HashMap::new();
        for (name, source) in sources {
            for (kind, value) in source.sample() {
                if !self.metric_enabled(kind) {
                    continue;
                }
                self.series.append(kind, value, granularity);
                latest.insert(kind, value);
            }
            debug!(source = %name, "sampled");
        }

        let rt = self.response_times.stats();
        if rt.count > 0 && self.metric_enabled(MetricKind::ResponseTime) {
            self.series
                .append(MetricKind::ResponseTime, rt.avg_ms, granularity);
            latest.insert(MetricKind::ResponseTime, rt.avg_ms);
        }

        self.alerts.evaluate(&latest).await;
    }

    fn clean_once(&self) {
        let cutoff =
            Utc::now() - chrono::Duration::seconds(self.config.retention_period_secs as i64);
        let pruned = self.series.prune(cutoff);
        let dropped = self.alerts.cleanup(cutoff);
        if pruned > 0 || dropped > 0 {
            debug!(pruned, dropped, "monitoring data cleaned");
        }
    }

    async fn export_once(&self) {
        let export = MetricsExport {
            generated_at: Utc::now(),
            metrics: self.series.latest_all(),
            response_time: self.response_times.stats(),
        };
        let exporters: Vec<_> = self.exporters.read().clone();
        for exporter in exporters {
            if let Err(e) = exporter.export(&export).await {
                warn!(error = %e, "metrics export failed");
            }
        }
    }
}

/// Hit/miss/latency/error collection, alerting and reports
pub struct MonitoringManager {
    inner: Arc<Inner>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MonitoringManager {
    pub fn new(config: MonitoringConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                series: TimeSeriesStore::new(config.max_data_points),
                response_times: ResponseTimeTracker::new(config.buffer_size),
                hot_keys: HotKeyTracker::new(HOT_KEY_CAPACITY),
                alerts: AlertEngine::new(config.alert_config.clone()),
                sources: RwLock::new(Vec::new()),
                exporters: RwLock::new(Vec::new()),
                config,
            }),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Register a manager's stats for sampling
    pub fn register_source(&self, name: impl Into<String>, source: Arc<dyn StatsSource>) {
        self.inner.sources.write().push((name.into(), source));
    }

    /// Register an export sink
    pub fn register_exporter(&self, exporter: Arc<dyn MetricExporter>) {
        self.inner.exporters.write().push(exporter);
    }

    /// Register an additional alert fan-out channel
    pub fn register_alert_channel(&self, channel: Arc<dyn crate::monitoring::AlertChannel>) {
        self.inner.alerts.register_channel(channel);
    }

    /// Push one response-time observation in milliseconds
    pub fn record_response_time(&self, ms: f64) {
        self.inner.response_times.observe(ms);
    }

    /// Record one observed key access
    pub fn record_hot_key(&self, key: &str, hit: bool) {
        self.inner.hot_keys.record(key, hit, None);
    }

    /// Record one observed key access with a payload size
    pub fn record_hot_key_sized(&self, key: &str, hit: bool, size: u64) {
        self.inner.hot_keys.record(key, hit, Some(size));
    }

    /// Top `limit` keys by access count
    pub fn get_hot_keys(&self, limit: usize) -> Vec<HotKeyStat> {
        self.inner.hot_keys.top(limit)
    }

    /// Currently active alerts
    pub fn active_alerts(&self) -> Vec<Alert> {
        self.inner.alerts.active_alerts()
    }

    /// Time-series store handle
    pub fn series(&self) -> &TimeSeriesStore {
        &self.inner.series
    }

    /// One collection pass: sample sources, append series, evaluate rules
    pub async fn collect_once(&self) {
        self.inner.collect_once().await;
    }

    /// One cleaning pass over series and resolved alerts
    pub fn clean_once(&self) {
        self.inner.clean_once();
    }

    /// One export pass to every registered sink
    pub async fn export_once(&self) {
        self.inner.export_once().await;
    }

    /// Spawn the collection, cleaning and export tickers
    pub fn start(&self) {
        if !self.inner.config.enabled {
            return;
        }
        let mut tasks = self.tasks.lock();

        let inner = Arc::clone(&self.inner);
        let mut stop = self.shutdown.subscribe();
        let every = Duration::from_secs(self.inner.config.collect_interval_secs.max(1));
        tasks.push(tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => inner.collect_once().await,
                    _ = stop.changed() => break,
                }
            }
        }));

        let inner = Arc::clone(&self.inner);
        let mut stop = self.shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            // Hourly sweep
            let mut ticker = interval(Duration::from_secs(3600));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => inner.clean_once(),
                    _ = stop.changed() => break,
                }
            }
        }));

        if self.inner.config.export_config.enabled {
            let inner = Arc::clone(&self.inner);
            let mut stop = self.shutdown.subscribe();
            let every = Duration::from_secs(self.inner.config.export_config.interval_secs.max(1));
            tasks.push(tokio::spawn(async move {
                let mut ticker = interval(every);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => inner.export_once().await,
                        _ = stop.changed() => break,
                    }
                }
            }));
        }
        info!("monitoring started");
    }

    /// Stop the tickers
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
    }

    /// Bundle a performance snapshot over the trailing `period_secs`
    pub fn generate_performance_report(&self, period_secs: u64) -> PerformanceReport {
        let inner = &self.inner;
        let latest = inner.series.latest_all();
        let hit_rate = latest.get(&MetricKind::HitRate).copied().unwrap_or(0.0);
        let error_rate = latest.get(&MetricKind::ErrorRate).copied().unwrap_or(0.0);
        let total_ops = latest.get(&MetricKind::TotalOps).copied().unwrap_or(0.0);
        let response_time = inner.response_times.stats();

        let rt_values: Vec<f64> = inner
            .series
            .series(MetricKind::ResponseTime)
            .iter()
            .map(|p| p.value)
            .collect();
        let trend = if rt_values.len() >= 4 {
            classify_trend(&rt_values, false)
        } else {
            let hr_values: Vec<f64> = inner
                .series
                .series(MetricKind::HitRate)
                .iter()
                .map(|p| p.value)
                .collect();
            classify_trend(&hr_values, true)
        };

        let mut recommendations = Vec::new();
        if hit_rate < 0.8 {
            recommendations.push(
                "hit rate below 80%: widen warmup coverage or raise domain TTLs".to_string(),
            );
        }
        if response_time.avg_ms > 100.0 {
            recommendations.push(
                "average response time above 100ms: check store latency and pool sizing"
                    .to_string(),
            );
        }
        if error_rate > 0.05 {
            recommendations.push("error rate above 5%: inspect backend connectivity".to_string());
        }
        if latest.get(&MetricKind::BreakerTrips).copied().unwrap_or(0.0) > 0.0 {
            recommendations.push(
                "circuit breaker tripped during the period: inspect loader failures".to_string(),
            );
        }
        if trend == Trend::Degrading {
            recommendations.push("response times trending up over the period".to_string());
        }

        PerformanceReport {
            generated_at: Utc::now(),
            period_secs,
            hit_rate,
            error_rate,
            total_ops,
            response_time,
            trend,
            hot_keys: inner.hot_keys.top(10),
            recommendations,
            active_alerts: inner.alerts.active_alerts(),
        }
    }
}
