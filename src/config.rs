//! Configuration surface for every manager in the fabric
//!
//! All structs are plain serde values with defaults matching production
//! settings. Bootstrap code deserializes them from whatever source it owns
//! and passes them into the manager constructors; nothing here reads files
//! or the environment.

use serde::{Deserialize, Serialize};

/// Connection settings for the Redis adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Redis host
    pub host: String,
    /// Redis port
    pub port: u16,
    /// Password (optional)
    pub password: Option<String>,
    /// Database number
    pub db: i64,
    /// Connection pool size
    pub pool_size: u32,
    /// Minimum idle connections
    pub min_idle_conns: u32,
    /// Max command retries
    pub max_retries: u32,
    /// Dial timeout (milliseconds)
    pub dial_timeout_ms: u64,
    /// Read timeout (milliseconds)
    pub read_timeout_ms: u64,
    /// Write timeout (milliseconds)
    pub write_timeout_ms: u64,
    /// Idle connection timeout (seconds)
    pub idle_timeout_secs: u64,
    /// Max connection age (seconds)
    pub max_conn_age_secs: u64,
    /// Pool checkout timeout (milliseconds)
    pub pool_timeout_ms: u64,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            db: 0,
            pool_size: 10,
            min_idle_conns: 2,
            max_retries: 3,
            dial_timeout_ms: 5000,
            read_timeout_ms: 3000,
            write_timeout_ms: 3000,
            idle_timeout_secs: 300,
            max_conn_age_secs: 1800,
            pool_timeout_ms: 4000,
        }
    }
}

impl AdapterConfig {
    /// Render the redis connection URL
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!("redis://:{}@{}:{}/{}", password, self.host, self.port, self.db),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

/// Cache synchronization strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStrategy {
    /// Store first, then cache
    WriteThrough,
    /// Cache first, store asynchronously
    WriteBehind,
    /// Invalidate only; reads repopulate
    CacheAside,
    /// Rewrite cache with extended TTL, no store write
    RefreshAhead,
}

/// Consistency manager settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyConfig {
    /// Selected sync strategy
    pub strategy: SyncStrategy,
    /// Periodic check interval (seconds)
    pub check_interval_secs: u64,
    /// Keys sampled per periodic check
    pub check_batch_size: usize,
    /// Per-check timeout (milliseconds)
    pub check_timeout_ms: u64,
    /// Per-sync timeout (milliseconds)
    pub sync_timeout_ms: u64,
    /// Store sync retries
    pub sync_retries: u32,
    /// Store sync batch size
    pub sync_batch_size: usize,
    /// Delay before delayed invalidation (milliseconds)
    pub invalidate_delay_ms: u64,
    /// Invalidation batch size
    pub invalidate_batch: usize,
    /// Event channel capacity
    pub event_buffer_size: usize,
    /// Number of event workers
    pub event_workers: usize,
    /// Whether events are stamped for cross-node dedup
    pub distributed_mode: bool,
    /// Identifier of this node in distributed mode
    pub node_id: String,
    /// Peer nodes (informational)
    pub cluster_nodes: Vec<String>,
}

impl Default for ConsistencyConfig {
    fn default() -> Self {
        Self {
            strategy: SyncStrategy::CacheAside,
            check_interval_secs: 30,
            check_batch_size: 100,
            check_timeout_ms: 5000,
            sync_timeout_ms: 3000,
            sync_retries: 2,
            sync_batch_size: 50,
            invalidate_delay_ms: 0,
            invalidate_batch: 100,
            event_buffer_size: 1000,
            event_workers: 5,
            distributed_mode: false,
            node_id: "node-1".to_string(),
            cluster_nodes: Vec::new(),
        }
    }
}

/// Warmup execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmupMode {
    /// Tasks executed one at a time in priority order
    Sync,
    /// Tasks executed concurrently under the semaphore
    Async,
}

/// Thresholds feeding the hot-data detectors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotDataConfig {
    /// Minimum units sold for a hot product
    pub product_sold_count_threshold: u64,
    /// Minimum views for a hot product
    pub product_view_count_threshold: u64,
    /// Minimum rating for a hot product
    pub product_rating_threshold: f64,
    /// Lookback window for product signals (days)
    pub product_days_range: u32,
    /// Login-day threshold for an active user
    pub user_login_days_threshold: u32,
    /// Order-count threshold for an active user
    pub user_order_count_threshold: u64,
    /// Composite activity score threshold
    pub user_activity_score: f64,
    /// Minimum product count for a hot category
    pub category_product_count: u64,
    /// Minimum view count for a hot category
    pub category_view_count_threshold: u64,
}

impl Default for HotDataConfig {
    fn default() -> Self {
        Self {
            product_sold_count_threshold: 100,
            product_view_count_threshold: 1000,
            product_rating_threshold: 4.0,
            product_days_range: 7,
            user_login_days_threshold: 3,
            user_order_count_threshold: 5,
            user_activity_score: 60.0,
            category_product_count: 20,
            category_view_count_threshold: 5000,
        }
    }
}

/// Warmup manager settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupConfig {
    /// Master switch
    pub enabled: bool,
    /// Execution mode
    pub mode: WarmupMode,
    /// Ids per warmup task
    pub batch_size: usize,
    /// Sleep between batches in sync mode (milliseconds)
    pub batch_interval_ms: u64,
    /// Concurrent tasks in async mode
    pub max_concurrency: usize,
    /// Per-task timeout (seconds)
    pub timeout_secs: u64,
    /// Enabled warmup strategies
    pub strategies: Vec<String>,
    /// Priority order override (informational)
    pub priority_order: Vec<String>,
    /// Detector thresholds
    pub hot_data_config: HotDataConfig,
    /// Per-task retry attempts
    pub retry_attempts: u32,
    /// Delay between retries (milliseconds)
    pub retry_interval_ms: u64,
    /// Whether to report progress on a ticker
    pub progress_report: bool,
    /// Progress report interval (seconds)
    pub report_interval_secs: u64,
    /// Failure-rate threshold surfaced in stats
    pub failure_threshold: f64,
    /// Abort the run on first task failure
    pub stop_on_failure: bool,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: WarmupMode::Async,
            batch_size: 50,
            batch_interval_ms: 100,
            max_concurrency: 10,
            timeout_secs: 30,
            strategies: vec![
                "hot_products".to_string(),
                "active_users".to_string(),
                "hot_categories".to_string(),
            ],
            priority_order: Vec::new(),
            hot_data_config: HotDataConfig::default(),
            retry_attempts: 1,
            retry_interval_ms: 200,
            progress_report: true,
            report_interval_secs: 10,
            failure_threshold: 0.5,
            stop_on_failure: false,
        }
    }
}

/// Bloom filter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BloomConfig {
    /// Expected number of distinct elements
    pub expected_elements: u64,
    /// Target false positive rate
    pub false_positive_rate: f64,
    /// Hash function count override (0 = derive from rate)
    pub hash_functions: u32,
    /// Bit array size override (0 = derive from rate)
    pub bit_array_size: u64,
    /// Redis key holding the bit array
    pub redis_key: String,
    /// Refresh-from-truth interval (seconds)
    pub refresh_interval_secs: u64,
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            expected_elements: 1_000_000,
            false_positive_rate: 0.01,
            hash_functions: 0,
            bit_array_size: 0,
            redis_key: "bloom:cache:protection".to_string(),
            refresh_interval_secs: 3600,
        }
    }
}

/// Distributed lock settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Lock TTL (milliseconds)
    pub lock_timeout_ms: u64,
    /// Max time to wait for acquisition (milliseconds)
    pub acquire_timeout_ms: u64,
    /// Sleep between acquisition attempts (milliseconds)
    pub retry_interval_ms: u64,
    /// Max acquisition attempts
    pub max_retries: u32,
    /// Spawn a keeper extending the TTL while held
    pub auto_renew: bool,
    /// Keeper renewal interval (milliseconds)
    pub renew_interval_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 30_000,
            acquire_timeout_ms: 3000,
            retry_interval_ms: 50,
            max_retries: 10,
            auto_renew: false,
            renew_interval_ms: 10_000,
        }
    }
}

/// Null-value cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NullCacheConfig {
    /// How long an absence observation stays fresh (seconds)
    pub ttl_secs: u64,
    /// Capacity; oldest evicted on pressure
    pub max_null_keys: usize,
    /// Sweeper interval (seconds)
    pub cleanup_interval_secs: u64,
}

impl Default for NullCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            max_null_keys: 10_000,
            cleanup_interval_secs: 60,
        }
    }
}

/// Jittered TTL settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomTtlConfig {
    /// Nominal TTL (seconds)
    pub base_secs: u64,
    /// Jitter window added on top of base (seconds)
    pub range_secs: u64,
    /// Lower clamp (seconds)
    pub min_secs: u64,
    /// Upper clamp (seconds)
    pub max_secs: u64,
}

impl Default for RandomTtlConfig {
    fn default() -> Self {
        Self {
            base_secs: 3600,
            range_secs: 1800,
            min_secs: 600,
            max_secs: 7200,
        }
    }
}

/// Circuit breaker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Failures in Closed before opening
    pub failure_threshold: u32,
    /// Time in Open before probing (milliseconds)
    pub recovery_timeout_ms: u64,
    /// Requests permitted while Half-Open
    pub half_open_requests: u32,
    /// Rolling window for failure counting (seconds)
    pub monitoring_period_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 60_000,
            half_open_requests: 1,
            monitoring_period_secs: 60,
        }
    }
}

/// Protection manager settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectionConfig {
    /// Master switch
    pub enabled: bool,
    /// Protection level label (informational)
    pub level: String,
    /// Enabled protection strategies
    pub strategies: Vec<String>,
    /// Bloom filter settings
    pub bloom: BloomConfig,
    /// Distributed lock settings
    pub lock: LockConfig,
    /// Null-value cache settings
    pub null_cache: NullCacheConfig,
    /// Jittered TTL settings
    pub random_ttl: RandomTtlConfig,
    /// Circuit breaker settings
    pub breaker: BreakerConfig,
    /// Collect protection metrics
    pub monitoring_enabled: bool,
    /// Metrics sampling interval (seconds)
    pub metrics_interval_secs: u64,
    /// Alerting threshold on protection rate
    pub alert_threshold: f64,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "standard".to_string(),
            strategies: vec![
                "bloom_filter".to_string(),
                "distributed_lock".to_string(),
                "null_cache".to_string(),
                "random_ttl".to_string(),
                "circuit_breaker".to_string(),
            ],
            bloom: BloomConfig::default(),
            lock: LockConfig::default(),
            null_cache: NullCacheConfig::default(),
            random_ttl: RandomTtlConfig::default(),
            breaker: BreakerConfig::default(),
            monitoring_enabled: true,
            metrics_interval_secs: 30,
            alert_threshold: 0.5,
        }
    }
}

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

/// Comparison operator for alert rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertOperator {
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = "=")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = ">")]
    GreaterThan,
}

impl AlertOperator {
    /// Wire symbol, also used in alert messages
    pub fn symbol(self) -> &'static str {
        match self {
            Self::LessThan => "<",
            Self::LessOrEqual => "<=",
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::GreaterOrEqual => ">=",
            Self::GreaterThan => ">",
        }
    }
}

/// A single alert rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    /// Rule identifier
    pub id: String,
    /// Metric the rule watches
    pub metric: crate::monitoring::MetricKind,
    /// Comparison operator
    pub operator: AlertOperator,
    /// Threshold value
    pub threshold: f64,
    /// Hysteresis window (seconds); reserved, evaluation is instantaneous
    pub duration_secs: u64,
    /// Severity of the materialized alert
    pub level: AlertLevel,
    /// Whether the rule is evaluated
    pub enabled: bool,
}

/// Alerting settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Master switch
    pub enabled: bool,
    /// Rules to evaluate on each collection tick
    pub rules: Vec<AlertRule>,
    /// Channel names to fan alerts out to
    pub channels: Vec<String>,
    /// Minimum time between re-fires of one rule (seconds)
    pub cooldown_period_secs: u64,
    /// Cap on live alerts
    pub max_alerts: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rules: Vec::new(),
            channels: vec!["log".to_string()],
            cooldown_period_secs: 300,
            max_alerts: 100,
        }
    }
}

/// Metric export settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Master switch
    pub enabled: bool,
    /// Export formats (currently "json")
    pub formats: Vec<String>,
    /// Export endpoints (sink-defined meaning)
    pub endpoints: Vec<String>,
    /// Export interval (seconds)
    pub interval_secs: u64,
    /// Compress exported payloads
    pub compression: bool,
    /// Extra headers for HTTP sinks
    pub headers: std::collections::HashMap<String, String>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            formats: vec!["json".to_string()],
            endpoints: Vec::new(),
            interval_secs: 60,
            compression: false,
            headers: std::collections::HashMap::new(),
        }
    }
}

/// Monitoring manager settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Master switch
    pub enabled: bool,
    /// Monitoring level label (informational)
    pub level: String,
    /// Collection tick interval (seconds)
    pub collect_interval_secs: u64,
    /// How long points and resolved alerts are retained (seconds)
    pub retention_period_secs: u64,
    /// Metrics to collect; empty = all
    pub enabled_metrics: Vec<crate::monitoring::MetricKind>,
    /// Granularities recorded on points
    pub granularities: Vec<crate::monitoring::Granularity>,
    /// Ring capacity per metric series
    pub max_data_points: usize,
    /// Alerting settings
    pub alert_config: AlertConfig,
    /// Collector concurrency cap (informational)
    pub max_concurrency: usize,
    /// Response-time observation buffer size
    pub buffer_size: usize,
    /// Buffer flush interval (seconds)
    pub flush_interval_secs: u64,
    /// Export settings
    pub export_config: ExportConfig,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "standard".to_string(),
            collect_interval_secs: 30,
            retention_period_secs: 86_400,
            enabled_metrics: Vec::new(),
            granularities: vec![crate::monitoring::Granularity::Minute],
            max_data_points: 1440,
            alert_config: AlertConfig::default(),
            max_concurrency: 4,
            buffer_size: 1000,
            flush_interval_secs: 60,
            export_config: ExportConfig::default(),
        }
    }
}

/// Top-level configuration for the whole fabric
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheFabricConfig {
    /// Key prefix for every key the fabric renders
    pub key_prefix: String,
    /// Adapter settings
    pub adapter: AdapterConfig,
    /// Consistency settings
    pub consistency: ConsistencyConfig,
    /// Warmup settings
    pub warmup: WarmupConfig,
    /// Protection settings
    pub protection: ProtectionConfig,
    /// Monitoring settings
    pub monitoring: MonitoringConfig,
}
