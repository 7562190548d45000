//! Metrics collection, alerting and reporting
//!
//! This module provides:
//! - Bounded time series per metric kind
//! - An approximate response-time distribution
//! - Hot-key accounting over an LRU map
//! - A rule-based alert engine with pluggable channels
//! - The manager tying collection, cleaning, export and reports together

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod alerts;
pub mod hotkeys;
pub mod manager;
pub mod report;
pub mod response_time;
pub mod timeseries;

pub use alerts::{Alert, AlertChannel, AlertEngine, AlertStatus, LogChannel};
pub use hotkeys::{HotKeyStat, HotKeyTracker};
pub use manager::{LogExporter, MetricExporter, MetricsExport, MonitoringManager, StatsSource};
pub use report::{PerformanceReport, Trend};
pub use response_time::{ResponseTimeStats, ResponseTimeTracker};
pub use timeseries::{TimeSeriesStore, MAX_DATA_POINTS_DEFAULT};

/// Metric kinds the fabric collects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    HitRate,
    MissRate,
    TotalOps,
    ErrorRate,
    ResponseTime,
    EventsPending,
    EventsFailed,
    SyncFailures,
    ConsistencyRate,
    ProtectionRate,
    PenetrationBlocked,
    BreakerTrips,
    WarmupProgress,
    WarmupFailures,
}

/// Sampling granularity recorded on points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Second,
    Minute,
    Hour,
    Day,
}

/// One sampled value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricPoint {
    pub metric_type: MetricKind,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub labels: HashMap<String, String>,
    pub granularity: Granularity,
}
