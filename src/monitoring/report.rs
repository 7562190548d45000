//! Performance report assembly

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::monitoring::alerts::Alert;
use crate::monitoring::hotkeys::HotKeyStat;
use crate::monitoring::response_time::ResponseTimeStats;

/// Direction a metric has been moving over the report period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Stable,
    Improving,
    Degrading,
}

/// Classify a series by comparing the halves of the window
///
/// `higher_is_better` flips the interpretation for metrics like hit rate.
/// Changes inside a 5% band count as stable.
pub fn classify_trend(values: &[f64], higher_is_better: bool) -> Trend {
    if values.len() < 4 {
        return Trend::Stable;
    }
    let mid = values.len() / 2;
    let first: f64 = values[..mid].iter().sum::<f64>() / mid as f64;
    let second: f64 = values[mid..].iter().sum::<f64>() / (values.len() - mid) as f64;
    if first.abs() < f64::EPSILON {
        return Trend::Stable;
    }
    let change = (second - first) / first.abs();
    if change.abs() < 0.05 {
        Trend::Stable
    } else if (change > 0.0) == higher_is_better {
        Trend::Improving
    } else {
        Trend::Degrading
    }
}

/// Bundled performance snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub generated_at: DateTime<Utc>,
    pub period_secs: u64,
    pub hit_rate: f64,
    pub error_rate: f64,
    pub total_ops: f64,
    pub response_time: ResponseTimeStats,
    pub trend: Trend,
    pub hot_keys: Vec<HotKeyStat>,
    pub recommendations: Vec<String>,
    pub active_alerts: Vec<Alert>,
}
