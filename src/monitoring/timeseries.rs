//! Bounded per-metric time series

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::monitoring::{Granularity, MetricKind, MetricPoint};

/// Default ring capacity per series
pub const MAX_DATA_POINTS_DEFAULT: usize = 1440;

#[derive(Debug, Default)]
struct Series {
    points: VecDeque<MetricPoint>,
}

/// FIFO ring of points per metric kind
///
/// Readers get copies under the read lock so collection ticks never see a
/// series mid-mutation.
pub struct TimeSeriesStore {
    series: RwLock<HashMap<MetricKind, Series>>,
    max_points: usize,
}

impl TimeSeriesStore {
    pub fn new(max_points: usize) -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            max_points: max_points.max(1),
        }
    }

    /// Append a point, evicting the oldest on overflow
    pub fn append(&self, kind: MetricKind, value: f64, granularity: Granularity) {
        self.append_labeled(kind, value, granularity, HashMap::new());
    }

    /// Append a labeled point
    pub fn append_labeled(
        &self,
        kind: MetricKind,
        value: f64,
        granularity: Granularity,
        labels: HashMap<String, String>,
    ) {
        let mut series = self.series.write();
        let entry = series.entry(kind).or_default();
        if entry.points.len() >= self.max_points {
            entry.points.pop_front();
        }
        entry.points.push_back(MetricPoint {
            metric_type: kind,
            value,
            timestamp: Utc::now(),
            labels,
            granularity,
        });
    }

    /// Copy of one series, oldest first
    pub fn series(&self, kind: MetricKind) -> Vec<MetricPoint> {
        self.series
            .read()
            .get(&kind)
            .map(|s| s.points.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Most recent value of one series
    pub fn latest(&self, kind: MetricKind) -> Option<f64> {
        self.series
            .read()
            .get(&kind)
            .and_then(|s| s.points.back())
            .map(|p| p.value)
    }

    /// Most recent value of every series
    pub fn latest_all(&self) -> HashMap<MetricKind, f64> {
        self.series
            .read()
            .iter()
            .filter_map(|(kind, s)| s.points.back().map(|p| (*kind, p.value)))
            .collect()
    }

    /// Number of points currently held for one series
    pub fn len(&self, kind: MetricKind) -> usize {
        self.series
            .read()
            .get(&kind)
            .map_or(0, |s| s.points.len())
    }

    /// Drop points older than `cutoff`; returns how many were removed
    pub fn prune(&self, cutoff: DateTime<Utc>) -> usize {
        let mut removed = 0;
        let mut series = self.series.write();
        for s in series.values_mut() {
            while s.points.front().map_or(false, |p| p.timestamp < cutoff) {
                s.points.pop_front();
                removed += 1;
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_keeps_last_n_in_order() {
        let store = TimeSeriesStore::new(5);
        for i in 0..7 {
            store.append(MetricKind::HitRate, i as f64, Granularity::Second);
        }
        let points = store.series(MetricKind::HitRate);
        assert_eq!(points.len(), 5);
        let values: Vec<f64> = points.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![2.0, 3.0, 4.0, 5.0, 6.0]);
        // Ordered by timestamp
        for pair in points.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    #[test]
    fn test_latest_and_len() {
        let store = TimeSeriesStore::new(10);
        assert_eq!(store.latest(MetricKind::ErrorRate), None);
        store.append(MetricKind::ErrorRate, 0.1, Granularity::Minute);
        store.append(MetricKind::ErrorRate, 0.2, Granularity::Minute);
        assert_eq!(store.latest(MetricKind::ErrorRate), Some(0.2));
        assert_eq!(store.len(MetricKind::ErrorRate), 2);
    }

    #[test]
    fn test_prune_drops_old_points() {
        let store = TimeSeriesStore::new(10);
        store.append(MetricKind::TotalOps, 1.0, Granularity::Minute);
        store.append(MetricKind::TotalOps, 2.0, Granularity::Minute);
        let removed = store.prune(Utc::now() + chrono::Duration::seconds(1));
        assert_eq!(removed, 2);
        assert_eq!(store.len(MetricKind::TotalOps), 0);
    }
}
