//! Approximate response-time distribution
//!
//! Observations go into a bounded buffer that overwrites oldest-first;
//! each collection snapshot sorts a copy. Precision is bounded by the
//! buffer size.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Summary of the current observation window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseTimeStats {
    pub count: usize,
    pub min_ms: f64,
    pub avg_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

/// Bounded buffer of response-time observations
pub struct ResponseTimeTracker {
    buffer: Mutex<VecDeque<f64>>,
    capacity: usize,
}

impl ResponseTimeTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Push one observation in milliseconds
    pub fn observe(&self, ms: f64) {
        let mut buffer = self.buffer.lock();
        if buffer.len() >= self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(ms);
    }

    /// Snapshot-and-sort summary of the window
    pub fn stats(&self) -> ResponseTimeStats {
        let mut sorted: Vec<f64> = self.buffer.lock().iter().copied().collect();
        if sorted.is_empty() {
            return ResponseTimeStats::default();
        }
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let count = sorted.len();
        let sum: f64 = sorted.iter().sum();
        let percentile = |p: f64| -> f64 {
            let rank = ((p * count as f64).ceil() as usize).clamp(1, count);
            sorted[rank - 1]
        };
        ResponseTimeStats {
            count,
            min_ms: sorted[0],
            avg_ms: sum / count as f64,
            p95_ms: percentile(0.95),
            p99_ms: percentile(0.99),
            max_ms: sorted[count - 1],
        }
    }
}
