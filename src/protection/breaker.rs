//! Circuit breaker guarding the loader path
//!
//! State machine: `Closed -> Open -> HalfOpen -> {Closed | Open}`.
//! Failures are only counted in `Closed`, within a rolling monitoring
//! window; counters reset on entry to `Closed`.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::BreakerConfig;

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// All requests permitted
    Closed,
    /// Requests rejected until the recovery timeout elapses
    Open,
    /// A bounded number of probe requests permitted
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failures: u32,
    window_start: Instant,
    opened_at: Instant,
    half_open_in_flight: u32,
    trips: u64,
}

/// Circuit breaker
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failures: 0,
                window_start: Instant::now(),
                opened_at: Instant::now(),
                half_open_in_flight: 0,
                trips: 0,
            }),
        }
    }

    /// Whether a request may proceed right now
    ///
    /// In `Open`, flips to `HalfOpen` once the recovery timeout has
    /// elapsed and admits up to `half_open_requests` probes.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let recovery = Duration::from_millis(self.config.recovery_timeout_ms);
                if inner.opened_at.elapsed() >= recovery {
                    inner.state = BreakerState::HalfOpen;
                    inner.half_open_in_flight = 1;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if inner.half_open_in_flight < self.config.half_open_requests {
                    inner.half_open_in_flight += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful loader call
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Closed;
                inner.failures = 0;
                inner.window_start = Instant::now();
                inner.half_open_in_flight = 0;
            }
            BreakerState::Closed | BreakerState::Open => {}
        }
    }

    /// Record a failed loader call
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => {
                let window = Duration::from_secs(self.config.monitoring_period_secs);
                if inner.window_start.elapsed() > window {
                    inner.failures = 0;
                    inner.window_start = Instant::now();
                }
                inner.failures += 1;
                if inner.failures >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Instant::now();
                    inner.trips += 1;
                    warn!(failures = inner.failures, "circuit breaker opened");
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Instant::now();
                inner.trips += 1;
                inner.half_open_in_flight = 0;
            }
            BreakerState::Open => {}
        }
    }

    /// Current state
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// How many times the breaker has opened
    pub fn trips(&self) -> u64 {
        self.inner.lock().trips
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, recovery_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig {
            failure_threshold: threshold,
            recovery_timeout_ms: recovery_ms,
            half_open_requests: 1,
            monitoring_period_secs: 60,
        })
    }

    #[test]
    fn test_trips_after_threshold() {
        let cb = breaker(3, 50);
        assert!(cb.allow());
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(!cb.allow());
        assert_eq!(cb.trips(), 1);
    }

    #[tokio::test]
    async fn test_half_open_success_closes() {
        let cb = breaker(1, 20);
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(!cb.allow());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cb.allow());
        assert_eq!(cb.state(), BreakerState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), BreakerState::Closed);
        assert!(cb.allow());
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(1, 20);
        cb.record_failure();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cb.allow());
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(!cb.allow());
        assert_eq!(cb.trips(), 2);
    }

    #[test]
    fn test_half_open_admits_bounded_probes() {
        let cb = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 1,
            recovery_timeout_ms: 0,
            half_open_requests: 2,
            monitoring_period_secs: 60,
        });
        cb.record_failure();
        assert!(cb.allow()); // transitions to half-open, probe 1
        assert!(cb.allow()); // probe 2
        assert!(!cb.allow()); // saturated
    }

    #[test]
    fn test_counters_reset_on_close() {
        let cb = breaker(2, 0);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(cb.allow());
        cb.record_success();
        assert_eq!(cb.state(), BreakerState::Closed);
        // One failure after re-close must not trip immediately
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Closed);
    }
}
