//! Hot-data identification seams
//!
//! Detectors answer "which ids deserve pre-population" for one strategy;
//! the queries behind them belong to the persistence layer. The loader
//! fetches one entity's payload so the manager can write it back.

use async_trait::async_trait;
use serde_json::Value;

use crate::config::HotDataConfig;
use crate::error::CacheResult;
use crate::warmup::task::WarmupStrategy;

/// Identifies hot ids for one warmup strategy
#[async_trait]
pub trait HotDataDetector: Send + Sync {
    /// Strategy this detector feeds
    fn strategy(&self) -> WarmupStrategy;

    /// Ids worth warming, filtered by the configured thresholds
    /// (sold/view counts and rating over the lookback window for
    /// products, login days / order count / activity score for users,
    /// product and view counts for categories)
    async fn identify(&self, config: &HotDataConfig) -> CacheResult<Vec<u64>>;
}

/// Loads one entity's payload from the source of truth
#[async_trait]
pub trait WarmupLoader: Send + Sync {
    /// Fetch the payload for `id`; `None` when the entity is gone
    async fn load(&self, strategy: WarmupStrategy, id: u64) -> CacheResult<Option<Value>>;
}

/// Fixed-list detector for tests and manual warmup runs
pub struct StaticDetector {
    strategy: WarmupStrategy,
    ids: Vec<u64>,
}

impl StaticDetector {
    pub fn new(strategy: WarmupStrategy, ids: Vec<u64>) -> Self {
        Self { strategy, ids }
    }
}

#[async_trait]
impl HotDataDetector for StaticDetector {
    fn strategy(&self) -> WarmupStrategy {
        self.strategy
    }

    async fn identify(&self, _config: &HotDataConfig) -> CacheResult<Vec<u64>> {
        Ok(self.ids.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_detector_returns_ids_in_order() {
        let detector = StaticDetector::new(WarmupStrategy::HotProducts, vec![3, 1, 2]);
        let ids = detector.identify(&HotDataConfig::default()).await.unwrap();
        assert_eq!(ids, vec![3, 1, 2]);
        assert_eq!(detector.strategy(), WarmupStrategy::HotProducts);
    }
}
