//! Rule-based alerting
//!
//! Rules are evaluated against the latest metric values on each
//! collection tick. The rule's `duration` field is carried for schema
//! compatibility but the evaluation is instantaneous; per-rule cooldown
//! bounds re-fire frequency instead.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{AlertConfig, AlertLevel, AlertOperator, AlertRule};
use crate::monitoring::MetricKind;

/// Alert lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Resolved,
}

/// A materialized alert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub rule_id: String,
    pub level: AlertLevel,
    pub metric_type: MetricKind,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// How many evaluations have re-confirmed this alert
    pub count: u64,
}

/// Receives alerts as they fire and resolve
#[async_trait]
pub trait AlertChannel: Send + Sync {
    async fn notify(&self, alert: &Alert);
}

/// Channel writing alerts to the log
pub struct LogChannel;

#[async_trait]
impl AlertChannel for LogChannel {
    async fn notify(&self, alert: &Alert) {
        match alert.status {
            AlertStatus::Active => warn!(
                rule = %alert.rule_id,
                metric = ?alert.metric_type,
                value = alert.value,
                threshold = alert.threshold,
                "alert active: {}",
                alert.message
            ),
            AlertStatus::Resolved => info!(
                rule = %alert.rule_id,
                metric = ?alert.metric_type,
                "alert resolved: {}",
                alert.message
            ),
        }
    }
}

fn predicate_holds(operator: AlertOperator, value: f64, threshold: f64) -> bool {
    match operator {
        AlertOperator::LessThan => value < threshold,
        AlertOperator::LessOrEqual => value <= threshold,
        AlertOperator::Equal => (value - threshold).abs() < f64::EPSILON,
        AlertOperator::NotEqual => (value - threshold).abs() >= f64::EPSILON,
        AlertOperator::GreaterOrEqual => value >= threshold,
        AlertOperator::GreaterThan => value > threshold,
    }
}

/// Evaluates rules and keeps the active-alert map
pub struct AlertEngine {
    config: AlertConfig,
    active: RwLock<HashMap<String, Alert>>,
    resolved: RwLock<Vec<Alert>>,
    last_fired: RwLock<HashMap<String, Instant>>,
    channels: RwLock<Vec<Arc<dyn AlertChannel>>>,
}

impl AlertEngine {
    pub fn new(config: AlertConfig) -> Self {
        let engine = Self {
            config,
            active: RwLock::new(HashMap::new()),
            resolved: RwLock::new(Vec::new()),
            last_fired: RwLock::new(HashMap::new()),
            channels: RwLock::new(Vec::new()),
        };
        if engine.config.channels.iter().any(|c| c == "log") {
            engine.channels.write().push(Arc::new(LogChannel));
        }
        engine
    }

    /// Register an additional fan-out channel (webhook, pager, ...)
    pub fn register_channel(&self, channel: Arc<dyn AlertChannel>) {
        self.channels.write().push(channel);
    }

    /// Evaluate every enabled rule against the latest values
    pub async fn evaluate(&self, values: &HashMap<MetricKind, f64>) {
        if !self.config.enabled {
            return;
        }
        let mut fired = Vec::new();
        let mut resolved = Vec::new();
        {
            let mut active = self.active.write();
            let mut last_fired = self.last_fired.write();
            for rule in self.config.rules.iter().filter(|r| r.enabled) {
                let value = match values.get(&rule.metric) {
                    Some(v) => *v,
                    None => continue,
                };
                let holds = predicate_holds(rule.operator, value, rule.threshold);
                if holds {
                    if let Some(alert) = active.get_mut(&rule.id) {
                        alert.count += 1;
                        alert.value = value;
                        continue;
                    }
                    let cooldown = Duration::from_secs(self.config.cooldown_period_secs);
                    if let Some(at) = last_fired.get(&rule.id) {
                        if at.elapsed() < cooldown {
                            continue;
                        }
                    }
                    if active.len() >= self.config.max_alerts {
                        continue;
                    }
                    let alert = Self::materialize(rule, value);
                    last_fired.insert(rule.id.clone(), Instant::now());
                    active.insert(rule.id.clone(), alert.clone());
                    fired.push(alert);
                } else if let Some(mut alert) = active.remove(&rule.id) {
                    alert.status = AlertStatus::Resolved;
                    alert.resolved_at = Some(Utc::now());
                    self.resolved.write().push(alert.clone());
                    resolved.push(alert);
                }
            }
        }
        let channels: Vec<_> = self.channels.read().clone();
        for alert in fired.iter().chain(resolved.iter()) {
            for channel in &channels {
                channel.notify(alert).await;
            }
        }
    }

    fn materialize(rule: &AlertRule, value: f64) -> Alert {
        Alert {
            id: Uuid::new_v4().to_string(),
            rule_id: rule.id.clone(),
            level: rule.level,
            metric_type: rule.metric,
            value,
            threshold: rule.threshold,
            message: format!(
                "{:?} is {:.4}, violating {} {}",
                rule.metric,
                value,
                rule.operator.symbol(),
                rule.threshold
            ),
            status: AlertStatus::Active,
            created_at: Utc::now(),
            resolved_at: None,
            count: 1,
        }
    }

    /// Snapshot of currently active alerts
    pub fn active_alerts(&self) -> Vec<Alert> {
        self.active.read().values().cloned().collect()
    }

    /// Drop resolved alerts older than `cutoff`
    pub fn cleanup(&self, cutoff: DateTime<Utc>) -> usize {
        let mut resolved = self.resolved.write();
        let before = resolved.len();
        resolved.retain(|a| a.resolved_at.map_or(true, |at| at >= cutoff));
        before - resolved.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: &str, metric: MetricKind, operator: AlertOperator, threshold: f64) -> AlertRule {
        AlertRule {
            id: id.to_string(),
            metric,
            operator,
            threshold,
            duration_secs: 0,
            level: AlertLevel::Warning,
            enabled: true,
        }
    }

    fn engine(rules: Vec<AlertRule>) -> AlertEngine {
        AlertEngine::new(AlertConfig {
            rules,
            channels: Vec::new(),
            cooldown_period_secs: 0,
            ..AlertConfig::default()
        })
    }

    #[tokio::test]
    async fn test_alert_fires_and_resolves() {
        let engine = engine(vec![rule(
            "low-hit-rate",
            MetricKind::HitRate,
            AlertOperator::LessThan,
            0.8,
        )]);

        let mut values = HashMap::new();
        values.insert(MetricKind::HitRate, 0.5);
        engine.evaluate(&values).await;
        let active = engine.active_alerts();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].rule_id, "low-hit-rate");
        assert_eq!(active[0].status, AlertStatus::Active);

        values.insert(MetricKind::HitRate, 0.95);
        engine.evaluate(&values).await;
        assert!(engine.active_alerts().is_empty());
    }

    #[tokio::test]
    async fn test_repeat_evaluation_bumps_count() {
        let engine = engine(vec![rule(
            "err",
            MetricKind::ErrorRate,
            AlertOperator::GreaterThan,
            0.1,
        )]);
        let mut values = HashMap::new();
        values.insert(MetricKind::ErrorRate, 0.5);
        engine.evaluate(&values).await;
        engine.evaluate(&values).await;
        engine.evaluate(&values).await;
        let active = engine.active_alerts();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].count, 3);
    }

    #[tokio::test]
    async fn test_disabled_rule_never_fires() {
        let mut disabled = rule("off", MetricKind::HitRate, AlertOperator::LessThan, 0.9);
        disabled.enabled = false;
        let engine = engine(vec![disabled]);
        let mut values = HashMap::new();
        values.insert(MetricKind::HitRate, 0.1);
        engine.evaluate(&values).await;
        assert!(engine.active_alerts().is_empty());
    }

    #[tokio::test]
    async fn test_missing_metric_is_skipped() {
        let engine = engine(vec![rule(
            "r",
            MetricKind::BreakerTrips,
            AlertOperator::GreaterThan,
            0.0,
        )]);
        engine.evaluate(&HashMap::new()).await;
        assert!(engine.active_alerts().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_drops_old_resolved() {
        let engine = engine(vec![rule(
            "r",
            MetricKind::ErrorRate,
            AlertOperator::GreaterThan,
            0.1,
        )]);
        let mut values = HashMap::new();
        values.insert(MetricKind::ErrorRate, 0.5);
        engine.evaluate(&values).await;
        values.insert(MetricKind::ErrorRate, 0.0);
        engine.evaluate(&values).await;

        let removed = engine.cleanup(Utc::now() + chrono::Duration::seconds(1));
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn test_custom_channel_receives_alerts() {
        use std::sync::atomic::{AtomicU32, Ordering};

        struct CountingChannel(AtomicU32);

        #[async_trait]
        impl AlertChannel for CountingChannel {
            async fn notify(&self, _alert: &Alert) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let engine = engine(vec![rule(
            "r",
            MetricKind::ErrorRate,
            AlertOperator::GreaterThan,
            0.1,
        )]);
        let channel = Arc::new(CountingChannel(AtomicU32::new(0)));
        engine.register_channel(Arc::clone(&channel) as Arc<dyn AlertChannel>);

        let mut values = HashMap::new();
        values.insert(MetricKind::ErrorRate, 0.9);
        engine.evaluate(&values).await;
        // fire
        assert_eq!(channel.0.load(Ordering::SeqCst), 1);
        values.insert(MetricKind::ErrorRate, 0.0);
        engine.evaluate(&values).await;
        // resolve notification too
        assert_eq!(channel.0.load(Ordering::SeqCst), 2);
    }
}
