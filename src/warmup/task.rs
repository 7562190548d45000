//! Warmup task model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a warmup run pre-populates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmupStrategy {
    HotProducts,
    PromotionProducts,
    ActiveUsers,
    CategoryTop,
    NewProducts,
    UserPreferences,
    ShoppingCarts,
}

impl WarmupStrategy {
    /// Parse a configuration name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "hot_products" => Some(Self::HotProducts),
            "promotion_products" => Some(Self::PromotionProducts),
            "active_users" => Some(Self::ActiveUsers),
            "category_top" | "hot_categories" => Some(Self::CategoryTop),
            "new_products" => Some(Self::NewProducts),
            "user_preferences" => Some(Self::UserPreferences),
            "shopping_carts" => Some(Self::ShoppingCarts),
            _ => None,
        }
    }

    /// Configuration name
    pub fn name(self) -> &'static str {
        match self {
            Self::HotProducts => "hot_products",
            Self::PromotionProducts => "promotion_products",
            Self::ActiveUsers => "active_users",
            Self::CategoryTop => "category_top",
            Self::NewProducts => "new_products",
            Self::UserPreferences => "user_preferences",
            Self::ShoppingCarts => "shopping_carts",
        }
    }

    /// Fixed strategy-to-priority table
    pub fn priority(self) -> WarmupPriority {
        match self {
            Self::HotProducts | Self::PromotionProducts => WarmupPriority::High,
            Self::ActiveUsers | Self::CategoryTop => WarmupPriority::Medium,
            Self::NewProducts | Self::UserPreferences | Self::ShoppingCarts => WarmupPriority::Low,
        }
    }

    /// TTL type tag of the entities this strategy warms
    pub fn data_type(self) -> &'static str {
        match self {
            Self::HotProducts | Self::PromotionProducts | Self::NewProducts => "product",
            Self::ActiveUsers | Self::ShoppingCarts => "cart",
            Self::CategoryTop => "category",
            Self::UserPreferences => "user_preference",
        }
    }
}

/// Task priority; lower value runs first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmupPriority {
    High = 0,
    Medium = 1,
    Low = 2,
}

/// Task lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmupStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// One batch of ids to warm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupTask {
    pub id: String,
    pub strategy: WarmupStrategy,
    pub priority: WarmupPriority,
    pub data_type: String,
    pub data_ids: Vec<u64>,
    pub cache_keys: Vec<String>,
    pub batch_index: usize,
    pub total_batches: usize,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: WarmupStatus,
    pub error: Option<String>,
}

impl WarmupTask {
    /// Create a pending task for one batch
    pub fn new(
        strategy: WarmupStrategy,
        data_ids: Vec<u64>,
        batch_index: usize,
        total_batches: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            strategy,
            priority: strategy.priority(),
            data_type: strategy.data_type().to_string(),
            data_ids,
            cache_keys: Vec::new(),
            batch_index,
            total_batches,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            status: WarmupStatus::Pending,
            error: None,
        }
    }

    /// `Pending -> Running`
    pub fn start(&mut self) {
        self.status = WarmupStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// `Running -> Completed`
    pub fn complete(&mut self) {
        self.status = WarmupStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    /// `Running -> Failed`
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = WarmupStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }

    /// `Running -> Cancelled`
    pub fn cancel(&mut self) {
        self.status = WarmupStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }
}
