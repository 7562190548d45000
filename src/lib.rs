//! # Cachefabric - Redis-backed caching fabric
//!
//! The cache subsystem of an e-commerce backend, sitting between the
//! application services and both the persistent store and the network
//! edge.
//!
//! ## Architecture
//!
//! - `adapter`: Uniform façade over the external key-value store
//! - `keys`: Canonical key construction and the per-domain TTL table
//! - `consistency`: Event-driven propagation of database changes
//! - `warmup`: Batched, prioritized pre-population of hot entries
//! - `protection`: Penetration / breakdown / avalanche defenses
//! - `monitoring`: Metrics, time series, alerting and reports
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cachefabric::adapter::KvAdapter;
//! use cachefabric::config::CacheFabricConfig;
//! use cachefabric::protection::ProtectionManager;
//!
//! # async fn example() -> cachefabric::error::CacheResult<()> {
//! let config = CacheFabricConfig::default();
//! let adapter = Arc::new(KvAdapter::connect(&config.adapter).await?);
//! let protection = ProtectionManager::new(Arc::clone(&adapter), config.protection);
//! protection.start();
//!
//! let product = protection
//!     .protected_get("mall:product:42", || async {
//!         // load from the authoritative store
//!         Ok(Some(serde_json::json!({"id": 42, "version": 7})))
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

// Store façade
pub mod adapter;

// Key and TTL discipline
pub mod keys;

// Configuration surface
pub mod config;

// Error taxonomy
pub mod error;

// Change-event propagation
pub mod consistency;

// Cache pre-population
pub mod warmup;

// Penetration / breakdown / avalanche defenses
pub mod protection;

// Metrics, alerting and reports
pub mod monitoring;

// Re-export commonly used types
pub use adapter::{CachedRecord, KvAdapter, KvBackend, MemoryBackend, RedisBackend};
pub use config::CacheFabricConfig;
pub use consistency::{ChangeEvent, ChangeType, ConsistencyManager};
pub use error::{CacheError, CacheResult};
pub use keys::{KeyBuilder, KeyRegistry, TtlRegistry};
pub use monitoring::MonitoringManager;
pub use protection::ProtectionManager;
pub use warmup::WarmupManager;

/// Re-export version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
