//! Penetration, breakdown and avalanche defenses
//!
//! This module provides:
//! - Bloom filter over a store-resident bit array (penetration)
//! - Null-value cache of observed absences (penetration)
//! - Distributed lock with compare-and-delete release (breakdown)
//! - Deterministic jittered TTL (avalanche)
//! - Circuit breaker over the loader path (origin overload)
//! - The manager composing them into one protected read flow

pub mod bloom;
pub mod breaker;
pub mod hash;
pub mod jitter;
pub mod lock;
pub mod manager;
pub mod null_cache;

pub use bloom::{BloomFilter, BloomReloader};
pub use breaker::{BreakerState, CircuitBreaker};
pub use jitter::TtlJitter;
pub use lock::{DistributedLock, LockGuard};
pub use manager::{ProtectionManager, ProtectionMetricsSnapshot};
pub use null_cache::NullValueCache;
