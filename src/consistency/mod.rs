//! Event-driven cache/store consistency
//!
//! This module provides:
//! - Change events published around database mutations
//! - A bounded queue and worker pool dispatching them per sync strategy
//! - The optimistic-locking contract consumed on write-through
//! - A periodic check comparing cached and authoritative versions

pub mod event;
pub mod manager;
pub mod optimistic;

pub use event::{ChangeEvent, ChangeType};
pub use manager::{CheckTarget, ConsistencyManager, ConsistencyStatsSnapshot, KeyEnumerator};
pub use optimistic::{MemoryStore, OptimisticLockService, UpdateResult};
