//! Optimistic-locking service contract
//!
//! The consistency manager consumes this contract; the persistence layer
//! implements it. `MemoryStore` is an in-process implementation for tests
//! and local runs.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::error::CacheResult;

/// Outcome of a version-checked update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateResult {
    /// The store accepted the update at this version
    Applied { new_version: u64 },
    /// Another writer got there first
    Conflict { current_version: u64 },
}

/// Update-with-version-check contract of the persistence layer
#[async_trait]
pub trait OptimisticLockService: Send + Sync {
    /// Apply `updates` to `table`/`record_id` iff the stored version still
    /// equals `expected_version`
    async fn update_with_optimistic_lock(
        &self,
        table: &str,
        record_id: &str,
        updates: &Value,
        expected_version: u64,
    ) -> CacheResult<UpdateResult>;

    /// Current authoritative version, `None` when the row is gone
    async fn current_version(&self, table: &str, record_id: &str) -> CacheResult<Option<u64>>;
}

/// In-process optimistic store
#[derive(Default)]
pub struct MemoryStore {
    rows: DashMap<(String, String), (u64, Value)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a row at a version
    pub fn put(&self, table: &str, record_id: &str, version: u64, data: Value) {
        self.rows
            .insert((table.to_string(), record_id.to_string()), (version, data));
    }

    /// Read a row
    pub fn get(&self, table: &str, record_id: &str) -> Option<(u64, Value)> {
        self.rows
            .get(&(table.to_string(), record_id.to_string()))
            .map(|r| r.clone())
    }
}

#[async_trait]
impl OptimisticLockService for MemoryStore {
    async fn update_with_optimistic_lock(
        &self,
        table: &str,
        record_id: &str,
        updates: &Value,
        expected_version: u64,
    ) -> CacheResult<UpdateResult> {
        let key = (table.to_string(), record_id.to_string());
        let mut row = self
            .rows
            .entry(key)
            .or_insert_with(|| (0, Value::Null));
        let (version, data) = &mut *row;
        if *version != expected_version {
            return Ok(UpdateResult::Conflict {
                current_version: *version,
            });
        }
        *version += 1;
        *data = updates.clone();
        Ok(UpdateResult::Applied {
            new_version: *version,
        })
    }

    async fn current_version(&self, table: &str, record_id: &str) -> CacheResult<Option<u64>> {
        Ok(self
            .rows
            .get(&(table.to_string(), record_id.to_string()))
            .map(|r| r.0))
    }
}
