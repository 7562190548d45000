//! Change events flowing from the authoritative store to the cache

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of database mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
}

/// Structured record of a database mutation
///
/// Callers populate the mutation fields; the manager stamps `id` (when
/// missing), `timestamp` and `origin_node_id` at publish time. Events are
/// idempotent by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Idempotence key; stamped at publish when empty
    #[serde(default)]
    pub id: String,
    /// Mutation kind
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    /// Source table
    pub table: String,
    /// Primary key of the mutated row
    pub record_id: String,
    /// Version before the mutation
    pub old_version: u64,
    /// Version after the mutation
    pub new_version: u64,
    /// Row payload after the mutation (empty for deletes)
    pub data: Value,
    /// Cache keys affected by the mutation
    pub cache_keys: Vec<String>,
    /// Publish time; stamped at publish
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Node that published the event; stamped at publish
    #[serde(default)]
    pub origin_node_id: String,
    /// Whether a worker has finished this event
    #[serde(default)]
    pub processed: bool,
}

impl ChangeEvent {
    /// Start an event for a mutation of `table`/`record_id`
    pub fn new(change_type: ChangeType, table: impl Into<String>, record_id: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            change_type,
            table: table.into(),
            record_id: record_id.into(),
            old_version: 0,
            new_version: 0,
            data: Value::Null,
            cache_keys: Vec::new(),
            timestamp: Utc::now(),
            origin_node_id: String::new(),
            processed: false,
        }
    }

    /// Set the version transition
    pub fn with_versions(mut self, old_version: u64, new_version: u64) -> Self {
        self.old_version = old_version;
        self.new_version = new_version;
        self
    }

    /// Set the row payload
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Add an affected cache key
    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_keys.push(key.into());
        self
    }

    /// Set the full affected key list
    pub fn with_cache_keys(mut self, keys: Vec<String>) -> Self {
        self.cache_keys = keys;
        self
    }

    /// Effective payload version: the explicit transition wins, with the
    /// payload's own `version` field as fallback
    pub fn payload_version(&self) -> u64 {
        if self.new_version > 0 {
            self.new_version
        } else {
            self.data
                .get("version")
                .and_then(Value::as_u64)
                .unwrap_or(0)
        }
    }
}
