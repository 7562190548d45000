//! Error types shared across the cache fabric

use thiserror::Error;

/// Errors surfaced by the cache fabric
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key validation failed (empty, too long, whitespace)
    #[error("invalid cache key: {0}")]
    InvalidKey(String),

    /// Underlying store transport or protocol error
    #[error("backend error: {0}")]
    Backend(String),

    /// Payload encoding failed
    #[error("serialize error: {0}")]
    Serialize(String),

    /// Payload decoding failed
    #[error("deserialize error: {0}")]
    Deserialize(String),

    /// Requested entity absent where callers want a hard error
    #[error("not found: {0}")]
    NotFound(String),

    /// Protected read proved absence (bloom negative or null-cache hit)
    #[error("key proven absent: {0}")]
    Absent(String),

    /// Optimistic version mismatch on write-through
    #[error("optimistic conflict on {table}:{record_id}, current version {current_version}")]
    Conflict {
        table: String,
        record_id: String,
        current_version: u64,
    },

    /// Change-event channel saturated
    #[error("event buffer full")]
    BufferFull,

    /// Distributed lock could not be acquired in time
    #[error("lock contended: {0}")]
    LockContended(String),

    /// Distributed lock no longer held by this owner at release
    #[error("lock lost: {0}")]
    LockLost(String),

    /// Circuit breaker rejected the request
    #[error("circuit breaker open")]
    BreakerOpen,

    /// Operation observed the shutdown token
    #[error("operation cancelled")]
    Cancelled,
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialize(err.to_string())
    }
}

/// Result type for cache fabric operations
pub type CacheResult<T> = Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CacheError::InvalidKey("product:".to_string());
        assert!(err.to_string().contains("invalid cache key"));

        let err = CacheError::Conflict {
            table: "products".to_string(),
            record_id: "42".to_string(),
            current_version: 7,
        };
        assert!(err.to_string().contains("version 7"));
    }

    #[test]
    fn test_serde_error_maps_to_serialize() {
        let bad = serde_json::from_str::<serde_json::Value>("{not json");
        let err: CacheError = bad.unwrap_err().into();
        assert!(matches!(err, CacheError::Serialize(_)));
    }
}
