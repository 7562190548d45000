//! Uniform façade over the external key-value store
//!
//! This module provides:
//! - The store protocol trait and its Redis / in-memory implementations
//! - The `KvAdapter` façade applying the serialization policy and keeping
//!   per-operation hit/miss/error counters
//! - The cached-record envelope every versioned payload travels in

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::AdapterConfig;
use crate::error::{CacheError, CacheResult};

pub mod backend;
pub mod redis;

pub use backend::{KvBackend, MemoryBackend};
pub use self::redis::RedisBackend;

/// Versioned envelope for every cached entity
///
/// The envelope fields travel alongside the domain record's own fields in
/// one flat JSON object; `version` is the monotonic integer assigned by
/// the authoritative store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRecord {
    /// Monotonic version from the authoritative store
    pub version: u64,
    /// When this record entered the cache
    pub cached_at: DateTime<Utc>,
    /// When the underlying entity last changed
    pub updated_at: DateTime<Utc>,
    /// Domain record fields
    #[serde(flatten)]
    pub fields: serde_json::Map<String, Value>,
}

impl CachedRecord {
    /// Wrap a domain payload at `version`, stamping `cached_at` now
    ///
    /// Envelope fields present in the payload are superseded by the
    /// envelope itself.
    pub fn new(payload: Value, version: u64) -> Self {
        let mut fields = match payload {
            Value::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        fields.remove("version");
        fields.remove("cached_at");
        let updated_at = fields
            .remove("updated_at")
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_else(Utc::now);
        Self {
            version,
            cached_at: Utc::now(),
            updated_at,
            fields,
        }
    }

    /// Parse an envelope from its wire form
    pub fn parse(raw: &str) -> CacheResult<Self> {
        serde_json::from_str(raw).map_err(|e| CacheError::Deserialize(e.to_string()))
    }

    /// Render the wire form
    pub fn to_wire(&self) -> CacheResult<String> {
        serde_json::to_string(self).map_err(|e| CacheError::Serialize(e.to_string()))
    }
}

/// Cumulative adapter counters
#[derive(Debug, Default)]
pub struct AdapterStats {
    total_ops: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

impl AdapterStats {
    fn op(&self) {
        self.total_ops.fetch_add(1, Ordering::Relaxed);
    }

    fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> AdapterStatsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        AdapterStatsSnapshot {
            total_ops: self.total_ops.load(Ordering::Relaxed),
            hits,
            misses,
            errors: self.errors.load(Ordering::Relaxed),
            hit_rate: if lookups > 0 {
                hits as f64 / lookups as f64
            } else {
                0.0
            },
        }
    }
}

/// Point-in-time adapter counters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdapterStatsSnapshot {
    pub total_ops: u64,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub hit_rate: f64,
}

/// Connection-pool view reported by the adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSnapshot {
    /// Configured pool size
    pub pool_size: u32,
    /// Configured minimum idle connections
    pub min_idle_conns: u32,
    /// Backend label
    pub backend: String,
}

/// Façade over the store: serialization policy plus counters
///
/// Strings pass through unencoded on write; all other values are
/// JSON-encoded. Reads return structured values when the payload parses
/// as JSON and the raw string otherwise; the adapter never errors on a
/// non-JSON payload.
pub struct KvAdapter {
    backend: Arc<dyn KvBackend>,
    stats: Arc<AdapterStats>,
    pool: PoolSnapshot,
    max_value_bytes: usize,
}

impl KvAdapter {
    /// Wrap a backend with default pool metadata
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self {
            backend,
            stats: Arc::new(AdapterStats::default()),
            pool: PoolSnapshot {
                pool_size: 0,
                min_idle_conns: 0,
                backend: "memory".to_string(),
            },
            max_value_bytes: 0,
        }
    }

    /// Connect a Redis-backed adapter
    pub async fn connect(config: &AdapterConfig) -> CacheResult<Self> {
        let backend = RedisBackend::connect(config).await?;
        Ok(Self {
            backend: Arc::new(backend),
            stats: Arc::new(AdapterStats::default()),
            pool: PoolSnapshot {
                pool_size: config.pool_size,
                min_idle_conns: config.min_idle_conns,
                backend: format!("redis://{}:{}", config.host, config.port),
            },
            max_value_bytes: 0,
        })
    }

    /// Cap serialized payload size; writes above the cap fail with a
    /// serialize error before touching the store
    pub fn with_value_limit(mut self, max_value_bytes: usize) -> Self {
        self.max_value_bytes = max_value_bytes;
        self
    }

    /// Shared counter handle, for the monitoring sampler
    pub fn stats_handle(&self) -> Arc<AdapterStats> {
        Arc::clone(&self.stats)
    }

    /// Cumulative counters
    pub fn stats(&self) -> AdapterStatsSnapshot {
        self.stats.snapshot()
    }

    /// Connection-pool snapshot
    pub fn pool_stats(&self) -> PoolSnapshot {
        self.pool.clone()
    }

    fn track<T>(&self, result: CacheResult<T>) -> CacheResult<T> {
        self.stats.op();
        if result.is_err() {
            self.stats.error();
        }
        result
    }

    fn track_lookup(&self, result: CacheResult<Option<String>>) -> CacheResult<Option<String>> {
        let result = self.track(result);
        match &result {
            Ok(Some(_)) => self.stats.hit(),
            Ok(None) => self.stats.miss(),
            Err(_) => {}
        }
        result
    }

    fn encode(&self, value: &Value) -> CacheResult<String> {
        let raw = match value {
            Value::String(s) => s.clone(),
            other => serde_json::to_string(other).map_err(|e| CacheError::Serialize(e.to_string()))?,
        };
        self.check_limit(&raw)?;
        Ok(raw)
    }

    fn check_limit(&self, raw: &str) -> CacheResult<()> {
        if self.max_value_bytes > 0 && raw.len() > self.max_value_bytes {
            return Err(CacheError::Serialize(format!(
                "payload of {} bytes exceeds limit of {}",
                raw.len(),
                self.max_value_bytes
            )));
        }
        Ok(())
    }

    fn decode(raw: String) -> Value {
        serde_json::from_str(&raw).unwrap_or(Value::String(raw))
    }

    // -- scalar --

    /// Get a value; parses JSON payloads, passes raw strings through
    pub async fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        let raw = self.track_lookup(self.backend.get(key).await)?;
        Ok(raw.map(Self::decode))
    }

    /// Get the raw string payload
    pub async fn get_raw(&self, key: &str) -> CacheResult<Option<String>> {
        self.track_lookup(self.backend.get(key).await)
    }

    /// Get and decode into a typed value
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        let raw = self.track_lookup(self.backend.get(key).await)?;
        match raw {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| CacheError::Deserialize(e.to_string())),
            None => Ok(None),
        }
    }

    /// Set a value under the serialization policy
    pub async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> CacheResult<()> {
        let raw = match self.encode(value) {
            Ok(raw) => raw,
            Err(e) => return self.track(Err(e)),
        };
        self.track(self.backend.set(key, &raw, ttl).await)
    }

    /// Set a raw string payload
    pub async fn set_raw(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        if let Err(e) = self.check_limit(value) {
            return self.track(Err(e));
        }
        self.track(self.backend.set(key, value, ttl).await)
    }

    /// Encode a typed value and set it
    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => return self.track(Err(CacheError::Serialize(e.to_string()))),
        };
        if let Err(e) = self.check_limit(&raw) {
            return self.track(Err(e));
        }
        self.track(self.backend.set(key, &raw, ttl).await)
    }

    /// Conditional set, succeeding only when the key is absent
    pub async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        self.track(self.backend.set_nx(key, value, ttl).await)
    }

    /// Delete one key
    pub async fn del(&self, key: &str) -> CacheResult<bool> {
        let removed = self.track(self.backend.del(std::slice::from_ref(&key.to_string())).await)?;
        Ok(removed > 0)
    }

    /// Delete many keys, returning how many existed
    pub async fn mdel(&self, keys: &[String]) -> CacheResult<u64> {
        self.track(self.backend.del(keys).await)
    }

    pub async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.track(self.backend.exists(key).await)
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        self.track(self.backend.expire(key, ttl).await)
    }

    pub async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        self.track(self.backend.ttl(key).await)
    }

    // -- batch scalar --

    /// Batch get; each present payload goes through the read policy
    pub async fn mget(&self, keys: &[String]) -> CacheResult<Vec<Option<Value>>> {
        let raws = self.track(self.backend.mget(keys).await)?;
        let mut out = Vec::with_capacity(raws.len());
        for raw in raws {
            match raw {
                Some(raw) => {
                    self.stats.hit();
                    out.push(Some(Self::decode(raw)));
                }
                None => {
                    self.stats.miss();
                    out.push(None);
                }
            }
        }
        Ok(out)
    }

    /// Batch set under the serialization policy
    pub async fn mset(&self, pairs: &[(String, Value)]) -> CacheResult<()> {
        let mut encoded = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            match self.encode(value) {
                Ok(raw) => encoded.push((key.clone(), raw)),
                Err(e) => return self.track(Err(e)),
            }
        }
        self.track(self.backend.mset(&encoded).await)
    }

    // -- hash --

    pub async fn hget(&self, key: &str, field: &str) -> CacheResult<Option<Value>> {
        let raw = self.track_lookup(self.backend.hget(key, field).await)?;
        Ok(raw.map(Self::decode))
    }

    pub async fn hset(&self, key: &str, field: &str, value: &Value) -> CacheResult<()> {
        let raw = match self.encode(value) {
            Ok(raw) => raw,
            Err(e) => return self.track(Err(e)),
        };
        self.track(self.backend.hset(key, field, &raw).await)
    }

    pub async fn hmget(&self, key: &str, fields: &[String]) -> CacheResult<Vec<Option<Value>>> {
        let raws = self.track(self.backend.hmget(key, fields).await)?;
        Ok(raws.into_iter().map(|r| r.map(Self::decode)).collect())
    }

    pub async fn hmset(&self, key: &str, pairs: &[(String, Value)]) -> CacheResult<()> {
        let mut encoded = Vec::with_capacity(pairs.len());
        for (field, value) in pairs {
            match self.encode(value) {
                Ok(raw) => encoded.push((field.clone(), raw)),
                Err(e) => return self.track(Err(e)),
            }
        }
        self.track(self.backend.hmset(key, &encoded).await)
    }

    pub async fn hdel(&self, key: &str, fields: &[String]) -> CacheResult<u64> {
        self.track(self.backend.hdel(key, fields).await)
    }

    pub async fn hexists(&self, key: &str, field: &str) -> CacheResult<bool> {
        self.track(self.backend.hexists(key, field).await)
    }

    pub async fn hgetall(&self, key: &str) -> CacheResult<HashMap<String, Value>> {
        let raw = self.track(self.backend.hgetall(key).await)?;
        Ok(raw
            .into_iter()
            .map(|(field, value)| (field, Self::decode(value)))
            .collect())
    }

    // -- list --

    pub async fn lpush(&self, key: &str, values: &[Value]) -> CacheResult<u64> {
        let encoded = self.encode_all(values)?;
        self.track(self.backend.lpush(key, &encoded).await)
    }

    pub async fn rpush(&self, key: &str, values: &[Value]) -> CacheResult<u64> {
        let encoded = self.encode_all(values)?;
        self.track(self.backend.rpush(key, &encoded).await)
    }

    pub async fn lpop(&self, key: &str) -> CacheResult<Option<Value>> {
        let raw = self.track(self.backend.lpop(key).await)?;
        Ok(raw.map(Self::decode))
    }

    pub async fn rpop(&self, key: &str) -> CacheResult<Option<Value>> {
        let raw = self.track(self.backend.rpop(key).await)?;
        Ok(raw.map(Self::decode))
    }

    pub async fn lrange(&self, key: &str, start: i64, stop: i64) -> CacheResult<Vec<Value>> {
        let raws = self.track(self.backend.lrange(key, start, stop).await)?;
        Ok(raws.into_iter().map(Self::decode).collect())
    }

    pub async fn llen(&self, key: &str) -> CacheResult<u64> {
        self.track(self.backend.llen(key).await)
    }

    // -- set --

    pub async fn sadd(&self, key: &str, members: &[String]) -> CacheResult<u64> {
        self.track(self.backend.sadd(key, members).await)
    }

    pub async fn smembers(&self, key: &str) -> CacheResult<Vec<String>> {
        self.track(self.backend.smembers(key).await)
    }

    pub async fn sismember(&self, key: &str, member: &str) -> CacheResult<bool> {
        self.track(self.backend.sismember(key, member).await)
    }

    pub async fn srem(&self, key: &str, members: &[String]) -> CacheResult<u64> {
        self.track(self.backend.srem(key, members).await)
    }

    // -- sorted set --

    pub async fn zadd(&self, key: &str, score: f64, member: &str) -> CacheResult<u64> {
        self.track(self.backend.zadd(key, score, member).await)
    }

    pub async fn zrange(&self, key: &str, start: i64, stop: i64) -> CacheResult<Vec<String>> {
        self.track(self.backend.zrange(key, start, stop).await)
    }

    pub async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> CacheResult<Vec<String>> {
        self.track(self.backend.zrange_by_score(key, min, max).await)
    }

    pub async fn zrem(&self, key: &str, members: &[String]) -> CacheResult<u64> {
        self.track(self.backend.zrem(key, members).await)
    }

    pub async fn zscore(&self, key: &str, member: &str) -> CacheResult<Option<f64>> {
        self.track(self.backend.zscore(key, member).await)
    }

    // -- bitmap --

    pub async fn set_bit(&self, key: &str, offset: u64, value: bool) -> CacheResult<bool> {
        self.track(self.backend.set_bit(key, offset, value).await)
    }

    pub async fn get_bit(&self, key: &str, offset: u64) -> CacheResult<bool> {
        self.track(self.backend.get_bit(key, offset).await)
    }

    pub async fn set_bits(&self, key: &str, offsets: &[u64]) -> CacheResult<()> {
        self.track(self.backend.set_bits(key, offsets).await)
    }

    pub async fn get_bits(&self, key: &str, offsets: &[u64]) -> CacheResult<Vec<bool>> {
        self.track(self.backend.get_bits(key, offsets).await)
    }

    // -- scripting / admin --

    pub async fn compare_and_delete(&self, key: &str, expected: &str) -> CacheResult<bool> {
        self.track(self.backend.compare_and_delete(key, expected).await)
    }

    /// Liveness probe against the store
    pub async fn health_check(&self) -> CacheResult<()> {
        self.track(self.backend.ping().await)
    }

    pub async fn flush(&self) -> CacheResult<()> {
        self.track(self.backend.flush().await)
    }

    pub async fn close(&self) -> CacheResult<()> {
        self.track(self.backend.close().await)
    }

    fn encode_all(&self, values: &[Value]) -> CacheResult<Vec<String>> {
        let mut encoded = Vec::with_capacity(values.len());
        for value in values {
            match self.encode(value) {
                Ok(raw) => encoded.push(raw),
                Err(e) => return self.track(Err(e)),
            }
        }
        Ok(encoded)
    }
}
