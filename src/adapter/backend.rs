//! Store protocol trait and the in-process backend
//!
//! `KvBackend` is the uniform surface the adapter drives. `RedisBackend`
//! (in `redis.rs`) is the production implementation; `MemoryBackend` here
//! implements the same protocol over process-local maps so the fabric can
//! run in tests and local tooling without a live store.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::CacheResult;

/// Uniform protocol over the external key-value store
#[async_trait]
pub trait KvBackend: Send + Sync {
    // -- scalar --

    async fn get(&self, key: &str) -> CacheResult<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()>;
    /// Conditional set: succeeds only when the key is absent
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool>;
    async fn del(&self, keys: &[String]) -> CacheResult<u64>;
    async fn exists(&self, key: &str) -> CacheResult<bool>;
    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool>;
    /// Remaining TTL; `None` when the key is absent or has no expiry
    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>>;

    // -- batch scalar --

    async fn mget(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>>;
    async fn mset(&self, pairs: &[(String, String)]) -> CacheResult<()>;

    // -- hash --

    async fn hget(&self, key: &str, field: &str) -> CacheResult<Option<String>>;
    async fn hset(&self, key: &str, field: &str, value: &str) -> CacheResult<()>;
    async fn hmget(&self, key: &str, fields: &[String]) -> CacheResult<Vec<Option<String>>>;
    async fn hmset(&self, key: &str, pairs: &[(String, String)]) -> CacheResult<()>;
    async fn hdel(&self, key: &str, fields: &[String]) -> CacheResult<u64>;
    async fn hexists(&self, key: &str, field: &str) -> CacheResult<bool>;
    async fn hgetall(&self, key: &str) -> CacheResult<HashMap<String, String>>;

    // -- list --

    async fn lpush(&self, key: &str, values: &[String]) -> CacheResult<u64>;
    async fn rpush(&self, key: &str, values: &[String]) -> CacheResult<u64>;
    async fn lpop(&self, key: &str) -> CacheResult<Option<String>>;
    async fn rpop(&self, key: &str) -> CacheResult<Option<String>>;
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> CacheResult<Vec<String>>;
    async fn llen(&self, key: &str) -> CacheResult<u64>;

    // -- set --

    async fn sadd(&self, key: &str, members: &[String]) -> CacheResult<u64>;
    async fn smembers(&self, key: &str) -> CacheResult<Vec<String>>;
    async fn sismember(&self, key: &str, member: &str) -> CacheResult<bool>;
    async fn srem(&self, key: &str, members: &[String]) -> CacheResult<u64>;

    // -- sorted set --

    async fn zadd(&self, key: &str, score: f64, member: &str) -> CacheResult<u64>;
    async fn zrange(&self, key: &str, start: i64, stop: i64) -> CacheResult<Vec<String>>;
    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> CacheResult<Vec<String>>;
    async fn zrem(&self, key: &str, members: &[String]) -> CacheResult<u64>;
    async fn zscore(&self, key: &str, member: &str) -> CacheResult<Option<f64>>;

    // -- bitmap --

    async fn set_bit(&self, key: &str, offset: u64, value: bool) -> CacheResult<bool>;
    async fn get_bit(&self, key: &str, offset: u64) -> CacheResult<bool>;
    /// Set every offset in one pipelined round trip
    async fn set_bits(&self, key: &str, offsets: &[u64]) -> CacheResult<()>;
    /// Read every offset in one pipelined round trip
    async fn get_bits(&self, key: &str, offsets: &[u64]) -> CacheResult<Vec<bool>>;

    // -- scripting --

    /// Atomic compare-and-delete used for lock release: deletes `key` iff
    /// its current value equals `expected`
    async fn compare_and_delete(&self, key: &str, expected: &str) -> CacheResult<bool>;

    // -- admin --

    async fn ping(&self) -> CacheResult<()>;
    async fn flush(&self) -> CacheResult<()>;
    async fn close(&self) -> CacheResult<()>;
}

#[derive(Debug, Clone)]
enum Stored {
    Str(String),
    Hash(HashMap<String, String>),
    List(VecDeque<String>),
    Set(HashSet<String>),
    ZSet(HashMap<String, f64>),
    Bits(Vec<u8>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Stored,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(value: Stored, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|t| Instant::now() + t),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.map_or(false, |at| Instant::now() >= at)
    }
}

/// In-process implementation of the store protocol
///
/// Expiry is checked lazily on access; there is no background reaper.
#[derive(Default)]
pub struct MemoryBackend {
    data: DashMap<String, Entry>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a live entry, dropping it if expired
    fn entry(&self, key: &str) -> Option<Entry> {
        let expired = match self.data.get(key) {
            Some(entry) if entry.is_expired() => true,
            Some(entry) => return Some(entry.clone()),
            None => return None,
        };
        if expired {
            self.data.remove(key);
        }
        None
    }

    fn with_entry<T>(
        &self,
        key: &str,
        default: Stored,
        f: impl FnOnce(&mut Stored) -> T,
    ) -> T {
        let mut slot = self
            .data
            .entry(key.to_string())
            .or_insert_with(|| Entry::live(default.clone(), None));
        if slot.is_expired() {
            *slot = Entry::live(default, None);
        }
        f(&mut slot.value)
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        Ok(self.entry(key).and_then(|e| match e.value {
            Stored::Str(s) => Some(s),
            _ => None,
        }))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        self.data.insert(
            key.to_string(),
            Entry::live(Stored::Str(value.to_string()), ttl),
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        if self.entry(key).is_some() {
            return Ok(false);
        }
        self.data.insert(
            key.to_string(),
            Entry::live(Stored::Str(value.to_string()), Some(ttl)),
        );
        Ok(true)
    }

    async fn del(&self, keys: &[String]) -> CacheResult<u64> {
        let mut removed = 0;
        for key in keys {
            if self.data.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        Ok(self.entry(key).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        if let Some(mut entry) = self.data.get_mut(key) {
            if !entry.is_expired() {
                entry.expires_at = Some(Instant::now() + ttl);
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        Ok(self.entry(key).and_then(|e| {
            e.expires_at
                .map(|at| at.saturating_duration_since(Instant::now()))
        }))
    }

    async fn mget(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(self.get(key).await?);
        }
        Ok(out)
    }

    async fn mset(&self, pairs: &[(String, String)]) -> CacheResult<()> {
        for (key, value) in pairs {
            self.set(key, value, None).await?;
        }
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> CacheResult<Option<String>> {
        Ok(self.entry(key).and_then(|e| match e.value {
            Stored::Hash(h) => h.get(field).cloned(),
            _ => None,
        }))
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> CacheResult<()> {
        self.with_entry(key, Stored::Hash(HashMap::new()), |stored| {
            if let Stored::Hash(h) = stored {
                h.insert(field.to_string(), value.to_string());
            }
        });
        Ok(())
    }

    async fn hmget(&self, key: &str, fields: &[String]) -> CacheResult<Vec<Option<String>>> {
        let hash = self.entry(key).and_then(|e| match e.value {
            Stored::Hash(h) => Some(h),
            _ => None,
        });
        Ok(fields
            .iter()
            .map(|f| hash.as_ref().and_then(|h| h.get(f).cloned()))
            .collect())
    }

    async fn hmset(&self, key: &str, pairs: &[(String, String)]) -> CacheResult<()> {
        self.with_entry(key, Stored::Hash(HashMap::new()), |stored| {
            if let Stored::Hash(h) = stored {
                for (field, value) in pairs {
                    h.insert(field.clone(), value.clone());
                }
            }
        });
        Ok(())
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> CacheResult<u64> {
        Ok(self.with_entry(key, Stored::Hash(HashMap::new()), |stored| {
            let mut removed = 0;
            if let Stored::Hash(h) = stored {
                for field in fields {
                    if h.remove(field).is_some() {
                        removed += 1;
                    }
                }
            }
            removed
        }))
    }

    async fn hexists(&self, key: &str, field: &str) -> CacheResult<bool> {
        Ok(self.hget(key, field).await?.is_some())
    }

    async fn hgetall(&self, key: &str) -> CacheResult<HashMap<String, String>> {
        Ok(self
            .entry(key)
            .and_then(|e| match e.value {
                Stored::Hash(h) => Some(h),
                _ => None,
            })
            .unwrap_or_default())
    }

    async fn lpush(&self, key: &str, values: &[String]) -> CacheResult<u64> {
        Ok(self.with_entry(key, Stored::List(VecDeque::new()), |stored| {
            if let Stored::List(l) = stored {
                for value in values {
                    l.push_front(value.clone());
                }
                l.len() as u64
            } else {
                0
            }
        }))
    }

    async fn rpush(&self, key: &str, values: &[String]) -> CacheResult<u64> {
        Ok(self.with_entry(key, Stored::List(VecDeque::new()), |stored| {
            if let Stored::List(l) = stored {
                for value in values {
                    l.push_back(value.clone());
                }
                l.len() as u64
            } else {
                0
            }
        }))
    }

    async fn lpop(&self, key: &str) -> CacheResult<Option<String>> {
        Ok(self.with_entry(key, Stored::List(VecDeque::new()), |stored| {
            if let Stored::List(l) = stored {
                l.pop_front()
            } else {
                None
            }
        }))
    }

    async fn rpop(&self, key: &str) -> CacheResult<Option<String>> {
        Ok(self.with_entry(key, Stored::List(VecDeque::new()), |stored| {
            if let Stored::List(l) = stored {
                l.pop_back()
            } else {
                None
            }
        }))
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> CacheResult<Vec<String>> {
        let list = match self.entry(key) {
            Some(Entry {
                value: Stored::List(l),
                ..
            }) => l,
            _ => return Ok(Vec::new()),
        };
        let len = list.len() as i64;
        if len == 0 || start >= len {
            return Ok(Vec::new());
        }
        let norm = |i: i64| -> i64 {
            if i < 0 {
                (len + i).max(0)
            } else {
                i.min(len - 1)
            }
        };
        let (start, stop) = (norm(start), norm(stop));
        if start > stop {
            return Ok(Vec::new());
        }
        Ok(list
            .iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .cloned()
            .collect())
    }

    async fn llen(&self, key: &str) -> CacheResult<u64> {
        Ok(match self.entry(key) {
            Some(Entry {
                value: Stored::List(l),
                ..
            }) => l.len() as u64,
            _ => 0,
        })
    }

    async fn sadd(&self, key: &str, members: &[String]) -> CacheResult<u64> {
        Ok(self.with_entry(key, Stored::Set(HashSet::new()), |stored| {
            let mut added = 0;
            if let Stored::Set(s) = stored {
                for member in members {
                    if s.insert(member.clone()) {
                        added += 1;
                    }
                }
            }
            added
        }))
    }

    async fn smembers(&self, key: &str) -> CacheResult<Vec<String>> {
        Ok(match self.entry(key) {
            Some(Entry {
                value: Stored::Set(s),
                ..
            }) => s.into_iter().collect(),
            _ => Vec::new(),
        })
    }

    async fn sismember(&self, key: &str, member: &str) -> CacheResult<bool> {
        Ok(match self.entry(key) {
            Some(Entry {
                value: Stored::Set(s),
                ..
            }) => s.contains(member),
            _ => false,
        })
    }

    async fn srem(&self, key: &str, members: &[String]) -> CacheResult<u64> {
        Ok(self.with_entry(key, Stored::Set(HashSet::new()), |stored| {
            let mut removed = 0;
            if let Stored::Set(s) = stored {
                for member in members {
                    if s.remove(member) {
                        removed += 1;
                    }
                }
            }
            removed
        }))
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> CacheResult<u64> {
        Ok(self.with_entry(key, Stored::ZSet(HashMap::new()), |stored| {
            if let Stored::ZSet(z) = stored {
                if z.insert(member.to_string(), score).is_none() {
                    return 1;
                }
            }
            0
        }))
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> CacheResult<Vec<String>> {
        let mut members: Vec<(String, f64)> = match self.entry(key) {
            Some(Entry {
                value: Stored::ZSet(z),
                ..
            }) => z.into_iter().collect(),
            _ => return Ok(Vec::new()),
        };
        members.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        let len = members.len() as i64;
        if len == 0 || start >= len {
            return Ok(Vec::new());
        }
        let norm = |i: i64| -> i64 {
            if i < 0 {
                (len + i).max(0)
            } else {
                i.min(len - 1)
            }
        };
        let (start, stop) = (norm(start), norm(stop));
        if start > stop {
            return Ok(Vec::new());
        }
        Ok(members
            .into_iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .map(|(m, _)| m)
            .collect())
    }

    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> CacheResult<Vec<String>> {
        let mut members: Vec<(String, f64)> = match self.entry(key) {
            Some(Entry {
                value: Stored::ZSet(z),
                ..
            }) => z.into_iter().filter(|(_, s)| *s >= min && *s <= max).collect(),
            _ => return Ok(Vec::new()),
        };
        members.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(members.into_iter().map(|(m, _)| m).collect())
    }

    async fn zrem(&self, key: &str, members: &[String]) -> CacheResult<u64> {
        Ok(self.with_entry(key, Stored::ZSet(HashMap::new()), |stored| {
            let mut removed = 0;
            if let Stored::ZSet(z) = stored {
                for member in members {
                    if z.remove(member).is_some() {
                        removed += 1;
                    }
                }
            }
            removed
        }))
    }

    async fn zscore(&self, key: &str, member: &str) -> CacheResult<Option<f64>> {
        Ok(match self.entry(key) {
            Some(Entry {
                value: Stored::ZSet(z),
                ..
            }) => z.get(member).copied(),
            _ => None,
        })
    }

    async fn set_bit(&self, key: &str, offset: u64, value: bool) -> CacheResult<bool> {
        Ok(self.with_entry(key, Stored::Bits(Vec::new()), |stored| {
            if let Stored::Bits(bits) = stored {
                let byte = (offset / 8) as usize;
                let mask = 0x80u8 >> (offset % 8);
                if bits.len() <= byte {
                    bits.resize(byte + 1, 0);
                }
                let old = bits[byte] & mask != 0;
                if value {
                    bits[byte] |= mask;
                } else {
                    bits[byte] &= !mask;
                }
                old
            } else {
                false
            }
        }))
    }

    async fn get_bit(&self, key: &str, offset: u64) -> CacheResult<bool> {
        Ok(match self.entry(key) {
            Some(Entry {
                value: Stored::Bits(bits),
                ..
            }) => {
                let byte = (offset / 8) as usize;
                let mask = 0x80u8 >> (offset % 8);
                bits.get(byte).map_or(false, |b| b & mask != 0)
            }
            _ => false,
        })
    }

    async fn set_bits(&self, key: &str, offsets: &[u64]) -> CacheResult<()> {
        for offset in offsets {
            self.set_bit(key, *offset, true).await?;
        }
        Ok(())
    }

    async fn get_bits(&self, key: &str, offsets: &[u64]) -> CacheResult<Vec<bool>> {
        let mut out = Vec::with_capacity(offsets.len());
        for offset in offsets {
            out.push(self.get_bit(key, *offset).await?);
        }
        Ok(out)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> CacheResult<bool> {
        // Entry API holds the shard lock, so check-then-delete is atomic
        if let Some(entry) = self.data.get(key) {
            let matches = !entry.is_expired()
                && matches!(&entry.value, Stored::Str(s) if s == expected);
            drop(entry);
            if matches {
                self.data.remove(key);
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }

    async fn flush(&self) -> CacheResult<()> {
        self.data.clear();
        Ok(())
    }

    async fn close(&self) -> CacheResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scalar_roundtrip_and_expiry() {
        let backend = MemoryBackend::new();
        backend.set("k", "v", None).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some("v".to_string()));

        backend
            .set("short", "v", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(backend.get("short").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_nx_respects_existing() {
        let backend = MemoryBackend::new();
        assert!(backend.set_nx("k", "a", Duration::from_secs(5)).await.unwrap());
        assert!(!backend.set_nx("k", "b", Duration::from_secs(5)).await.unwrap());
        assert_eq!(backend.get("k").await.unwrap(), Some("a".to_string()));
    }

    #[tokio::test]
    async fn test_compare_and_delete_matches_value() {
        let backend = MemoryBackend::new();
        backend.set("lock", "owner-1", None).await.unwrap();
        assert!(!backend.compare_and_delete("lock", "owner-2").await.unwrap());
        assert!(backend.exists("lock").await.unwrap());
        assert!(backend.compare_and_delete("lock", "owner-1").await.unwrap());
        assert!(!backend.exists("lock").await.unwrap());
    }

    #[tokio::test]
    async fn test_hash_ops() {
        let backend = MemoryBackend::new();
        backend.hset("h", "a", "1").await.unwrap();
        backend
            .hmset("h", &[("b".to_string(), "2".to_string())])
            .await
            .unwrap();
        assert_eq!(backend.hget("h", "a").await.unwrap(), Some("1".to_string()));
        assert!(backend.hexists("h", "b").await.unwrap());
        assert_eq!(backend.hgetall("h").await.unwrap().len(), 2);
        assert_eq!(backend.hdel("h", &["a".to_string()]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_ops() {
        let backend = MemoryBackend::new();
        backend
            .rpush("l", &["a".to_string(), "b".to_string(), "c".to_string()])
            .await
            .unwrap();
        assert_eq!(backend.llen("l").await.unwrap(), 3);
        assert_eq!(
            backend.lrange("l", 0, -1).await.unwrap(),
            vec!["a", "b", "c"]
        );
        assert_eq!(backend.lpop("l").await.unwrap(), Some("a".to_string()));
        assert_eq!(backend.rpop("l").await.unwrap(), Some("c".to_string()));
    }

    #[tokio::test]
    async fn test_zset_orders_by_score() {
        let backend = MemoryBackend::new();
        backend.zadd("z", 3.0, "c").await.unwrap();
        backend.zadd("z", 1.0, "a").await.unwrap();
        backend.zadd("z", 2.0, "b").await.unwrap();
        assert_eq!(backend.zrange("z", 0, -1).await.unwrap(), vec!["a", "b", "c"]);
        assert_eq!(
            backend.zrange_by_score("z", 1.5, 3.0).await.unwrap(),
            vec!["b", "c"]
        );
        assert_eq!(backend.zscore("z", "b").await.unwrap(), Some(2.0));
    }

    #[tokio::test]
    async fn test_bitmap_ops() {
        let backend = MemoryBackend::new();
        assert!(!backend.set_bit("bits", 100, true).await.unwrap());
        assert!(backend.get_bit("bits", 100).await.unwrap());
        assert!(!backend.get_bit("bits", 101).await.unwrap());

        backend.set_bits("bits", &[5, 9, 300]).await.unwrap();
        assert_eq!(
            backend.get_bits("bits", &[5, 6, 9, 300]).await.unwrap(),
            vec![true, false, true, true]
        );
    }
}
