//! Redis implementation of the store protocol

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use crate::adapter::backend::KvBackend;
use crate::config::AdapterConfig;
use crate::error::CacheResult;

/// Lua script for lock release: delete the key only while it still holds
/// the caller's value
const COMPARE_AND_DELETE: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

/// Redis-backed implementation of [`KvBackend`]
///
/// Wraps a `ConnectionManager`, which multiplexes a reconnecting
/// connection; cloning it is cheap and every call clones its own handle.
pub struct RedisBackend {
    conn: ConnectionManager,
}

impl RedisBackend {
    /// Connect using the adapter configuration
    pub async fn connect(config: &AdapterConfig) -> CacheResult<Self> {
        let client = redis::Client::open(config.url().as_str())?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    /// Wrap an already-established connection manager
    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

#[async_trait]
impl KvBackend for RedisBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut self.conn())
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl.as_millis() as u64);
        }
        let _: () = cmd.query_async(&mut self.conn()).await?;
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut self.conn())
            .await?;
        Ok(reply.is_some())
    }

    async fn del(&self, keys: &[String]) -> CacheResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let removed: u64 = redis::cmd("DEL")
            .arg(keys)
            .query_async(&mut self.conn())
            .await?;
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let exists: bool = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut self.conn())
            .await?;
        Ok(exists)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let set: bool = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl.as_millis() as u64)
            .query_async(&mut self.conn())
            .await?;
        Ok(set)
    }

    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        let millis: i64 = redis::cmd("PTTL")
            .arg(key)
            .query_async(&mut self.conn())
            .await?;
        // -2 = no key, -1 = no expiry
        if millis < 0 {
            Ok(None)
        } else {
            Ok(Some(Duration::from_millis(millis as u64)))
        }
    }

    async fn mget(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut self.conn())
            .await?;
        Ok(values)
    }

    async fn mset(&self, pairs: &[(String, String)]) -> CacheResult<()> {
        if pairs.is_empty() {
            return Ok(());
        }
        let mut cmd = redis::cmd("MSET");
        for (key, value) in pairs {
            cmd.arg(key).arg(value);
        }
        let _: () = cmd.query_async(&mut self.conn()).await?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> CacheResult<Option<String>> {
        let value: Option<String> = redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async(&mut self.conn())
            .await?;
        Ok(value)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> CacheResult<()> {
        let _: () = redis::cmd("HSET")
            .arg(key)
            .arg(field)
            .arg(value)
            .query_async(&mut self.conn())
            .await?;
        Ok(())
    }

    async fn hmget(&self, key: &str, fields: &[String]) -> CacheResult<Vec<Option<String>>> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        let values: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(key)
            .arg(fields)
            .query_async(&mut self.conn())
            .await?;
        Ok(values)
    }

    async fn hmset(&self, key: &str, pairs: &[(String, String)]) -> CacheResult<()> {
        if pairs.is_empty() {
            return Ok(());
        }
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in pairs {
            cmd.arg(field).arg(value);
        }
        let _: () = cmd.query_async(&mut self.conn()).await?;
        Ok(())
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> CacheResult<u64> {
        if fields.is_empty() {
            return Ok(0);
        }
        let removed: u64 = redis::cmd("HDEL")
            .arg(key)
            .arg(fields)
            .query_async(&mut self.conn())
            .await?;
        Ok(removed)
    }

    async fn hexists(&self, key: &str, field: &str) -> CacheResult<bool> {
        let exists: bool = redis::cmd("HEXISTS")
            .arg(key)
            .arg(field)
            .query_async(&mut self.conn())
            .await?;
        Ok(exists)
    }

    async fn hgetall(&self, key: &str) -> CacheResult<HashMap<String, String>> {
        let map: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut self.conn())
            .await?;
        Ok(map)
    }

    async fn lpush(&self, key: &str, values: &[String]) -> CacheResult<u64> {
        let len: u64 = redis::cmd("LPUSH")
            .arg(key)
            .arg(values)
            .query_async(&mut self.conn())
            .await?;
        Ok(len)
    }

    async fn rpush(&self, key: &str, values: &[String]) -> CacheResult<u64> {
        let len: u64 = redis::cmd("RPUSH")
            .arg(key)
            .arg(values)
            .query_async(&mut self.conn())
            .await?;
        Ok(len)
    }

    async fn lpop(&self, key: &str) -> CacheResult<Option<String>> {
        let value: Option<String> = redis::cmd("LPOP")
            .arg(key)
            .query_async(&mut self.conn())
            .await?;
        Ok(value)
    }

    async fn rpop(&self, key: &str) -> CacheResult<Option<String>> {
        let value: Option<String> = redis::cmd("RPOP")
            .arg(key)
            .query_async(&mut self.conn())
            .await?;
        Ok(value)
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> CacheResult<Vec<String>> {
        let values: Vec<String> = redis::cmd("LRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut self.conn())
            .await?;
        Ok(values)
    }

    async fn llen(&self, key: &str) -> CacheResult<u64> {
        let len: u64 = redis::cmd("LLEN")
            .arg(key)
            .query_async(&mut self.conn())
            .await?;
        Ok(len)
    }

    async fn sadd(&self, key: &str, members: &[String]) -> CacheResult<u64> {
        let added: u64 = redis::cmd("SADD")
            .arg(key)
            .arg(members)
            .query_async(&mut self.conn())
            .await?;
        Ok(added)
    }

    async fn smembers(&self, key: &str) -> CacheResult<Vec<String>> {
        let members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(key)
            .query_async(&mut self.conn())
            .await?;
        Ok(members)
    }

    async fn sismember(&self, key: &str, member: &str) -> CacheResult<bool> {
        let is_member: bool = redis::cmd("SISMEMBER")
            .arg(key)
            .arg(member)
            .query_async(&mut self.conn())
            .await?;
        Ok(is_member)
    }

    async fn srem(&self, key: &str, members: &[String]) -> CacheResult<u64> {
        let removed: u64 = redis::cmd("SREM")
            .arg(key)
            .arg(members)
            .query_async(&mut self.conn())
            .await?;
        Ok(removed)
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> CacheResult<u64> {
        let added: u64 = redis::cmd("ZADD")
            .arg(key)
            .arg(score)
            .arg(member)
            .query_async(&mut self.conn())
            .await?;
        Ok(added)
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> CacheResult<Vec<String>> {
        let members: Vec<String> = redis::cmd("ZRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut self.conn())
            .await?;
        Ok(members)
    }

    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> CacheResult<Vec<String>> {
        let members: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(key)
            .arg(min)
            .arg(max)
            .query_async(&mut self.conn())
            .await?;
        Ok(members)
    }

    async fn zrem(&self, key: &str, members: &[String]) -> CacheResult<u64> {
        let removed: u64 = redis::cmd("ZREM")
            .arg(key)
            .arg(members)
            .query_async(&mut self.conn())
            .await?;
        Ok(removed)
    }

    async fn zscore(&self, key: &str, member: &str) -> CacheResult<Option<f64>> {
        let score: Option<f64> = redis::cmd("ZSCORE")
            .arg(key)
            .arg(member)
            .query_async(&mut self.conn())
            .await?;
        Ok(score)
    }

    async fn set_bit(&self, key: &str, offset: u64, value: bool) -> CacheResult<bool> {
        let old: i32 = redis::cmd("SETBIT")
            .arg(key)
            .arg(offset)
            .arg(i32::from(value))
            .query_async(&mut self.conn())
            .await?;
        Ok(old != 0)
    }

    async fn get_bit(&self, key: &str, offset: u64) -> CacheResult<bool> {
        let bit: i32 = redis::cmd("GETBIT")
            .arg(key)
            .arg(offset)
            .query_async(&mut self.conn())
            .await?;
        Ok(bit != 0)
    }

    async fn set_bits(&self, key: &str, offsets: &[u64]) -> CacheResult<()> {
        if offsets.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for offset in offsets {
            pipe.cmd("SETBIT").arg(key).arg(*offset).arg(1).ignore();
        }
        let _: () = pipe.query_async(&mut self.conn()).await?;
        Ok(())
    }

    async fn get_bits(&self, key: &str, offsets: &[u64]) -> CacheResult<Vec<bool>> {
        if offsets.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        for offset in offsets {
            pipe.cmd("GETBIT").arg(key).arg(*offset);
        }
        let bits: Vec<i32> = pipe.query_async(&mut self.conn()).await?;
        Ok(bits.into_iter().map(|b| b != 0).collect())
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> CacheResult<bool> {
        let script = redis::Script::new(COMPARE_AND_DELETE);
        let deleted: i32 = script
            .key(key)
            .arg(expected)
            .invoke_async(&mut self.conn())
            .await?;
        Ok(deleted != 0)
    }

    async fn ping(&self) -> CacheResult<()> {
        let _: String = redis::cmd("PING").query_async(&mut self.conn()).await?;
        Ok(())
    }

    async fn flush(&self) -> CacheResult<()> {
        let _: () = redis::cmd("FLUSHDB").query_async(&mut self.conn()).await?;
        Ok(())
    }

    async fn close(&self) -> CacheResult<()> {
        // ConnectionManager tears down when the last clone drops
        Ok(())
    }
}
