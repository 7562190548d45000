//! Distributed lock on the shared store
//!
//! The lock value is 16 random bytes, hex-encoded, unique per holder.
//! Acquisition is a conditional set with expiry; release is an atomic
//! compare-and-delete so only the holder can free it. An optional keeper
//! task extends the TTL while the guard is alive.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::RngCore;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::adapter::KvAdapter;
use crate::config::LockConfig;
use crate::error::{CacheError, CacheResult};

/// Lock service; one per protection manager
pub struct DistributedLock {
    adapter: Arc<KvAdapter>,
    config: LockConfig,
}

impl DistributedLock {
    pub fn new(adapter: Arc<KvAdapter>, config: LockConfig) -> Self {
        Self { adapter, config }
    }

    fn new_value() -> String {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// Single acquisition attempt
    pub async fn try_acquire(&self, key: &str) -> CacheResult<Option<LockGuard>> {
        let value = Self::new_value();
        let ttl = Duration::from_millis(self.config.lock_timeout_ms);
        if self.adapter.set_nx(key, &value, ttl).await? {
            Ok(Some(self.guard(key, value)))
        } else {
            Ok(None)
        }
    }

    /// Acquire, retrying until `acquire_timeout` elapses
    ///
    /// With a zero timeout and contention this fails immediately with
    /// `LockContended`.
    pub async fn acquire(&self, key: &str) -> CacheResult<LockGuard> {
        let deadline = Instant::now() + Duration::from_millis(self.config.acquire_timeout_ms);
        let mut attempts = 0u32;
        loop {
            if let Some(guard) = self.try_acquire(key).await? {
                debug!(key, "lock acquired");
                return Ok(guard);
            }
            attempts += 1;
            if Instant::now() >= deadline || attempts >= self.config.max_retries {
                return Err(CacheError::LockContended(key.to_string()));
            }
            sleep(Duration::from_millis(self.config.retry_interval_ms)).await;
        }
    }

    fn guard(&self, key: &str, value: String) -> LockGuard {
        let keeper = if self.config.auto_renew {
            let adapter = Arc::clone(&self.adapter);
            let key = key.to_string();
            let ttl = Duration::from_millis(self.config.lock_timeout_ms);
            let renew_every = Duration::from_millis(self.config.renew_interval_ms);
            Some(tokio::spawn(async move {
                loop {
                    sleep(renew_every).await;
                    match adapter.expire(&key, ttl).await {
                        Ok(true) => {}
                        Ok(false) => {
                            warn!(key, "lock expired under keeper");
                            break;
                        }
                        Err(e) => {
                            warn!(key, error = %e, "lock renewal failed");
                        }
                    }
                }
            }))
        } else {
            None
        };
        LockGuard {
            adapter: Arc::clone(&self.adapter),
            key: key.to_string(),
            value,
            keeper,
            released: false,
        }
    }
}

/// Held lock; compare-and-deletes its entry on release or drop
pub struct LockGuard {
    adapter: Arc<KvAdapter>,
    key: String,
    value: String,
    keeper: Option<tokio::task::JoinHandle<()>>,
    released: bool,
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("value", &self.value)
            .field("released", &self.released)
            .finish()
    }
}

impl LockGuard {
    /// Lock key held by this guard
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Holder token
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Release the lock
    ///
    /// Fails with `LockLost` when the entry no longer holds this guard's
    /// value (the TTL lapsed and another holder took over).
    pub async fn release(mut self) -> CacheResult<()> {
        self.released = true;
        if let Some(keeper) = self.keeper.take() {
            keeper.abort();
        }
        let deleted = self.adapter.compare_and_delete(&self.key, &self.value).await?;
        if deleted {
            Ok(())
        } else {
            Err(CacheError::LockLost(self.key.clone()))
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Some(keeper) = self.keeper.take() {
            keeper.abort();
        }
        // Best-effort release on unwind or early return
        let adapter = Arc::clone(&self.adapter);
        let key = std::mem::take(&mut self.key);
        let value = std::mem::take(&mut self.value);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = adapter.compare_and_delete(&key, &value).await;
            });
        }
    }
}
