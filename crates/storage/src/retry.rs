// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Retry, write-throttle, and read-cache wrapper over a [`KvStore`].
//!
//! - Failed operations retry with exponential backoff plus a
//!   deterministic per-key jitter; exhaustion surfaces as
//!   [`StoreError::RetriesExhausted`].
//! - Writes to one key are throttled to a minimum interval. A write
//!   landing inside the window is coalesced: the latest value wins and is
//!   flushed when the window closes.
//! - Reads optionally go through a write-through cache.

use crate::store::{KvStore, StoreError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Retry tuning.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub retries: u32,
    pub base_delay: Duration,
    pub jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { retries: 3, base_delay: Duration::from_millis(100), jitter: Duration::from_millis(50) }
    }
}

struct ThrottleSlot {
    last_write: Instant,
    pending: Option<String>,
    flushing: bool,
}

struct RetryInner {
    store: Arc<dyn KvStore>,
    retry: RetryConfig,
    enable_retry: bool,
    write_interval: Option<Duration>,
    cache: Option<Mutex<HashMap<String, String>>>,
    throttle: Mutex<HashMap<String, ThrottleSlot>>,
}

/// Cheaply cloneable wrapped store.
#[derive(Clone)]
pub struct RetryStore {
    inner: Arc<RetryInner>,
}

impl RetryStore {
    pub fn new(store: Arc<dyn KvStore>, retry: RetryConfig) -> Self {
        Self {
            inner: Arc::new(RetryInner {
                store,
                retry,
                enable_retry: true,
                write_interval: None,
                cache: None,
                throttle: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Disable retries (single attempt per operation).
    pub fn without_retry(mut self) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.enable_retry = false;
        }
        self
    }

    /// Throttle writes per key to at most one per `interval`.
    pub fn throttle_writes(mut self, interval: Duration) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.write_interval = Some(interval);
        }
        self
    }

    /// Serve repeat reads from a write-through cache.
    pub fn with_read_cache(mut self) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.cache = Some(Mutex::new(HashMap::new()));
        }
        self
    }

    fn cache_put(&self, key: &str, value: &str) {
        if let Some(cache) = &self.inner.cache {
            cache.lock().insert(key.to_string(), value.to_string());
        }
    }

    fn cache_get(&self, key: &str) -> Option<String> {
        self.inner.cache.as_ref().and_then(|cache| cache.lock().get(key).cloned())
    }

    fn cache_remove(&self, key: &str) {
        if let Some(cache) = &self.inner.cache {
            cache.lock().remove(key);
        }
    }

    fn backoff(&self, key: &str, attempt: u32) -> Duration {
        let exp = self.inner.retry.base_delay.saturating_mul(1 << attempt.min(16));
        exp + jitter_for(key, attempt, self.inner.retry.jitter)
    }

    async fn put_with_retry(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut attempt = 0_u32;
        loop {
            match self.inner.store.put(key, value.clone()).await {
                Ok(()) => {
                    self.cache_put(key, &value);
                    return Ok(());
                }
                Err(err) if self.inner.enable_retry && attempt < self.inner.retry.retries => {
                    tracing::warn!(key, attempt, error = %err, "store put failed, retrying");
                    tokio::time::sleep(self.backoff(key, attempt)).await;
                    attempt += 1;
                }
                Err(err) => {
                    return Err(StoreError::RetriesExhausted {
                        attempts: attempt + 1,
                        last: err.to_string(),
                    })
                }
            }
        }
    }

    async fn get_with_retry(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut attempt = 0_u32;
        loop {
            match self.inner.store.get(key).await {
                Ok(value) => return Ok(value),
                Err(err) if self.inner.enable_retry && attempt < self.inner.retry.retries => {
                    tracing::warn!(key, attempt, error = %err, "store get failed, retrying");
                    tokio::time::sleep(self.backoff(key, attempt)).await;
                    attempt += 1;
                }
                Err(err) => {
                    return Err(StoreError::RetriesExhausted {
                        attempts: attempt + 1,
                        last: err.to_string(),
                    })
                }
            }
        }
    }

    /// Flush the coalesced value for `key` once its window closes.
    async fn flush_pending(&self, key: &str) {
        loop {
            let value = {
                let mut throttle = self.inner.throttle.lock();
                let Some(slot) = throttle.get_mut(key) else { return };
                match slot.pending.take() {
                    Some(value) => {
                        slot.last_write = Instant::now();
                        value
                    }
                    None => {
                        slot.flushing = false;
                        return;
                    }
                }
            };
            if let Err(err) = self.put_with_retry(key, value).await {
                tracing::error!(key, error = %err, "throttled flush failed");
            }
            // A newer value may have landed while flushing; wait out the
            // next window and write it too.
            let interval = match self.inner.write_interval {
                Some(interval) => interval,
                None => return,
            };
            let has_pending = {
                let throttle = self.inner.throttle.lock();
                throttle.get(key).is_some_and(|slot| slot.pending.is_some())
            };
            if !has_pending {
                let mut throttle = self.inner.throttle.lock();
                if let Some(slot) = throttle.get_mut(key) {
                    slot.flushing = false;
                }
                return;
            }
            tokio::time::sleep(interval).await;
        }
    }
}

#[async_trait]
impl KvStore for RetryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        if let Some(value) = self.cache_get(key) {
            return Ok(Some(value));
        }
        let value = self.get_with_retry(key).await?;
        if let Some(value) = &value {
            self.cache_put(key, value);
        }
        Ok(value)
    }

    async fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        if let Some(interval) = self.inner.write_interval {
            let now = Instant::now();
            let deferred = {
                let mut throttle = self.inner.throttle.lock();
                match throttle.get_mut(key) {
                    Some(slot) if now < slot.last_write + interval => {
                        // Inside the window: coalesce, latest value wins.
                        slot.pending = Some(value.clone());
                        let spawn_flush = !slot.flushing;
                        slot.flushing = true;
                        let delay = slot.last_write + interval - now;
                        Some((spawn_flush, delay))
                    }
                    _ => {
                        throttle.insert(
                            key.to_string(),
                            ThrottleSlot { last_write: now, pending: None, flushing: false },
                        );
                        None
                    }
                }
            };
            if let Some((spawn_flush, delay)) = deferred {
                self.cache_put(key, &value);
                if spawn_flush {
                    let this = self.clone();
                    let key = key.to_string();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        this.flush_pending(&key).await;
                    });
                }
                return Ok(());
            }
        }
        self.put_with_retry(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.cache_remove(key);
        self.inner.throttle.lock().remove(key);
        let mut attempt = 0_u32;
        loop {
            match self.inner.store.remove(key).await {
                Ok(()) => return Ok(()),
                Err(err) if self.inner.enable_retry && attempt < self.inner.retry.retries => {
                    tracing::warn!(key, attempt, error = %err, "store remove failed, retrying");
                    tokio::time::sleep(self.backoff(key, attempt)).await;
                    attempt += 1;
                }
                Err(err) => {
                    return Err(StoreError::RetriesExhausted {
                        attempts: attempt + 1,
                        last: err.to_string(),
                    })
                }
            }
        }
    }
}

/// Deterministic jitter: no RNG, but attempts and keys spread apart.
fn jitter_for(key: &str, attempt: u32, jitter: Duration) -> Duration {
    let max_ms = jitter.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut hasher);
    attempt.hash(&mut hasher);
    Duration::from_millis(hasher.finish() % max_ms)
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
