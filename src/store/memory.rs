use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{KvStore, StoreError};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// Process-local store with TTL support.
///
/// Each operation runs under one short lock, which gives the same
/// single-command atomicity Redis provides. Expiry follows `tokio::time`,
/// so paused-clock tests can advance past a TTL.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    unavailable: AtomicBool,
    latency: Mutex<Option<Duration>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail as if the store were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delays every subsequent call, used to exercise caller timeouts.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().unwrap_or_else(|e| e.into_inner()) = latency;
    }

    /// Remaining time to live, `None` when the key is absent or has no expiry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.lock()
            .get(key)
            .filter(|entry| entry.is_live(now))
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn ready(&self) -> Result<(), StoreError> {
        let latency = *self.latency.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Redis(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "store unavailable",
            ))));
        }
        Ok(())
    }

    fn add(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64, StoreError> {
        let now = Instant::now();
        let mut entries = self.lock();
        let (current, expires_at) = match entries.get(key) {
            Some(entry) if entry.is_live(now) => {
                let current = entry.value.parse::<i64>().map_err(|_| {
                    StoreError::Redis(redis::RedisError::from((
                        redis::ErrorKind::TypeError,
                        "value is not an integer",
                    )))
                })?;
                (current, entry.expires_at)
            }
            _ => (0, None),
        };
        let next = current + delta;
        entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at: expires_at.or(Some(now + ttl)),
            },
        );
        Ok(next)
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        self.ready().await?;
        self.add(key, 1, ttl)
    }

    async fn decrement(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        self.ready().await?;
        self.add(key, -1, ttl)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.ready().await?;
        let now = Instant::now();
        Ok(self
            .lock()
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.ready().await?;
        self.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        self.ready().await?;
        let now = Instant::now();
        let mut entries = self.lock();
        if let Some(entry) = entries.get_mut(key).filter(|entry| entry.is_live(now)) {
            entry.expires_at = Some(now + ttl);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.ready().await?;
        self.lock().remove(key);
        Ok(())
    }
}
