//! Key-value store used for quota counters and cached responses.
//!
//! Every operation is a single atomic round trip against the backing store.
//! Components never hold a store locked across calls; correctness under
//! concurrency comes from `increment` returning the post-increment value.
//! Counter updates carry their expiry so a counter never outlives its window.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use self::redis::RedisStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Atomically adds one and returns the new value. Absent keys start at
    /// zero. If the key has no expiry afterwards it gets `ttl`, in the same
    /// atomic step.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<i64, StoreError>;

    /// Atomically subtracts one and returns the new value, applying `ttl`
    /// the same way as [`KvStore::increment`].
    async fn decrement(&self, key: &str, ttl: Duration) -> Result<i64, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Bounds a store call; an elapsed deadline becomes [`StoreError::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}
