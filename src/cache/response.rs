use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::store::{KvStore, with_timeout};

/// Caching declared by the code that wraps a read operation.
pub struct CachePolicy<R: ?Sized> {
    pub ttl_seconds: u64,
    pub key_fn: fn(&R) -> String,
}

impl<R: ?Sized> CachePolicy<R> {
    pub fn new(ttl_seconds: u64, key_fn: fn(&R) -> String) -> Self {
        Self {
            ttl_seconds,
            key_fn,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

#[derive(Serialize, Deserialize)]
struct CachedPayload<T> {
    expires_at_ms: i64,
    payload: T,
}

/// Read-through cache for idempotent operations.
///
/// Store failures never fail the wrapped operation: lookups fall through to
/// the computation and populate errors are logged and dropped.
pub struct ResponseCache {
    store: Arc<dyn KvStore>,
    timeout: Duration,
}

pub fn is_cacheable(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD
}

impl ResponseCache {
    pub fn new(store: Arc<dyn KvStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Serves `key` from the cache or runs `compute` and stores its success.
    pub async fn wrap<T, E, F, Fut>(&self, key: &str, ttl: Duration, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.lookup::<T>(key).await {
            tracing::debug!(%key, "response cache hit");
            return Ok(hit);
        }
        tracing::debug!(%key, "response cache miss");

        let value = compute().await?;
        self.populate(key, ttl, &value).await;
        Ok(value)
    }

    /// Like [`wrap`](Self::wrap), keyed and timed by `policy`. Methods other
    /// than GET and HEAD always run `compute` and never touch the cache.
    pub async fn wrap_request<R, T, E, F, Fut>(
        &self,
        method: &Method,
        policy: &CachePolicy<R>,
        request: &R,
        compute: F,
    ) -> Result<T, E>
    where
        R: ?Sized,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !is_cacheable(method) {
            return compute().await;
        }
        let key = (policy.key_fn)(request);
        self.wrap(&key, policy.ttl(), compute).await
    }

    /// Drops a cached entry after a mutation that changes it.
    pub async fn invalidate(&self, key: &str) {
        if let Err(e) = with_timeout(self.timeout, self.store.delete(key)).await {
            tracing::warn!(%key, error = %e, "response cache invalidation failed");
        }
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match with_timeout(self.timeout, self.store.get(key)).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(%key, error = %e, "response cache read failed");
                return None;
            }
        };

        match serde_json::from_str::<CachedPayload<T>>(&raw) {
            Ok(entry) if entry.expires_at_ms > Utc::now().timestamp_millis() => Some(entry.payload),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(%key, error = %e, "discarding undecodable cache entry");
                None
            }
        }
    }

    async fn populate<T: Serialize>(&self, key: &str, ttl: Duration, value: &T) {
        if ttl.is_zero() {
            return;
        }
        let entry = CachedPayload {
            expires_at_ms: Utc::now().timestamp_millis() + ttl.as_millis() as i64,
            payload: value,
        };
        let raw = match serde_json::to_string(&entry) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(%key, error = %e, "failed to serialize response for cache");
                return;
            }
        };
        if let Err(e) = with_timeout(self.timeout, self.store.set(key, &raw, ttl)).await {
            tracing::warn!(%key, error = %e, "response cache write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::keys::{CacheScope, response_key};
    use crate::store::MemoryStore;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cache(store: Arc<MemoryStore>) -> ResponseCache {
        ResponseCache::new(store, Duration::from_millis(250))
    }

    async fn counted(calls: &AtomicUsize, value: &str) -> Result<String, Infallible> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(value.to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn second_call_within_ttl_is_served_from_cache() {
        let cache = cache(Arc::new(MemoryStore::new()));
        let calls = AtomicUsize::new(0);
        let ttl = Duration::from_secs(30);

        let first = cache.wrap("k", ttl, || counted(&calls, "fresh")).await.unwrap();
        let second = cache.wrap("k", ttl, || counted(&calls, "other")).await.unwrap();

        assert_eq!(first, "fresh");
        assert_eq!(second, "fresh");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn entry_is_not_served_after_ttl() {
        let cache = cache(Arc::new(MemoryStore::new()));
        let calls = AtomicUsize::new(0);
        let ttl = Duration::from_secs(30);

        cache.wrap("k", ttl, || counted(&calls, "v1")).await.unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;
        let value = cache.wrap("k", ttl, || counted(&calls, "v2")).await.unwrap();

        assert_eq!(value, "v2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_computation_is_not_cached() {
        let cache = cache(Arc::new(MemoryStore::new()));
        let ttl = Duration::from_secs(30);

        let err: Result<String, &str> = cache.wrap("k", ttl, || async { Err("boom") }).await;
        assert!(err.is_err());
        let ok: Result<String, &str> = cache.wrap("k", ttl, || async { Ok("v".into()) }).await;
        assert_eq!(ok.unwrap(), "v");
    }

    #[tokio::test]
    async fn unavailable_store_falls_through_to_compute() {
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true);
        let cache = cache(store);
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let value = cache
                .wrap("k", Duration::from_secs(30), || counted(&calls, "live"))
                .await
                .unwrap();
            assert_eq!(value, "live");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_store_times_out_and_falls_through() {
        let store = Arc::new(MemoryStore::new());
        store.set_latency(Some(Duration::from_secs(5)));
        let cache = cache(store);
        let calls = AtomicUsize::new(0);

        let value = cache
            .wrap("k", Duration::from_secs(30), || counted(&calls, "live"))
            .await
            .unwrap();
        assert_eq!(value, "live");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn mutations_bypass_the_cache() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache(store.clone());
        let calls = AtomicUsize::new(0);
        let policy: CachePolicy<str> = CachePolicy::new(60, |id| {
            response_key("media.details", CacheScope::Caller("u1"), &[("id", id)])
        });

        cache
            .wrap_request(&Method::POST, &policy, "7", || counted(&calls, "a"))
            .await
            .unwrap();
        cache
            .wrap_request(&Method::POST, &policy, "7", || counted(&calls, "b"))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.get(&(policy.key_fn)("7")).await.unwrap(), None);

        cache
            .wrap_request(&Method::GET, &policy, "7", || counted(&calls, "c"))
            .await
            .unwrap();
        let hit = cache
            .wrap_request(&Method::GET, &policy, "7", || counted(&calls, "d"))
            .await
            .unwrap();
        assert_eq!(hit, "c");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn invalidate_forces_recompute() {
        let cache = cache(Arc::new(MemoryStore::new()));
        let calls = AtomicUsize::new(0);
        let ttl = Duration::from_secs(30);

        cache.wrap("k", ttl, || counted(&calls, "v1")).await.unwrap();
        cache.invalidate("k").await;
        let value = cache.wrap("k", ttl, || counted(&calls, "v2")).await.unwrap();
        assert_eq!(value, "v2");
    }
}
