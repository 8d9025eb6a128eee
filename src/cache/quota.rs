use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::keys::quota_key;
use crate::store::{KvStore, StoreError, with_timeout};

/// A fixed counting window aligned to multiples of its length since the
/// Unix epoch, so a one-day window always starts at midnight UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl FixedWindow {
    pub fn containing(now: DateTime<Utc>, length: Duration) -> Self {
        let len = length.as_secs().max(1) as i64;
        let start_ts = now.timestamp().div_euclid(len) * len;
        let start = DateTime::from_timestamp(start_ts, 0).unwrap_or(now);
        Self {
            start,
            end: start + chrono::Duration::seconds(len),
        }
    }

    fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.end - now)
            .to_std()
            .unwrap_or(Duration::ZERO)
            .max(Duration::from_secs(1))
    }
}

/// Usage of one quota window after a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaUsage {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

/// Per-subject, per-window counter over a [`KvStore`].
pub struct QuotaCounter {
    store: Arc<dyn KvStore>,
    timeout: Duration,
}

impl QuotaCounter {
    pub fn new(store: Arc<dyn KvStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Counts one unit of `action` against `limit` for the window holding `now`.
    ///
    /// The increment and the limit check are one atomic store call: the
    /// post-increment value decides the outcome. `limit` is an exclusive bound
    /// on the pre-increment count. A denied increment is rolled back so the
    /// stored count settles at `limit`. Both writes carry the time left in the
    /// window as expiry, so neither can leave a counter without one.
    pub async fn consume(
        &self,
        subject_id: &str,
        action: &str,
        limit: u64,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<QuotaUsage, StoreError> {
        let window = FixedWindow::containing(now, window);
        let key = quota_key(action, subject_id, window.start);

        let ttl = window.remaining(now);

        let count = with_timeout(self.timeout, self.store.increment(&key, ttl)).await?;
        let count = count.max(0) as u64;

        if count > limit {
            if let Err(e) = with_timeout(self.timeout, self.store.decrement(&key, ttl)).await {
                tracing::warn!(%key, error = %e, "failed to roll back denied quota increment");
            }
            tracing::info!(subject_id, action, limit, "quota exhausted");
            return Ok(QuotaUsage {
                allowed: false,
                limit,
                remaining: 0,
                reset_at: window.end,
            });
        }

        Ok(QuotaUsage {
            allowed: true,
            limit,
            remaining: limit - count,
            reset_at: window.end,
        })
    }

    /// Reads current usage without consuming. `allowed` reports whether the
    /// next `consume` would pass.
    pub async fn peek(
        &self,
        subject_id: &str,
        action: &str,
        limit: u64,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<QuotaUsage, StoreError> {
        let window = FixedWindow::containing(now, window);
        let key = quota_key(action, subject_id, window.start);

        let count = with_timeout(self.timeout, self.store.get(&key))
            .await?
            .and_then(|raw| raw.parse::<i64>().ok())
            .unwrap_or(0)
            .max(0) as u64;

        let remaining = limit.saturating_sub(count);
        Ok(QuotaUsage {
            allowed: remaining > 0,
            limit,
            remaining,
            reset_at: window.end,
        })
    }
}
