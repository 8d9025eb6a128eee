use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::auth::CallerIdentity;
use crate::{
    cache::{FixedWindow, QuotaCounter},
    config::QuotaConfig,
    error::{AppError, insert_rate_limit_headers},
    store::KvStore,
};

/// Write-heavy operations that draw from a daily quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionClass {
    Upload,
    PreviewLink,
}

impl ActionClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionClass::Upload => "upload",
            ActionClass::PreviewLink => "preview_link",
        }
    }
}

impl fmt::Display for ActionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload" => Ok(ActionClass::Upload),
            "preview_link" => Ok(ActionClass::PreviewLink),
            other => Err(format!("unknown action class: {other}")),
        }
    }
}

/// What to do with a request when the counter store cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailMode {
    /// Let the request through uncounted.
    Open,
    /// Refuse the request with 503.
    Closed,
}

impl FromStr for FailMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "open" => Ok(FailMode::Open),
            "closed" => Ok(FailMode::Closed),
            other => Err(format!("unknown fail mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
    /// The counter store was unreachable and the fail mode decided the outcome.
    #[serde(skip)]
    pub degraded: bool,
}

pub struct RateLimiter {
    counter: QuotaCounter,
    config: QuotaConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KvStore>, config: QuotaConfig, timeout: Duration) -> Self {
        Self {
            counter: QuotaCounter::new(store, timeout),
            config,
        }
    }

    pub fn limit_for(&self, identity: &CallerIdentity, action: ActionClass) -> u64 {
        self.config.limits(action).for_tier(identity.tier)
    }

    pub async fn check_and_consume(
        &self,
        identity: &CallerIdentity,
        action: ActionClass,
    ) -> RateLimitDecision {
        self.check_and_consume_at(identity, action, Utc::now()).await
    }

    pub async fn check_and_consume_at(
        &self,
        identity: &CallerIdentity,
        action: ActionClass,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let limit = self.limit_for(identity, action);
        let window = self.config.window();

        match self
            .counter
            .consume(&identity.subject_id, action.as_str(), limit, window, now)
            .await
        {
            Ok(usage) => RateLimitDecision {
                allowed: usage.allowed,
                limit: usage.limit,
                remaining: usage.remaining,
                reset_at: usage.reset_at,
                degraded: false,
            },
            Err(e) => {
                let allowed = self.config.fail_mode == FailMode::Open;
                tracing::warn!(
                    subject_id = %identity.subject_id,
                    %action,
                    error = %e,
                    allowed,
                    "quota store unavailable, applying fail mode"
                );
                RateLimitDecision {
                    allowed,
                    limit,
                    remaining: if allowed { limit } else { 0 },
                    reset_at: FixedWindow::containing(now, window).end,
                    degraded: true,
                }
            }
        }
    }

    /// Current usage without consuming; store errors are surfaced.
    pub async fn usage(
        &self,
        identity: &CallerIdentity,
        action: ActionClass,
    ) -> Result<RateLimitDecision, AppError> {
        let limit = self.limit_for(identity, action);
        let usage = self
            .counter
            .peek(
                &identity.subject_id,
                action.as_str(),
                limit,
                self.config.window(),
                Utc::now(),
            )
            .await?;
        Ok(RateLimitDecision {
            allowed: usage.allowed,
            limit: usage.limit,
            remaining: usage.remaining,
            reset_at: usage.reset_at,
            degraded: false,
        })
    }
}

/// Route-level state binding a limiter to the action it guards.
#[derive(Clone)]
pub struct RateLimitGuard {
    limiter: Arc<RateLimiter>,
    action: ActionClass,
}

impl RateLimitGuard {
    pub fn new(limiter: Arc<RateLimiter>, action: ActionClass) -> Self {
        Self { limiter, action }
    }
}

pub async fn rate_limit(
    State(guard): State<RateLimitGuard>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(identity) = req.extensions().get::<CallerIdentity>().cloned() else {
        return AppError::Unauthorized.into_response();
    };

    let decision = guard.limiter.check_and_consume(&identity, guard.action).await;

    if !decision.allowed {
        if decision.degraded {
            let mut response =
                AppError::StoreUnavailable("quota service unreachable".into()).into_response();
            insert_rate_limit_headers(
                response.headers_mut(),
                decision.limit,
                0,
                &decision.reset_at,
            );
            return response;
        }
        return AppError::RateLimited {
            limit: decision.limit,
            reset_at: decision.reset_at,
        }
        .into_response();
    }

    // Uncounted fail-open requests report the full limit as remaining.
    let mut response = next.run(req).await;
    insert_rate_limit_headers(
        response.headers_mut(),
        decision.limit,
        decision.remaining,
        &decision.reset_at,
    );
    response
}
