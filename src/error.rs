use axum::Json;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("authentication required")]
    Unauthorized,
    #[error("you do not have access to this resource")]
    Forbidden,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("this link has expired")]
    Expired,
    #[error("this link has reached its maximum number of uses")]
    ExhaustedUses,
    #[error("rate limit exceeded, retry after {}", format_reset(reset_at))]
    RateLimited {
        limit: u64,
        reset_at: DateTime<Utc>,
    },
    #[error("service temporarily unavailable: {0}")]
    StoreUnavailable(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("internal server error")]
    Internal(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::StoreUnavailable(err.to_string())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    status_code: u16,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reset_at: Option<String>,
}

pub(crate) fn format_reset(reset_at: &DateTime<Utc>) -> String {
    reset_at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Writes the `X-RateLimit-*` triple shared by allowed and denied responses.
pub(crate) fn insert_rate_limit_headers(
    headers: &mut HeaderMap,
    limit: u64,
    remaining: u64,
    reset_at: &DateTime<Utc>,
) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(reset_at.timestamp()));
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Expired | AppError::ExhaustedUses | AppError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();

        let (limit, reset_at) = match &self {
            AppError::RateLimited { limit, reset_at } => (Some(*limit), Some(*reset_at)),
            _ => (None, None),
        };

        if let AppError::Internal(detail) = &self {
            tracing::error!(%detail, "internal error");
        }

        let body = Json(ErrorResponse {
            status_code: status.as_u16(),
            message,
            limit,
            reset_at: reset_at.as_ref().map(format_reset),
        });

        let mut response = (status, body).into_response();
        if let (Some(limit), Some(reset_at)) = (limit, reset_at) {
            let headers = response.headers_mut();
            insert_rate_limit_headers(headers, limit, 0, &reset_at);
            let retry_after = (reset_at - Utc::now()).num_seconds().max(1);
            headers.insert("retry-after", HeaderValue::from(retry_after));
        }
        response
    }
}
