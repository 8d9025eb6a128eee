use std::time::Duration;

use axum::{
    Extension,
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use uuid::Uuid;

use super::model::{CreatePreviewRequest, PreviewAccess};
use crate::{
    AppState,
    cache::{CacheScope, keys::response_key},
    database::PreviewLink,
    error::AppError,
    middleware::CallerIdentity,
};

fn listing_key(subject_id: &str) -> String {
    response_key("previews.list", CacheScope::Caller(subject_id), &[])
}

#[axum::debug_handler]
pub async fn create_preview(
    State(state): State<AppState>,
    Extension(identity): Extension<CallerIdentity>,
    Json(req): Json<CreatePreviewRequest>,
) -> Result<impl IntoResponse, AppError> {
    let link = state
        .previews
        .create(req.resource_id, &identity.subject_id, req.options)
        .await?;
    state.cache.invalidate(&listing_key(&identity.subject_id)).await;
    Ok((StatusCode::CREATED, Json(link)))
}

#[axum::debug_handler]
pub async fn list_previews(
    State(state): State<AppState>,
    Extension(identity): Extension<CallerIdentity>,
) -> Result<Json<Vec<PreviewLink>>, AppError> {
    let previews = state.previews.clone();
    let subject_id = identity.subject_id.clone();
    let links = state
        .cache
        .wrap(
            &listing_key(&identity.subject_id),
            state.config.media_cache_ttl(),
            move || async move { previews.list(&subject_id).await },
        )
        .await?;
    Ok(Json(links))
}

#[axum::debug_handler]
pub async fn revoke_preview(
    State(state): State<AppState>,
    Extension(identity): Extension<CallerIdentity>,
    Path(link_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.previews.revoke(link_id, &identity.subject_id).await?;
    state.cache.invalidate(&listing_key(&identity.subject_id)).await;
    Ok(StatusCode::NO_CONTENT)
}

/// Public entry point for a preview token. Each successful call spends one use.
#[axum::debug_handler]
pub async fn open_preview(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<PreviewAccess>, AppError> {
    let grant = state.previews.consume(&token).await?;

    // The stream URL never outlives the link that granted it.
    let mut ttl = state.config.signed_url_ttl();
    if let Some(expires_at) = grant.link.expires_at {
        let left = (expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        ttl = ttl.min(left);
    }
    let stream = state
        .signer
        .sign(&grant.resource.storage_path, ttl)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(PreviewAccess {
        remaining_uses: grant.link.remaining_uses(),
        link_expires_at: grant.link.expires_at,
        media: grant.resource.into(),
        stream,
    }))
}
