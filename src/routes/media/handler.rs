use axum::{
    Extension,
    extract::{Json, Path, State},
    http::{Method, StatusCode},
    response::IntoResponse,
};
use uuid::Uuid;

use super::model::{DetailsRequest, MediaDetails, UploadRequest, UploadResponse};
use crate::{
    AppState,
    cache::{CachePolicy, CacheScope, keys::response_key},
    database::MediaResource,
    error::AppError,
    middleware::CallerIdentity,
    signing::SignedUrl,
    store::with_timeout,
};

fn path_segment(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn details_key(req: &DetailsRequest) -> String {
    response_key(
        "media.details",
        CacheScope::Caller(&req.subject_id),
        &[("id", &req.media_id.to_string())],
    )
}

async fn owned_resource(
    state: &AppState,
    identity: &CallerIdentity,
    media_id: Uuid,
) -> Result<MediaResource, AppError> {
    let resource = with_timeout(state.config.store_timeout(), state.resources.find(media_id))
        .await?
        .ok_or(AppError::NotFound("media"))?;
    if resource.owner_id != identity.subject_id {
        return Err(AppError::Forbidden);
    }
    Ok(resource)
}

#[axum::debug_handler]
pub async fn upload(
    State(state): State<AppState>,
    Extension(identity): Extension<CallerIdentity>,
    Json(req): Json<UploadRequest>,
) -> Result<impl IntoResponse, AppError> {
    let file_name = path_segment(req.file_name.trim());
    if file_name.is_empty() || file_name.chars().all(|c| c == '.') {
        return Err(AppError::BadRequest("fileName is required".into()));
    }

    let storage_path = format!(
        "/uploads/{}/{}/{}",
        path_segment(&identity.subject_id),
        Uuid::new_v4(),
        file_name
    );
    let delivery = state
        .signer
        .sign(&storage_path, state.config.signed_url_ttl())
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    tracing::info!(subject_id = %identity.subject_id, %storage_path, "upload accepted");
    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            storage_path,
            content_type: req.content_type,
            delivery,
        }),
    ))
}

#[axum::debug_handler]
pub async fn media_details(
    State(state): State<AppState>,
    Extension(identity): Extension<CallerIdentity>,
    method: Method,
    Path(media_id): Path<Uuid>,
) -> Result<Json<MediaDetails>, AppError> {
    let policy = CachePolicy::new(state.config.media_cache_ttl_secs, details_key);
    let request = DetailsRequest {
        subject_id: identity.subject_id.clone(),
        media_id,
    };

    let (state_ref, identity_ref) = (&state, &identity);
    let details = state
        .cache
        .wrap_request(&method, &policy, &request, move || async move {
            owned_resource(state_ref, identity_ref, media_id)
                .await
                .map(MediaDetails::from)
        })
        .await?;

    Ok(Json(details))
}

#[axum::debug_handler]
pub async fn stream_url(
    State(state): State<AppState>,
    Extension(identity): Extension<CallerIdentity>,
    Path(media_id): Path<Uuid>,
) -> Result<Json<SignedUrl>, AppError> {
    let resource = owned_resource(&state, &identity, media_id).await?;
    let signed = state
        .signer
        .sign(&resource.storage_path, state.config.signed_url_ttl())
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(signed))
}
