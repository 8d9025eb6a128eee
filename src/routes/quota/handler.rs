use axum::{
    Extension,
    extract::{Json, Path, State},
};

use crate::{
    AppState,
    error::AppError,
    middleware::{ActionClass, CallerIdentity, RateLimitDecision},
};

#[axum::debug_handler]
pub async fn quota_usage(
    State(state): State<AppState>,
    Extension(identity): Extension<CallerIdentity>,
    Path(action): Path<String>,
) -> Result<Json<RateLimitDecision>, AppError> {
    let action = action.parse::<ActionClass>().map_err(AppError::BadRequest)?;
    let usage = state.limiter.usage(&identity, action).await?;
    Ok(Json(usage))
}
