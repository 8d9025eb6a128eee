use axum::{
    Router,
    routing::{delete, get, post},
};

use crate::{
    AppState,
    middleware::{ActionClass, RateLimitGuard, auth_middleware, log_errors, rate_limit},
};

pub mod media;
pub mod preview;
pub mod quota;

async fn health() -> &'static str {
    "ok"
}

/// Builds the API router nested under `api_base_uri`.
pub fn router(state: AppState) -> Router {
    let upload_guard = RateLimitGuard::new(state.limiter.clone(), ActionClass::Upload);
    let preview_guard = RateLimitGuard::new(state.limiter.clone(), ActionClass::PreviewLink);

    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/p/{token}", get(preview::open_preview));

    let protected_routes = Router::new()
        .route(
            "/media/uploads",
            post(media::upload).route_layer(axum::middleware::from_fn_with_state(
                upload_guard,
                rate_limit,
            )),
        )
        .route("/media/{id}", get(media::media_details))
        .route("/media/{id}/stream", get(media::stream_url))
        .route(
            "/previews",
            get(preview::list_previews).merge(post(preview::create_preview).route_layer(
                axum::middleware::from_fn_with_state(preview_guard, rate_limit),
            )),
        )
        .route("/previews/{id}", delete(preview::revoke_preview))
        .route("/quota/{action}", get(quota::quota_usage))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let api = Router::new().merge(public_routes).merge(protected_routes);

    let base = state.config.api_base_uri.trim_end_matches('/').to_string();
    let router = if base.is_empty() {
        api
    } else {
        Router::new().nest(&base, api)
    };

    router
        .layer(axum::middleware::from_fn(log_errors))
        .with_state(state)
}
