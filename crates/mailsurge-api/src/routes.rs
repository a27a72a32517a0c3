//! API routes

use std::sync::Arc;

use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers::{campaigns, health, smtp, stats};
use crate::rate_limit::rate_limit_middleware;
use crate::response::ErrorBody;
use crate::AppState;

/// Origins accepted when the configuration does not supply its own list
const DEFAULT_ALLOWED_ORIGINS: &[&str] = &["http://localhost:3000", "http://127.0.0.1:3000"];

/// Create the API router
pub fn create_router(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    let api = Router::new()
        .route("/health", get(health::health))
        .route("/stats", get(stats::stats))
        .route("/smtp/test", post(smtp::test_relay))
        .route("/campaign/start", post(campaigns::start_campaign))
        .route("/campaign/:id/status", get(campaigns::campaign_status))
        .route(
            "/campaign/:id/smtp-rotation",
            get(campaigns::campaign_rotation),
        )
        .route("/campaign/:id/stop", post(campaigns::stop_campaign));

    Router::new()
        .route("/", get(health::descriptor))
        .nest("/api", api)
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let configured: Vec<HeaderValue> = if origins.is_empty() {
        DEFAULT_ALLOWED_ORIGINS
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect()
    } else {
        origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect()
    };

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(configured))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}

async fn not_found() -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody::new("NOT_FOUND", "Unknown path")),
    )
}
