//! API routes

pub mod events;
pub mod health;
pub mod notify;

use axum::{
    http::HeaderMap,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;

/// Extract client IP address from request headers.
/// Checks common proxy headers in order of preference.
pub fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("cf-connecting-ip") // Cloudflare
        .or_else(|| headers.get("x-real-ip"))
        .or_else(|| headers.get("x-forwarded-for"))
        .and_then(|h| h.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness));

    let api_routes = Router::new()
        .route("/eventsTablet", get(events::tablet_events))
        .route("/eventsTeacher", get(events::teacher_events))
        .route("/notify", post(notify::notify_teacher))
        .route("/respond", post(notify::teacher_response));

    Router::new()
        .merge(health_routes)
        .nest("/api", api_routes)
        // Kiosks are served from arbitrary origins on the school network
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
