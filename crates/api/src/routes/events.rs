//! Event stream endpoints for kiosks and teacher apps

use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{ConnectInfo, Query, State},
    http::{header, HeaderMap},
    response::Response,
};
use serde::Deserialize;

use super::extract_client_ip;
use crate::error::{ApiError, ApiResult};
use crate::presence::{StreamHandler, TabletSessionId};
use crate::state::AppState;

/// Open a kiosk stream
///
/// The session id is derived from the caller's address and sent as the
/// first frame. A second stream from the same address is refused while the
/// first is open.
pub async fn tablet_events(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let host = client_host(&state, &headers, peer);
    let session_id = TabletSessionId::from_client_host(&host);

    let handler = StreamHandler::open_tablet(
        state.registry.clone(),
        session_id,
        state.config.heartbeat_interval,
    )?;

    event_stream(handler)
}

#[derive(Debug, Deserialize)]
pub struct TeacherEventsQuery {
    pub token: String,
}

/// Open a teacher stream, replacing any older one for the same teacher
pub async fn teacher_events(
    State(state): State<AppState>,
    Query(query): Query<TeacherEventsQuery>,
) -> ApiResult<Response> {
    let teacher = state
        .store
        .find_teacher_by_token(&query.token)
        .await?
        .ok_or(ApiError::Unauthorized)?;

    let handler = StreamHandler::open_teacher(
        state.registry.clone(),
        teacher.id,
        state.config.heartbeat_interval,
    )?;

    event_stream(handler)
}

/// Identity used to derive a kiosk's session id
fn client_host(state: &AppState, headers: &HeaderMap, peer: SocketAddr) -> String {
    if state.config.trust_proxy_headers {
        if let Some(ip) = extract_client_ip(headers) {
            return ip;
        }
    }
    peer.ip().to_string()
}

fn event_stream(handler: StreamHandler) -> ApiResult<Response> {
    tracing::info!(
        session = %handler.session_key(),
        connection_id = %handler.connection_id(),
        "Event stream opened"
    );

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header("x-accel-buffering", "no")
        .body(Body::from_stream(handler.into_body_stream()))
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to build event stream response");
            ApiError::Internal
        })
}
