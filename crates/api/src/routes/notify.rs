//! Paging and replies between kiosks and teachers

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap},
    Json,
};
use serde::Deserialize;
use tns_shared::TeacherId;

use crate::error::{ApiError, ApiResult};
use crate::presence::{DeliveryOutcome, DispatchReport, Notification, PushContent, SessionKey, TabletSessionId};
use crate::state::AppState;

const NOTIFY_TITLE: &str = "Kiosk Notification";
const NOTIFY_BODY: &str = "Someone is looking for you";

#[derive(Debug, Deserialize)]
pub struct NotifyQuery {
    pub teacher_id: i64,
    pub tablet_session: String,
}

/// Page a teacher on behalf of an open kiosk session
pub async fn notify_teacher(
    State(state): State<AppState>,
    Query(query): Query<NotifyQuery>,
) -> ApiResult<Json<DispatchReport>> {
    let tablet_session = TabletSessionId::new(query.tablet_session);
    if !state.registry.contains(&SessionKey::Tablet(tablet_session.clone())) {
        return Err(ApiError::Unauthorized);
    }

    let teacher = state
        .store
        .find_teacher(TeacherId(query.teacher_id))
        .await?
        .ok_or(ApiError::NotFound)?;

    let outcome = state
        .dispatcher
        .notify_teacher(
            &teacher,
            Notification::Notify { tablet_session },
            PushContent::new(NOTIFY_TITLE, NOTIFY_BODY),
        )
        .await;

    Ok(Json(outcome.into()))
}

#[derive(Debug, Deserialize)]
pub struct RespondQuery {
    pub message: String,
    pub tablet_session: String,
}

/// Relay a teacher's reply to the kiosk that paged them
pub async fn teacher_response(
    State(state): State<AppState>,
    Query(query): Query<RespondQuery>,
    headers: HeaderMap,
) -> ApiResult<Json<DispatchReport>> {
    let token = bearer_token(&headers).ok_or(ApiError::Unauthorized)?;
    let teacher = state
        .store
        .find_teacher_by_token(token)
        .await?
        .ok_or(ApiError::Unauthorized)?;

    let payload = Notification::Response {
        message: query.message,
        teacher_id: teacher.id,
    };

    match state
        .dispatcher
        .send_to_tablet(&TabletSessionId::new(query.tablet_session), payload)
    {
        Ok(()) => Ok(Json(DeliveryOutcome::Live.into())),
        Err(_) => Err(ApiError::NotFound),
    }
}

/// Teacher apps send the raw token; a `Bearer ` prefix is tolerated
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let token = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();
    (!token.is_empty()).then_some(token)
}
