//! Notification dispatcher
//!
//! Routes one payload to one recipient. Teachers get their live stream when
//! one is registered and the push gateway otherwise; kiosks only ever have
//! the live path.

use std::sync::Arc;

use serde::Serialize;
use tns_shared::Teacher;

use super::events::Notification;
use super::registry::{ConnectionRegistry, SessionChannel, SessionKey, TabletSessionId};
use crate::push::{PushGateway, PushMessage, PushPriority};

const NO_TARGET_REASON: &str = "No active connection or FCM token found";

/// How a delivery attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Enqueued on an open stream
    Live,
    /// Accepted by the push gateway
    Push { message_id: String },
    /// No live stream and no push target
    Undeliverable { reason: String },
    /// The push gateway refused or errored
    Failed { reason: String },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Live | DeliveryOutcome::Push { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeliveryMethod {
    #[serde(rename = "SSE")]
    Live,
    #[serde(rename = "FCM")]
    Push,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStatus {
    Success,
    Failed,
}

/// Wire form of a [`DeliveryOutcome`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub status: DispatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<DeliveryMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<DeliveryOutcome> for DispatchReport {
    fn from(outcome: DeliveryOutcome) -> Self {
        match outcome {
            DeliveryOutcome::Live => Self {
                status: DispatchStatus::Success,
                method: Some(DeliveryMethod::Live),
                message_id: None,
                reason: None,
            },
            DeliveryOutcome::Push { message_id } => Self {
                status: DispatchStatus::Success,
                method: Some(DeliveryMethod::Push),
                message_id: Some(message_id),
                reason: None,
            },
            DeliveryOutcome::Undeliverable { reason } | DeliveryOutcome::Failed { reason } => Self {
                status: DispatchStatus::Failed,
                method: None,
                message_id: None,
                reason: Some(reason),
            },
        }
    }
}

/// Human-readable part of a push notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushContent {
    pub title: String,
    pub body: String,
    pub priority: PushPriority,
}

impl PushContent {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            priority: PushPriority::Normal,
        }
    }

    pub fn with_priority(mut self, priority: PushPriority) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    push: Arc<dyn PushGateway>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>, push: Arc<dyn PushGateway>) -> Self {
        Self { registry, push }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn push_gateway(&self) -> &Arc<dyn PushGateway> {
        &self.push
    }

    /// Deliver to a teacher, falling back to push when they have no stream
    pub async fn notify_teacher(
        &self,
        teacher: &Teacher,
        notification: Notification,
        content: PushContent,
    ) -> DeliveryOutcome {
        let notification = match self.send_to_teacher(teacher, notification) {
            Ok(()) => return DeliveryOutcome::Live,
            Err(unsent) => unsent,
        };

        let Some(token) = teacher.push_target() else {
            tracing::info!(teacher_id = %teacher.id, event = notification.event_name(), "Teacher unreachable");
            return DeliveryOutcome::Undeliverable {
                reason: NO_TARGET_REASON.to_string(),
            };
        };

        let message = PushMessage {
            token: token.to_string(),
            title: content.title,
            body: content.body,
            data: notification.to_push_data(),
            priority: content.priority,
        };

        match self.push.send(&message).await {
            Ok(message_id) => {
                tracing::info!(
                    teacher_id = %teacher.id,
                    event = notification.event_name(),
                    message_id = %message_id,
                    "Notification sent via push"
                );
                DeliveryOutcome::Push { message_id }
            }
            Err(e) => {
                tracing::warn!(teacher_id = %teacher.id, error = %e, "Push delivery failed");
                DeliveryOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Live-only delivery to a teacher. Hands the payload back if there is
    /// no open stream to take it.
    #[allow(clippy::result_large_err)]
    pub fn send_to_teacher(&self, teacher: &Teacher, notification: Notification) -> Result<(), Notification> {
        let channel = self.registry.lookup(&SessionKey::Teacher(teacher.id));
        deliver_live(channel, notification)
    }

    /// Live-only delivery to a kiosk
    #[allow(clippy::result_large_err)]
    pub fn send_to_tablet(
        &self,
        session_id: &TabletSessionId,
        notification: Notification,
    ) -> Result<(), Notification> {
        let channel = self.registry.lookup(&SessionKey::Tablet(session_id.clone()));
        deliver_live(channel, notification)
    }

    /// Enqueue on every open kiosk stream. Returns how many accepted it.
    pub fn broadcast_to_tablets(&self, notification: &Notification) -> usize {
        let mut delivered = 0;
        for (session_id, channel) in self.registry.tablet_channels() {
            match channel.send(notification.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => tracing::debug!(session_id = %session_id, "Tablet stream closed during broadcast"),
            }
        }
        delivered
    }
}

/// A closed channel counts as no channel
#[allow(clippy::result_large_err)]
fn deliver_live(channel: Option<SessionChannel>, notification: Notification) -> Result<(), Notification> {
    match channel {
        Some(channel) => channel.send(notification).map_err(|e| e.0),
        None => Err(notification),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::testing::RecordingPushGateway;
    use tns_shared::{Availability, TeacherId};
    use tokio::sync::mpsc;

    fn teacher(id: i64, token: Option<&str>) -> Teacher {
        Teacher {
            id: TeacherId(id),
            full_name: "Ada".to_string(),
            availability: Availability::Available,
            push_token: token.map(str::to_string),
            availability_changed_at: None,
        }
    }

    fn setup() -> (Dispatcher, Arc<RecordingPushGateway>) {
        let push = Arc::new(RecordingPushGateway::new());
        let dispatcher = Dispatcher::new(Arc::new(ConnectionRegistry::new()), push.clone());
        (dispatcher, push)
    }

    fn notify_payload() -> Notification {
        Notification::Notify {
            tablet_session: TabletSessionId::new("TABSESS_1"),
        }
    }

    #[tokio::test]
    async fn test_live_channel_wins_over_push_token() {
        let (dispatcher, push) = setup();
        let (tx, mut rx) = mpsc::unbounded_channel();
        dispatcher
            .registry()
            .register(SessionKey::Teacher(TeacherId(1)), tx)
            .unwrap();

        let outcome = dispatcher
            .notify_teacher(&teacher(1, Some("abc")), notify_payload(), PushContent::new("t", "b"))
            .await;

        assert_eq!(outcome, DeliveryOutcome::Live);
        assert_eq!(rx.try_recv().unwrap(), notify_payload());
        assert!(push.sent().is_empty());
    }

    #[tokio::test]
    async fn test_empty_token_is_undeliverable() {
        let (dispatcher, push) = setup();
        let outcome = dispatcher
            .notify_teacher(&teacher(1, Some("")), notify_payload(), PushContent::new("t", "b"))
            .await;

        assert!(matches!(outcome, DeliveryOutcome::Undeliverable { .. }));
        assert!(push.sent().is_empty());
    }

    #[tokio::test]
    async fn test_push_fallback_carries_payload_as_data() {
        let (dispatcher, push) = setup();
        let outcome = dispatcher
            .notify_teacher(
                &teacher(1, Some("abc")),
                notify_payload(),
                PushContent::new("Kiosk Notification", "Someone is looking for you"),
            )
            .await;

        assert_eq!(
            outcome,
            DeliveryOutcome::Push {
                message_id: "msg-1".to_string()
            }
        );
        let sent = push.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].token, "abc");
        assert_eq!(sent[0].title, "Kiosk Notification");
        assert_eq!(sent[0].data.get("event").map(String::as_str), Some("notify"));
        assert_eq!(sent[0].data.get("tablet_session").map(String::as_str), Some("TABSESS_1"));
    }

    #[tokio::test]
    async fn test_gateway_error_becomes_failed_outcome() {
        let (dispatcher, push) = setup();
        push.reject("stale");

        let outcome = dispatcher
            .notify_teacher(&teacher(1, Some("stale")), notify_payload(), PushContent::new("t", "b"))
            .await;

        assert!(matches!(outcome, DeliveryOutcome::Failed { .. }));
        assert!(!outcome.is_delivered());
    }

    #[tokio::test]
    async fn test_closed_channel_falls_back_to_push() {
        let (dispatcher, push) = setup();
        let (tx, rx) = mpsc::unbounded_channel();
        dispatcher
            .registry()
            .register(SessionKey::Teacher(TeacherId(1)), tx)
            .unwrap();
        drop(rx);

        let outcome = dispatcher
            .notify_teacher(&teacher(1, Some("abc")), notify_payload(), PushContent::new("t", "b"))
            .await;

        assert!(matches!(outcome, DeliveryOutcome::Push { .. }));
        assert_eq!(push.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_replaced_teacher_channel_receives_nothing() {
        let (dispatcher, _push) = setup();
        let (old_tx, mut old_rx) = mpsc::unbounded_channel();
        let (new_tx, mut new_rx) = mpsc::unbounded_channel();
        let key = SessionKey::Teacher(TeacherId(1));
        dispatcher.registry().register(key.clone(), old_tx).unwrap();
        dispatcher.registry().register(key, new_tx).unwrap();

        dispatcher
            .send_to_teacher(&teacher(1, None), Notification::Reload { teacher_id: None })
            .unwrap();

        assert!(new_rx.try_recv().is_ok());
        assert!(old_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_tablet_delivery_has_no_fallback() {
        let (dispatcher, push) = setup();
        let payload = Notification::Response {
            message: "On my way".to_string(),
            teacher_id: TeacherId(1),
        };

        let result = dispatcher.send_to_tablet(&TabletSessionId::new("TABSESS_missing"), payload.clone());
        assert_eq!(result, Err(payload));
        assert!(push.sent().is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_open_tablet() {
        let (dispatcher, _push) = setup();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        let registry = dispatcher.registry();
        registry
            .register(SessionKey::Tablet(TabletSessionId::new("TABSESS_a")), tx_a)
            .unwrap();
        registry
            .register(SessionKey::Tablet(TabletSessionId::new("TABSESS_b")), tx_b)
            .unwrap();
        drop(rx_b);

        let delivered = dispatcher.broadcast_to_tablets(&Notification::Reload { teacher_id: None });

        assert_eq!(delivered, 1);
        assert_eq!(rx_a.try_recv().unwrap(), Notification::Reload { teacher_id: None });
    }

    #[test]
    fn test_report_wire_shape() {
        let live = serde_json::to_value(DispatchReport::from(DeliveryOutcome::Live)).unwrap();
        assert_eq!(live, serde_json::json!({"status": "success", "method": "SSE"}));

        let push = serde_json::to_value(DispatchReport::from(DeliveryOutcome::Push {
            message_id: "m1".to_string(),
        }))
        .unwrap();
        assert_eq!(
            push,
            serde_json::json!({"status": "success", "method": "FCM", "message_id": "m1"})
        );

        let failed = serde_json::to_value(DispatchReport::from(DeliveryOutcome::Undeliverable {
            reason: NO_TARGET_REASON.to_string(),
        }))
        .unwrap();
        assert_eq!(
            failed,
            serde_json::json!({"status": "failed", "reason": NO_TARGET_REASON})
        );
    }
}
