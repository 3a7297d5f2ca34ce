//! Notification payloads and stream framing
//!
//! Payloads are tagged by `event`; the registry and dispatcher move them
//! around without looking inside. Frames are the `text/event-stream` wire
//! units written by a stream handler.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tns_shared::{Availability, TeacherId};

use super::registry::TabletSessionId;

// =============================================================================
// Payloads
// =============================================================================

/// Events delivered to teacher apps and kiosks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum Notification {
    /// A kiosk is paging a teacher
    Notify { tablet_session: TabletSessionId },

    /// A teacher replying to the kiosk that paged them
    Response { message: String, teacher_id: TeacherId },

    /// The scheduler moved a teacher to a new availability
    SwitchAvailability {
        teacher_id: TeacherId,
        availability: Availability,
    },

    /// Kiosks should refetch the teacher list
    Reload {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        teacher_id: Option<TeacherId>,
    },
}

impl Notification {
    /// The `event` tag of this payload
    pub fn event_name(&self) -> &'static str {
        match self {
            Notification::Notify { .. } => "notify",
            Notification::Response { .. } => "response",
            Notification::SwitchAvailability { .. } => "switchAvailability",
            Notification::Reload { .. } => "reload",
        }
    }

    /// Flatten into the string map push providers accept as auxiliary data
    pub fn to_push_data(&self) -> BTreeMap<String, String> {
        let mut data = BTreeMap::new();
        if let Ok(Value::Object(fields)) = serde_json::to_value(self) {
            for (key, value) in fields {
                let value = match value {
                    Value::Null => continue,
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                data.insert(key, value);
            }
        }
        data
    }
}

// =============================================================================
// Frames
// =============================================================================

/// One unit written to an open event stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    /// First frame of a kiosk stream, telling it its session id
    Handshake { token: TabletSessionId },
    Data(Notification),
    /// Comment frame written when the channel stayed idle
    Heartbeat,
}

impl StreamFrame {
    /// Render the frame in `text/event-stream` format
    pub fn encode(&self) -> String {
        match self {
            StreamFrame::Handshake { token } => {
                format!("data: {}\n\n", serde_json::json!({ "token": token }))
            }
            StreamFrame::Data(notification) => match serde_json::to_string(notification) {
                Ok(json) => format!("data: {}\n\n", json),
                Err(e) => {
                    tracing::error!(error = ?e, event = notification.event_name(), "Failed to serialize notification");
                    HEARTBEAT_FRAME.to_string()
                }
            },
            StreamFrame::Heartbeat => HEARTBEAT_FRAME.to_string(),
        }
    }
}

const HEARTBEAT_FRAME: &str = ": heartbeat\n\n";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_event_tags() {
        let json = serde_json::to_string(&Notification::SwitchAvailability {
            teacher_id: TeacherId(7),
            availability: Availability::InClass,
        })
        .unwrap();
        assert_eq!(
            json,
            r#"{"event":"switchAvailability","teacher_id":7,"availability":"InClass"}"#
        );

        let json = serde_json::to_string(&Notification::Reload { teacher_id: None }).unwrap();
        assert_eq!(json, r#"{"event":"reload"}"#);
    }

    #[test]
    fn test_notify_deserialization() {
        let json = r#"{"event":"notify","tablet_session":"TABSESS_abc"}"#;
        let event: Notification = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            Notification::Notify {
                tablet_session: TabletSessionId::new("TABSESS_abc")
            }
        );
    }

    #[test]
    fn test_push_data_is_stringified() {
        let data = Notification::Response {
            message: "On my way".to_string(),
            teacher_id: TeacherId(3),
        }
        .to_push_data();

        assert_eq!(data.get("event").map(String::as_str), Some("response"));
        assert_eq!(data.get("message").map(String::as_str), Some("On my way"));
        assert_eq!(data.get("teacher_id").map(String::as_str), Some("3"));
    }

    #[test]
    fn test_frame_encoding() {
        assert_eq!(StreamFrame::Heartbeat.encode(), ": heartbeat\n\n");
        assert_eq!(
            StreamFrame::Handshake {
                token: TabletSessionId::new("TABSESS_1")
            }
            .encode(),
            "data: {\"token\":\"TABSESS_1\"}\n\n"
        );
        assert_eq!(
            StreamFrame::Data(Notification::Reload { teacher_id: Some(TeacherId(2)) }).encode(),
            "data: {\"event\":\"reload\",\"teacher_id\":2}\n\n"
        );
    }
}
