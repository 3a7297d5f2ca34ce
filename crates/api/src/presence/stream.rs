//! Stream handler
//!
//! Owns one open event stream from registration to cleanup. Each call to
//! [`StreamHandler::next_frame`] waits for the next queued notification or
//! for the heartbeat interval to elapse, whichever comes first.
//!
//! A disconnected peer shows up as the response body being dropped: hyper
//! stops polling the stream after a failed write or a closed socket, and
//! server shutdown cancels the task that owns it. All three paths drop the
//! handler, and the [`RegistrationGuard`] inside it releases the registry
//! entry.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tns_shared::TeacherId;
use tokio::sync::mpsc;

use super::events::StreamFrame;
use super::registry::{
    ConnectionId, ConnectionRegistry, NotificationReceiver, RegistryError, SessionKey, TabletSessionId,
};

/// Releases a registry entry when dropped
pub struct RegistrationGuard {
    registry: Arc<ConnectionRegistry>,
    key: SessionKey,
    connection_id: ConnectionId,
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.registry.release(&self.key, self.connection_id);
        tracing::info!(session = %self.key, connection_id = %self.connection_id, "Event stream closed");
    }
}

/// One live event stream
pub struct StreamHandler {
    receiver: NotificationReceiver,
    heartbeat: Duration,
    handshake: Option<StreamFrame>,
    closed: bool,
    guard: RegistrationGuard,
}

impl StreamHandler {
    /// Open a kiosk stream. Refused if the session id is already live.
    pub fn open_tablet(
        registry: Arc<ConnectionRegistry>,
        session_id: TabletSessionId,
        heartbeat: Duration,
    ) -> Result<Self, RegistryError> {
        let handshake = StreamFrame::Handshake {
            token: session_id.clone(),
        };
        let mut handler = Self::open(registry, SessionKey::Tablet(session_id), heartbeat)?;
        handler.handshake = Some(handshake);
        Ok(handler)
    }

    /// Open a teacher stream, taking over any older stream for the same teacher
    pub fn open_teacher(
        registry: Arc<ConnectionRegistry>,
        teacher_id: TeacherId,
        heartbeat: Duration,
    ) -> Result<Self, RegistryError> {
        Self::open(registry, SessionKey::Teacher(teacher_id), heartbeat)
    }

    fn open(
        registry: Arc<ConnectionRegistry>,
        key: SessionKey,
        heartbeat: Duration,
    ) -> Result<Self, RegistryError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection_id = registry.register(key.clone(), tx)?;

        Ok(Self {
            receiver: rx,
            heartbeat,
            handshake: None,
            closed: false,
            guard: RegistrationGuard {
                registry,
                key,
                connection_id,
            },
        })
    }

    pub fn session_key(&self) -> &SessionKey {
        &self.guard.key
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.guard.connection_id
    }

    /// Wait for the next frame to write
    ///
    /// Returns `None` once the channel is closed, which happens when a newer
    /// connection took over this stream's key or the server is shutting down.
    pub async fn next_frame(&mut self) -> Option<StreamFrame> {
        if let Some(handshake) = self.handshake.take() {
            return Some(handshake);
        }
        if self.closed {
            return None;
        }

        match tokio::time::timeout(self.heartbeat, self.receiver.recv()).await {
            Ok(Some(notification)) => {
                tracing::debug!(
                    session = %self.guard.key,
                    event = notification.event_name(),
                    "Delivering notification"
                );
                Some(StreamFrame::Data(notification))
            }
            Ok(None) => {
                tracing::info!(session = %self.guard.key, "Event stream channel closed");
                self.closed = true;
                None
            }
            Err(_) => Some(StreamFrame::Heartbeat),
        }
    }

    /// Turn the handler into an encoded `text/event-stream` body
    pub fn into_body_stream(self) -> impl Stream<Item = Result<String, Infallible>> + Send + 'static {
        futures::stream::unfold(self, |mut handler| async move {
            let frame = handler.next_frame().await?;
            Some((Ok(frame.encode()), handler))
        })
    }
}
