//! Connection registry
//!
//! Process-wide bookkeeping of open event streams, split into two
//! independent namespaces: kiosk (tablet) sessions and teacher sessions.
//! Each namespace has its own lock and no operation holds a lock across an
//! await point.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tns_shared::TeacherId;
use tokio::sync::mpsc;

use super::events::Notification;

pub type NotificationSender = mpsc::UnboundedSender<Notification>;
pub type NotificationReceiver = mpsc::UnboundedReceiver<Notification>;

const TABLET_SESSION_PREFIX: &str = "TABSESS_";

/// Addressable id of a kiosk stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabletSessionId(String);

impl TabletSessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive the session id from the kiosk's network identity
    ///
    /// The same host always maps to the same id, so two kiosks behind one
    /// address share a session slot.
    pub fn from_client_host(host: &str) -> Self {
        let digest = Sha256::digest(host.as_bytes());
        Self(format!("{}{}", TABLET_SESSION_PREFIX, hex::encode(digest)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TabletSessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The two session keyspaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    Tablet,
    Teacher,
}

/// A key within one namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SessionKey {
    Tablet(TabletSessionId),
    Teacher(TeacherId),
}

impl SessionKey {
    pub fn namespace(&self) -> Namespace {
        match self {
            Self::Tablet(_) => Namespace::Tablet,
            Self::Teacher(_) => Namespace::Teacher,
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tablet(id) => write!(f, "tablet:{}", id),
            Self::Teacher(id) => write!(f, "teacher:{}", id),
        }
    }
}

/// Process-unique id of one registered stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delivery handle for one open stream
#[derive(Debug, Clone)]
pub struct SessionChannel {
    connection_id: ConnectionId,
    sender: NotificationSender,
}

impl SessionChannel {
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Enqueue a notification. Never blocks.
    ///
    /// Returns Err if the stream already dropped its receiver
    #[allow(clippy::result_large_err)] // Error type is from tokio mpsc, containing the failed notification
    pub fn send(&self, notification: Notification) -> Result<(), mpsc::error::SendError<Notification>> {
        self.sender.send(notification)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Whether both handles feed the same stream
    pub fn same_channel(&self, other: &SessionChannel) -> bool {
        self.sender.same_channel(&other.sender)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Session already registered: {0}")]
    AlreadyRegistered(SessionKey),
    #[error("Registry closed for shutdown")]
    Closed,
}

/// Session counts, for observability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub teachers: usize,
    pub tablets: usize,
}

/// One namespace's map
struct SessionMap<K> {
    sessions: RwLock<HashMap<K, SessionChannel>>,
}

impl<K: Eq + Hash + Clone> SessionMap<K> {
    fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Insert only if the key is free. Returns the new size on success.
    fn insert_unique(&self, key: K, channel: SessionChannel) -> Option<usize> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&key) {
            return None;
        }
        sessions.insert(key, channel);
        Some(sessions.len())
    }

    /// Insert, replacing whatever was there. Returns the replaced channel and the new size.
    fn insert_replace(&self, key: K, channel: SessionChannel) -> (Option<SessionChannel>, usize) {
        let mut sessions = self.sessions.write();
        let previous = sessions.insert(key, channel);
        (previous, sessions.len())
    }

    fn remove(&self, key: &K) -> Option<(SessionChannel, usize)> {
        let mut sessions = self.sessions.write();
        sessions.remove(key).map(|c| (c, sessions.len()))
    }

    fn remove_if(&self, key: &K, connection_id: ConnectionId) -> Option<usize> {
        let mut sessions = self.sessions.write();
        match sessions.get(key) {
            Some(current) if current.connection_id == connection_id => {
                sessions.remove(key);
                Some(sessions.len())
            }
            _ => None,
        }
    }

    fn clear(&self) -> usize {
        let mut sessions = self.sessions.write();
        let closed = sessions.len();
        sessions.clear();
        closed
    }

    fn get(&self, key: &K) -> Option<SessionChannel> {
        self.sessions.read().get(key).cloned()
    }

    fn len(&self) -> usize {
        self.sessions.read().len()
    }

    fn snapshot(&self) -> Vec<(K, SessionChannel)> {
        self.sessions
            .read()
            .iter()
            .map(|(k, c)| (k.clone(), c.clone()))
            .collect()
    }
}

/// Registry of open streams, shared by stream handlers and the dispatcher
pub struct ConnectionRegistry {
    tablets: SessionMap<TabletSessionId>,
    teachers: SessionMap<TeacherId>,
    next_connection_id: AtomicU64,
    closed: AtomicBool,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            tablets: SessionMap::new(),
            teachers: SessionMap::new(),
            next_connection_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Register an open stream's channel under `key`
    ///
    /// Tablet keys are exclusive: a second open for the same key is refused.
    /// Teacher keys are last-writer-wins: the prior channel is dropped from
    /// the registry and receives nothing further.
    ///
    /// Refused once [`close_all`](Self::close_all) has run.
    pub fn register(
        &self,
        key: SessionKey,
        sender: NotificationSender,
    ) -> Result<ConnectionId, RegistryError> {
        if self.is_closed() {
            tracing::debug!(session = %key, "Registry closed, session refused");
            return Err(RegistryError::Closed);
        }

        let connection_id = ConnectionId(self.next_connection_id.fetch_add(1, Ordering::Relaxed));
        let channel = SessionChannel {
            connection_id,
            sender,
        };

        match &key {
            SessionKey::Tablet(session_id) => {
                let Some(total) = self.tablets.insert_unique(session_id.clone(), channel) else {
                    tracing::warn!(session_id = %session_id, "Duplicate tablet session refused");
                    return Err(RegistryError::AlreadyRegistered(key.clone()));
                };
                tracing::info!(
                    session_id = %session_id,
                    connection_id = %connection_id,
                    total_connections = total,
                    "Tablet session added"
                );
            }
            SessionKey::Teacher(teacher_id) => {
                let (previous, total) = self.teachers.insert_replace(*teacher_id, channel);
                if let Some(previous) = previous {
                    tracing::info!(
                        teacher_id = %teacher_id,
                        replaced_connection_id = %previous.connection_id,
                        "Teacher session replaced by newer connection"
                    );
                }
                tracing::info!(
                    teacher_id = %teacher_id,
                    connection_id = %connection_id,
                    total_connections = total,
                    "Teacher session added"
                );
            }
        }

        // close_all may have cleared the maps between the check above and the insert
        if self.is_closed() {
            self.release(&key, connection_id);
            return Err(RegistryError::Closed);
        }

        Ok(connection_id)
    }

    /// Remove whatever is registered under `key`. Idempotent.
    pub fn unregister(&self, key: &SessionKey) -> bool {
        let removed = match key {
            SessionKey::Tablet(id) => self.tablets.remove(id).map(|(_, n)| n),
            SessionKey::Teacher(id) => self.teachers.remove(id).map(|(_, n)| n),
        };
        if let Some(remaining) = removed {
            tracing::info!(session = %key, remaining_connections = remaining, "Session removed");
        }
        removed.is_some()
    }

    /// Remove `key` only if it still belongs to `connection_id`
    ///
    /// Used by a closing stream so it never evicts a newer connection that
    /// took over its key.
    pub fn release(&self, key: &SessionKey, connection_id: ConnectionId) -> bool {
        let removed = match key {
            SessionKey::Tablet(id) => self.tablets.remove_if(id, connection_id),
            SessionKey::Teacher(id) => self.teachers.remove_if(id, connection_id),
        };
        match removed {
            Some(remaining) => {
                tracing::info!(
                    session = %key,
                    connection_id = %connection_id,
                    remaining_connections = remaining,
                    "Session removed"
                );
                true
            }
            None => {
                tracing::debug!(
                    session = %key,
                    connection_id = %connection_id,
                    "Session already released or superseded"
                );
                false
            }
        }
    }

    /// Drop every channel in both namespaces and refuse new registrations
    ///
    /// Open streams see their channel close and end, which lets a graceful
    /// shutdown finish instead of waiting on idle streams forever.
    pub fn close_all(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        let closed = self.tablets.clear() + self.teachers.clear();
        tracing::info!(closed_connections = closed, "Closed all event streams");
        closed
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Look up the channel registered under `key`
    pub fn lookup(&self, key: &SessionKey) -> Option<SessionChannel> {
        match key {
            SessionKey::Tablet(id) => self.tablets.get(id),
            SessionKey::Teacher(id) => self.teachers.get(id),
        }
    }

    pub fn contains(&self, key: &SessionKey) -> bool {
        self.lookup(key).is_some()
    }

    /// Number of open sessions in one namespace
    pub fn count(&self, namespace: Namespace) -> usize {
        match namespace {
            Namespace::Tablet => self.tablets.len(),
            Namespace::Teacher => self.teachers.len(),
        }
    }

    /// Snapshot of every kiosk channel, for broadcasts
    pub fn tablet_channels(&self) -> Vec<(TabletSessionId, SessionChannel)> {
        self.tablets.snapshot()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            teachers: self.count(Namespace::Teacher),
            tablets: self.count(Namespace::Tablet),
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
