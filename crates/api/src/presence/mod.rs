//! Real-time presence
//!
//! Open event streams for kiosks and teachers, the registry that makes them
//! addressable, and the dispatcher that chooses between a live stream and
//! the push gateway.

pub mod dispatcher;
pub mod events;
pub mod registry;
pub mod stream;

pub use dispatcher::{DeliveryOutcome, DispatchReport, Dispatcher, PushContent};
pub use events::{Notification, StreamFrame};
pub use registry::{
    ConnectionId, ConnectionRegistry, Namespace, RegistryError, RegistryStats, SessionKey, TabletSessionId,
};
pub use stream::StreamHandler;
