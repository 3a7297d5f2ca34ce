//! Application state

use std::sync::Arc;

use crate::config::Config;
use crate::presence::{ConnectionRegistry, Dispatcher};
use crate::push::PushGateway;
use crate::store::PresenceStore;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn PresenceStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub dispatcher: Dispatcher,
}

impl AppState {
    /// Wire the registry and dispatcher around the given collaborators
    pub fn new(config: Config, store: Arc<dyn PresenceStore>, push: Arc<dyn PushGateway>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Dispatcher::new(registry.clone(), push);
        Self {
            config: Arc::new(config),
            store,
            registry,
            dispatcher,
        }
    }
}
