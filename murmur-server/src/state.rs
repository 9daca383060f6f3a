use std::sync::Arc;

use crate::registry::ConnectionRegistry;
use crate::store::MessageStore;

/// Shared server state: the connection registry plus an optional message
/// store. Routing behaves the same with or without a store.
pub struct RelayState {
    pub registry: ConnectionRegistry,
    pub store: Option<Arc<dyn MessageStore>>,
}

impl RelayState {
    pub fn new() -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            store: None,
        }
    }

    pub fn with_store(store: Arc<dyn MessageStore>) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            store: Some(store),
        }
    }
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}
