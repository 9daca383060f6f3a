use tracing::{debug, error};

use crate::messages::WsMessage;
use crate::registry::ConnectionRegistry;

/// Push the full online-user list to every connected handle.
///
/// Full-state push, not a diff. Callers invoke this after every register and
/// after every remove that actually changed registry state. Delivery is best
/// effort per handle; a dead handle is cleaned up by its own disconnect path.
pub fn broadcast_presence(registry: &ConnectionRegistry) {
    let users = registry.snapshot();
    debug!("broadcasting presence, {} online", users.len());

    let update = WsMessage::PresenceUpdate { users };
    let frame = match serde_json::to_string(&update) {
        Ok(f) => f,
        Err(e) => {
            error!("failed to serialize presence update: {}", e);
            return;
        }
    };

    for handle in registry.handles() {
        handle.send(&frame);
    }
}
