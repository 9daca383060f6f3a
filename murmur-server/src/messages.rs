use serde::{Deserialize, Serialize};

use crate::identity::UserIdentity;

/// WebSocket message types (shared between server and client)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsMessage {
    /// Client declares its identity on a freshly authenticated connection.
    #[serde(rename = "register")]
    Register {
        user_id: String,
        display_name: String,
        public_key: String,
    },
    /// Direct message between two users. Ciphertext and iv are opaque to the
    /// relay and pass through unchanged.
    #[serde(rename = "private_message")]
    PrivateMessage {
        #[serde(default)]
        from_user_id: String,
        to_user_id: String,
        ciphertext: String,
        iv: String,
    },
    /// Full online-user list, pushed to every connection on each registry
    /// change.
    #[serde(rename = "presence_update")]
    PresenceUpdate { users: Vec<UserIdentity> },
    /// Server-originated notice delivered to a single user.
    #[serde(rename = "system_notice")]
    SystemNotice { text: String, to_user_id: String },
}
