//! Murmur WebSocket Relay Library
//!
//! This module exposes the relay components for use in integration tests.

mod connection;
mod identity;
mod messages;
mod presence;
mod registry;
mod router;
mod state;
mod store;

pub use connection::handle_connection;
pub use connection::handle_event;
pub use identity::UserIdentity;
pub use messages::WsMessage;
pub use presence::broadcast_presence;
pub use registry::{ClientHandle, ConnectionId, ConnectionRegistry, PresenceEntry};
pub use router::route_private;
pub use state::RelayState;
pub use store::{conversation_key, MessageStore, SqliteStore};
