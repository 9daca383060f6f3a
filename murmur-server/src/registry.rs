use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use crate::identity::UserIdentity;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id for one live connection.
///
/// Ids are allocated monotonically at accept time, so a lower id always
/// belongs to an older session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next id. Called by the transport layer once per accepted
    /// connection.
    pub fn next() -> Self {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Outbound half of one live connection.
///
/// The connection's writer task drains the channel and owns the socket sink,
/// so sending here never blocks and never performs I/O directly.
#[derive(Clone)]
pub struct ClientHandle {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<String>,
}

impl ClientHandle {
    pub fn new(id: ConnectionId, tx: mpsc::UnboundedSender<String>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Fire-and-forget delivery of one frame. A closed channel means the
    /// connection is already tearing down; its own disconnect cleanup removes
    /// the registry entry.
    pub fn send(&self, frame: &str) {
        if self.tx.send(frame.to_string()).is_err() {
            debug!("send to connection {} failed, channel closed", self.id);
        }
    }
}

/// One registered connection: the handle plus the identity declared on it.
#[derive(Clone)]
pub struct PresenceEntry {
    pub handle: ClientHandle,
    pub identity: UserIdentity,
}

/// Maps live connections to registered user identities. The single source of
/// truth for who is online right now.
///
/// All operations are total; nothing here returns an error. A user id may
/// appear on several connections at once (multi-session), entries are keyed
/// by connection, and ordering is derived from the monotonic connection id
/// rather than map iteration order.
pub struct ConnectionRegistry {
    entries: DashMap<ConnectionId, PresenceEntry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Insert or replace the entry for the handle. Registering again on the
    /// same connection overwrites the previous identity.
    pub fn register(&self, handle: ClientHandle, identity: UserIdentity) {
        self.entries
            .insert(handle.id(), PresenceEntry { handle, identity });
    }

    /// Remove the entry for a connection if present. Returns whether anything
    /// was removed so callers can skip the presence broadcast on a no-op.
    pub fn remove(&self, id: ConnectionId) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// The registered entry for a connection, if any.
    pub fn entry_of(&self, id: ConnectionId) -> Option<PresenceEntry> {
        self.entries.get(&id).map(|e| e.value().clone())
    }

    /// First live handle registered under `user_id`, or None if the user is
    /// offline. When a user has several sessions the oldest surviving one
    /// wins (lowest connection id).
    pub fn find_by_user_id(&self, user_id: &str) -> Option<ClientHandle> {
        self.entries
            .iter()
            .filter(|e| e.value().identity.user_id == user_id)
            .min_by_key(|e| *e.key())
            .map(|e| e.value().handle.clone())
    }

    /// All live identities, ordered by registration time.
    pub fn snapshot(&self) -> Vec<UserIdentity> {
        let mut entries: Vec<(ConnectionId, UserIdentity)> = self
            .entries
            .iter()
            .map(|e| (*e.key(), e.value().identity.clone()))
            .collect();
        entries.sort_by_key(|(id, _)| *id);
        entries.into_iter().map(|(_, identity)| identity).collect()
    }

    /// All live handles, for presence fan-out.
    pub fn handles(&self) -> Vec<ClientHandle> {
        self.entries.iter().map(|e| e.value().handle.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(user_id: &str) -> UserIdentity {
        UserIdentity {
            user_id: user_id.to_string(),
            display_name: format!("{}-name", user_id),
            public_key: format!("{}-pk", user_id),
        }
    }

    fn handle() -> (ClientHandle, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ClientHandle::new(ConnectionId::next(), tx), rx)
    }

    #[test]
    fn test_new_registry_is_empty() {
        let registry = ConnectionRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_register_and_snapshot() {
        let registry = ConnectionRegistry::new();
        let (h1, _rx1) = handle();
        let (h2, _rx2) = handle();

        registry.register(h1, identity("u1"));
        registry.register(h2, identity("u2"));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].user_id, "u1");
        assert_eq!(snapshot[1].user_id, "u2");
    }

    #[test]
    fn test_reregister_replaces_entry() {
        let registry = ConnectionRegistry::new();
        let (h, _rx) = handle();

        registry.register(h.clone(), identity("u1"));
        registry.register(h.clone(), identity("u1b"));

        // Snapshot length tracks distinct live handles, not register calls.
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].user_id, "u1b");
        assert_eq!(registry.entry_of(h.id()).unwrap().identity.user_id, "u1b");
    }

    #[test]
    fn test_remove_is_noop_on_unknown_handle() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.remove(ConnectionId::next()));
    }

    #[test]
    fn test_remove_reports_actual_removal_once() {
        let registry = ConnectionRegistry::new();
        let (h, _rx) = handle();

        registry.register(h.clone(), identity("u1"));
        assert!(registry.remove(h.id()));
        assert!(!registry.remove(h.id()));
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_state_is_fold_of_register_and_remove() {
        let registry = ConnectionRegistry::new();
        let (h1, _rx1) = handle();
        let (h2, _rx2) = handle();
        let (h3, _rx3) = handle();

        registry.register(h1.clone(), identity("u1"));
        registry.register(h2.clone(), identity("u2"));
        registry.register(h3.clone(), identity("u3"));
        registry.remove(h2.id());

        let snapshot = registry.snapshot();
        let ids: Vec<&str> = snapshot.iter().map(|u| u.user_id.as_str()).collect();
        assert_eq!(ids, vec!["u1", "u3"]);
    }

    #[test]
    fn test_find_by_user_id() {
        let registry = ConnectionRegistry::new();
        let (h1, _rx1) = handle();
        let (h2, _rx2) = handle();

        registry.register(h1.clone(), identity("u1"));
        registry.register(h2.clone(), identity("u2"));

        assert_eq!(registry.find_by_user_id("u2").unwrap().id(), h2.id());
        assert!(registry.find_by_user_id("u3").is_none());
    }

    #[test]
    fn test_find_by_user_id_prefers_oldest_session() {
        let registry = ConnectionRegistry::new();
        let (older, mut older_rx) = handle();
        let (newer, mut newer_rx) = handle();

        registry.register(older.clone(), identity("dup"));
        registry.register(newer.clone(), identity("dup"));

        let found = registry.find_by_user_id("dup").unwrap();
        assert_eq!(found.id(), older.id());

        // The returned handle really is the older connection.
        found.send("hello");
        assert_eq!(older_rx.try_recv().unwrap(), "hello");
        assert!(newer_rx.try_recv().is_err());
    }

    #[test]
    fn test_find_by_user_id_falls_back_after_oldest_disconnects() {
        let registry = ConnectionRegistry::new();
        let (older, _older_rx) = handle();
        let (newer, _newer_rx) = handle();

        registry.register(older.clone(), identity("dup"));
        registry.register(newer.clone(), identity("dup"));
        registry.remove(older.id());

        assert_eq!(registry.find_by_user_id("dup").unwrap().id(), newer.id());
    }

    #[test]
    fn test_snapshot_keeps_registration_order() {
        let registry = ConnectionRegistry::new();
        let mut expected = Vec::new();
        let mut receivers = Vec::new();
        for name in ["a", "b", "c", "d"] {
            let (h, rx) = handle();
            registry.register(h, identity(name));
            expected.push(name.to_string());
            receivers.push(rx);
        }

        let got: Vec<String> = registry
            .snapshot()
            .into_iter()
            .map(|u| u.user_id)
            .collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_handles_covers_all_entries() {
        let registry = ConnectionRegistry::new();
        let (h1, mut rx1) = handle();
        let (h2, mut rx2) = handle();

        registry.register(h1, identity("u1"));
        registry.register(h2, identity("u2"));

        for h in registry.handles() {
            h.send("ping");
        }
        assert_eq!(rx1.try_recv().unwrap(), "ping");
        assert_eq!(rx2.try_recv().unwrap(), "ping");
    }
}
