use std::sync::Arc;

use tracing::{debug, error, info};

use crate::messages::WsMessage;
use crate::registry::{ClientHandle, ConnectionId, ConnectionRegistry};
use crate::store::{conversation_key, MessageStore};

/// Route a private message from the connection `sender` to `to_user_id`.
///
/// The recipient copy carries the sender's registered user id; the sender
/// gets an echo copy whose `from` field is rewritten to a self-referential
/// marker for client-side rendering. An offline recipient turns into a
/// system notice to the sender only. Persistence is attempted before
/// delivery but never gates it.
pub async fn route_private(
    registry: &ConnectionRegistry,
    store: Option<&Arc<dyn MessageStore>>,
    sender: ConnectionId,
    to_user_id: String,
    ciphertext: String,
    iv: String,
) {
    // A message from a connection that never registered is a protocol
    // violation, not a user-visible error.
    let sender_entry = match registry.entry_of(sender) {
        Some(entry) => entry,
        None => {
            debug!("dropping message from unregistered connection {}", sender);
            return;
        }
    };
    let from_user_id = sender_entry.identity.user_id.clone();

    match registry.find_by_user_id(&to_user_id) {
        Some(recipient) => {
            if let Some(store) = store {
                persist_message(store, &from_user_id, &to_user_id, &ciphertext, &iv).await;
            }

            let outbound = WsMessage::PrivateMessage {
                from_user_id: from_user_id.clone(),
                to_user_id: to_user_id.clone(),
                ciphertext: ciphertext.clone(),
                iv: iv.clone(),
            };
            let echo = WsMessage::PrivateMessage {
                from_user_id: format!("You → {}", to_user_id),
                to_user_id,
                ciphertext,
                iv,
            };
            send_json(&recipient, &outbound);
            send_json(&sender_entry.handle, &echo);
        }
        None => {
            info!(
                "recipient {} is offline, notifying sender {}",
                to_user_id, from_user_id
            );
            let notice = WsMessage::SystemNotice {
                text: format!("{} is offline, message not delivered", to_user_id),
                to_user_id: from_user_id,
            };
            send_json(&sender_entry.handle, &notice);
        }
    }
}

/// Best-effort persistence on the blocking pool. Failures are logged and
/// delivery proceeds unaffected.
async fn persist_message(
    store: &Arc<dyn MessageStore>,
    sender_id: &str,
    receiver_id: &str,
    ciphertext: &str,
    iv: &str,
) {
    let store = Arc::clone(store);
    let key = conversation_key(sender_id, receiver_id);
    let sender_id = sender_id.to_string();
    let receiver_id = receiver_id.to_string();
    let ciphertext = ciphertext.to_string();
    let iv = iv.to_string();

    let result = tokio::task::spawn_blocking(move || {
        store.record_message(&key, &sender_id, &receiver_id, &ciphertext, &iv)
    })
    .await;

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("failed to persist message: {}", e),
        Err(e) => error!("persistence task failed: {}", e),
    }
}

fn send_json(handle: &ClientHandle, msg: &WsMessage) {
    match serde_json::to_string(msg) {
        Ok(frame) => handle.send(&frame),
        Err(e) => error!("failed to serialize outbound message: {}", e),
    }
}
