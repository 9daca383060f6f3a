use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};
use tracing::{debug, info, warn};

use crate::identity::UserIdentity;
use crate::messages::WsMessage;
use crate::presence::broadcast_presence;
use crate::registry::{ClientHandle, ConnectionId};
use crate::router::route_private;
use crate::state::RelayState;

/// Handle a single WebSocket connection
pub async fn handle_connection(ws_stream: WebSocketStream<TcpStream>, state: Arc<RelayState>) {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let id = ConnectionId::next();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let handle = ClientHandle::new(id, tx);

    // Writer task owns the sink; everything outbound goes through the channel
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    // Process incoming events and monitor the writer task
    loop {
        tokio::select! {
            res = ws_receiver.next() => {
                match res {
                    Some(Ok(Message::Text(text))) => {
                        handle_event(&text, &handle, &state).await;
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("connection {} sent close frame", id);
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = data;
                    }
                    Some(Err(e)) => {
                        warn!("websocket error on connection {}: {}", id, e);
                        break;
                    }
                    None => {
                        info!("websocket stream ended for connection {}", id);
                        break;
                    }
                    _ => {}
                }
            }
            _ = &mut send_task => {
                info!("writer task finished for connection {} (likely connection lost)", id);
                break;
            }
        }
    }

    // Cleanup runs exactly once. A connection that never registered leaves
    // without a presence update.
    send_task.abort();
    if state.registry.remove(id) {
        broadcast_presence(&state.registry);
    }
    info!("connection {} closed", id);
}

/// Dispatch one inbound event from a client.
///
/// A frame that fails to parse is logged and dropped; protocol violations
/// never close the connection.
pub async fn handle_event(text: &str, handle: &ClientHandle, state: &RelayState) {
    let msg: WsMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("failed to parse frame on connection {}: {}", handle.id(), e);
            return;
        }
    };

    match msg {
        WsMessage::Register {
            user_id,
            display_name,
            public_key,
        } => {
            info!("connection {} registered as {}", handle.id(), user_id);
            let identity = UserIdentity {
                user_id,
                display_name,
                public_key,
            };
            state.registry.register(handle.clone(), identity);
            broadcast_presence(&state.registry);
        }
        WsMessage::PrivateMessage {
            to_user_id,
            ciphertext,
            iv,
            ..
        } => {
            // Whatever from_user_id the client wrote is discarded; the
            // registered identity of this connection is authoritative.
            route_private(
                &state.registry,
                state.store.as_ref(),
                handle.id(),
                to_user_id,
                ciphertext,
                iv,
            )
            .await;
        }
        WsMessage::PresenceUpdate { .. } | WsMessage::SystemNotice { .. } => {
            // Server-originated events, ignore when a client sends them
            debug!("ignoring server-only frame from connection {}", handle.id());
        }
    }
}
