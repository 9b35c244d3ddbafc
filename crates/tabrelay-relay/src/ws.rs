//! Persistent WebSocket connection to the browser extension.
//!
//! Text frames carry JSON objects. Outbound commands carry a `requestId`;
//! inbound frames with a `requestId` are responses, anything else is a
//! browser event and only logged.

use axum::extract::State;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use tabrelay_core::Message;

use crate::state::RelayState;

/// Outbound frames buffered per connection.
const OUTBOUND_CAPACITY: usize = 64;

/// `GET /ws`
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<RelayState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: RelayState, mut socket: WebSocket) {
    let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_CAPACITY);
    let conn = state.registry.register(tx).await;
    info!(connection_id = %conn.id, "Browser connected over WebSocket");

    loop {
        tokio::select! {
            inbound = socket.recv() => match inbound {
                Some(Ok(WsMessage::Text(text))) => handle_frame(&state, text.as_str()).await,
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(connection_id = %conn.id, error = %e, "WebSocket receive failed");
                    break;
                }
            },
            outbound = rx.recv() => {
                let Some(message) = outbound else { break };
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "Failed to encode outbound frame");
                        continue;
                    }
                };
                if let Err(e) = socket.send(WsMessage::Text(text.into())).await {
                    warn!(connection_id = %conn.id, error = %e, "WebSocket send failed");
                    break;
                }
            }
        }
    }

    state.registry.unregister(&conn.id).await;
    info!(connection_id = %conn.id, "Browser disconnected");
}

async fn handle_frame(state: &RelayState, text: &str) {
    let message = match serde_json::from_str(text).ok().and_then(Message::from_value) {
        Some(message) => message,
        None => {
            warn!(len = text.len(), "Ignoring non-object WebSocket frame");
            return;
        }
    };
    if message.request_id().is_some() {
        state.accept_response(message).await;
    } else {
        debug!(
            event = message.action().or_else(|| message.get_str("type")).unwrap_or("unknown"),
            "Browser event"
        );
    }
}
