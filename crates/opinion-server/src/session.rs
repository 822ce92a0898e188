//! WebSocket sessions.
//!
//! One task reads client events and dispatches them to the room registry;
//! a second task drains the connection's outbound queue into the socket.

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use opinion_shared::{ClientEvent, SendMessage, ServerEvent};

use crate::api::AppState;
use crate::relay::{Connection, RoomRegistry};

const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.registry))
}

async fn handle_socket(socket: WebSocket, registry: RoomRegistry) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerEvent>();

    let mut connection = registry.connect(outbound_tx);
    let conn_id = connection.id();
    info!(conn = %conn_id, "User connected");

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            let json = match event.to_json() {
                Ok(json) => json,
                Err(e) => {
                    error!(error = %e, "Failed to serialize server event");
                    continue;
                }
            };

            if ws_tx.send(WsMessage::Text(json)).await.is_err() {
                debug!("WebSocket send failed, client disconnected");
                return;
            }
        }

        // Every room released this connection; finish the close handshake.
        let _ = ws_tx.close().await;
    });

    while let Some(result) = ws_rx.next().await {
        let text = match result {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(_)) => {
                debug!(conn = %conn_id, "Client sent close frame");
                break;
            }
            // Pings are answered by the WebSocket layer itself.
            Ok(_) => continue,
            Err(e) => {
                warn!(conn = %conn_id, error = %e, "WebSocket error");
                break;
            }
        };

        match ClientEvent::from_json(&text) {
            Ok(event) => dispatch(&mut connection, event).await,
            Err(e) => warn!(conn = %conn_id, error = %e, "Ignoring malformed event"),
        }
    }

    // Leaves every joined room; history stays. Once the rooms drop their
    // outbound senders the writer drains and closes the socket.
    connection.disconnect();
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut send_task)
        .await
        .is_err()
    {
        debug!(conn = %conn_id, "Writer did not drain in time");
        send_task.abort();
    }
    info!(conn = %conn_id, "User disconnected");
}

async fn dispatch(connection: &mut Connection, event: ClientEvent) {
    let result = match event {
        ClientEvent::JoinRoom(room_id) => {
            debug!(conn = %connection.id(), room = %room_id, "join-room");
            connection.join(room_id).await
        }
        ClientEvent::SendMessage(SendMessage { room_id, message }) => {
            debug!(conn = %connection.id(), room = %room_id, "send-message");
            connection.post(room_id, message).await
        }
    };

    if let Err(e) = result {
        warn!(conn = %connection.id(), error = %e, "Dropping client event");
    }
}
