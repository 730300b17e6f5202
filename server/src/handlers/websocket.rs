//! WebSocket handler for live collection subscriptions.
//!
//! A connection subscribes to one collection, optionally filtered, and
//! receives a change frame for every matching write until it disconnects.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use gymsync_engine::Filter;
use tokio::sync::mpsc;

use crate::websocket::{ClientMessage, ServerMessage, SubscriptionManager};

/// Handle an established subscription connection.
///
/// Registers with the manager, forwards published changes to the socket,
/// answers pings, and unregisters on disconnect.
pub async fn handle_subscription(
    socket: WebSocket,
    subscriptions: Arc<SubscriptionManager>,
    collection: String,
    filter: Option<Filter>,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let conn_id = subscriptions.register(collection.clone(), filter, tx);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        tracing::warn!("Failed to send WebSocket message: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize WebSocket message: {}", e);
                }
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let response = process_message(text.as_str());
                subscriptions.send_to(&conn_id, response);
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!("Binary messages not supported");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                tracing::info!(conn_id = %conn_id, "WebSocket close frame received");
                break;
            }
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    subscriptions.unregister(&conn_id);
    send_task.abort();

    tracing::info!(
        conn_id = %conn_id,
        collection = %collection,
        active_connections = subscriptions.connection_count(),
        "WebSocket client disconnected"
    );
}

/// Answer a client frame.
fn process_message(text: &str) -> ServerMessage {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Ping) => ServerMessage::Pong,
        Err(e) => ServerMessage::error(format!("Invalid message format: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_message() {
        assert_eq!(process_message(r#"{"type":"ping"}"#), ServerMessage::Pong);
        assert!(matches!(
            process_message("not json"),
            ServerMessage::Error { .. }
        ));
    }
}
