//! WebSocket handler for the pub-sub hub.
//!
//! Handles WebSocket connections and dispatches subscribe, unsubscribe and
//! publish requests to the [`ConnectionManager`].

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use marksync_engine::{Notification, Topic};
use tokio::sync::mpsc;

use crate::websocket::{ClientMessage, ConnectionManager, ServerMessage};

/// Handle an established WebSocket connection.
///
/// This function:
/// 1. Registers the connection with the manager
/// 2. Spawns a task to forward outgoing messages
/// 3. Processes incoming messages in a loop
/// 4. Cleans up on disconnect
pub async fn handle_websocket_connection(
    socket: WebSocket,
    conn_manager: Arc<ConnectionManager>,
    owner_id: String,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let conn_id = conn_manager.register(owner_id.clone(), tx);

    tracing::info!(
        conn_id = %conn_id,
        owner_id = %owner_id,
        "WebSocket client connected"
    );

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
                if let Some(response) = process_message(&text, &conn_manager, &conn_id, &owner_id) {
                    conn_manager.send_to(&conn_id, response);
                }
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

    conn_manager.unregister(&conn_id);
    send_task.abort();

    tracing::info!(
        conn_id = %conn_id,
        owner_id = %owner_id,
        active_connections = conn_manager.connection_count(),
        "WebSocket client disconnected"
    );
}

/// Process a client message. Publishing has no reply.
fn process_message(
    text: &str,
    conn_manager: &ConnectionManager,
    conn_id: &str,
    owner_id: &str,
) -> Option<ServerMessage> {
    let client_msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            return Some(ServerMessage::error(
                format!("Invalid message format: {}", e),
                None,
            ));
        }
    };

    match client_msg {
        ClientMessage::Subscribe { topic } => {
            if let Err(message) = authorize_subscribe(owner_id, &topic) {
                tracing::warn!(conn_id = %conn_id, topic = %topic, "{}", message);
                return Some(ServerMessage::error(message, Some(topic)));
            }
            conn_manager.subscribe(conn_id, topic.clone());
            Some(ServerMessage::Subscribed { topic })
        }

        ClientMessage::Unsubscribe { topic } => {
            conn_manager.unsubscribe(conn_id, &topic);
            Some(ServerMessage::Unsubscribed { topic })
        }

        ClientMessage::Publish {
            topic,
            notification,
        } => {
            if let Err(message) = authorize_publish(owner_id, &topic, &notification) {
                tracing::warn!(conn_id = %conn_id, topic = %topic, "{}", message);
                return Some(ServerMessage::error(message, Some(topic)));
            }
            conn_manager.publish(&topic, &notification);
            None
        }

        ClientMessage::Ping => Some(ServerMessage::Pong),
    }
}

/// Owner topics are private to their owner; the change feed is open to
/// every authenticated connection.
fn authorize_subscribe(owner_id: &str, topic: &Topic) -> Result<(), String> {
    match topic {
        Topic::Owner(target) if target != owner_id => {
            Err(format!("{} may not subscribe to {}", owner_id, topic))
        }
        _ => Ok(()),
    }
}

/// Connections may only publish on their own owner topic, and only
/// records they own.
fn authorize_publish(
    owner_id: &str,
    topic: &Topic,
    notification: &Notification,
) -> Result<(), String> {
    if topic.owner_id().map(String::as_str) != Some(owner_id) {
        return Err(format!("{} may not publish to {}", owner_id, topic));
    }
    if let Some(record) = notification.record() {
        if !record.is_owned_by(owner_id) {
            return Err(format!(
                "{} may not publish records of {}",
                owner_id, record.owner_id
            ));
        }
    }
    Ok(())
}
