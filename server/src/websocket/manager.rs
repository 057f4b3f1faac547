//! WebSocket connection manager.
//!
//! Tracks active connections and their topic subscriptions, and fans
//! notifications out to every subscriber of a topic. The publishing
//! connection is not excluded: a replica relies on dedup by id, not on the
//! hub, to ignore its own broadcasts.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use marksync_engine::{Notification, OwnerId, ServerMessage, Topic};
use tokio::sync::mpsc;

/// Sender for WebSocket messages.
pub type MessageSender = mpsc::UnboundedSender<ServerMessage>;

/// A single WebSocket connection.
#[derive(Debug)]
pub struct Connection {
    /// Unique identifier for this connection
    pub id: String,
    /// Authenticated owner of the connection
    pub owner_id: OwnerId,
    /// Channel to send messages to this connection
    pub sender: MessageSender,
}

/// Manages active WebSocket connections.
///
/// Thread-safe and can be shared across handlers via `Arc`.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    connections: DashMap<String, Connection>,
    /// Subscribed connection IDs per topic.
    by_topic: DashMap<Topic, HashSet<String>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new connection manager wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a new connection. Returns the connection ID.
    pub fn register(&self, owner_id: OwnerId, sender: MessageSender) -> String {
        let conn_id = uuid::Uuid::new_v4().to_string();

        self.connections.insert(
            conn_id.clone(),
            Connection {
                id: conn_id.clone(),
                owner_id,
                sender,
            },
        );

        tracing::info!(conn_id = %conn_id, "WebSocket connection registered");

        conn_id
    }

    /// Unregister a connection and drop all of its subscriptions.
    pub fn unregister(&self, conn_id: &str) {
        let Some((_, conn)) = self.connections.remove(conn_id) else {
            return;
        };

        self.by_topic.retain(|_, subscribers| {
            subscribers.remove(conn_id);
            !subscribers.is_empty()
        });

        tracing::info!(
            conn_id = %conn_id,
            owner_id = %conn.owner_id,
            "WebSocket connection unregistered"
        );
    }

    /// Owner of a registered connection.
    pub fn owner_of(&self, conn_id: &str) -> Option<OwnerId> {
        self.connections
            .get(conn_id)
            .map(|conn| conn.owner_id.clone())
    }

    /// Subscribe a connection to a topic. Returns `false` for unknown
    /// connections. Subscribing twice is a no-op.
    pub fn subscribe(&self, conn_id: &str, topic: Topic) -> bool {
        if !self.connections.contains_key(conn_id) {
            return false;
        }
        self.by_topic
            .entry(topic)
            .or_default()
            .insert(conn_id.to_string());
        true
    }

    /// Remove a connection's subscription to a topic.
    pub fn unsubscribe(&self, conn_id: &str, topic: &Topic) {
        let emptied = match self.by_topic.get_mut(topic) {
            Some(mut subscribers) => {
                subscribers.remove(conn_id);
                subscribers.is_empty()
            }
            None => false,
        };
        if emptied {
            self.by_topic.remove_if(topic, |_, subscribers| subscribers.is_empty());
        }
    }

    /// Publish a notification to every subscriber of `topic`.
    ///
    /// Returns the number of connections that received it.
    pub fn publish(&self, topic: &Topic, notification: &Notification) -> usize {
        let subscribers: Vec<String> = match self.by_topic.get(topic) {
            Some(subscribers) => subscribers.iter().cloned().collect(),
            None => return 0,
        };

        let message = ServerMessage::notification(topic.clone(), notification.clone());
        let sent = subscribers
            .iter()
            .filter(|conn_id| self.send_to(conn_id, message.clone()))
            .count();

        tracing::debug!(
            topic = %topic,
            kind = notification.kind(),
            recipients = sent,
            "Published notification"
        );

        sent
    }

    /// Send a message to a specific connection.
    pub fn send_to(&self, conn_id: &str, message: ServerMessage) -> bool {
        match self.connections.get(conn_id) {
            Some(conn) => conn.sender.send(message).is_ok(),
            None => false,
        }
    }

    /// Get the number of active connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of subscribers of a topic.
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.by_topic
            .get(topic)
            .map(|subscribers| subscribers.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_unregister() {
        let manager = ConnectionManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        let conn_id = manager.register("alice".to_string(), tx);
        assert_eq!(manager.connection_count(), 1);
        assert_eq!(manager.owner_of(&conn_id).as_deref(), Some("alice"));

        assert!(manager.subscribe(&conn_id, Topic::ChangeFeed));
        assert_eq!(manager.subscriber_count(&Topic::ChangeFeed), 1);

        manager.unregister(&conn_id);
        assert_eq!(manager.connection_count(), 0);
        assert_eq!(manager.subscriber_count(&Topic::ChangeFeed), 0);
    }

    #[test]
    fn test_subscribe_unknown_connection() {
        let manager = ConnectionManager::new();
        assert!(!manager.subscribe("missing", Topic::ChangeFeed));
        assert_eq!(manager.subscriber_count(&Topic::ChangeFeed), 0);
    }

    #[test]
    fn test_publish_reaches_topic_subscribers_including_sender() {
        let manager = ConnectionManager::new();

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let (tx3, mut rx3) = mpsc::unbounded_channel();

        let conn1 = manager.register("alice".to_string(), tx1);
        let conn2 = manager.register("alice".to_string(), tx2);
        let conn3 = manager.register("bob".to_string(), tx3);

        manager.subscribe(&conn1, Topic::owner("alice"));
        manager.subscribe(&conn2, Topic::owner("alice"));
        manager.subscribe(&conn3, Topic::owner("bob"));

        let notification = Notification::delete_hint("a");
        let sent = manager.publish(&Topic::owner("alice"), &notification);
        assert_eq!(sent, 2);

        let expected = ServerMessage::notification(Topic::owner("alice"), notification);
        assert_eq!(rx1.try_recv().unwrap(), expected);
        assert_eq!(rx2.try_recv().unwrap(), expected);
        assert!(rx3.try_recv().is_err());
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let manager = ConnectionManager::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn_id = manager.register("alice".to_string(), tx);

        manager.subscribe(&conn_id, Topic::ChangeFeed);
        manager.subscribe(&conn_id, Topic::ChangeFeed);
        manager.unsubscribe(&conn_id, &Topic::ChangeFeed);

        assert_eq!(
            manager.publish(&Topic::ChangeFeed, &Notification::insert_hint()),
            0
        );
        assert!(rx.try_recv().is_err());
    }
}
