//! WebSocket message protocol shared by the client transport and the server.
//!
//! All messages are JSON-encoded, tagged by `type`, with snake_case names.

use crate::{Notification, Topic};
use serde::{Deserialize, Serialize};

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start receiving notifications for a topic.
    Subscribe { topic: Topic },
    /// Stop receiving notifications for a topic.
    Unsubscribe { topic: Topic },
    /// Publish a notification to every subscriber of a topic.
    Publish {
        topic: Topic,
        notification: Notification,
    },
    /// Keep-alive ping.
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The subscription is active.
    Subscribed { topic: Topic },
    /// The subscription was released.
    Unsubscribed { topic: Topic },
    /// A notification published on a subscribed topic.
    Notification {
        topic: Topic,
        notification: Notification,
    },
    /// Response to ping.
    Pong,
    /// Error message.
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        topic: Option<Topic>,
    },
}

impl ServerMessage {
    /// Create an error message.
    pub fn error(message: impl Into<String>, topic: Option<Topic>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            topic,
        }
    }

    /// Create a notification delivery.
    pub fn notification(topic: Topic, notification: Notification) -> Self {
        ServerMessage::Notification {
            topic,
            notification,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_deserialization() {
        let json = r#"{"type": "subscribe", "topic": "owner:alice"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Subscribe {
                topic: Topic::owner("alice")
            }
        );

        let json = r#"{"type": "ping"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg, ClientMessage::Ping);
    }

    #[test]
    fn publish_deserialization() {
        let json = r#"{
            "type": "publish",
            "topic": "changes",
            "notification": {"type": "remote_change_hint", "hint": {"kind": "delete", "id": "r-9"}}
        }"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::Publish {
                topic,
                notification,
            } => {
                assert_eq!(topic, Topic::ChangeFeed);
                assert_eq!(notification, Notification::delete_hint("r-9"));
            }
            _ => panic!("Expected Publish message"),
        }
    }

    #[test]
    fn invalid_topic_rejected() {
        let json = r#"{"type": "subscribe", "topic": "everything"}"#;
        assert!(serde_json::from_str::<ClientMessage>(json).is_err());
    }

    #[test]
    fn server_message_serialization() {
        let json = serde_json::to_string(&ServerMessage::Pong).unwrap();
        assert_eq!(json, r#"{"type":"pong"}"#);

        let msg = ServerMessage::error("forbidden topic", Some(Topic::owner("bob")));
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"error""#));
        assert!(json.contains(r#""message":"forbidden topic""#));
        assert!(json.contains(r#""topic":"owner:bob""#));

        let msg = ServerMessage::error("bad", None);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("topic"));
    }
}
