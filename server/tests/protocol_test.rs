//! Wire contract between replicas and the hub.
//!
//! These tests pin the JSON shapes the server accepts and emits, so that
//! clients written against the records API and the WebSocket hub keep
//! working across releases.

use marksync_engine::{
    ChangeHint, ClientMessage, Notification, Record, RecordDraft, ReplicaSnapshot, ServerMessage,
    Topic,
};
use serde_json::json;

/// Test helper to create a test record.
fn test_record(id: &str, owner: &str, created_at: u64) -> Record {
    Record::from_draft(
        id,
        owner,
        RecordDraft::new("Rust", "https://www.rust-lang.org"),
        created_at,
    )
}

#[cfg(test)]
mod records_api_tests {
    use super::*;

    #[test]
    fn test_record_body_is_camel_case() {
        let json = serde_json::to_value(test_record("bm-1", "alice", 1706745600000)).unwrap();

        assert_eq!(
            json,
            json!({
                "id": "bm-1",
                "ownerId": "alice",
                "title": "Rust",
                "url": "https://www.rust-lang.org",
                "createdAt": 1706745600000u64
            })
        );
    }

    #[test]
    fn test_record_body_with_favicon() {
        let json = r#"{
            "id": "bm-2",
            "ownerId": "alice",
            "title": "Docs",
            "url": "https://docs.rs",
            "favicon": "https://docs.rs/favicon.ico",
            "createdAt": 42
        }"#;

        let record: Record = serde_json::from_str(json).unwrap();
        assert_eq!(record.favicon.as_deref(), Some("https://docs.rs/favicon.ico"));
        assert!(record.is_owned_by("alice"));
    }

    #[test]
    fn test_list_response_is_plain_array() {
        let records = vec![test_record("b", "alice", 2), test_record("a", "alice", 1)];
        let json = serde_json::to_string(&records).unwrap();

        let snapshot: ReplicaSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snapshot.ids(), vec!["b", "a"]);
    }
}

#[cfg(test)]
mod websocket_protocol_tests {
    use super::*;

    #[test]
    fn test_client_subscribe_deserialization() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type": "subscribe", "topic": "owner:alice"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Subscribe {
                topic: Topic::owner("alice")
            }
        );

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type": "subscribe", "topic": "changes"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Subscribe {
                topic: Topic::ChangeFeed
            }
        );
    }

    #[test]
    fn test_client_unknown_topic_rejected() {
        let raw = r#"{"type": "subscribe", "topic": "everything"}"#;
        let result = serde_json::from_str::<ClientMessage>(raw);
        assert!(result.is_err());
    }

    #[test]
    fn test_client_publish_deserialization() {
        let json = r#"{
            "type": "publish",
            "topic": "owner:alice",
            "notification": {
                "type": "remote_insert_broadcast",
                "record": {
                    "id": "bm-1",
                    "ownerId": "alice",
                    "title": "Rust",
                    "url": "https://www.rust-lang.org",
                    "createdAt": 1706745600000
                }
            }
        }"#;

        match serde_json::from_str::<ClientMessage>(json).unwrap() {
            ClientMessage::Publish {
                topic,
                notification,
            } => {
                assert_eq!(topic, Topic::owner("alice"));
                assert_eq!(
                    notification.record(),
                    Some(&test_record("bm-1", "alice", 1706745600000))
                );
            }
            other => panic!("Expected Publish message, got {other:?}"),
        }
    }

    #[test]
    fn test_client_ping_deserialization() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type": "ping"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Ping);
    }

    #[test]
    fn test_server_insert_hint_is_redacted() {
        let msg = ServerMessage::notification(Topic::ChangeFeed, Notification::insert_hint());
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(
            json,
            json!({
                "type": "notification",
                "topic": "changes",
                "notification": {
                    "type": "remote_change_hint",
                    "hint": { "kind": "insert" }
                }
            })
        );
    }

    #[test]
    fn test_server_delete_hint_carries_id() {
        let msg = ServerMessage::notification(Topic::ChangeFeed, Notification::delete_hint("bm-1"));
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["notification"]["hint"], json!({"kind": "delete", "id": "bm-1"}));

        let parsed: ServerMessage = serde_json::from_value(json).unwrap();
        match parsed {
            ServerMessage::Notification { notification, .. } => assert_eq!(
                notification,
                Notification::RemoteChangeHint {
                    hint: ChangeHint::Delete { id: "bm-1".into() }
                }
            ),
            other => panic!("Expected Notification message, got {other:?}"),
        }
    }

    #[test]
    fn test_server_error_serialization() {
        let msg = ServerMessage::error(
            "alice may not subscribe to owner:bob",
            Some(Topic::owner("bob")),
        );
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["type"], "error");
        assert_eq!(json["topic"], "owner:bob");

        let without_topic = serde_json::to_value(ServerMessage::error("bad", None)).unwrap();
        assert!(without_topic.get("topic").is_none());
    }

    #[test]
    fn test_server_confirmations() {
        assert_eq!(
            serde_json::to_value(ServerMessage::Subscribed {
                topic: Topic::owner("alice")
            })
            .unwrap(),
            json!({"type": "subscribed", "topic": "owner:alice"})
        );
        assert_eq!(
            serde_json::to_value(ServerMessage::Pong).unwrap(),
            json!({"type": "pong"})
        );
    }
}
