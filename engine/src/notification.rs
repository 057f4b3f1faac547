//! Change notifications and channel topics.
//!
//! Notifications arrive with varying trust. Full-payload inserts carry the
//! record itself; change hints from the storage layer's own feed are
//! redacted by its access policy, so an insert hint carries nothing at all
//! and must be resolved with a reconciliation fetch.

use crate::{FetchSeq, OwnerId, Record, RecordId, ReplicaSnapshot};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Hint from the storage layer's change feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeHint {
    /// A row was inserted somewhere. Contents are redacted, so the hint
    /// cannot be matched against an owner and carries no id.
    Insert,
    /// A row was deleted. The id survives redaction.
    Delete { id: RecordId },
}

/// A change delivered to a replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// This replica's own insert was persisted.
    LocalInsertAck { record: Record },
    /// Another replica's insert, sent by the inserting replica.
    RemoteInsertBroadcast { record: Record },
    /// Low-trust hint from the storage change feed.
    RemoteChangeHint { hint: ChangeHint },
    /// Authoritative snapshot from a reconciliation fetch issued as `seq`.
    ReconciliationResult {
        seq: FetchSeq,
        snapshot: ReplicaSnapshot,
    },
}

impl Notification {
    /// Create an insert hint (redacted).
    pub fn insert_hint() -> Self {
        Notification::RemoteChangeHint {
            hint: ChangeHint::Insert,
        }
    }

    /// Create a delete hint.
    pub fn delete_hint(id: impl Into<RecordId>) -> Self {
        Notification::RemoteChangeHint {
            hint: ChangeHint::Delete { id: id.into() },
        }
    }

    /// Full record payload, if this notification carries one.
    pub fn record(&self) -> Option<&Record> {
        match self {
            Notification::LocalInsertAck { record }
            | Notification::RemoteInsertBroadcast { record } => Some(record),
            _ => None,
        }
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::LocalInsertAck { .. } => "local_insert_ack",
            Notification::RemoteInsertBroadcast { .. } => "remote_insert_broadcast",
            Notification::RemoteChangeHint {
                hint: ChangeHint::Insert,
            } => "insert_hint",
            Notification::RemoteChangeHint {
                hint: ChangeHint::Delete { .. },
            } => "delete_hint",
            Notification::ReconciliationResult { .. } => "reconciliation_result",
        }
    }
}

/// A pub-sub topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Per-owner broadcast topic.
    Owner(OwnerId),
    /// The storage layer's change feed. Never filtered by owner.
    ChangeFeed,
}

const OWNER_PREFIX: &str = "owner:";
const CHANGE_FEED: &str = "changes";

impl Topic {
    /// Topic for an owner.
    pub fn owner(owner_id: impl Into<OwnerId>) -> Self {
        Topic::Owner(owner_id.into())
    }

    /// Owner scoping this topic, if any.
    pub fn owner_id(&self) -> Option<&OwnerId> {
        match self {
            Topic::Owner(id) => Some(id),
            Topic::ChangeFeed => None,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Owner(id) => write!(f, "{OWNER_PREFIX}{id}"),
            Topic::ChangeFeed => f.write_str(CHANGE_FEED),
        }
    }
}

/// Error parsing a topic string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid topic: {0}")]
pub struct InvalidTopic(pub String);

impl FromStr for Topic {
    type Err = InvalidTopic;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == CHANGE_FEED {
            return Ok(Topic::ChangeFeed);
        }
        match s.strip_prefix(OWNER_PREFIX) {
            Some(id) if !id.is_empty() => Ok(Topic::Owner(id.to_string())),
            _ => Err(InvalidTopic(s.to_string())),
        }
    }
}

impl Serialize for Topic {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Topic {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
