//! Record types for user-owned bookmarks.

use crate::{OwnerId, RecordId, Timestamp};
use serde::{Deserialize, Serialize};

/// Candidate fields for a new record.
///
/// Produced by the caller after validation and URL normalization; the
/// replica turns it into a [`Record`] by assigning identity and time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordDraft {
    /// Display title
    pub title: String,
    /// Normalized URL
    pub url: String,
    /// Optional favicon URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
}

impl RecordDraft {
    /// Create a draft without a favicon.
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            favicon: None,
        }
    }

    /// Attach a favicon URL.
    pub fn with_favicon(mut self, favicon: impl Into<String>) -> Self {
        self.favicon = Some(favicon.into());
        self
    }
}

/// A record owned by exactly one owner.
///
/// Records are immutable once created: they are only ever inserted or
/// removed, never edited in place. Identity is `id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Unique identifier for this record
    pub id: RecordId,
    /// Owner this record belongs to
    pub owner_id: OwnerId,
    /// Display title
    pub title: String,
    /// Normalized URL
    pub url: String,
    /// Optional favicon URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
    /// Creation time (milliseconds since epoch)
    pub created_at: Timestamp,
}

impl Record {
    /// Create a record from a draft.
    pub fn from_draft(
        id: impl Into<RecordId>,
        owner_id: impl Into<OwnerId>,
        draft: RecordDraft,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            title: draft.title,
            url: draft.url,
            favicon: draft.favicon,
            created_at,
        }
    }

    /// Check whether this record belongs to `owner_id`.
    pub fn is_owned_by(&self, owner_id: &str) -> bool {
        self.owner_id == owner_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_from_draft() {
        let draft = RecordDraft::new("A", "https://a.test").with_favicon("https://a.test/f.ico");
        let record = Record::from_draft("rec-1", "owner-1", draft, 1000);

        assert_eq!(record.id, "rec-1");
        assert_eq!(record.owner_id, "owner-1");
        assert_eq!(record.title, "A");
        assert_eq!(record.url, "https://a.test");
        assert_eq!(record.favicon.as_deref(), Some("https://a.test/f.ico"));
        assert_eq!(record.created_at, 1000);
        assert!(record.is_owned_by("owner-1"));
        assert!(!record.is_owned_by("owner-2"));
    }

    #[test]
    fn serialization_format() {
        let record = Record::from_draft("rec-1", "owner-1", RecordDraft::new("A", "u"), 5);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("ownerId"));
        assert!(json.contains("createdAt"));
        assert!(!json.contains("favicon"));
    }

    #[test]
    fn favicon_defaults_when_missing() {
        let json = r#"{"id":"r","ownerId":"o","title":"t","url":"u","createdAt":1}"#;
        let record: Record = serde_json::from_str(json).unwrap();
        assert_eq!(record.favicon, None);
    }
}
