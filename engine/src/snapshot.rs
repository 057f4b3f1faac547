//! Ordered, duplicate-free collection of records held by a replica.
//!
//! # Ordering
//!
//! Records are kept newest-first by `created_at`. Records with equal
//! timestamps keep the order in which this replica observed them, the most
//! recently inserted one first. No two records share an `id`.

use crate::{Record, RecordId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Ordered snapshot of an owner's records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Record>", into = "Vec<Record>")]
pub struct ReplicaSnapshot {
    records: Vec<Record>,
}

impl ReplicaSnapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    /// Build a snapshot from records in any order.
    ///
    /// Sorting is stable, so records with equal timestamps keep their input
    /// order. When two records share an id, the first one wins.
    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Self {
        let mut seen = HashSet::new();
        let mut records: Vec<Record> = records
            .into_iter()
            .filter(|r| seen.insert(r.id.clone()))
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Self { records }
    }

    /// Insert a record unless one with the same id is already present.
    ///
    /// Returns `true` if the record was inserted.
    pub fn insert(&mut self, record: Record) -> bool {
        if self.contains(&record.id) {
            return false;
        }
        let pos = self
            .records
            .iter()
            .position(|r| r.created_at <= record.created_at)
            .unwrap_or(self.records.len());
        self.records.insert(pos, record);
        true
    }

    /// Remove the record with the given id, if present.
    pub fn remove(&mut self, id: &str) -> Option<Record> {
        let pos = self.records.iter().position(|r| r.id == id)?;
        Some(self.records.remove(pos))
    }

    /// Check if a record with the given id is present.
    pub fn contains(&self, id: &str) -> bool {
        self.records.iter().any(|r| r.id == id)
    }

    /// Get a record by id.
    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the snapshot holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate records newest-first.
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    /// Records as an ordered slice.
    pub fn as_slice(&self) -> &[Record] {
        &self.records
    }

    /// Record ids in snapshot order.
    pub fn ids(&self) -> Vec<&RecordId> {
        self.records.iter().map(|r| &r.id).collect()
    }

    /// Consume the snapshot, returning its ordered records.
    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

impl From<Vec<Record>> for ReplicaSnapshot {
    fn from(records: Vec<Record>) -> Self {
        Self::from_records(records)
    }
}

impl From<ReplicaSnapshot> for Vec<Record> {
    fn from(snapshot: ReplicaSnapshot) -> Self {
        snapshot.records
    }
}

impl<'a> IntoIterator for &'a ReplicaSnapshot {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RecordDraft;

    fn record(id: &str, created_at: u64) -> Record {
        Record::from_draft(id, "owner-1", RecordDraft::new(id, "https://x.test"), created_at)
    }

    #[test]
    fn create_empty_snapshot() {
        let snapshot = ReplicaSnapshot::new();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.len(), 0);
    }

    #[test]
    fn from_records_sorts_newest_first() {
        let snapshot =
            ReplicaSnapshot::from_records(vec![record("a", 1), record("c", 3), record("b", 2)]);
        assert_eq!(snapshot.ids(), vec!["c", "b", "a"]);
    }

    #[test]
    fn from_records_keeps_input_order_on_ties() {
        let snapshot =
            ReplicaSnapshot::from_records(vec![record("x", 5), record("y", 5), record("z", 9)]);
        assert_eq!(snapshot.ids(), vec!["z", "x", "y"]);
    }

    #[test]
    fn from_records_drops_duplicate_ids() {
        let mut dup = record("a", 1);
        dup.title = "second".into();
        let snapshot = ReplicaSnapshot::from_records(vec![record("a", 1), dup]);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("a").unwrap().title, "a");
    }

    #[test]
    fn insert_goes_to_head() {
        let mut snapshot = ReplicaSnapshot::from_records(vec![record("a", 1)]);
        assert!(snapshot.insert(record("b", 2)));
        assert_eq!(snapshot.ids(), vec!["b", "a"]);
    }

    #[test]
    fn insert_tie_goes_before_existing() {
        let mut snapshot = ReplicaSnapshot::from_records(vec![record("a", 1)]);
        assert!(snapshot.insert(record("b", 1)));
        assert_eq!(snapshot.ids(), vec!["b", "a"]);
    }

    #[test]
    fn insert_older_record_keeps_order() {
        let mut snapshot = ReplicaSnapshot::from_records(vec![record("c", 3), record("a", 1)]);
        assert!(snapshot.insert(record("b", 2)));
        assert_eq!(snapshot.ids(), vec!["c", "b", "a"]);

        assert!(snapshot.insert(record("z", 0)));
        assert_eq!(snapshot.ids(), vec!["c", "b", "a", "z"]);
    }

    #[test]
    fn insert_duplicate_is_noop() {
        let mut snapshot = ReplicaSnapshot::new();
        assert!(snapshot.insert(record("a", 1)));
        assert!(!snapshot.insert(record("a", 1)));
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn remove_present_and_absent() {
        let mut snapshot = ReplicaSnapshot::from_records(vec![record("a", 1), record("b", 2)]);
        assert_eq!(snapshot.remove("a").map(|r| r.id), Some("a".to_string()));
        assert!(snapshot.remove("a").is_none());
        assert_eq!(snapshot.ids(), vec!["b"]);
    }

    #[test]
    fn deserialization_restores_invariants() {
        let json = serde_json::to_string(&vec![record("a", 1), record("b", 2), record("a", 1)])
            .unwrap();
        let snapshot: ReplicaSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snapshot.ids(), vec!["b", "a"]);
    }
}
