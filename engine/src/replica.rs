//! Replica state machine - the single merge point for local and remote changes.
//!
//! A [`Replica`] holds one owner's snapshot and applies optimistic local
//! writes, their settlement, and every incoming [`Notification`] through
//! [`Replica::apply`]. It performs no IO: callers run persistence calls and
//! reconciliation fetches themselves and feed the results back in.
//!
//! # Merge rules
//!
//! - Full-payload inserts are applied only if no record shares the id.
//! - Redacted insert hints produce [`Outcome::ReconcileNeeded`].
//! - Delete hints remove by id, a no-op when already absent.
//! - Reconciliation results replace the snapshot wholesale, but only for
//!   the latest issued fetch sequence. Writes still pending locally are
//!   overlaid on the replacement; nothing else filters it.
//!
//! Records are immutable and ids are never reused, so ids known to be
//! deleted are remembered (bounded) and a late full-payload insert never
//! resurrects them. A fetched snapshot that still holds such an id wins
//! and clears the tombstone.

use crate::{
    error::Result, ChangeHint, Error, FetchSeq, Notification, OwnerId, Record, RecordId,
    ReplicaSnapshot,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

/// How many deleted ids a replica remembers.
pub const TOMBSTONE_CAPACITY: usize = 1024;

/// Lifecycle phase of a replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Uninitialized,
    Ready,
}

/// State of the pub-sub link. Purely observational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Live,
}

/// A local write whose persistence call has not settled yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PendingWrite {
    Insert { record: Record },
    Delete { id: RecordId },
}

/// Why a notification left the snapshot unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// A record with the same id is already present.
    AlreadyPresent,
    /// The record to delete is already gone.
    AlreadyAbsent,
    /// The record belongs to a different owner.
    ForeignOwner,
    /// The record was deleted, locally or remotely.
    Deleted,
    /// A newer fetch was issued after this one.
    StaleFetch { seq: FetchSeq, latest: FetchSeq },
}

/// Result of applying a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A record was added.
    Inserted(RecordId),
    /// A record was removed.
    Removed(RecordId),
    /// The snapshot was replaced by a reconciliation result.
    Replaced { seq: FetchSeq },
    /// The notification is ambiguous; the caller must issue a fetch.
    ReconcileNeeded,
    /// Nothing changed.
    Ignored(IgnoreReason),
}

impl Outcome {
    /// Whether the snapshot may have changed.
    pub fn changed(&self) -> bool {
        matches!(
            self,
            Outcome::Inserted(_) | Outcome::Removed(_) | Outcome::Replaced { .. }
        )
    }
}

/// Bounded memory of deleted ids.
#[derive(Debug, Clone, Default)]
struct Tombstones {
    order: VecDeque<RecordId>,
    ids: HashSet<RecordId>,
}

impl Tombstones {
    fn insert(&mut self, id: RecordId) {
        if !self.ids.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        if self.order.len() > TOMBSTONE_CAPACITY {
            if let Some(old) = self.order.pop_front() {
                self.ids.remove(&old);
            }
        }
    }

    fn remove(&mut self, id: &str) {
        if self.ids.remove(id) {
            self.order.retain(|old| old != id);
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }
}

/// In-memory replica of one owner's records.
#[derive(Debug, Clone)]
pub struct Replica {
    owner_id: OwnerId,
    phase: Phase,
    snapshot: ReplicaSnapshot,
    status: ConnectionStatus,
    pending: Vec<PendingWrite>,
    tombstones: Tombstones,
    /// Sequence number of the latest issued fetch
    last_issued: FetchSeq,
    /// Sequence number of the latest applied fetch result
    last_applied: FetchSeq,
}

impl Replica {
    /// Create an uninitialized replica for an owner.
    pub fn new(owner_id: impl Into<OwnerId>) -> Self {
        Self {
            owner_id: owner_id.into(),
            phase: Phase::Uninitialized,
            snapshot: ReplicaSnapshot::new(),
            status: ConnectionStatus::Disconnected,
            pending: Vec::new(),
            tombstones: Tombstones::default(),
            last_issued: 0,
            last_applied: 0,
        }
    }

    /// Get the owner id.
    pub fn owner_id(&self) -> &OwnerId {
        &self.owner_id
    }

    /// Get the lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Check if the replica has been initialized.
    pub fn is_ready(&self) -> bool {
        self.phase == Phase::Ready
    }

    /// Get the current snapshot.
    pub fn snapshot(&self) -> &ReplicaSnapshot {
        &self.snapshot
    }

    /// Get the current connection status.
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Get writes whose persistence has not settled.
    pub fn pending(&self) -> &[PendingWrite] {
        &self.pending
    }

    /// Whether an insert of `id` is still waiting on persistence.
    pub fn is_pending_insert(&self, id: &str) -> bool {
        self.pending
            .iter()
            .any(|p| matches!(p, PendingWrite::Insert { record } if record.id == id))
    }

    /// Whether `id` is remembered as deleted.
    pub fn is_tombstoned(&self, id: &str) -> bool {
        self.tombstones.contains(id)
    }

    /// Sequence number of the latest issued fetch.
    pub fn latest_fetch(&self) -> FetchSeq {
        self.last_issued
    }

    /// Seed the replica with a server-provided snapshot.
    pub fn initialize(&mut self, seed: ReplicaSnapshot) {
        self.snapshot = seed;
        self.phase = Phase::Ready;
    }

    /// Record a status transition. Returns `true` if the status changed.
    pub fn set_status(&mut self, status: ConnectionStatus) -> bool {
        let changed = self.status != status;
        self.status = status;
        changed
    }

    /// Optimistically insert a record before persistence confirms it.
    ///
    /// Returns `true` if the snapshot changed.
    pub fn apply_local_insert(&mut self, record: Record) -> Result<bool> {
        self.ensure_ready()?;
        if !record.is_owned_by(&self.owner_id) {
            return Err(Error::OwnerMismatch {
                expected: self.owner_id.clone(),
                actual: record.owner_id,
            });
        }
        let inserted = self.snapshot.insert(record.clone());
        self.pending.push(PendingWrite::Insert { record });
        Ok(inserted)
    }

    /// Settle a pending insert. A failed insert is rolled back.
    ///
    /// Returns `true` if the snapshot changed.
    pub fn settle_insert(&mut self, id: &str, persisted: bool) -> bool {
        self.pending
            .retain(|p| !matches!(p, PendingWrite::Insert { record } if record.id == id));
        if persisted {
            false
        } else {
            self.snapshot.remove(id).is_some()
        }
    }

    /// Optimistically delete a record before persistence confirms it.
    ///
    /// Deleting an absent id is not an error.
    pub fn apply_local_delete(&mut self, id: &str) -> Result<Option<Record>> {
        self.ensure_ready()?;
        let removed = self.snapshot.remove(id);
        self.pending.push(PendingWrite::Delete { id: id.to_string() });
        Ok(removed)
    }

    /// Settle a pending delete.
    ///
    /// A failed delete does not re-insert anything: the prior position is
    /// not cached, so callers restore state with a reconciliation fetch.
    pub fn settle_delete(&mut self, id: &str, persisted: bool) {
        self.pending
            .retain(|p| !matches!(p, PendingWrite::Delete { id: pending } if pending == id));
        if persisted {
            self.tombstones.insert(id.to_string());
        }
    }

    /// Issue a new fetch sequence number. Results from earlier fetches
    /// will be discarded.
    pub fn begin_fetch(&mut self) -> FetchSeq {
        self.last_issued += 1;
        self.last_issued
    }

    /// Apply a notification.
    pub fn apply(&mut self, notification: Notification) -> Result<Outcome> {
        self.ensure_ready()?;
        let outcome = match notification {
            Notification::LocalInsertAck { record }
            | Notification::RemoteInsertBroadcast { record } => self.merge_insert(record),
            Notification::RemoteChangeHint {
                hint: ChangeHint::Insert,
            } => Outcome::ReconcileNeeded,
            Notification::RemoteChangeHint {
                hint: ChangeHint::Delete { id },
            } => self.merge_delete(id),
            Notification::ReconciliationResult { seq, snapshot } => {
                self.merge_snapshot(seq, snapshot)
            }
        };
        Ok(outcome)
    }

    fn merge_insert(&mut self, record: Record) -> Outcome {
        if !record.is_owned_by(&self.owner_id) {
            return Outcome::Ignored(IgnoreReason::ForeignOwner);
        }
        if self.tombstones.contains(&record.id) || self.is_pending_delete(&record.id) {
            return Outcome::Ignored(IgnoreReason::Deleted);
        }
        let id = record.id.clone();
        if self.snapshot.insert(record) {
            Outcome::Inserted(id)
        } else {
            Outcome::Ignored(IgnoreReason::AlreadyPresent)
        }
    }

    fn merge_delete(&mut self, id: RecordId) -> Outcome {
        self.tombstones.insert(id.clone());
        match self.snapshot.remove(&id) {
            Some(_) => Outcome::Removed(id),
            None => Outcome::Ignored(IgnoreReason::AlreadyAbsent),
        }
    }

    fn merge_snapshot(&mut self, seq: FetchSeq, snapshot: ReplicaSnapshot) -> Outcome {
        if seq != self.last_issued || seq <= self.last_applied {
            return Outcome::Ignored(IgnoreReason::StaleFetch {
                seq,
                latest: self.last_issued,
            });
        }
        self.last_applied = seq;

        let owner_id = &self.owner_id;
        let mut next = ReplicaSnapshot::from_records(
            snapshot
                .into_records()
                .into_iter()
                .filter(|r| r.is_owned_by(owner_id)),
        );
        for record in next.iter() {
            self.tombstones.remove(&record.id);
        }
        for pending in &self.pending {
            match pending {
                PendingWrite::Insert { record } => {
                    next.insert(record.clone());
                }
                PendingWrite::Delete { id } => {
                    next.remove(id);
                }
            }
        }
        self.snapshot = next;
        Outcome::Replaced { seq }
    }

    fn is_pending_delete(&self, id: &str) -> bool {
        self.pending
            .iter()
            .any(|p| matches!(p, PendingWrite::Delete { id: pending } if pending == id))
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }
}
