//! # Marksync Engine
//!
//! Deterministic merge logic for keeping a small ordered collection of
//! user-owned records consistent across independent client replicas.
//!
//! Replicas talk to each other only through a best-effort pub-sub channel
//! and an authoritative (but slow) re-fetch from the source of truth. This
//! crate holds the part of that problem that needs no IO: the data model,
//! the notification types, and the [`Replica`] state machine that merges
//! optimistic local writes with remote notifications.
//!
//! ## Design Principles
//!
//! - **No IO**: persistence, fetches and transports live in `marksync-client`
//! - **One merge point**: every change goes through [`Replica::apply`]
//! - **Idempotent**: applying a notification twice equals applying it once
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`Record`] is an immutable bookmark owned by exactly one owner. Records
//! are only ever created or removed. A [`ReplicaSnapshot`] keeps them
//! newest-first with no duplicate ids.
//!
//! ### Notifications
//!
//! A [`Notification`] is either a full-payload insert (trusted), a
//! [`ChangeHint`] from the storage change feed (redacted for inserts), or a
//! reconciliation result tagged with the fetch sequence that produced it.
//!
//! ## Quick Start
//!
//! ```rust
//! use marksync_engine::{Notification, Record, RecordDraft, Replica, ReplicaSnapshot};
//!
//! let mut replica = Replica::new("owner-1");
//! replica.initialize(ReplicaSnapshot::new());
//!
//! let record = Record::from_draft(
//!     "rec-1",
//!     "owner-1",
//!     RecordDraft::new("A", "https://a.test"),
//!     1706745600000,
//! );
//!
//! // Optimistic insert, then the broadcast echo of the same record.
//! replica.apply_local_insert(record.clone()).unwrap();
//! replica.settle_insert("rec-1", true);
//! replica
//!     .apply(Notification::RemoteInsertBroadcast { record })
//!     .unwrap();
//!
//! assert_eq!(replica.snapshot().len(), 1);
//! ```

pub mod error;
pub mod notification;
pub mod protocol;
pub mod record;
pub mod replica;
pub mod snapshot;

// Re-export main types at crate root
pub use error::Error;
pub use notification::{ChangeHint, InvalidTopic, Notification, Topic};
pub use protocol::{ClientMessage, ServerMessage};
pub use record::{Record, RecordDraft};
pub use replica::{
    ConnectionStatus, IgnoreReason, Outcome, PendingWrite, Phase, Replica, TOMBSTONE_CAPACITY,
};
pub use snapshot::ReplicaSnapshot;

/// Type aliases for clarity
pub type RecordId = String;
pub type OwnerId = String;
pub type Timestamp = u64;
pub type FetchSeq = u64;
