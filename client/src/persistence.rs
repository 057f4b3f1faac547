//! Persistence boundary to the source of truth.

use async_trait::async_trait;
use marksync_engine::{Record, RecordId};

use crate::error::{ClientError, Result};

/// Source of truth for an owner's records.
///
/// Every call is scoped to `owner_id`. Implementations must reject a
/// mismatch between `owner_id` and the records involved rather than
/// silently ignoring it.
#[async_trait]
pub trait Persistence: Send + Sync + 'static {
    /// Persist a new record. Inserting an id that already exists for the
    /// same owner returns the stored record.
    async fn insert(&self, owner_id: &str, record: &Record) -> Result<Record>;

    /// Delete a record. Deleting an absent id succeeds.
    async fn delete(&self, owner_id: &str, id: &RecordId) -> Result<()>;

    /// All records of `owner_id`, newest first.
    async fn query(&self, owner_id: &str) -> Result<Vec<Record>>;
}

/// Fail with [`ClientError::OwnerMismatch`] unless `record` belongs to `owner_id`.
pub fn ensure_owner(owner_id: &str, record: &Record) -> Result<()> {
    if record.is_owned_by(owner_id) {
        Ok(())
    } else {
        Err(ClientError::OwnerMismatch {
            expected: owner_id.to_string(),
            actual: record.owner_id.clone(),
        })
    }
}
