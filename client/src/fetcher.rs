//! Reconciliation fetcher - authoritative re-read of an owner's records.

use std::sync::Arc;

use marksync_engine::ReplicaSnapshot;

use crate::error::Result;
use crate::persistence::{ensure_owner, Persistence};

/// Stateless, owner-scoped query against the source of truth.
///
/// Scoping is asserted here rather than trusted to the server: a result
/// containing another owner's record fails the whole fetch.
#[derive(Clone)]
pub struct ReconciliationFetcher {
    persistence: Arc<dyn Persistence>,
}

impl ReconciliationFetcher {
    /// Create a fetcher over a persistence boundary.
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self { persistence }
    }

    /// Fetch the full, newest-first snapshot for `owner_id`.
    pub async fn fetch(&self, owner_id: &str) -> Result<ReplicaSnapshot> {
        let records = self.persistence.query(owner_id).await?;
        for record in &records {
            ensure_owner(owner_id, record)?;
        }

        tracing::debug!(
            owner_id = %owner_id,
            records = records.len(),
            "Reconciliation fetch complete"
        );

        Ok(ReplicaSnapshot::from_records(records))
    }
}
