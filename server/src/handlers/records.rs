//! Records handlers - owner-scoped reads and writes.
//!
//! Every committed write emits a hint on the change feed: inserts as a
//! redacted `ChangeHint::Insert`, deletes with the deleted id. Rejected or
//! no-op writes emit nothing.

use marksync_engine::{Notification, Record, RecordId, Topic};
use serde::Deserialize;
use sqlx::PgPool;

use crate::auth::AuthUser;
use crate::db::{self, InsertOutcome};
use crate::error::{AppError, Result};
use crate::websocket::ConnectionManager;

/// Query parameters for listing records.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub owner: String,
}

/// All records of the authenticated owner, newest first.
pub async fn handle_list(pool: &PgPool, auth: &AuthUser, query: ListQuery) -> Result<Vec<Record>> {
    auth.ensure_owner(&query.owner)?;

    let rows = db::list_records(pool, &query.owner).await?;
    Ok(rows.into_iter().map(|row| row.into_record()).collect())
}

/// Insert a record. Idempotent on id for the same owner.
pub async fn handle_insert(
    pool: &PgPool,
    hub: &ConnectionManager,
    auth: &AuthUser,
    record: Record,
) -> Result<Record> {
    auth.ensure_owner(&record.owner_id)?;
    validate_record(&record)?;

    match db::insert_record(pool, &record).await? {
        InsertOutcome::Inserted(stored) => {
            hub.publish(&Topic::ChangeFeed, &Notification::insert_hint());
            tracing::debug!(id = %stored.id, owner_id = %stored.owner_id, "Record inserted");
            Ok(stored)
        }
        InsertOutcome::Existing(existing) => {
            auth.ensure_owner(&existing.owner_id)?;
            Ok(existing)
        }
    }
}

/// Delete a record. Deleting an absent id succeeds.
pub async fn handle_delete(
    pool: &PgPool,
    hub: &ConnectionManager,
    auth: &AuthUser,
    id: RecordId,
) -> Result<()> {
    if db::delete_record(pool, &auth.owner_id, &id).await? {
        hub.publish(&Topic::ChangeFeed, &Notification::delete_hint(id.clone()));
        tracing::debug!(id = %id, owner_id = %auth.owner_id, "Record deleted");
        return Ok(());
    }

    match db::get_record(pool, &id).await? {
        Some(existing) => auth.ensure_owner(&existing.owner_id),
        None => Ok(()),
    }
}

/// Reject records the bookmarks table cannot hold as given.
fn validate_record(record: &Record) -> Result<()> {
    if record.id.is_empty() {
        return Err(AppError::BadRequest("record id must not be empty".to_string()));
    }
    if i64::try_from(record.created_at).is_err() {
        return Err(AppError::BadRequest(format!(
            "createdAt {} is out of range",
            record.created_at
        )));
    }
    Ok(())
}
