//! Database operations for the bookmarks table.

use marksync_engine::Record;
use sqlx::{PgPool, Row};

/// A stored bookmark row.
#[derive(Debug)]
pub struct StoredRecord {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub url: String,
    pub favicon: Option<String>,
    pub created_at: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredRecord {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredRecord {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            title: row.try_get("title")?,
            url: row.try_get("url")?,
            favicon: row.try_get("favicon")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl StoredRecord {
    /// Convert a database row to an engine record.
    pub fn into_record(self) -> Record {
        Record {
            id: self.id,
            owner_id: self.owner_id,
            title: self.title,
            url: self.url,
            favicon: self.favicon,
            created_at: self.created_at.max(0) as u64,
        }
    }
}

/// Result of an insert.
#[derive(Debug)]
pub enum InsertOutcome {
    /// The row was written.
    Inserted(Record),
    /// A row with the same id already existed and was left untouched.
    Existing(Record),
}

/// Insert a record unless its id is already taken.
pub async fn insert_record(pool: &PgPool, record: &Record) -> Result<InsertOutcome, sqlx::Error> {
    let created_at =
        i64::try_from(record.created_at).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

    let inserted = sqlx::query_as::<_, StoredRecord>(
        r#"
        INSERT INTO bookmarks (id, owner_id, title, url, favicon, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (id) DO NOTHING
        RETURNING id, owner_id, title, url, favicon, created_at
        "#,
    )
    .bind(&record.id)
    .bind(&record.owner_id)
    .bind(&record.title)
    .bind(&record.url)
    .bind(&record.favicon)
    .bind(created_at)
    .fetch_optional(pool)
    .await?;

    if let Some(row) = inserted {
        return Ok(InsertOutcome::Inserted(row.into_record()));
    }

    match get_record(pool, &record.id).await? {
        Some(existing) => Ok(InsertOutcome::Existing(existing.into_record())),
        // Deleted between the conflict and the read.
        None => Err(sqlx::Error::RowNotFound),
    }
}

/// Get a record by ID.
pub async fn get_record(pool: &PgPool, id: &str) -> Result<Option<StoredRecord>, sqlx::Error> {
    sqlx::query_as::<_, StoredRecord>(
        r#"
        SELECT id, owner_id, title, url, favicon, created_at
        FROM bookmarks
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Delete an owner's record. Returns whether a row was removed.
pub async fn delete_record(pool: &PgPool, owner_id: &str, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM bookmarks WHERE id = $1 AND owner_id = $2")
        .bind(id)
        .bind(owner_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// All records of an owner, newest first.
pub async fn list_records(pool: &PgPool, owner_id: &str) -> Result<Vec<StoredRecord>, sqlx::Error> {
    sqlx::query_as::<_, StoredRecord>(
        r#"
        SELECT id, owner_id, title, url, favicon, created_at
        FROM bookmarks
        WHERE owner_id = $1
        ORDER BY created_at DESC, seq DESC
        "#,
    )
    .bind(owner_id)
    .fetch_all(pool)
    .await
}
