//! Append-only snapshot log, one gapless sequence per target.

use chrono::{DateTime, Utc};
use pulse_core::{AppendedSnapshot, Snapshot};
use sqlx::PgPool;
use uuid::Uuid;

use crate::DbError;

/// A row from the `snapshots` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SnapshotRow {
    pub id: Uuid,
    pub target_id: Uuid,
    pub sequence: i64,
    pub content_hash: String,
    pub canonical_text: String,
    pub truncated: bool,
    pub captured_at: DateTime<Utc>,
}

impl From<SnapshotRow> for Snapshot {
    fn from(row: SnapshotRow) -> Self {
        Snapshot {
            id: row.id,
            target_id: row.target_id,
            sequence: row.sequence,
            content_hash: row.content_hash,
            canonical_text: row.canonical_text,
            truncated: row.truncated,
            captured_at: row.captured_at,
        }
    }
}

/// Append a snapshot for `target_id` and return it together with the snapshot
/// it follows.
///
/// The sequence comes from the target row's counter. Bumping the counter takes
/// the row lock, so concurrent appends for the same target queue behind each
/// other and never skip or reuse a number; appends for different targets do
/// not contend.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the target does not exist, or
/// [`DbError::Sqlx`] if a statement fails (the transaction is rolled back).
pub async fn append_snapshot(
    pool: &PgPool,
    target_id: Uuid,
    content_hash: &str,
    canonical_text: &str,
    truncated: bool,
) -> Result<AppendedSnapshot, DbError> {
    let mut tx = pool.begin().await?;

    let sequence: i64 = sqlx::query_scalar(
        "UPDATE tracking_targets \
         SET last_sequence = last_sequence + 1 \
         WHERE id = $1 \
         RETURNING last_sequence",
    )
    .bind(target_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(DbError::NotFound)?;

    let row = sqlx::query_as::<_, SnapshotRow>(
        "INSERT INTO snapshots (id, target_id, sequence, content_hash, canonical_text, truncated) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING id, target_id, sequence, content_hash, canonical_text, truncated, captured_at",
    )
    .bind(Uuid::new_v4())
    .bind(target_id)
    .bind(sequence)
    .bind(content_hash)
    .bind(canonical_text)
    .bind(truncated)
    .fetch_one(&mut *tx)
    .await?;

    let previous = sqlx::query_as::<_, SnapshotRow>(
        "SELECT id, target_id, sequence, content_hash, canonical_text, truncated, captured_at \
         FROM snapshots \
         WHERE target_id = $1 AND sequence = $2",
    )
    .bind(target_id)
    .bind(sequence - 1)
    .fetch_optional(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(AppendedSnapshot {
        previous: previous.map(Snapshot::from),
        current: row.into(),
    })
}

/// The highest-sequence snapshot of a target, if any.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn latest_snapshot(pool: &PgPool, target_id: Uuid) -> Result<Option<Snapshot>, DbError> {
    let row = sqlx::query_as::<_, SnapshotRow>(
        "SELECT id, target_id, sequence, content_hash, canonical_text, truncated, captured_at \
         FROM snapshots \
         WHERE target_id = $1 \
         ORDER BY sequence DESC \
         LIMIT 1",
    )
    .bind(target_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Snapshot::from))
}

/// The most recent `limit` snapshots of a target, newest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_snapshots(
    pool: &PgPool,
    target_id: Uuid,
    limit: i64,
) -> Result<Vec<Snapshot>, DbError> {
    let rows = sqlx::query_as::<_, SnapshotRow>(
        "SELECT id, target_id, sequence, content_hash, canonical_text, truncated, captured_at \
         FROM snapshots \
         WHERE target_id = $1 \
         ORDER BY sequence DESC \
         LIMIT $2",
    )
    .bind(target_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Snapshot::from).collect())
}
