//! Persisted changes and the windowed read used by reports.

use chrono::{DateTime, Utc};
use pulse_core::{Change, ChangeKind, ChangeWithSubject, NewChange, Severity};
use sqlx::PgPool;
use uuid::Uuid;

use crate::DbError;

/// A row from the `changes` table, joined with the subject name.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChangeRow {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub subject_name: String,
    pub target_id: Uuid,
    pub run_id: Option<Uuid>,
    pub kind: String,
    pub severity: String,
    pub summary: String,
    pub significance: f64,
    pub previous_snapshot_id: Uuid,
    pub current_snapshot_id: Uuid,
    pub detected_at: DateTime<Utc>,
}

impl TryFrom<ChangeRow> for ChangeWithSubject {
    type Error = DbError;

    fn try_from(row: ChangeRow) -> Result<Self, Self::Error> {
        let kind = ChangeKind::parse(&row.kind).ok_or_else(|| DbError::InvalidValue {
            column: "changes.kind",
            value: row.kind.clone(),
        })?;
        let severity = Severity::parse(&row.severity).ok_or_else(|| DbError::InvalidValue {
            column: "changes.severity",
            value: row.severity.clone(),
        })?;
        Ok(ChangeWithSubject {
            subject_name: row.subject_name,
            change: Change {
                id: row.id,
                subject_id: row.subject_id,
                target_id: row.target_id,
                run_id: row.run_id,
                kind,
                severity,
                summary: row.summary,
                significance: row.significance,
                previous_snapshot_id: row.previous_snapshot_id,
                current_snapshot_id: row.current_snapshot_id,
                detected_at: row.detected_at,
            },
        })
    }
}

const CHANGE_SELECT: &str = "SELECT c.id, c.subject_id, s.name AS subject_name, c.target_id, \
            c.run_id, c.kind, c.severity, c.summary, c.significance, \
            c.previous_snapshot_id, c.current_snapshot_id, c.detected_at \
     FROM changes c \
     JOIN subjects s ON s.id = c.subject_id";

/// Persist a change.
///
/// At most one change exists per `current_snapshot_id`; inserting a second one
/// for the same snapshot returns the change already stored.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if a statement fails.
pub async fn insert_change(pool: &PgPool, change: &NewChange) -> Result<Change, DbError> {
    let inserted: Option<Uuid> = sqlx::query_scalar(
        "INSERT INTO changes (id, subject_id, target_id, run_id, kind, severity, summary, \
                              significance, previous_snapshot_id, current_snapshot_id, detected_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
         ON CONFLICT (current_snapshot_id) DO NOTHING \
         RETURNING id",
    )
    .bind(Uuid::new_v4())
    .bind(change.subject_id)
    .bind(change.target_id)
    .bind(change.run_id)
    .bind(change.kind.as_str())
    .bind(change.severity.as_str())
    .bind(&change.summary)
    .bind(change.significance)
    .bind(change.previous_snapshot_id)
    .bind(change.current_snapshot_id)
    .bind(change.detected_at)
    .fetch_optional(pool)
    .await?;

    if let Some(id) = inserted {
        return Ok(Change::from_new(id, change.clone()));
    }

    let existing = sqlx::query_as::<_, ChangeRow>(&format!(
        "{CHANGE_SELECT} WHERE c.current_snapshot_id = $1"
    ))
    .bind(change.current_snapshot_id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(ChangeWithSubject::try_from(existing)?.change)
}

/// Changes with `start <= detected_at < end`, oldest first, each with its subject name.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails, or [`DbError::InvalidValue`]
/// if a stored kind or severity is unknown.
pub async fn list_changes_in_window(
    pool: &PgPool,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<ChangeWithSubject>, DbError> {
    sqlx::query_as::<_, ChangeRow>(&format!(
        "{CHANGE_SELECT} \
         WHERE c.detected_at >= $1 AND c.detected_at < $2 \
         ORDER BY c.detected_at, c.id"
    ))
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(ChangeWithSubject::try_from)
    .collect()
}
