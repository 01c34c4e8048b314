//! Persisted weekly reports.

use chrono::{DateTime, Utc};
use pulse_core::{Report, ReportContents};
use sqlx::PgPool;
use uuid::Uuid;

use crate::DbError;

/// A row from the `reports` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReportRow {
    pub id: Uuid,
    pub week_label: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub total_changes: i64,
    pub contents: serde_json::Value,
    pub generated_at: DateTime<Utc>,
}

impl TryFrom<ReportRow> for Report {
    type Error = DbError;

    fn try_from(row: ReportRow) -> Result<Self, Self::Error> {
        let contents: ReportContents = serde_json::from_value(row.contents)?;
        Ok(Report {
            week_label: row.week_label,
            generated_at: row.generated_at,
            contents,
        })
    }
}

/// Store a report, replacing any report already stored for the same window.
///
/// Returns the row id.
///
/// # Errors
///
/// Returns [`DbError::Json`] if the contents cannot be encoded, or
/// [`DbError::Sqlx`] if the upsert fails.
pub async fn upsert_report(pool: &PgPool, report: &Report) -> Result<Uuid, DbError> {
    let contents = serde_json::to_value(&report.contents)?;
    let total = i64::try_from(report.contents.total_changes).unwrap_or(i64::MAX);

    let id: Uuid = sqlx::query_scalar(
        "INSERT INTO reports (id, week_label, window_start, window_end, total_changes, \
                              contents, generated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         ON CONFLICT (window_start, window_end) DO UPDATE SET \
             week_label = EXCLUDED.week_label, \
             total_changes = EXCLUDED.total_changes, \
             contents = EXCLUDED.contents, \
             generated_at = EXCLUDED.generated_at \
         RETURNING id",
    )
    .bind(Uuid::new_v4())
    .bind(&report.week_label)
    .bind(report.contents.window_start)
    .bind(report.contents.window_end)
    .bind(total)
    .bind(contents)
    .bind(report.generated_at)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// The most recent `limit` stored reports, newest window first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails, or [`DbError::Json`] if
/// stored contents no longer decode.
pub async fn list_reports(pool: &PgPool, limit: i64) -> Result<Vec<Report>, DbError> {
    sqlx::query_as::<_, ReportRow>(
        "SELECT id, week_label, window_start, window_end, total_changes, contents, generated_at \
         FROM reports \
         ORDER BY window_start DESC, id DESC \
         LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(Report::try_from)
    .collect()
}
