//! Subjects and their tracking targets.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use pulse_core::{SourceKind, Subject, SubjectConfig, SubjectStatus, TrackingTarget};
use sqlx::PgPool;
use uuid::Uuid;

use crate::DbError;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A row from the `subjects` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SubjectRow {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub category: Option<String>,
    pub primary_site: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_observed_at: Option<DateTime<Utc>>,
}

/// A row from the `tracking_targets` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TargetRow {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub url: String,
    pub kind: String,
    pub position: i32,
    pub last_sequence: i64,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<TargetRow> for TrackingTarget {
    type Error = DbError;

    fn try_from(row: TargetRow) -> Result<Self, Self::Error> {
        let kind = SourceKind::parse(&row.kind).ok_or_else(|| DbError::InvalidValue {
            column: "tracking_targets.kind",
            value: row.kind.clone(),
        })?;
        Ok(TrackingTarget {
            id: row.id,
            subject_id: row.subject_id,
            url: row.url,
            kind,
        })
    }
}

impl SubjectRow {
    /// Combine the row with its targets into the domain type.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidValue`] if the stored status is unknown.
    pub fn into_subject(self, targets: Vec<TrackingTarget>) -> Result<Subject, DbError> {
        let status = SubjectStatus::parse(&self.status).ok_or_else(|| DbError::InvalidValue {
            column: "subjects.status",
            value: self.status.clone(),
        })?;
        Ok(Subject {
            id: self.id,
            slug: self.slug,
            name: self.name,
            category: self.category,
            primary_site: self.primary_site,
            status,
            targets,
            created_at: self.created_at,
            last_observed_at: self.last_observed_at,
        })
    }
}

/// Outcome counts of a [`sync_subjects`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub subjects: usize,
    pub targets: usize,
    pub targets_removed: u64,
}

const SUBJECT_COLUMNS: &str = "id, slug, name, category, primary_site, status, \
                               created_at, updated_at, last_observed_at";

const TARGET_COLUMNS: &str = "id, subject_id, url, kind, position, last_sequence, created_at";

// ---------------------------------------------------------------------------
// Sync
// ---------------------------------------------------------------------------

/// Upsert subjects from config, keyed by slug, together with their targets.
///
/// Targets are keyed by `(subject_id, url)`. Targets present in the database
/// but absent from a subject's config are deleted along with their snapshots.
/// Everything runs in one transaction.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any statement fails; nothing is written in that case.
pub async fn sync_subjects(
    pool: &PgPool,
    subjects: &[SubjectConfig],
) -> Result<SyncSummary, DbError> {
    let mut tx = pool.begin().await?;
    let mut summary = SyncSummary::default();

    for subject in subjects {
        let subject_id: Uuid = sqlx::query_scalar(
            "INSERT INTO subjects (id, slug, name, category, primary_site, status) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (slug) DO UPDATE SET \
                 name = EXCLUDED.name, \
                 category = EXCLUDED.category, \
                 primary_site = EXCLUDED.primary_site, \
                 status = EXCLUDED.status, \
                 updated_at = NOW() \
             RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(subject.slug())
        .bind(&subject.name)
        .bind(&subject.category)
        .bind(&subject.primary_site)
        .bind(subject.status.to_string())
        .fetch_one(&mut *tx)
        .await?;

        let mut urls = Vec::with_capacity(subject.targets.len());
        for (position, target) in subject.targets.iter().enumerate() {
            let position = i32::try_from(position).unwrap_or(i32::MAX);
            sqlx::query(
                "INSERT INTO tracking_targets (id, subject_id, url, kind, position) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (subject_id, url) DO UPDATE SET \
                     kind = EXCLUDED.kind, \
                     position = EXCLUDED.position",
            )
            .bind(Uuid::new_v4())
            .bind(subject_id)
            .bind(&target.url)
            .bind(target.resolved_kind().as_str())
            .bind(position)
            .execute(&mut *tx)
            .await?;
            urls.push(target.url.clone());
        }

        let removed = sqlx::query(
            "DELETE FROM tracking_targets \
             WHERE subject_id = $1 AND NOT (url = ANY($2))",
        )
        .bind(subject_id)
        .bind(&urls)
        .execute(&mut *tx)
        .await?;

        summary.subjects += 1;
        summary.targets += urls.len();
        summary.targets_removed += removed.rows_affected();
    }

    tx.commit().await?;
    Ok(summary)
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// Active subjects with their targets, ordered by name then target position.
///
/// When `slug` is given only that subject is returned (still only if active).
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if a query fails, or [`DbError::InvalidValue`]
/// if a stored enum column holds an unknown value.
pub async fn list_active_subjects(
    pool: &PgPool,
    slug: Option<&str>,
) -> Result<Vec<Subject>, DbError> {
    let rows = sqlx::query_as::<_, SubjectRow>(&format!(
        "SELECT {SUBJECT_COLUMNS} FROM subjects \
         WHERE status = 'active' AND ($1::TEXT IS NULL OR slug = $1) \
         ORDER BY name, id"
    ))
    .bind(slug)
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
    let target_rows = sqlx::query_as::<_, TargetRow>(&format!(
        "SELECT {TARGET_COLUMNS} FROM tracking_targets \
         WHERE subject_id = ANY($1) \
         ORDER BY subject_id, position, id"
    ))
    .bind(&ids)
    .fetch_all(pool)
    .await?;

    let mut by_subject: HashMap<Uuid, Vec<TrackingTarget>> = HashMap::new();
    for row in target_rows {
        let target = TrackingTarget::try_from(row)?;
        by_subject.entry(target.subject_id).or_default().push(target);
    }

    rows.into_iter()
        .map(|row| {
            let targets = by_subject.remove(&row.id).unwrap_or_default();
            row.into_subject(targets)
        })
        .collect()
}

/// Fetch one subject (active or not) by slug, with its targets.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no subject has the slug, or
/// [`DbError::Sqlx`] if a query fails.
pub async fn get_subject_by_slug(pool: &PgPool, slug: &str) -> Result<Subject, DbError> {
    let row = sqlx::query_as::<_, SubjectRow>(&format!(
        "SELECT {SUBJECT_COLUMNS} FROM subjects WHERE slug = $1"
    ))
    .bind(slug)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    let targets = sqlx::query_as::<_, TargetRow>(&format!(
        "SELECT {TARGET_COLUMNS} FROM tracking_targets \
         WHERE subject_id = $1 \
         ORDER BY position, id"
    ))
    .bind(row.id)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(TrackingTarget::try_from)
    .collect::<Result<Vec<_>, _>>()?;

    row.into_subject(targets)
}

/// Set `last_observed_at` on the given subjects.
///
/// Returns the number of rows updated.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn mark_subjects_observed(
    pool: &PgPool,
    subject_ids: &[Uuid],
    observed_at: DateTime<Utc>,
) -> Result<u64, DbError> {
    if subject_ids.is_empty() {
        return Ok(0);
    }

    let result = sqlx::query(
        "UPDATE subjects \
         SET last_observed_at = GREATEST(COALESCE(last_observed_at, $2), $2) \
         WHERE id = ANY($1)",
    )
    .bind(subject_ids)
    .bind(observed_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
