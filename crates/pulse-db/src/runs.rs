//! Tracking runs and the singleton run lock.
//!
//! `run_lock` holds the id of the single running run. Starting a run is a
//! conditional update that only succeeds while the lock is free, and the
//! partial unique index on `tracking_runs` backs that up. Both survive process
//! restarts; [`force_release_run_lock`] clears a lock left by a dead process.

use chrono::{DateTime, Utc};
use pulse_core::{Run, RunCounters, RunStatus};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{is_unique_violation, DbError};

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A row from the `tracking_runs` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RunRow {
    pub id: Uuid,
    pub status: String,
    pub scope: Option<String>,
    pub succeeded: i32,
    pub baseline: i32,
    pub skipped_insignificant: i32,
    pub failed: i32,
    pub classified: i32,
    pub unclassified: i32,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

fn counter(column: &'static str, value: i32) -> Result<u32, DbError> {
    u32::try_from(value).map_err(|_| DbError::InvalidValue {
        column,
        value: value.to_string(),
    })
}

fn to_db_counter(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

impl TryFrom<RunRow> for Run {
    type Error = DbError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        let status = RunStatus::parse(&row.status).ok_or_else(|| DbError::InvalidValue {
            column: "tracking_runs.status",
            value: row.status.clone(),
        })?;
        Ok(Run {
            id: row.id,
            status,
            scope: row.scope,
            counters: RunCounters {
                succeeded: counter("tracking_runs.succeeded", row.succeeded)?,
                baseline: counter("tracking_runs.baseline", row.baseline)?,
                skipped_insignificant: counter(
                    "tracking_runs.skipped_insignificant",
                    row.skipped_insignificant,
                )?,
                failed: counter("tracking_runs.failed", row.failed)?,
                classified: counter("tracking_runs.classified", row.classified)?,
                unclassified: counter("tracking_runs.unclassified", row.unclassified)?,
            },
            error_message: row.error_message,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}

const RUN_COLUMNS: &str = "id, status, scope, succeeded, baseline, skipped_insignificant, \
                           failed, classified, unclassified, error_message, started_at, finished_at";

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

/// Start a run unless one is already running.
///
/// # Errors
///
/// Returns [`DbError::RunAlreadyActive`] when another run holds the lock, or
/// [`DbError::Sqlx`] if a statement fails. Neither case modifies the active run.
pub async fn begin_run(pool: &PgPool, scope: Option<&str>) -> Result<Run, DbError> {
    let mut tx = pool.begin().await?;
    let id = Uuid::new_v4();

    let inserted = sqlx::query_as::<_, RunRow>(&format!(
        "INSERT INTO tracking_runs (id, status, scope) \
         VALUES ($1, 'running', $2) \
         RETURNING {RUN_COLUMNS}"
    ))
    .bind(id)
    .bind(scope)
    .fetch_one(&mut *tx)
    .await;

    let row = match inserted {
        Ok(row) => row,
        Err(err) if is_unique_violation(&err) => {
            drop(tx);
            let active_run_id = active_run_id(pool).await?;
            return Err(DbError::RunAlreadyActive { active_run_id });
        }
        Err(err) => return Err(err.into()),
    };

    let claimed: Option<i64> = sqlx::query_scalar(
        "UPDATE run_lock \
         SET active_run_id = $1, version = version + 1, updated_at = NOW() \
         WHERE id AND active_run_id IS NULL \
         RETURNING version",
    )
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?;

    if claimed.is_none() {
        tx.rollback().await?;
        let active_run_id = active_run_id(pool).await?;
        return Err(DbError::RunAlreadyActive { active_run_id });
    }

    tx.commit().await?;
    Run::try_from(row)
}

/// Write progress counters for a running run.
///
/// # Errors
///
/// Returns [`DbError::InvalidRunTransition`] if the run is not `running`, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn update_run_counters(
    pool: &PgPool,
    id: Uuid,
    counters: RunCounters,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE tracking_runs \
         SET succeeded = $2, baseline = $3, skipped_insignificant = $4, \
             failed = $5, classified = $6, unclassified = $7 \
         WHERE id = $1 AND status = 'running'",
    )
    .bind(id)
    .bind(to_db_counter(counters.succeeded))
    .bind(to_db_counter(counters.baseline))
    .bind(to_db_counter(counters.skipped_insignificant))
    .bind(to_db_counter(counters.failed))
    .bind(to_db_counter(counters.classified))
    .bind(to_db_counter(counters.unclassified))
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidRunTransition {
            id,
            expected_status: "running",
        });
    }

    Ok(())
}

/// Finalize a run as `completed` or `error` and release the run lock.
///
/// Finishing a run that is no longer running is a no-op that returns the run
/// as stored.
///
/// # Errors
///
/// Returns [`DbError::InvalidRunTransition`] if `status` is not terminal,
/// [`DbError::NotFound`] if the run does not exist, or [`DbError::Sqlx`] if
/// a statement fails.
pub async fn finish_run(
    pool: &PgPool,
    id: Uuid,
    status: RunStatus,
    counters: RunCounters,
    error_message: Option<&str>,
) -> Result<Run, DbError> {
    if !status.is_terminal() {
        return Err(DbError::InvalidRunTransition {
            id,
            expected_status: "running",
        });
    }

    let mut tx = pool.begin().await?;

    let finished = sqlx::query_as::<_, RunRow>(&format!(
        "UPDATE tracking_runs \
         SET status = $2, finished_at = NOW(), \
             succeeded = $3, baseline = $4, skipped_insignificant = $5, \
             failed = $6, classified = $7, unclassified = $8, error_message = $9 \
         WHERE id = $1 AND status = 'running' \
         RETURNING {RUN_COLUMNS}"
    ))
    .bind(id)
    .bind(status.as_str())
    .bind(to_db_counter(counters.succeeded))
    .bind(to_db_counter(counters.baseline))
    .bind(to_db_counter(counters.skipped_insignificant))
    .bind(to_db_counter(counters.failed))
    .bind(to_db_counter(counters.classified))
    .bind(to_db_counter(counters.unclassified))
    .bind(error_message)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(row) = finished else {
        drop(tx);
        return get_run(pool, id).await;
    };

    sqlx::query(
        "UPDATE run_lock \
         SET active_run_id = NULL, version = version + 1, updated_at = NOW() \
         WHERE id AND active_run_id = $1",
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Run::try_from(row)
}

/// Mark whatever run holds the lock as `error` and free the lock.
///
/// Used after a crash left a run `running` with no process driving it.
/// Returns the id of the run that was released, if there was one.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if a statement fails.
pub async fn force_release_run_lock(
    pool: &PgPool,
    reason: &str,
) -> Result<Option<Uuid>, DbError> {
    let mut tx = pool.begin().await?;

    let released: Option<Uuid> = sqlx::query_scalar(
        "UPDATE tracking_runs \
         SET status = 'error', finished_at = NOW(), error_message = $1 \
         WHERE status = 'running' \
         RETURNING id",
    )
    .bind(reason)
    .fetch_optional(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE run_lock \
         SET active_run_id = NULL, version = version + 1, updated_at = NOW() \
         WHERE id AND active_run_id IS NOT NULL",
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(released)
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

async fn active_run_id(pool: &PgPool) -> Result<Option<Uuid>, DbError> {
    let id: Option<Uuid> = sqlx::query_scalar("SELECT active_run_id FROM run_lock WHERE id")
        .fetch_optional(pool)
        .await?
        .flatten();
    Ok(id)
}

/// Fetches a single run by id.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no run has the id, or [`DbError::Sqlx`]
/// if the query fails.
pub async fn get_run(pool: &PgPool, id: Uuid) -> Result<Run, DbError> {
    let row = sqlx::query_as::<_, RunRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM tracking_runs WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Run::try_from(row)
}

/// The run currently holding the lock, if any.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn active_run(pool: &PgPool) -> Result<Option<Run>, DbError> {
    match active_run_id(pool).await? {
        Some(id) => get_run(pool, id).await.map(Some),
        None => Ok(None),
    }
}

/// The most recently started run, if any.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn latest_run(pool: &PgPool) -> Result<Option<Run>, DbError> {
    sqlx::query_as::<_, RunRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM tracking_runs \
         ORDER BY started_at DESC, id DESC \
         LIMIT 1"
    ))
    .fetch_optional(pool)
    .await?
    .map(Run::try_from)
    .transpose()
}

/// Returns the most recent `limit` runs, newest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_runs(pool: &PgPool, limit: i64) -> Result<Vec<Run>, DbError> {
    sqlx::query_as::<_, RunRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM tracking_runs \
         ORDER BY started_at DESC, id DESC \
         LIMIT $1"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(Run::try_from)
    .collect()
}
