//! Postgres-backed storage seams over `pulse-db`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulse_core::{
    AppendedSnapshot, Change, ChangeWithSubject, NewChange, Report, Run, RunCounters, RunStatus,
    Snapshot, Subject,
};
use pulse_scraper::CanonicalContent;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::{ChangeStore, ReportStore, RunStore, SnapshotStore, SubjectSource};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl SubjectSource for PgStore {
    async fn active_subjects(&self, slug: Option<&str>) -> Result<Vec<Subject>, StoreError> {
        Ok(pulse_db::list_active_subjects(&self.pool, slug).await?)
    }

    async fn mark_observed(
        &self,
        subject_ids: &[Uuid],
        observed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        pulse_db::mark_subjects_observed(&self.pool, subject_ids, observed_at).await?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for PgStore {
    async fn append(
        &self,
        target_id: Uuid,
        content: &CanonicalContent,
    ) -> Result<AppendedSnapshot, StoreError> {
        Ok(pulse_db::append_snapshot(
            &self.pool,
            target_id,
            &content.hash,
            &content.text,
            content.truncated,
        )
        .await?)
    }

    async fn latest(&self, target_id: Uuid) -> Result<Option<Snapshot>, StoreError> {
        Ok(pulse_db::latest_snapshot(&self.pool, target_id).await?)
    }
}

#[async_trait]
impl ChangeStore for PgStore {
    async fn insert(&self, change: &NewChange) -> Result<Change, StoreError> {
        Ok(pulse_db::insert_change(&self.pool, change).await?)
    }

    async fn in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ChangeWithSubject>, StoreError> {
        Ok(pulse_db::list_changes_in_window(&self.pool, start, end).await?)
    }
}

#[async_trait]
impl RunStore for PgStore {
    async fn begin(&self, scope: Option<&str>) -> Result<Run, StoreError> {
        Ok(pulse_db::begin_run(&self.pool, scope).await?)
    }

    async fn update_counters(&self, id: Uuid, counters: RunCounters) -> Result<(), StoreError> {
        Ok(pulse_db::update_run_counters(&self.pool, id, counters).await?)
    }

    async fn finish(
        &self,
        id: Uuid,
        status: RunStatus,
        counters: RunCounters,
        error_message: Option<&str>,
    ) -> Result<Run, StoreError> {
        Ok(pulse_db::finish_run(&self.pool, id, status, counters, error_message).await?)
    }

    async fn active(&self) -> Result<Option<Run>, StoreError> {
        Ok(pulse_db::active_run(&self.pool).await?)
    }

    async fn latest(&self) -> Result<Option<Run>, StoreError> {
        Ok(pulse_db::latest_run(&self.pool).await?)
    }

    async fn list(&self, limit: usize) -> Result<Vec<Run>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        Ok(pulse_db::list_runs(&self.pool, limit).await?)
    }
}

#[async_trait]
impl ReportStore for PgStore {
    async fn save_report(&self, report: &Report) -> Result<Uuid, StoreError> {
        Ok(pulse_db::upsert_report(&self.pool, report).await?)
    }

    async fn recent_reports(&self, limit: usize) -> Result<Vec<Report>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        Ok(pulse_db::list_reports(&self.pool, limit).await?)
    }
}
