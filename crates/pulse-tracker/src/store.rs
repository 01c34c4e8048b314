//! Storage seams the orchestrator and aggregator are written against.
//!
//! [`crate::PgStore`] backs them with Postgres; [`crate::MemoryStore`] keeps
//! everything in process for tests and dry runs.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulse_core::{
    AppendedSnapshot, Change, ChangeWithSubject, NewChange, Report, Run, RunCounters, RunStatus,
    Snapshot, Subject,
};
use pulse_scraper::CanonicalContent;
use uuid::Uuid;

use crate::error::StoreError;

/// Point-in-time list of what to track.
#[async_trait]
pub trait SubjectSource: Send + Sync {
    /// Active subjects with their targets; only the subject with `slug` when given.
    async fn active_subjects(&self, slug: Option<&str>) -> Result<Vec<Subject>, StoreError>;

    async fn mark_observed(
        &self,
        subject_ids: &[Uuid],
        observed_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// Append-only snapshot log. Appends for one target are serialized and get
/// contiguous sequence numbers starting at 1.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn append(
        &self,
        target_id: Uuid,
        content: &CanonicalContent,
    ) -> Result<AppendedSnapshot, StoreError>;

    async fn latest(&self, target_id: Uuid) -> Result<Option<Snapshot>, StoreError>;
}

#[async_trait]
pub trait ChangeStore: Send + Sync {
    /// Persist a change; a second insert for the same current snapshot returns the first.
    async fn insert(&self, change: &NewChange) -> Result<Change, StoreError>;

    /// Changes detected in `[start, end)`, oldest first.
    async fn in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ChangeWithSubject>, StoreError>;
}

/// Persisted run state with an atomic "at most one running" token.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Fails with [`StoreError::RunAlreadyActive`] while another run is running.
    async fn begin(&self, scope: Option<&str>) -> Result<Run, StoreError>;

    async fn update_counters(&self, id: Uuid, counters: RunCounters) -> Result<(), StoreError>;

    /// Finalize a running run. A no-op returning the stored run when it already finished.
    async fn finish(
        &self,
        id: Uuid,
        status: RunStatus,
        counters: RunCounters,
        error_message: Option<&str>,
    ) -> Result<Run, StoreError>;

    async fn active(&self) -> Result<Option<Run>, StoreError>;

    async fn latest(&self) -> Result<Option<Run>, StoreError>;

    async fn list(&self, limit: usize) -> Result<Vec<Run>, StoreError>;
}

/// Stored reports, one per window.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Store `report`, replacing any report for the same window.
    async fn save_report(&self, report: &Report) -> Result<Uuid, StoreError>;

    /// Newest window first.
    async fn recent_reports(&self, limit: usize) -> Result<Vec<Report>, StoreError>;
}

#[derive(Clone)]
pub struct Stores {
    pub subjects: Arc<dyn SubjectSource>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub changes: Arc<dyn ChangeStore>,
    pub runs: Arc<dyn RunStore>,
    pub reports: Arc<dyn ReportStore>,
}

impl Stores {
    /// Use one backend for every seam.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: SubjectSource + SnapshotStore + ChangeStore + RunStore + ReportStore + 'static,
    {
        Self {
            subjects: store.clone(),
            snapshots: store.clone(),
            changes: store.clone(),
            runs: store.clone(),
            reports: store,
        }
    }
}
