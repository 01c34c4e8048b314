//! In-process implementation of every storage seam.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulse_core::{
    AppendedSnapshot, Change, ChangeWithSubject, NewChange, Report, Run, RunCounters, RunStatus,
    Snapshot, Subject, SubjectStatus,
};
use pulse_scraper::CanonicalContent;
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::{ChangeStore, ReportStore, RunStore, SnapshotStore, SubjectSource};

type SnapshotLog = Arc<Mutex<Vec<Snapshot>>>;

#[derive(Default)]
struct RunTable {
    runs: Vec<Run>,
    active: Option<Uuid>,
    version: u64,
}

/// Keeps subjects, snapshot logs, changes, and runs in memory.
///
/// Each target owns its own log lock, so appends for one target are
/// serialized while different targets proceed independently.
#[derive(Default)]
pub struct MemoryStore {
    subjects: Mutex<Vec<Subject>>,
    logs: Mutex<HashMap<Uuid, SnapshotLog>>,
    changes: Mutex<Vec<Change>>,
    runs: Mutex<RunTable>,
    reports: Mutex<Vec<(Uuid, Report)>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_subjects(subjects: Vec<Subject>) -> Self {
        let store = Self::default();
        store.set_subjects(subjects);
        store
    }

    pub fn set_subjects(&self, subjects: Vec<Subject>) {
        *lock(&self.subjects) = subjects;
    }

    #[must_use]
    pub fn subjects(&self) -> Vec<Subject> {
        lock(&self.subjects).clone()
    }

    /// The full log of one target, oldest first.
    #[must_use]
    pub fn snapshots(&self, target_id: Uuid) -> Vec<Snapshot> {
        let Some(log) = self.log(target_id, false) else {
            return Vec::new();
        };
        let snapshots = lock(&log).clone();
        snapshots
    }

    #[must_use]
    pub fn changes(&self) -> Vec<Change> {
        lock(&self.changes).clone()
    }

    /// Times the run token has changed hands.
    #[must_use]
    pub fn run_lock_version(&self) -> u64 {
        lock(&self.runs).version
    }

    fn log(&self, target_id: Uuid, create: bool) -> Option<SnapshotLog> {
        let mut logs = lock(&self.logs);
        if create {
            Some(logs.entry(target_id).or_default().clone())
        } else {
            logs.get(&target_id).cloned()
        }
    }

    fn knows_target(&self, target_id: Uuid) -> bool {
        lock(&self.subjects)
            .iter()
            .any(|s| s.targets.iter().any(|t| t.id == target_id))
    }

    fn subject_name(&self, subject_id: Uuid) -> String {
        lock(&self.subjects)
            .iter()
            .find(|s| s.id == subject_id)
            .map_or_else(|| subject_id.to_string(), |s| s.name.clone())
    }
}

#[async_trait]
impl SubjectSource for MemoryStore {
    async fn active_subjects(&self, slug: Option<&str>) -> Result<Vec<Subject>, StoreError> {
        let mut subjects: Vec<Subject> = lock(&self.subjects)
            .iter()
            .filter(|s| s.status == SubjectStatus::Active)
            .filter(|s| slug.is_none_or(|slug| s.slug == slug))
            .cloned()
            .collect();
        subjects.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(subjects)
    }

    async fn mark_observed(
        &self,
        subject_ids: &[Uuid],
        observed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        for subject in lock(&self.subjects).iter_mut() {
            if subject_ids.contains(&subject.id) {
                let newest = subject
                    .last_observed_at
                    .map_or(observed_at, |prev| prev.max(observed_at));
                subject.last_observed_at = Some(newest);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn append(
        &self,
        target_id: Uuid,
        content: &CanonicalContent,
    ) -> Result<AppendedSnapshot, StoreError> {
        if !self.knows_target(target_id) {
            return Err(StoreError::NotFound("tracking target"));
        }
        let Some(log) = self.log(target_id, true) else {
            return Err(StoreError::NotFound("tracking target"));
        };

        let mut log = lock(&log);
        let previous = log.last().cloned();
        let sequence = previous.as_ref().map_or(1, |s| s.sequence + 1);
        let current = Snapshot {
            id: Uuid::new_v4(),
            target_id,
            sequence,
            content_hash: content.hash.clone(),
            canonical_text: content.text.clone(),
            truncated: content.truncated,
            captured_at: Utc::now(),
        };
        log.push(current.clone());
        Ok(AppendedSnapshot { previous, current })
    }

    async fn latest(&self, target_id: Uuid) -> Result<Option<Snapshot>, StoreError> {
        let Some(log) = self.log(target_id, false) else {
            return Ok(None);
        };
        let latest = lock(&log).last().cloned();
        Ok(latest)
    }
}

#[async_trait]
impl ChangeStore for MemoryStore {
    async fn insert(&self, change: &NewChange) -> Result<Change, StoreError> {
        let mut changes = lock(&self.changes);
        if let Some(existing) = changes
            .iter()
            .find(|c| c.current_snapshot_id == change.current_snapshot_id)
        {
            return Ok(existing.clone());
        }
        let stored = Change::from_new(Uuid::new_v4(), change.clone());
        changes.push(stored.clone());
        Ok(stored)
    }

    async fn in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ChangeWithSubject>, StoreError> {
        let mut window: Vec<Change> = lock(&self.changes)
            .iter()
            .filter(|c| c.detected_at >= start && c.detected_at < end)
            .cloned()
            .collect();
        window.sort_by(|a, b| a.detected_at.cmp(&b.detected_at).then(a.id.cmp(&b.id)));

        Ok(window
            .into_iter()
            .map(|change| ChangeWithSubject {
                subject_name: self.subject_name(change.subject_id),
                change,
            })
            .collect())
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn begin(&self, scope: Option<&str>) -> Result<Run, StoreError> {
        let mut table = lock(&self.runs);
        if let Some(active_run_id) = table.active {
            return Err(StoreError::RunAlreadyActive {
                active_run_id: Some(active_run_id),
            });
        }

        let run = Run {
            id: Uuid::new_v4(),
            status: RunStatus::Running,
            scope: scope.map(str::to_owned),
            counters: RunCounters::default(),
            error_message: None,
            started_at: Utc::now(),
            finished_at: None,
        };
        table.active = Some(run.id);
        table.version += 1;
        table.runs.push(run.clone());
        Ok(run)
    }

    async fn update_counters(&self, id: Uuid, counters: RunCounters) -> Result<(), StoreError> {
        let mut table = lock(&self.runs);
        match table
            .runs
            .iter_mut()
            .find(|r| r.id == id && r.status == RunStatus::Running)
        {
            Some(run) => {
                run.counters = counters;
                Ok(())
            }
            None => Err(StoreError::NotFound("running run")),
        }
    }

    async fn finish(
        &self,
        id: Uuid,
        status: RunStatus,
        counters: RunCounters,
        error_message: Option<&str>,
    ) -> Result<Run, StoreError> {
        let mut table = lock(&self.runs);
        let Some(index) = table.runs.iter().position(|r| r.id == id) else {
            return Err(StoreError::NotFound("run"));
        };

        if table.runs[index].status != RunStatus::Running || !status.is_terminal() {
            return Ok(table.runs[index].clone());
        }

        let run = &mut table.runs[index];
        run.status = status;
        run.counters = counters;
        run.error_message = error_message.map(str::to_owned);
        run.finished_at = Some(Utc::now());
        let finished = run.clone();

        if table.active == Some(id) {
            table.active = None;
            table.version += 1;
        }
        Ok(finished)
    }

    async fn active(&self) -> Result<Option<Run>, StoreError> {
        let table = lock(&self.runs);
        Ok(table
            .active
            .and_then(|id| table.runs.iter().find(|r| r.id == id).cloned()))
    }

    async fn latest(&self) -> Result<Option<Run>, StoreError> {
        Ok(lock(&self.runs).runs.last().cloned())
    }

    async fn list(&self, limit: usize) -> Result<Vec<Run>, StoreError> {
        Ok(lock(&self.runs)
            .runs
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ReportStore for MemoryStore {
    async fn save_report(&self, report: &Report) -> Result<Uuid, StoreError> {
        let mut reports = lock(&self.reports);
        let window = (report.contents.window_start, report.contents.window_end);
        if let Some((id, stored)) = reports
            .iter_mut()
            .find(|(_, r)| (r.contents.window_start, r.contents.window_end) == window)
        {
            *stored = report.clone();
            return Ok(*id);
        }
        let id = Uuid::new_v4();
        reports.push((id, report.clone()));
        Ok(id)
    }

    async fn recent_reports(&self, limit: usize) -> Result<Vec<Report>, StoreError> {
        let mut reports: Vec<Report> = lock(&self.reports)
            .iter()
            .map(|(_, report)| report.clone())
            .collect();
        reports.sort_by(|a, b| b.contents.window_start.cmp(&a.contents.window_start));
        reports.truncate(limit);
        Ok(reports)
    }
}
