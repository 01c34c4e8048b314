//! Tracking runs.
//!
//! A run takes a point-in-time list of active subjects, then pushes every
//! target through fetch, canonicalize, snapshot, diff, classify, and persist,
//! with at most `max_concurrent_targets` targets in flight. A failing target
//! is counted and skipped; the run ends in `error` only when every processed
//! target failed or the run timeout fired.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use pulse_classifier::{
    CircuitBreaker, ClassificationRequest, ClassificationService, Classifier, DisabledClassifier,
    OpenAiClassifier, RetryPolicy,
};
use pulse_core::{
    AppConfig, ChangeKind, NewChange, Report, Run, RunCounters, RunStatus, Severity, Subject,
};
use pulse_scraper::{canonicalize, retry_fetch, CanonicalContent, SourceFetcher, DEFAULT_MAX_BYTES};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::aggregate::build_report;
use crate::diff::{DiffEngine, DiffOutcome, DEFAULT_THRESHOLD};
use crate::error::{StoreError, TrackError};
use crate::sources::{ChangeClassifier, ContentSource};
use crate::store::Stores;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerConfig {
    pub max_concurrent_targets: usize,
    /// Fetch attempts per target, counting the first.
    pub fetch_max_attempts: u32,
    pub fetch_retry_delay: Duration,
    pub run_timeout: Option<Duration>,
    pub significance_threshold: f64,
    pub canonical_max_bytes: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_targets: 4,
            fetch_max_attempts: 3,
            fetch_retry_delay: Duration::from_secs(60),
            run_timeout: None,
            significance_threshold: DEFAULT_THRESHOLD,
            canonical_max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

impl TrackerConfig {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            max_concurrent_targets: config.max_concurrent_targets,
            fetch_max_attempts: config.fetch_max_attempts,
            fetch_retry_delay: Duration::from_secs(config.fetch_retry_delay_secs),
            run_timeout: config.run_timeout_secs.map(Duration::from_secs),
            significance_threshold: config.significance_threshold,
            canonical_max_bytes: config.canonical_max_bytes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TargetOutcome {
    Baseline,
    Skipped,
    Changed { classified: bool },
    Failed,
}

impl TargetOutcome {
    fn record(self, counters: &mut RunCounters) {
        match self {
            TargetOutcome::Baseline => {
                counters.succeeded += 1;
                counters.baseline += 1;
            }
            TargetOutcome::Skipped => {
                counters.succeeded += 1;
                counters.skipped_insignificant += 1;
            }
            TargetOutcome::Changed { classified: true } => {
                counters.succeeded += 1;
                counters.classified += 1;
            }
            TargetOutcome::Changed { classified: false } => {
                counters.succeeded += 1;
                counters.unclassified += 1;
            }
            TargetOutcome::Failed => counters.failed += 1,
        }
    }
}

struct WorkItem {
    subject_id: Uuid,
    subject_name: String,
    target: pulse_core::TrackingTarget,
}

struct ActiveRun {
    id: Uuid,
    stop: Arc<AtomicBool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn unclassified_summary(url: &str) -> String {
    format!("Content changed on {url}; automatic classification was unavailable.")
}

/// Run control surface: start, stop, status.
///
/// Cheap to clone; clones share the in-process stop signal.
#[derive(Clone)]
pub struct Tracker {
    stores: Stores,
    source: Arc<dyn ContentSource>,
    classifier: Arc<dyn ChangeClassifier>,
    config: TrackerConfig,
    diff: DiffEngine,
    active: Arc<Mutex<Option<ActiveRun>>>,
    idle: Arc<Notify>,
}

impl Tracker {
    #[must_use]
    pub fn new(
        stores: Stores,
        source: Arc<dyn ContentSource>,
        classifier: Arc<dyn ChangeClassifier>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            stores,
            source,
            classifier,
            diff: DiffEngine::new(config.significance_threshold),
            config,
            active: Arc::new(Mutex::new(None)),
            idle: Arc::new(Notify::new()),
        }
    }

    #[must_use]
    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    #[must_use]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Start a run and drive it on a background task.
    ///
    /// Returns the run as it was created, in `running` state.
    ///
    /// # Errors
    ///
    /// Returns [`TrackError::ConcurrencyViolation`] while another run is
    /// running, [`TrackError::UnknownSubject`] if `scope` names no active
    /// subject, or [`TrackError::Store`] if the run cannot be created.
    pub async fn start(&self, scope: Option<&str>) -> Result<Run, TrackError> {
        let (run, subjects, stop) = self.begin(scope).await?;
        let started = run.clone();
        let tracker = self.clone();
        tokio::spawn(async move {
            let run_id = run.id;
            if let Err(err) = tracker.execute(run, subjects, stop).await {
                tracing::error!(run_id = %run_id, error = %err, "tracking run could not be finalized");
            }
        });
        Ok(started)
    }

    /// Start a run and drive it to the end on the caller's task.
    ///
    /// # Errors
    ///
    /// Same as [`Tracker::start`], plus [`TrackError::Store`] if the finished
    /// run cannot be written back.
    pub async fn run_once(&self, scope: Option<&str>) -> Result<Run, TrackError> {
        let (run, subjects, stop) = self.begin(scope).await?;
        self.execute(run, subjects, stop).await
    }

    /// Signal the run driven by this tracker to stop picking up new targets.
    ///
    /// Targets already in flight finish normally. Returns `false` when this
    /// tracker is not driving a run; calling it repeatedly is harmless.
    pub fn stop(&self) -> bool {
        let active = lock(&self.active);
        let Some(run) = active.as_ref() else {
            return false;
        };
        if !run.stop.swap(true, Ordering::SeqCst) {
            tracing::info!(run_id = %run.id, "stop requested for tracking run");
        }
        true
    }

    /// Wait until the run driven by this tracker has been finalized.
    ///
    /// Returns `true` once no run is active, or `false` if `limit` elapsed
    /// first. Pair with [`Tracker::stop`] before shutting down the runtime,
    /// otherwise a background run is dropped before it releases the run lock.
    pub async fn wait_idle(&self, limit: Duration) -> bool {
        let drained = async {
            loop {
                let notified = self.idle.notified();
                let idle = lock(&self.active).is_none();
                if idle {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(limit, drained).await.is_ok()
    }

    /// The running run if there is one, otherwise the most recent run.
    ///
    /// # Errors
    ///
    /// Returns [`TrackError::Store`] if the run store cannot be read.
    pub async fn status(&self) -> Result<Option<Run>, TrackError> {
        if let Some(run) = self.stores.runs.active().await? {
            return Ok(Some(run));
        }
        Ok(self.stores.runs.latest().await?)
    }

    /// # Errors
    ///
    /// Returns [`TrackError::Store`] if the run store cannot be read.
    pub async fn recent_runs(&self, limit: usize) -> Result<Vec<Run>, TrackError> {
        Ok(self.stores.runs.list(limit).await?)
    }

    /// Aggregate `[window_start, window_end)` and store the report, replacing
    /// any stored report for the same window.
    ///
    /// # Errors
    ///
    /// Returns [`TrackError::InvalidWindow`] for an empty or inverted window,
    /// or [`TrackError::Store`] if changes cannot be read or the report saved.
    pub async fn publish_report(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Report, TrackError> {
        let report = build_report(self.stores.changes.as_ref(), window_start, window_end).await?;
        let id = self.stores.reports.save_report(&report).await?;
        tracing::info!(
            report_id = %id,
            week = %report.week_label,
            total_changes = report.contents.total_changes,
            "report stored"
        );
        Ok(report)
    }

    /// # Errors
    ///
    /// Returns [`TrackError::Store`] if the report store cannot be read.
    pub async fn stored_reports(&self, limit: usize) -> Result<Vec<Report>, TrackError> {
        Ok(self.stores.reports.recent_reports(limit).await?)
    }

    async fn begin(
        &self,
        scope: Option<&str>,
    ) -> Result<(Run, Vec<Subject>, Arc<AtomicBool>), TrackError> {
        let subjects = self.stores.subjects.active_subjects(scope).await?;
        if let Some(slug) = scope {
            if subjects.is_empty() {
                return Err(TrackError::UnknownSubject(slug.to_owned()));
            }
        }

        let run = self.stores.runs.begin(scope).await?;
        let stop = Arc::new(AtomicBool::new(false));
        *lock(&self.active) = Some(ActiveRun {
            id: run.id,
            stop: Arc::clone(&stop),
        });

        tracing::info!(
            run_id = %run.id,
            scope = scope.unwrap_or("all"),
            subjects = subjects.len(),
            "tracking run started"
        );
        Ok((run, subjects, stop))
    }

    fn clear_active(&self, run_id: Uuid) {
        let mut active = lock(&self.active);
        if active.as_ref().is_some_and(|run| run.id == run_id) {
            *active = None;
            self.idle.notify_waiters();
        }
    }

    async fn execute(
        &self,
        run: Run,
        subjects: Vec<Subject>,
        stop: Arc<AtomicBool>,
    ) -> Result<Run, TrackError> {
        let run_id = run.id;
        let items: Vec<WorkItem> = subjects
            .into_iter()
            .flat_map(|subject| {
                let Subject {
                    id, name, targets, ..
                } = subject;
                targets.into_iter().map(move |target| WorkItem {
                    subject_id: id,
                    subject_name: name.clone(),
                    target,
                })
            })
            .collect();
        let total = items.len();

        let timed_out = Arc::new(AtomicBool::new(false));
        let watchdog = self.config.run_timeout.map(|limit| {
            let stop = Arc::clone(&stop);
            let timed_out = Arc::clone(&timed_out);
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                timed_out.store(true, Ordering::SeqCst);
                stop.store(true, Ordering::SeqCst);
            })
        });

        let mut counters = RunCounters::default();
        let mut observed: HashSet<Uuid> = HashSet::new();
        let stop_flag: &AtomicBool = &stop;

        let mut outcomes = stream::iter(items.iter())
            .map(|item| async move {
                if stop_flag.load(Ordering::SeqCst) {
                    return None;
                }
                Some((item, self.process_target(run_id, item).await))
            })
            .buffer_unordered(self.config.max_concurrent_targets.max(1))
            .boxed();

        while let Some(result) = outcomes.next().await {
            let Some((item, outcome)) = result else {
                continue;
            };
            outcome.record(&mut counters);
            if outcome != TargetOutcome::Failed {
                observed.insert(item.subject_id);
            }
            if let Err(err) = self.stores.runs.update_counters(run_id, counters).await {
                tracing::warn!(run_id = %run_id, error = %err, "failed to record run progress");
            }
        }
        drop(outcomes);

        if let Some(handle) = watchdog {
            handle.abort();
        }

        let processed = counters.processed();
        let (status, message) = if timed_out.load(Ordering::SeqCst) {
            let limit = self.config.run_timeout.map_or(0, |d| d.as_secs());
            (
                RunStatus::Error,
                Some(format!(
                    "run timed out after {limit}s with {processed} of {total} targets processed"
                )),
            )
        } else if processed > 0 && counters.failed == processed {
            (
                RunStatus::Error,
                Some(format!("all {processed} processed targets failed")),
            )
        } else {
            (RunStatus::Completed, None)
        };

        if counters.failed > 0 {
            tracing::warn!(
                run_id = %run_id,
                failed = counters.failed,
                total_targets = total,
                "some targets failed during tracking run"
            );
        }
        if stop.load(Ordering::SeqCst) && usize::try_from(processed).unwrap_or(usize::MAX) < total
        {
            tracing::info!(
                run_id = %run_id,
                processed,
                total_targets = total,
                "tracking run stopped before all targets were processed"
            );
        }

        if !observed.is_empty() {
            let ids: Vec<Uuid> = observed.into_iter().collect();
            if let Err(err) = self.stores.subjects.mark_observed(&ids, Utc::now()).await {
                tracing::warn!(run_id = %run_id, error = %err, "failed to update last-observed times");
            }
        }

        let finished = self
            .stores
            .runs
            .finish(run_id, status, counters, message.as_deref())
            .await;
        self.clear_active(run_id);
        let finished = finished?;

        tracing::info!(
            run_id = %run_id,
            status = %finished.status,
            succeeded = counters.succeeded,
            baseline = counters.baseline,
            skipped = counters.skipped_insignificant,
            failed = counters.failed,
            classified = counters.classified,
            unclassified = counters.unclassified,
            "tracking run finished"
        );
        Ok(finished)
    }

    async fn process_target(&self, run_id: Uuid, item: &WorkItem) -> TargetOutcome {
        let target = &item.target;

        let fetched = retry_fetch(
            self.config.fetch_max_attempts,
            self.config.fetch_retry_delay,
            || self.source.fetch(target),
        )
        .await;
        let raw = match fetched {
            Ok(raw) => raw,
            Err(err) => {
                tracing::error!(
                    run_id = %run_id,
                    subject = %item.subject_name,
                    target_id = %target.id,
                    url = %target.url,
                    error = %err,
                    "fetch failed"
                );
                return TargetOutcome::Failed;
            }
        };

        let canonical = canonicalize(&raw, self.config.canonical_max_bytes);
        match self.record(run_id, item, &canonical).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(
                    run_id = %run_id,
                    subject = %item.subject_name,
                    target_id = %target.id,
                    error = %err,
                    "storage failure, target abandoned"
                );
                TargetOutcome::Failed
            }
        }
    }

    async fn record(
        &self,
        run_id: Uuid,
        item: &WorkItem,
        canonical: &CanonicalContent,
    ) -> Result<TargetOutcome, StoreError> {
        let target = &item.target;
        let appended = self.stores.snapshots.append(target.id, canonical).await?;

        let diff = match self
            .diff
            .evaluate(appended.previous.as_ref(), &appended.current)
        {
            DiffOutcome::Baseline => {
                tracing::debug!(target_id = %target.id, "baseline snapshot recorded");
                return Ok(TargetOutcome::Baseline);
            }
            DiffOutcome::Unchanged => return Ok(TargetOutcome::Skipped),
            DiffOutcome::Insignificant(diff) => {
                tracing::debug!(
                    target_id = %target.id,
                    significance = diff.significance,
                    "change below significance threshold"
                );
                return Ok(TargetOutcome::Skipped);
            }
            DiffOutcome::Significant(diff) => diff,
        };

        let request = ClassificationRequest {
            subject_name: item.subject_name.clone(),
            url: target.url.clone(),
            source_kind: target.kind,
            delta: diff.delta.clone(),
        };
        let (kind, severity, summary, classified) = match self.classifier.classify(&request).await
        {
            Ok(verdict) => (verdict.kind, verdict.severity, verdict.summary, true),
            Err(err) => {
                tracing::warn!(
                    run_id = %run_id,
                    target_id = %target.id,
                    error = %err,
                    "classification failed, storing change as unclassified"
                );
                (
                    ChangeKind::Unclassified,
                    Severity::Low,
                    unclassified_summary(&target.url),
                    false,
                )
            }
        };

        let change = self
            .stores
            .changes
            .insert(&NewChange {
                subject_id: item.subject_id,
                target_id: target.id,
                run_id: Some(run_id),
                kind,
                severity,
                summary,
                significance: diff.significance,
                previous_snapshot_id: diff.previous_snapshot_id,
                current_snapshot_id: diff.current_snapshot_id,
                detected_at: Utc::now(),
            })
            .await?;

        tracing::info!(
            run_id = %run_id,
            subject = %item.subject_name,
            target_id = %target.id,
            kind = %change.kind,
            severity = %change.severity,
            significance = change.significance,
            "change recorded"
        );
        Ok(TargetOutcome::Changed { classified })
    }
}

/// Wire a [`Tracker`] from application config: HTTP source adapters, and the
/// OpenAI-compatible classifier when an API key is configured.
///
/// Without an API key every change is stored as `unclassified`.
///
/// # Errors
///
/// Returns [`TrackError::Setup`] if an HTTP client cannot be built.
pub fn build_tracker(config: &AppConfig, stores: Stores) -> Result<Tracker, TrackError> {
    let fetcher = SourceFetcher::new(
        config.fetch_timeout_secs,
        &config.scraper_user_agent,
        config.render_url.clone(),
        config.max_social_posts,
    )
    .map_err(|e| TrackError::Setup(e.to_string()))?;

    let service: Arc<dyn ClassificationService> = match &config.classifier_api_key {
        Some(key) => Arc::new(
            OpenAiClassifier::new(
                &config.classifier_base_url,
                key.clone(),
                config.classifier_model.clone(),
                config.classifier_timeout_secs,
            )
            .map_err(|e| TrackError::Setup(e.to_string()))?,
        ),
        None => {
            tracing::warn!("OPENAI_API_KEY is not set; changes will be stored as unclassified");
            Arc::new(DisabledClassifier)
        }
    };

    let classifier = Classifier::new(
        service,
        RetryPolicy {
            max_attempts: config.classifier_max_attempts,
            backoff_base: Duration::from_secs(config.classifier_backoff_base_secs),
        },
        CircuitBreaker::new(
            config.breaker_failure_threshold,
            Duration::from_secs(config.breaker_cooldown_secs),
        ),
    );

    Ok(Tracker::new(
        stores,
        Arc::new(fetcher),
        Arc::new(classifier),
        TrackerConfig::from_app_config(config),
    ))
}
