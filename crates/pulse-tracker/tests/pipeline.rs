//! End-to-end tracking runs against the in-memory store with fake
//! content sources and classifiers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulse_classifier::{
    CircuitBreaker, ClassificationRequest, ClassificationResult, ClassificationService, Classifier,
    ClassifierError, RetryPolicy,
};
use pulse_core::{
    Change, ChangeKind, ChangeWithSubject, NewChange, Run, RunStatus, Severity, SourceKind,
    Subject, SubjectStatus, TrackingTarget,
};
use pulse_scraper::{ContentFormat, FetchError, RawContent};
use pulse_tracker::{
    aggregate, ChangeClassifier, ChangeStore, ContentSource, MemoryStore, StoreError, Stores,
    TrackError, Tracker, TrackerConfig,
};
use tokio::sync::{Notify, Semaphore};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Serves a fixed body per URL; unknown URLs are 404s.
#[derive(Default)]
struct Pages {
    bodies: Mutex<HashMap<String, String>>,
    fetches: AtomicU32,
}

impl Pages {
    fn set(&self, url: &str, body: &str) {
        self.bodies
            .lock()
            .unwrap()
            .insert(url.to_owned(), body.to_owned());
    }

    fn read(&self, target: &TrackingTarget) -> Result<RawContent, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let body = self.bodies.lock().unwrap().get(&target.url).cloned();
        match body {
            Some(body) => Ok(RawContent {
                requested_url: target.url.clone(),
                final_url: target.url.clone(),
                status: 200,
                format: ContentFormat::Text,
                body,
            }),
            None => Err(FetchError::NotFound {
                url: target.url.clone(),
            }),
        }
    }
}

#[async_trait]
impl ContentSource for Pages {
    async fn fetch(&self, target: &TrackingTarget) -> Result<RawContent, FetchError> {
        self.read(target)
    }
}

/// Blocks every fetch until the test hands out a permit.
struct GatedPages {
    pages: Pages,
    started: Notify,
    gate: Semaphore,
}

impl GatedPages {
    fn new() -> Self {
        Self {
            pages: Pages::default(),
            started: Notify::new(),
            gate: Semaphore::new(0),
        }
    }
}

#[async_trait]
impl ContentSource for GatedPages {
    async fn fetch(&self, target: &TrackingTarget) -> Result<RawContent, FetchError> {
        self.started.notify_one();
        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
        self.pages.read(target)
    }
}

/// Takes 200ms per fetch.
struct SlowPages(Pages);

#[async_trait]
impl ContentSource for SlowPages {
    async fn fetch(&self, target: &TrackingTarget) -> Result<RawContent, FetchError> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        self.0.read(target)
    }
}

/// Labels any delta mentioning a price as `pricing`, everything else as `feature`.
struct KeywordClassifier;

#[async_trait]
impl ChangeClassifier for KeywordClassifier {
    async fn classify(
        &self,
        request: &ClassificationRequest,
    ) -> Result<ClassificationResult, ClassifierError> {
        let kind = if request.delta.contains('$') {
            ChangeKind::Pricing
        } else {
            ChangeKind::Feature
        };
        Ok(ClassificationResult {
            kind,
            severity: Severity::Medium,
            summary: format!("{} updated {}", request.subject_name, request.url),
        })
    }
}

struct AlwaysTimeout {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl ClassificationService for AlwaysTimeout {
    async fn classify_once(
        &self,
        _request: &ClassificationRequest,
    ) -> Result<ClassificationResult, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ClassifierError::Timeout)
    }
}

struct BrokenChanges;

#[async_trait]
impl ChangeStore for BrokenChanges {
    async fn insert(&self, _change: &NewChange) -> Result<Change, StoreError> {
        Err(StoreError::Backend("disk full".to_owned()))
    }

    async fn in_window(
        &self,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<ChangeWithSubject>, StoreError> {
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn subject(name: &str, urls: &[&str]) -> Subject {
    let id = Uuid::new_v4();
    Subject {
        id,
        slug: name.to_lowercase(),
        name: name.to_owned(),
        category: None,
        primary_site: None,
        status: SubjectStatus::Active,
        targets: urls
            .iter()
            .map(|url| TrackingTarget {
                id: Uuid::new_v4(),
                subject_id: id,
                url: (*url).to_owned(),
                kind: SourceKind::Website,
            })
            .collect(),
        created_at: Utc::now(),
        last_observed_at: None,
    }
}

fn config() -> TrackerConfig {
    TrackerConfig {
        fetch_retry_delay: Duration::ZERO,
        ..TrackerConfig::default()
    }
}

fn tracker(
    store: &Arc<MemoryStore>,
    source: Arc<dyn ContentSource>,
    classifier: Arc<dyn ChangeClassifier>,
    config: TrackerConfig,
) -> Tracker {
    Tracker::new(Stores::shared(Arc::clone(store)), source, classifier, config)
}

async fn wait_for_finish(tracker: &Tracker, id: Uuid) -> Run {
    for _ in 0..500 {
        if let Some(run) = tracker.status().await.expect("status") {
            if run.id == id && run.status.is_terminal() {
                return run;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run {id} did not finish");
}

const ACME_PRICING: &str = "https://acme.example/pricing";

// ---------------------------------------------------------------------------
// Section 1: Change detection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn acme_price_change_is_recorded_as_pricing() {
    let store = Arc::new(MemoryStore::with_subjects(vec![subject(
        "Acme",
        &[ACME_PRICING],
    )]));
    let pages = Arc::new(Pages::default());
    let tracker = tracker(&store, pages.clone(), Arc::new(KeywordClassifier), config());

    pages.set(ACME_PRICING, "Price: $10/mo");
    let first = tracker.run_once(None).await.expect("run 1");
    assert_eq!(first.status, RunStatus::Completed);
    assert_eq!(first.counters.baseline, 1);
    assert!(store.changes().is_empty());

    pages.set(ACME_PRICING, "Price: $12/mo");
    let second = tracker.run_once(None).await.expect("run 2");
    assert_eq!(second.status, RunStatus::Completed);
    assert_eq!(second.counters.classified, 1);

    let changes = store.changes();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].kind, ChangeKind::Pricing);
    assert_eq!(changes[0].run_id, Some(second.id));
}

#[tokio::test]
async fn unchanged_content_is_appended_but_not_reported() {
    let acme = subject("Acme", &[ACME_PRICING]);
    let target_id = acme.targets[0].id;
    let store = Arc::new(MemoryStore::with_subjects(vec![acme]));
    let pages = Arc::new(Pages::default());
    let tracker = tracker(&store, pages.clone(), Arc::new(KeywordClassifier), config());

    pages.set(ACME_PRICING, "Price: $10/mo\nUpdated 5 minutes ago");
    tracker.run_once(None).await.expect("run 1");
    pages.set(ACME_PRICING, "Price: $10/mo\nUpdated 2 hours ago");
    let second = tracker.run_once(None).await.expect("run 2");

    assert_eq!(second.counters.skipped_insignificant, 1);
    assert!(store.changes().is_empty());
    let sequences: Vec<i64> = store.snapshots(target_id).iter().map(|s| s.sequence).collect();
    assert_eq!(sequences, vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn exhausted_classifier_still_records_one_unclassified_change() {
    let store = Arc::new(MemoryStore::with_subjects(vec![subject(
        "Acme",
        &[ACME_PRICING],
    )]));
    let pages = Arc::new(Pages::default());
    let calls = Arc::new(AtomicU32::new(0));
    let classifier = Classifier::new(
        Arc::new(AlwaysTimeout {
            calls: Arc::clone(&calls),
        }),
        RetryPolicy::default(),
        CircuitBreaker::new(5, Duration::from_secs(300)),
    );
    let tracker = tracker(&store, pages.clone(), Arc::new(classifier), config());

    pages.set(ACME_PRICING, "aaaa\nbbbb");
    tracker.run_once(None).await.expect("baseline run");
    pages.set(ACME_PRICING, "aaaa\ncccc");
    let run = tracker.run_once(None).await.expect("second run");

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.counters.unclassified, 1);
    assert_eq!(run.counters.failed, 0);

    let changes = store.changes();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].kind, ChangeKind::Unclassified);
    assert_eq!(changes[0].severity, Severity::Low);
    assert!((changes[0].significance - 0.5).abs() < 1e-9);
    assert!(!changes[0].summary.is_empty());
}

// ---------------------------------------------------------------------------
// Section 2: Failure isolation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn one_failing_target_does_not_fail_the_run() {
    let acme = subject("Acme", &[ACME_PRICING, "https://acme.example/gone"]);
    let acme_id = acme.id;
    let store = Arc::new(MemoryStore::with_subjects(vec![acme]));
    let pages = Arc::new(Pages::default());
    pages.set(ACME_PRICING, "Price: $10/mo");
    let tracker = tracker(&store, pages, Arc::new(KeywordClassifier), config());

    let run = tracker.run_once(None).await.expect("run");
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.counters.succeeded, 1);
    assert_eq!(run.counters.failed, 1);

    let observed = store.subjects();
    assert!(observed
        .iter()
        .find(|s| s.id == acme_id)
        .and_then(|s| s.last_observed_at)
        .is_some());
}

#[tokio::test]
async fn run_errors_when_every_target_fails() {
    let store = Arc::new(MemoryStore::with_subjects(vec![
        subject("Acme", &["https://acme.example/gone"]),
        subject("Globex", &["https://globex.example/gone"]),
    ]));
    let tracker = tracker(
        &store,
        Arc::new(Pages::default()),
        Arc::new(KeywordClassifier),
        config(),
    );

    let run = tracker.run_once(None).await.expect("run");
    assert_eq!(run.status, RunStatus::Error);
    assert_eq!(run.counters.failed, 2);
    assert!(run
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("all 2")));
    assert!(store.subjects().iter().all(|s| s.last_observed_at.is_none()));
}

#[tokio::test]
async fn retryable_fetch_errors_are_retried() {
    struct FlakyOnce {
        pages: Pages,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ContentSource for FlakyOnce {
        async fn fetch(&self, target: &TrackingTarget) -> Result<RawContent, FetchError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(FetchError::Timeout {
                    url: target.url.clone(),
                });
            }
            self.pages.read(target)
        }
    }

    let store = Arc::new(MemoryStore::with_subjects(vec![subject(
        "Acme",
        &[ACME_PRICING],
    )]));
    let source = Arc::new(FlakyOnce {
        pages: Pages::default(),
        calls: AtomicU32::new(0),
    });
    source.pages.set(ACME_PRICING, "Price: $10/mo");
    let tracker = tracker(&store, source.clone(), Arc::new(KeywordClassifier), config());

    let run = tracker.run_once(None).await.expect("run");
    assert_eq!(run.counters.succeeded, 1);
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn storage_failure_marks_target_failed() {
    let store = Arc::new(MemoryStore::with_subjects(vec![subject(
        "Acme",
        &[ACME_PRICING],
    )]));
    let pages = Arc::new(Pages::default());
    let stores = Stores {
        changes: Arc::new(BrokenChanges),
        ..Stores::shared(Arc::clone(&store))
    };
    let tracker = Tracker::new(stores, pages.clone(), Arc::new(KeywordClassifier), config());

    pages.set(ACME_PRICING, "Price: $10/mo");
    tracker.run_once(None).await.expect("baseline run");
    pages.set(ACME_PRICING, "Price: $12/mo");
    let run = tracker.run_once(None).await.expect("second run");

    assert_eq!(run.counters.failed, 1);
    assert_eq!(run.counters.classified, 0);
    assert_eq!(run.status, RunStatus::Error);
}

// ---------------------------------------------------------------------------
// Section 3: Run control
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_start_is_rejected_and_leaves_first_run_untouched() {
    let store = Arc::new(MemoryStore::with_subjects(vec![subject(
        "Acme",
        &[ACME_PRICING],
    )]));
    let source = Arc::new(GatedPages::new());
    source.pages.set(ACME_PRICING, "Price: $10/mo");
    let tracker = tracker(&store, source.clone(), Arc::new(KeywordClassifier), config());

    let first = tracker.start(None).await.expect("first start");
    assert_eq!(first.status, RunStatus::Running);

    let err = tracker.start(None).await.unwrap_err();
    assert!(
        matches!(err, TrackError::ConcurrencyViolation { active_run_id: Some(id) } if id == first.id),
        "unexpected error: {err:?}"
    );
    let err = tracker.run_once(None).await.unwrap_err();
    assert!(matches!(err, TrackError::ConcurrencyViolation { .. }));

    let current = tracker.status().await.expect("status").expect("a run");
    assert_eq!(current.id, first.id);
    assert_eq!(current.status, RunStatus::Running);

    source.gate.add_permits(10);
    let finished = wait_for_finish(&tracker, first.id).await;
    assert_eq!(finished.status, RunStatus::Completed);
    assert_eq!(tracker.recent_runs(10).await.expect("runs").len(), 1);
}

#[tokio::test]
async fn stop_lets_in_flight_target_finish_and_skips_the_rest() {
    let store = Arc::new(MemoryStore::with_subjects(vec![subject(
        "Acme",
        &[
            "https://acme.example/a",
            "https://acme.example/b",
            "https://acme.example/c",
        ],
    )]));
    let source = Arc::new(GatedPages::new());
    for page in ["a", "b", "c"] {
        source
            .pages
            .set(&format!("https://acme.example/{page}"), "content");
    }
    let tracker = tracker(
        &store,
        source.clone(),
        Arc::new(KeywordClassifier),
        TrackerConfig {
            max_concurrent_targets: 1,
            ..config()
        },
    );

    let run = tracker.start(None).await.expect("start");
    source.started.notified().await;
    assert!(tracker.stop());
    assert!(tracker.stop());
    source.gate.add_permits(10);

    let finished = wait_for_finish(&tracker, run.id).await;
    assert_eq!(finished.status, RunStatus::Completed);
    assert_eq!(finished.counters.processed(), 1);
    assert_eq!(source.pages.fetches.load(Ordering::SeqCst), 1);
    assert!(!tracker.stop());
}

#[tokio::test]
async fn wait_idle_returns_once_stopped_run_is_finalized() {
    let store = Arc::new(MemoryStore::with_subjects(vec![subject(
        "Acme",
        &["https://acme.example/a", "https://acme.example/b"],
    )]));
    let source = Arc::new(GatedPages::new());
    source.pages.set("https://acme.example/a", "content");
    source.pages.set("https://acme.example/b", "content");
    let tracker = tracker(
        &store,
        source.clone(),
        Arc::new(KeywordClassifier),
        TrackerConfig {
            max_concurrent_targets: 1,
            ..config()
        },
    );

    let run = tracker.start(None).await.expect("start");
    source.started.notified().await;
    assert!(tracker.stop());
    assert!(!tracker.wait_idle(Duration::from_millis(20)).await);

    source.gate.add_permits(10);
    assert!(tracker.wait_idle(Duration::from_secs(5)).await);

    let finished = tracker.status().await.expect("status").expect("run");
    assert_eq!(finished.id, run.id);
    assert!(finished.status.is_terminal());
    assert_eq!(finished.counters.processed(), 1);
    let next = tracker.run_once(None).await.expect("run lock released");
    assert_eq!(next.status, RunStatus::Completed);
}

#[tokio::test]
async fn wait_idle_without_a_run_returns_immediately() {
    let store = Arc::new(MemoryStore::with_subjects(Vec::new()));
    let tracker = tracker(
        &store,
        Arc::new(Pages::default()),
        Arc::new(KeywordClassifier),
        config(),
    );
    assert!(tracker.wait_idle(Duration::ZERO).await);
}

#[tokio::test(start_paused = true)]
async fn run_timeout_finishes_in_flight_target_then_errors() {
    let store = Arc::new(MemoryStore::with_subjects(vec![subject(
        "Acme",
        &[
            "https://acme.example/a",
            "https://acme.example/b",
            "https://acme.example/c",
        ],
    )]));
    let pages = Pages::default();
    for page in ["a", "b", "c"] {
        pages.set(&format!("https://acme.example/{page}"), "content");
    }
    let tracker = tracker(
        &store,
        Arc::new(SlowPages(pages)),
        Arc::new(KeywordClassifier),
        TrackerConfig {
            max_concurrent_targets: 1,
            run_timeout: Some(Duration::from_millis(50)),
            ..config()
        },
    );

    let run = tracker.run_once(None).await.expect("run");
    assert_eq!(run.status, RunStatus::Error);
    assert_eq!(run.counters.processed(), 1);
    assert!(run
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("timed out")));
}

#[tokio::test]
async fn scoped_run_only_touches_that_subject() {
    let store = Arc::new(MemoryStore::with_subjects(vec![
        subject("Acme", &[ACME_PRICING]),
        subject("Globex", &["https://globex.example"]),
    ]));
    let pages = Arc::new(Pages::default());
    pages.set(ACME_PRICING, "Price: $10/mo");
    pages.set("https://globex.example", "Welcome");
    let tracker = tracker(&store, pages.clone(), Arc::new(KeywordClassifier), config());

    let run = tracker.run_once(Some("acme")).await.expect("scoped run");
    assert_eq!(run.scope.as_deref(), Some("acme"));
    assert_eq!(run.counters.processed(), 1);
    assert_eq!(pages.fetches.load(Ordering::SeqCst), 1);

    let err = tracker.run_once(Some("initech")).await.unwrap_err();
    assert!(matches!(err, TrackError::UnknownSubject(ref slug) if slug == "initech"));
}

#[tokio::test]
async fn empty_subject_list_completes() {
    let store = Arc::new(MemoryStore::new());
    let tracker = tracker(
        &store,
        Arc::new(Pages::default()),
        Arc::new(KeywordClassifier),
        config(),
    );

    let run = tracker.run_once(None).await.expect("run");
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.counters.processed(), 0);
}

// ---------------------------------------------------------------------------
// Section 4: Reports
// ---------------------------------------------------------------------------

#[tokio::test]
async fn aggregate_is_idempotent_over_recorded_changes() {
    let store = Arc::new(MemoryStore::with_subjects(vec![
        subject("Acme", &[ACME_PRICING]),
        subject("Globex", &["https://globex.example/changelog"]),
    ]));
    let pages = Arc::new(Pages::default());
    let tracker = tracker(&store, pages.clone(), Arc::new(KeywordClassifier), config());

    pages.set(ACME_PRICING, "Price: $10/mo");
    pages.set("https://globex.example/changelog", "v1 released");
    tracker.run_once(None).await.expect("run 1");
    pages.set(ACME_PRICING, "Price: $12/mo");
    pages.set("https://globex.example/changelog", "v2 released with exports");
    tracker.run_once(None).await.expect("run 2");

    let start = Utc::now() - chrono::Duration::days(7);
    let end = Utc::now() + chrono::Duration::minutes(1);
    let first = aggregate(store.as_ref(), start, end).await.expect("aggregate");
    let second = aggregate(store.as_ref(), start, end).await.expect("aggregate again");

    assert_eq!(first, second);
    assert_eq!(first.total_changes, 2);
    assert_eq!(first.by_kind.get(&ChangeKind::Pricing), Some(&1));
    assert_eq!(first.by_kind.get(&ChangeKind::Feature), Some(&1));
    let names: Vec<&str> = first.subjects.iter().map(|s| s.subject_name.as_str()).collect();
    assert_eq!(names, vec!["Acme", "Globex"]);
}

#[tokio::test]
async fn aggregate_rejects_inverted_window() {
    let store = MemoryStore::new();
    let now = Utc::now();
    let err = aggregate(&store, now, now).await.unwrap_err();
    assert!(matches!(err, TrackError::InvalidWindow { .. }));
}

#[tokio::test]
async fn published_report_replaces_earlier_report_for_same_window() {
    let store = Arc::new(MemoryStore::with_subjects(vec![subject(
        "Acme",
        &[ACME_PRICING],
    )]));
    let pages = Arc::new(Pages::default());
    let tracker = tracker(&store, pages.clone(), Arc::new(KeywordClassifier), config());

    let start = Utc::now() - chrono::Duration::days(7);
    let end = Utc::now() + chrono::Duration::minutes(1);

    pages.set(ACME_PRICING, "Price: $10/mo");
    tracker.run_once(None).await.expect("run 1");
    let empty = tracker.publish_report(start, end).await.expect("publish");
    assert_eq!(empty.contents.total_changes, 0);

    pages.set(ACME_PRICING, "Price: $12/mo");
    tracker.run_once(None).await.expect("run 2");
    let report = tracker.publish_report(start, end).await.expect("publish again");
    assert_eq!(report.contents.total_changes, 1);

    let stored = tracker.stored_reports(10).await.expect("stored");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].contents, report.contents);
}
