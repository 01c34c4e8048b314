use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Subjects and targets
// ---------------------------------------------------------------------------

const SOCIAL_HOSTS: &[&str] = &[
    "twitter.com",
    "x.com",
    "linkedin.com",
    "facebook.com",
    "instagram.com",
    "youtube.com",
    "threads.net",
    "bsky.app",
];

/// How a tracking target is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Website,
    AppStore,
    Social,
}

impl SourceKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Website => "website",
            SourceKind::AppStore => "app_store",
            SourceKind::Social => "social",
        }
    }

    /// Parse the stored string form. Returns `None` for unknown values.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "website" => Some(SourceKind::Website),
            "app_store" => Some(SourceKind::AppStore),
            "social" => Some(SourceKind::Social),
            _ => None,
        }
    }

    /// Guess the source kind from a target URL.
    ///
    /// App-store listing hosts map to [`SourceKind::AppStore`], known social
    /// networks and feed-looking paths map to [`SourceKind::Social`], and
    /// everything else is a [`SourceKind::Website`].
    #[must_use]
    pub fn infer_from_url(url: &str) -> Self {
        let host = url_host(url).unwrap_or_default();
        let host = host.strip_prefix("www.").unwrap_or(&host);

        if host == "apps.apple.com" || host == "itunes.apple.com" || host == "play.google.com" {
            return SourceKind::AppStore;
        }

        if SOCIAL_HOSTS
            .iter()
            .any(|s| host == *s || host.ends_with(&format!(".{s}")))
        {
            return SourceKind::Social;
        }

        let path = url.split(['?', '#']).next().unwrap_or(url).to_lowercase();
        if path.ends_with(".rss")
            || path.ends_with(".atom")
            || path.ends_with("/feed")
            || path.ends_with("/feed/")
            || path.ends_with("/rss")
            || path.ends_with("feed.xml")
        {
            return SourceKind::Social;
        }

        SourceKind::Website
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extract the lowercase host of an absolute `http`/`https` URL.
///
/// Returns `None` when the URL has no scheme or an empty host.
#[must_use]
pub fn url_host(url: &str) -> Option<String> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let authority = authority.rsplit('@').next().unwrap_or(authority);
    let host = authority.split(':').next().unwrap_or_default();
    if host.is_empty() {
        None
    } else {
        Some(host.to_lowercase())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectStatus {
    Active,
    Inactive,
}

impl SubjectStatus {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SubjectStatus::Active),
            "inactive" => Some(SubjectStatus::Inactive),
            _ => None,
        }
    }
}

impl std::fmt::Display for SubjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubjectStatus::Active => write!(f, "active"),
            SubjectStatus::Inactive => write!(f, "inactive"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingTarget {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub url: String,
    pub kind: SourceKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub category: Option<String>,
    pub primary_site: Option<String>,
    pub status: SubjectStatus,
    pub targets: Vec<TrackingTarget>,
    pub created_at: DateTime<Utc>,
    pub last_observed_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Snapshots and changes
// ---------------------------------------------------------------------------

/// Canonical content of one target at one point in time. Never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: Uuid,
    pub target_id: Uuid,
    pub sequence: i64,
    pub content_hash: String,
    pub canonical_text: String,
    /// `true` when the canonical text was cut at the size cap.
    pub truncated: bool,
    pub captured_at: DateTime<Utc>,
}

/// Result of appending to a target's log: the new snapshot and the one before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendedSnapshot {
    pub previous: Option<Snapshot>,
    pub current: Snapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Feature,
    Pricing,
    Ui,
    Other,
    Unclassified,
}

impl ChangeKind {
    /// Kinds a classification service is allowed to return.
    pub const CLASSIFIABLE: [ChangeKind; 4] = [
        ChangeKind::Feature,
        ChangeKind::Pricing,
        ChangeKind::Ui,
        ChangeKind::Other,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Feature => "feature",
            ChangeKind::Pricing => "pricing",
            ChangeKind::Ui => "ui",
            ChangeKind::Other => "other",
            ChangeKind::Unclassified => "unclassified",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "feature" => Some(ChangeKind::Feature),
            "pricing" => Some(ChangeKind::Pricing),
            "ui" => Some(ChangeKind::Ui),
            "other" => Some(ChangeKind::Other),
            "unclassified" => Some(ChangeKind::Unclassified),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    pub const ALL: [Severity; 3] = [Severity::High, Severity::Medium, Severity::Low];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Some(Severity::High),
            "medium" => Some(Severity::Medium),
            "low" => Some(Severity::Low),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected change ready to be persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewChange {
    pub subject_id: Uuid,
    pub target_id: Uuid,
    pub run_id: Option<Uuid>,
    pub kind: ChangeKind,
    pub severity: Severity,
    pub summary: String,
    pub significance: f64,
    pub previous_snapshot_id: Uuid,
    pub current_snapshot_id: Uuid,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub target_id: Uuid,
    pub run_id: Option<Uuid>,
    pub kind: ChangeKind,
    pub severity: Severity,
    pub summary: String,
    pub significance: f64,
    pub previous_snapshot_id: Uuid,
    pub current_snapshot_id: Uuid,
    pub detected_at: DateTime<Utc>,
}

impl Change {
    #[must_use]
    pub fn from_new(id: Uuid, new: NewChange) -> Self {
        Self {
            id,
            subject_id: new.subject_id,
            target_id: new.target_id,
            run_id: new.run_id,
            kind: new.kind,
            severity: new.severity,
            summary: new.summary,
            significance: new.significance,
            previous_snapshot_id: new.previous_snapshot_id,
            current_snapshot_id: new.current_snapshot_id,
            detected_at: new.detected_at,
        }
    }
}

/// A change joined with the display name of its subject, as read for reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeWithSubject {
    pub subject_name: String,
    pub change: Change,
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Idle,
    Running,
    Completed,
    Error,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Idle => "idle",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Error => "error",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(RunStatus::Idle),
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "error" => Some(RunStatus::Error),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Error)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-target outcome counters for one run.
///
/// `succeeded` counts every target processed without failure, which includes
/// baselines and insignificant diffs. `classified` and `unclassified` split the
/// changes that were persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub succeeded: u32,
    pub baseline: u32,
    pub skipped_insignificant: u32,
    pub failed: u32,
    pub classified: u32,
    pub unclassified: u32,
}

impl RunCounters {
    #[must_use]
    pub fn processed(&self) -> u32 {
        self.succeeded + self.failed
    }

    #[must_use]
    pub fn changes(&self) -> u32 {
        self.classified + self.unclassified
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub status: RunStatus,
    /// Subject slug the run was restricted to, if any.
    pub scope: Option<String>,
    pub counters: RunCounters,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectReport {
    pub subject_id: Uuid,
    pub subject_name: String,
    pub total: u64,
    pub by_kind: BTreeMap<ChangeKind, u64>,
}

/// The deterministic part of a report: identical inputs give identical contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportContents {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub total_changes: u64,
    pub by_kind: BTreeMap<ChangeKind, u64>,
    pub subjects: Vec<SubjectReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// ISO week label of the window start, e.g. `2025-W34`.
    pub week_label: String,
    pub generated_at: DateTime<Utc>,
    pub contents: ReportContents,
}
