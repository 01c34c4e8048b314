//! Report aggregation over a detection window.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use pulse_core::{ChangeWithSubject, Report, ReportContents, SubjectReport};
use uuid::Uuid;

use crate::error::TrackError;
use crate::store::ChangeStore;

/// Group changes detected in `[window_start, window_end)` by subject and kind.
///
/// Changes outside the window are ignored. Subjects are ordered by name and
/// then id, so the same input always yields the same contents.
#[must_use]
pub fn summarize(
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    changes: &[ChangeWithSubject],
) -> ReportContents {
    let mut by_kind = BTreeMap::new();
    let mut subjects: HashMap<Uuid, SubjectReport> = HashMap::new();
    let mut total_changes = 0u64;

    for entry in changes {
        let change = &entry.change;
        if change.detected_at < window_start || change.detected_at >= window_end {
            continue;
        }
        total_changes += 1;
        *by_kind.entry(change.kind).or_insert(0) += 1;

        let subject = subjects
            .entry(change.subject_id)
            .or_insert_with(|| SubjectReport {
                subject_id: change.subject_id,
                subject_name: entry.subject_name.clone(),
                total: 0,
                by_kind: BTreeMap::new(),
            });
        subject.total += 1;
        *subject.by_kind.entry(change.kind).or_insert(0) += 1;
    }

    let mut subjects: Vec<SubjectReport> = subjects.into_values().collect();
    subjects.sort_by(|a, b| {
        a.subject_name
            .cmp(&b.subject_name)
            .then(a.subject_id.cmp(&b.subject_id))
    });

    ReportContents {
        window_start,
        window_end,
        total_changes,
        by_kind,
        subjects,
    }
}

/// ISO week of `at`, formatted like `2025-W34`.
#[must_use]
pub fn week_label(at: DateTime<Utc>) -> String {
    at.format("%G-W%V").to_string()
}

/// Read the window's changes and summarize them. Read-only.
///
/// # Errors
///
/// Returns [`TrackError::InvalidWindow`] unless `window_start < window_end`,
/// or [`TrackError::Store`] if changes cannot be read.
pub async fn aggregate(
    changes: &dyn ChangeStore,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Result<ReportContents, TrackError> {
    if window_start >= window_end {
        return Err(TrackError::InvalidWindow {
            start: window_start.to_rfc3339(),
            end: window_end.to_rfc3339(),
        });
    }
    let window = changes.in_window(window_start, window_end).await?;
    Ok(summarize(window_start, window_end, &window))
}

/// [`aggregate`] stamped with a week label and generation time.
///
/// # Errors
///
/// Same as [`aggregate`].
pub async fn build_report(
    changes: &dyn ChangeStore,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Result<Report, TrackError> {
    let contents = aggregate(changes, window_start, window_end).await?;
    Ok(Report {
        week_label: week_label(window_start),
        generated_at: Utc::now(),
        contents,
    })
}
