//! Line-level comparison of two snapshots of the same target.
//!
//! Significance is the share of characters sitting on removed or added lines,
//! relative to the characters on both sides. A diff at or above the threshold
//! is significant.

use std::collections::HashMap;

use pulse_core::Snapshot;
use uuid::Uuid;

pub const DEFAULT_THRESHOLD: f64 = 0.02;

/// Upper bound on the LCS table. Larger middles fall back to a multiset comparison.
const MAX_LCS_CELLS: usize = 4_000_000;

pub const DEFAULT_MAX_DELTA_CHARS: usize = 16_000;

/// Transient comparison of two snapshots. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Diff {
    pub previous_snapshot_id: Uuid,
    pub current_snapshot_id: Uuid,
    /// In `[0, 1]`.
    pub significance: f64,
    /// Removed lines prefixed `- `, added lines `+ `, in document order.
    pub delta: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DiffOutcome {
    /// First observation of the target.
    Baseline,
    /// Identical content hashes.
    Unchanged,
    Insignificant(Diff),
    Significant(Diff),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiffEngine {
    threshold: f64,
    max_delta_chars: usize,
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl DiffEngine {
    #[must_use]
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
            max_delta_chars: DEFAULT_MAX_DELTA_CHARS,
        }
    }

    #[must_use]
    pub fn with_max_delta_chars(mut self, max_delta_chars: usize) -> Self {
        self.max_delta_chars = max_delta_chars;
        self
    }

    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Decide what a new snapshot means relative to the one before it.
    #[must_use]
    pub fn evaluate(&self, previous: Option<&Snapshot>, current: &Snapshot) -> DiffOutcome {
        let Some(previous) = previous else {
            return DiffOutcome::Baseline;
        };
        if previous.content_hash == current.content_hash {
            return DiffOutcome::Unchanged;
        }

        let diff = self.compare(previous, current);
        if !diff.delta.is_empty() && diff.significance >= self.threshold {
            DiffOutcome::Significant(diff)
        } else {
            DiffOutcome::Insignificant(diff)
        }
    }

    /// Compare two snapshots.
    ///
    /// Equal hashes give significance 0 without looking at the text. Lines
    /// past the end of a truncated side were never observed on that side, so
    /// the other side is compared only up to the same line count.
    #[must_use]
    pub fn compare(&self, previous: &Snapshot, current: &Snapshot) -> Diff {
        let mut diff = Diff {
            previous_snapshot_id: previous.id,
            current_snapshot_id: current.id,
            significance: 0.0,
            delta: String::new(),
        };
        if previous.content_hash == current.content_hash {
            return diff;
        }

        let (old, new) = comparable_lines(previous, current);
        let edits = line_edits(&old, &new);

        let changed: usize = edits.iter().map(|e| e.line().chars().count()).sum();
        let total: usize = old
            .iter()
            .chain(new.iter())
            .map(|line| line.chars().count())
            .sum();

        diff.significance = ratio(changed, total);
        diff.delta = render_delta(&edits, self.max_delta_chars);
        diff
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edit<'a> {
    Removed(&'a str),
    Added(&'a str),
}

impl<'a> Edit<'a> {
    fn line(&self) -> &'a str {
        match self {
            Edit::Removed(line) | Edit::Added(line) => *line,
        }
    }
}

fn comparable_lines<'a>(
    previous: &'a Snapshot,
    current: &'a Snapshot,
) -> (Vec<&'a str>, Vec<&'a str>) {
    let mut old: Vec<&str> = previous.canonical_text.lines().collect();
    let mut new: Vec<&str> = current.canonical_text.lines().collect();
    if previous.truncated && new.len() > old.len() {
        new.truncate(old.len());
    }
    if current.truncated && old.len() > new.len() {
        old.truncate(new.len());
    }
    (old, new)
}

#[allow(clippy::cast_precision_loss)]
fn ratio(changed: usize, total: usize) -> f64 {
    (changed as f64 / total.max(1) as f64).clamp(0.0, 1.0)
}

/// Removed/added lines between `old` and `new`, ignoring the common prefix and suffix.
fn line_edits<'a>(old: &[&'a str], new: &[&'a str]) -> Vec<Edit<'a>> {
    let prefix = old.iter().zip(new).take_while(|(a, b)| a == b).count();
    let old_rest = &old[prefix..];
    let new_rest = &new[prefix..];
    let suffix = old_rest
        .iter()
        .rev()
        .zip(new_rest.iter().rev())
        .take_while(|(a, b)| a == b)
        .count();
    let old_mid = &old_rest[..old_rest.len() - suffix];
    let new_mid = &new_rest[..new_rest.len() - suffix];

    if old_mid.is_empty() {
        return new_mid.iter().copied().map(Edit::Added).collect();
    }
    if new_mid.is_empty() {
        return old_mid.iter().copied().map(Edit::Removed).collect();
    }
    if (old_mid.len() + 1).saturating_mul(new_mid.len() + 1) > MAX_LCS_CELLS {
        return multiset_edits(old_mid, new_mid);
    }
    lcs_edits(old_mid, new_mid)
}

fn lcs_edits<'a>(old: &[&'a str], new: &[&'a str]) -> Vec<Edit<'a>> {
    let (n, m) = (old.len(), new.len());
    let width = m + 1;
    // table[i * width + j] = LCS length of old[i..] and new[j..]
    let mut table = vec![0u32; (n + 1) * width];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i * width + j] = if old[i] == new[j] {
                table[(i + 1) * width + j + 1] + 1
            } else {
                table[(i + 1) * width + j].max(table[i * width + j + 1])
            };
        }
    }

    let mut edits = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            i += 1;
            j += 1;
        } else if table[(i + 1) * width + j] >= table[i * width + j + 1] {
            edits.push(Edit::Removed(old[i]));
            i += 1;
        } else {
            edits.push(Edit::Added(new[j]));
            j += 1;
        }
    }
    edits.extend(old[i..].iter().copied().map(Edit::Removed));
    edits.extend(new[j..].iter().copied().map(Edit::Added));
    edits
}

/// Order-insensitive fallback: a line counts as unchanged if it appears on both sides.
fn multiset_edits<'a>(old: &[&'a str], new: &[&'a str]) -> Vec<Edit<'a>> {
    let mut unmatched_new: HashMap<&str, usize> = HashMap::new();
    for &line in new {
        *unmatched_new.entry(line).or_default() += 1;
    }
    let mut unmatched_old: HashMap<&str, usize> = HashMap::new();
    for &line in old {
        *unmatched_old.entry(line).or_default() += 1;
    }

    let mut edits = Vec::new();
    for &line in old {
        match unmatched_new.get_mut(line) {
            Some(count) if *count > 0 => *count -= 1,
            _ => edits.push(Edit::Removed(line)),
        }
    }
    for &line in new {
        match unmatched_old.get_mut(line) {
            Some(count) if *count > 0 => *count -= 1,
            _ => edits.push(Edit::Added(line)),
        }
    }
    edits
}

fn render_delta(edits: &[Edit<'_>], max_chars: usize) -> String {
    let mut delta = String::new();
    let mut used = 0usize;

    for (index, edit) in edits.iter().enumerate() {
        let line = match edit {
            Edit::Removed(line) => format!("- {line}"),
            Edit::Added(line) => format!("+ {line}"),
        };
        let cost = line.chars().count() + 1;
        if used + cost > max_chars && !delta.is_empty() {
            delta.push_str(&format!("[{} more changed lines]", edits.len() - index));
            return delta;
        }
        delta.push_str(&line);
        delta.push('\n');
        used += cost;
    }

    if delta.ends_with('\n') {
        delta.pop();
    }
    delta
}
