use pulse_core::{ChangeKind, Severity, SourceKind};
use serde::{Deserialize, Serialize};

/// What the classification service is asked about one detected change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRequest {
    pub subject_name: String,
    pub url: String,
    pub source_kind: SourceKind,
    /// Bounded diff text: removed lines prefixed `- `, added lines `+ `.
    pub delta: String,
}

/// A typed verdict. `kind` is never [`ChangeKind::Unclassified`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub kind: ChangeKind,
    pub severity: Severity,
    pub summary: String,
}
