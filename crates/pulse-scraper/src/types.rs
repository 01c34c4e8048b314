use serde::{Deserialize, Serialize};

/// How a fetched body should be read by the canonicalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentFormat {
    Html,
    Text,
}

/// Body and retrieval metadata for one fetched target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawContent {
    pub requested_url: String,
    /// URL after redirects.
    pub final_url: String,
    pub status: u16,
    pub format: ContentFormat,
    pub body: String,
}

/// Stable text form of a [`RawContent`] plus its SHA-256 hex digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalContent {
    pub text: String,
    pub hash: String,
    pub truncated: bool,
}
