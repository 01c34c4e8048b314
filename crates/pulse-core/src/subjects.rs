use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::{url_host, SourceKind, SubjectStatus};
use crate::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub url: String,
    /// Inferred from the URL when omitted.
    pub kind: Option<SourceKind>,
}

impl TargetConfig {
    #[must_use]
    pub fn resolved_kind(&self) -> SourceKind {
        self.kind
            .unwrap_or_else(|| SourceKind::infer_from_url(&self.url))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectConfig {
    pub name: String,
    pub category: Option<String>,
    pub primary_site: Option<String>,
    #[serde(default = "default_status")]
    pub status: SubjectStatus,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

fn default_status() -> SubjectStatus {
    SubjectStatus::Active
}

impl SubjectConfig {
    /// Generate a URL-safe slug from the subject name.
    #[must_use]
    pub fn slug(&self) -> String {
        slugify(&self.name)
    }
}

/// Lowercase, ASCII-only, dash-separated form of a display name.
#[must_use]
pub fn slugify(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .filter_map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                Some(c)
            } else if c.is_whitespace() {
                Some('-')
            } else {
                None
            }
        })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[derive(Debug, Deserialize)]
pub struct SubjectsFile {
    pub subjects: Vec<SubjectConfig>,
}

/// Load and validate the subjects configuration from a YAML file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_subjects(path: &Path) -> Result<SubjectsFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::SubjectsFileIo {
        path: path.display().to_string(),
        source: e,
    })?;

    parse_subjects(&content)
}

/// Parse and validate subjects YAML already in memory.
///
/// # Errors
///
/// Returns `ConfigError` if the YAML is malformed or fails validation.
pub fn parse_subjects(content: &str) -> Result<SubjectsFile, ConfigError> {
    let subjects_file: SubjectsFile = serde_yaml::from_str(content)?;
    validate_subjects(&subjects_file)?;
    Ok(subjects_file)
}

fn validate_subjects(subjects_file: &SubjectsFile) -> Result<(), ConfigError> {
    let mut seen_names = HashSet::new();
    let mut seen_slugs = HashSet::new();

    for subject in &subjects_file.subjects {
        if subject.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "subject name must be non-empty".to_string(),
            ));
        }

        if !seen_names.insert(subject.name.to_lowercase()) {
            return Err(ConfigError::Validation(format!(
                "duplicate subject name: '{}'",
                subject.name
            )));
        }

        let slug = subject.slug();
        if slug.is_empty() {
            return Err(ConfigError::Validation(format!(
                "subject '{}' has no ASCII characters to build a slug from",
                subject.name
            )));
        }
        if !seen_slugs.insert(slug.clone()) {
            return Err(ConfigError::Validation(format!(
                "duplicate subject slug: '{}' (from subject '{}')",
                slug, subject.name
            )));
        }

        if let Some(site) = &subject.primary_site {
            if url_host(site).is_none() {
                return Err(ConfigError::Validation(format!(
                    "subject '{}' has invalid primary_site '{site}'",
                    subject.name
                )));
            }
        }

        let mut seen_urls = HashSet::new();
        for target in &subject.targets {
            if url_host(&target.url).is_none() {
                return Err(ConfigError::Validation(format!(
                    "subject '{}' has target '{}' that is not an absolute http(s) URL",
                    subject.name, target.url
                )));
            }
            if !seen_urls.insert(target.url.trim_end_matches('/')) {
                return Err(ConfigError::Validation(format!(
                    "subject '{}' lists target '{}' more than once",
                    subject.name, target.url
                )));
            }
        }
    }

    Ok(())
}
