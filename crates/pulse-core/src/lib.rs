pub mod app_config;
pub mod config;
pub mod domain;
pub mod subjects;

pub use app_config::{AppConfig, Environment};
pub use config::{load_app_config, load_app_config_from_env};
pub use domain::{
    AppendedSnapshot, Change, ChangeKind, ChangeWithSubject, NewChange, Report, ReportContents, Run, RunCounters,
    RunStatus, Severity, Snapshot, SourceKind, Subject, SubjectReport, SubjectStatus,
    TrackingTarget,
};
pub use subjects::{load_subjects, SubjectConfig, SubjectsFile, TargetConfig};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read subjects file {path}: {source}")]
    SubjectsFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse subjects file: {0}")]
    SubjectsFileParse(#[from] serde_yaml::Error),

    #[error("subjects validation failed: {0}")]
    Validation(String),
}
