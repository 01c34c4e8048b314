use pulse_db::DbError;
use thiserror::Error;
use uuid::Uuid;

/// Failure of a storage seam. Fatal to the target being processed.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a tracking run is already active")]
    RunAlreadyActive { active_run_id: Option<Uuid> },
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error(transparent)]
    Db(DbError),
    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::RunAlreadyActive { active_run_id } => {
                StoreError::RunAlreadyActive { active_run_id }
            }
            DbError::NotFound => StoreError::NotFound("record"),
            other => StoreError::Db(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum TrackError {
    /// A second run was requested while one is running. The running run is untouched.
    #[error("a tracking run is already running")]
    ConcurrencyViolation { active_run_id: Option<Uuid> },
    #[error("subject '{0}' does not exist or is inactive")]
    UnknownSubject(String),
    #[error("invalid report window: start {start} is not before end {end}")]
    InvalidWindow { start: String, end: String },
    #[error("failed to build tracker: {0}")]
    Setup(String),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for TrackError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RunAlreadyActive { active_run_id } => {
                TrackError::ConcurrencyViolation { active_run_id }
            }
            other => TrackError::Store(other),
        }
    }
}
