pub mod aggregate;
pub mod diff;
pub mod error;
pub mod memory;
pub mod orchestrator;
pub mod pg;
pub mod sources;
pub mod store;

pub use aggregate::{aggregate, build_report, summarize, week_label};
pub use diff::{Diff, DiffEngine, DiffOutcome, DEFAULT_THRESHOLD};
pub use error::{StoreError, TrackError};
pub use memory::MemoryStore;
pub use orchestrator::{build_tracker, Tracker, TrackerConfig};
pub use pg::PgStore;
pub use sources::{ChangeClassifier, ContentSource};
pub use store::{ChangeStore, ReportStore, RunStore, SnapshotStore, Stores, SubjectSource};
