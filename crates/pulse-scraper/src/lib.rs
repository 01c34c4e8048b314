pub mod adapters;
pub mod canonical;
pub mod client;
pub mod error;
pub mod retry;
pub mod types;

pub use adapters::{AppStoreAdapter, SocialAdapter, SourceFetcher, WebsiteAdapter};
pub use canonical::{canonicalize, content_hash, DEFAULT_MAX_BYTES};
pub use client::PageClient;
pub use error::FetchError;
pub use retry::retry_fetch;
pub use types::{CanonicalContent, ContentFormat, RawContent};
