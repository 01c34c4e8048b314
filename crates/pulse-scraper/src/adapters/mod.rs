//! Source adapters: one capability per [`SourceKind`], one entry point.
//!
//! Adapters make a single attempt per call and never touch storage.

mod app_store;
mod social;
mod website;

use std::time::Duration;

use pulse_core::{SourceKind, TrackingTarget};

use crate::client::PageClient;
use crate::error::FetchError;
use crate::types::RawContent;

pub use app_store::{AppStoreAdapter, ITUNES_LOOKUP_BASE};
pub use social::SocialAdapter;
pub use website::WebsiteAdapter;

/// Routes a [`TrackingTarget`] to the adapter for its source kind and bounds
/// the whole call with a timeout.
#[derive(Clone)]
pub struct SourceFetcher {
    website: WebsiteAdapter,
    app_store: AppStoreAdapter,
    social: SocialAdapter,
    timeout: Duration,
}

impl SourceFetcher {
    /// # Errors
    ///
    /// Returns [`FetchError::Client`] if the HTTP client cannot be built.
    pub fn new(
        timeout_secs: u64,
        user_agent: &str,
        render_url: Option<String>,
        max_social_posts: usize,
    ) -> Result<Self, FetchError> {
        let client = PageClient::new(timeout_secs, user_agent)?;
        Ok(Self {
            website: WebsiteAdapter::new(client.clone(), render_url),
            app_store: AppStoreAdapter::new(client.clone()),
            social: SocialAdapter::new(client, max_social_posts),
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// Point app-store lookups at a different API base (used by tests).
    #[must_use]
    pub fn with_itunes_base(mut self, base: &str) -> Self {
        self.app_store = self.app_store.with_lookup_base(base);
        self
    }

    /// Fetch raw content for one target.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Timeout`] if the adapter does not finish within
    /// the configured timeout, or whatever the adapter itself reports.
    pub async fn fetch(&self, target: &TrackingTarget) -> Result<RawContent, FetchError> {
        let call = async {
            match target.kind {
                SourceKind::Website => self.website.fetch(&target.url).await,
                SourceKind::AppStore => self.app_store.fetch(&target.url).await,
                SourceKind::Social => self.social.fetch(&target.url).await,
            }
        };

        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                url: target.url.clone(),
            }),
        }
    }
}
