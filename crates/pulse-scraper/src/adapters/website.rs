use serde_json::json;

use crate::client::{PageClient, BROWSER_FALLBACK_UA};
use crate::error::FetchError;
use crate::types::RawContent;

/// Reads company web pages.
///
/// With a render endpoint configured the page is rendered by a headless
/// browser service so client-side content is captured. Without one the page
/// is fetched directly, retrying once with a browser user agent on 403.
#[derive(Clone)]
pub struct WebsiteAdapter {
    client: PageClient,
    render_url: Option<String>,
}

impl WebsiteAdapter {
    #[must_use]
    pub fn new(client: PageClient, render_url: Option<String>) -> Self {
        Self { client, render_url }
    }

    /// # Errors
    ///
    /// Propagates [`FetchError`] from the underlying request.
    pub async fn fetch(&self, url: &str) -> Result<RawContent, FetchError> {
        if let Some(endpoint) = &self.render_url {
            return self
                .client
                .post_for_page(endpoint, url, &json!({ "url": url }))
                .await;
        }

        match self.client.get_page(url, None).await {
            Err(FetchError::UnexpectedStatus { status: 403, .. }) => {
                tracing::debug!(url, "403 with default user agent, retrying as browser");
                self.client.get_page(url, Some(BROWSER_FALLBACK_UA)).await
            }
            other => other,
        }
    }
}
