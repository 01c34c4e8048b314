use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::client::PageClient;
use crate::error::FetchError;
use crate::types::{ContentFormat, RawContent};

pub const ITUNES_LOOKUP_BASE: &str = "https://itunes.apple.com";

static APPLE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"apps\.apple\.com/.*?/id(\d+)").expect("valid regex"));
static APPLE_COUNTRY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"apps\.apple\.com/([a-z]{2})/").expect("valid regex"));

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(rename = "resultCount", default)]
    result_count: u32,
    #[serde(default)]
    results: Vec<AppListing>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppListing {
    track_name: Option<String>,
    seller_name: Option<String>,
    version: Option<String>,
    formatted_price: Option<String>,
    average_user_rating: Option<f64>,
    #[serde(default)]
    genres: Vec<String>,
    release_notes: Option<String>,
    description: Option<String>,
    track_view_url: Option<String>,
}

/// Reads app-store listings.
///
/// Apple listings go through the public iTunes lookup API and are rendered
/// as stable text. Any other listing page (Google Play) is fetched as HTML.
#[derive(Clone)]
pub struct AppStoreAdapter {
    client: PageClient,
    lookup_base: String,
}

impl AppStoreAdapter {
    #[must_use]
    pub fn new(client: PageClient) -> Self {
        Self {
            client,
            lookup_base: ITUNES_LOOKUP_BASE.to_owned(),
        }
    }

    #[must_use]
    pub fn with_lookup_base(mut self, base: &str) -> Self {
        self.lookup_base = base.trim_end_matches('/').to_owned();
        self
    }

    /// # Errors
    ///
    /// Returns [`FetchError::AppNotFound`] if the lookup API knows no such app,
    /// otherwise propagates request errors.
    pub async fn fetch(&self, url: &str) -> Result<RawContent, FetchError> {
        let Some((app_id, country)) = apple_app_ref(url) else {
            return self.client.get_page(url, None).await;
        };

        let lookup_url = format!(
            "{}/lookup?id={app_id}&country={country}",
            self.lookup_base
        );
        let response: LookupResponse = self
            .client
            .get_json(&lookup_url, &format!("app lookup for {app_id}"))
            .await?;

        let found = response.result_count;
        let Some(listing) = response.results.into_iter().next().filter(|_| found > 0) else {
            return Err(FetchError::AppNotFound { app_id, country });
        };

        Ok(RawContent {
            requested_url: url.to_owned(),
            final_url: listing
                .track_view_url
                .clone()
                .unwrap_or_else(|| url.to_owned()),
            status: 200,
            format: ContentFormat::Text,
            body: render_listing(&listing),
        })
    }
}

/// Extract `(app_id, country)` from an Apple App Store URL.
fn apple_app_ref(url: &str) -> Option<(String, String)> {
    let app_id = APPLE_ID_RE.captures(url)?.get(1)?.as_str().to_owned();
    let country = APPLE_COUNTRY_RE
        .captures(url)
        .and_then(|c| c.get(1))
        .map_or_else(|| "us".to_owned(), |m| m.as_str().to_owned());
    Some((app_id, country))
}

/// Render listing fields in a fixed order. Rating counts are left out since
/// they move every day without the listing itself changing.
fn render_listing(listing: &AppListing) -> String {
    let mut out = String::new();
    if let Some(name) = &listing.track_name {
        let _ = writeln!(out, "# {name}");
    }
    if let Some(seller) = &listing.seller_name {
        let _ = writeln!(out, "Developer: {seller}");
    }
    if let Some(version) = &listing.version {
        let _ = writeln!(out, "Version: {version}");
    }
    if let Some(price) = &listing.formatted_price {
        let _ = writeln!(out, "Price: {price}");
    }
    if let Some(rating) = listing.average_user_rating {
        let _ = writeln!(out, "Rating: {rating:.1}");
    }
    if !listing.genres.is_empty() {
        let _ = writeln!(out, "Genres: {}", listing.genres.join(", "));
    }
    if let Some(notes) = listing.release_notes.as_deref().filter(|s| !s.trim().is_empty()) {
        let _ = writeln!(out, "# Release notes\n{notes}");
    }
    if let Some(description) = listing.description.as_deref().filter(|s| !s.trim().is_empty()) {
        let _ = writeln!(out, "# Description\n{description}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apple_app_ref_extracts_id_and_country() {
        assert_eq!(
            apple_app_ref("https://apps.apple.com/gb/app/notion-notes-docs-tasks/id1232780281"),
            Some(("1232780281".to_owned(), "gb".to_owned()))
        );
    }

    #[test]
    fn apple_app_ref_defaults_country_to_us() {
        assert_eq!(
            apple_app_ref("https://apps.apple.com/app/id42"),
            Some(("42".to_owned(), "us".to_owned()))
        );
    }

    #[test]
    fn apple_app_ref_ignores_play_store() {
        assert_eq!(
            apple_app_ref("https://play.google.com/store/apps/details?id=notion.id"),
            None
        );
    }

    #[test]
    fn render_listing_uses_fixed_order_and_skips_empty_fields() {
        let listing = AppListing {
            track_name: Some("Acme".to_owned()),
            seller_name: Some("Acme Inc.".to_owned()),
            version: Some("2.3.1".to_owned()),
            formatted_price: Some("Free".to_owned()),
            average_user_rating: Some(4.666),
            genres: vec!["Productivity".to_owned()],
            release_notes: Some("  ".to_owned()),
            description: Some("Do things.".to_owned()),
            track_view_url: None,
        };
        assert_eq!(
            render_listing(&listing),
            "# Acme\nDeveloper: Acme Inc.\nVersion: 2.3.1\nPrice: Free\nRating: 4.7\n\
             Genres: Productivity\n# Description\nDo things.\n"
        );
    }
}
