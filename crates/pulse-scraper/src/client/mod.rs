//! Shared HTTP client used by every source adapter.

mod origin;

use std::time::Duration;

use reqwest::{Client, StatusCode};

use crate::error::FetchError;
use crate::types::{ContentFormat, RawContent};

pub use origin::{extract_domain, extract_origin};

pub(crate) const BROWSER_FALLBACK_UA: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Thin wrapper over `reqwest::Client` that turns HTTP outcomes into
/// [`FetchError`]s. Makes exactly one request per call; retrying is the
/// caller's job.
#[derive(Clone)]
pub struct PageClient {
    pub(crate) client: Client,
}

impl PageClient {
    /// # Errors
    ///
    /// Returns [`FetchError::Client`] if the underlying `reqwest::Client`
    /// cannot be constructed.
    pub fn new(timeout_secs: u64, user_agent: &str) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(user_agent)
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self { client })
    }

    /// GET a page and return its body.
    ///
    /// # Errors
    ///
    /// - [`FetchError::InvalidUrl`] when `url` is not an absolute http(s) URL.
    /// - [`FetchError::RateLimited`] on 429, [`FetchError::NotFound`] on 404,
    ///   [`FetchError::UnexpectedStatus`] on any other non-2xx.
    /// - [`FetchError::EmptyBody`] when the body is blank.
    /// - [`FetchError::Timeout`] / [`FetchError::Http`] on transport failure.
    pub async fn get_page(
        &self,
        url: &str,
        user_agent_override: Option<&str>,
    ) -> Result<RawContent, FetchError> {
        let parsed = validate_url(url)?;
        let referer = extract_origin(url);

        let mut request = self
            .client
            .get(parsed)
            .header(
                reqwest::header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .header(reqwest::header::REFERER, &referer)
            .header(reqwest::header::CACHE_CONTROL, "no-cache");

        if let Some(ua) = user_agent_override {
            request = request.header(reqwest::header::USER_AGENT, ua);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::transport(url, e))?;
        read_response(url, response, ContentFormat::Html).await
    }

    /// GET a JSON document and deserialize it.
    ///
    /// # Errors
    ///
    /// Same status mapping as [`Self::get_page`], plus
    /// [`FetchError::Deserialize`] when the body is not the expected shape.
    pub async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        context: &str,
    ) -> Result<T, FetchError> {
        let parsed = validate_url(url)?;
        let response = self
            .client
            .get(parsed)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| FetchError::transport(url, e))?;
        let raw = read_response(url, response, ContentFormat::Text).await?;
        serde_json::from_str::<T>(&raw.body).map_err(|e| FetchError::Deserialize {
            context: context.to_owned(),
            source: e,
        })
    }

    /// POST a JSON body and return the response text as HTML.
    ///
    /// Used for headless rendering services that accept `{"url": ...}` and
    /// answer with the rendered document.
    ///
    /// # Errors
    ///
    /// Same status mapping as [`Self::get_page`]. Status errors are reported
    /// against `url`, the page being rendered.
    pub async fn post_for_page(
        &self,
        endpoint: &str,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<RawContent, FetchError> {
        validate_url(url)?;
        let endpoint_url = reqwest::Url::parse(endpoint).map_err(|e| FetchError::InvalidUrl {
            url: endpoint.to_owned(),
            reason: e.to_string(),
        })?;
        let response = self
            .client
            .post(endpoint_url)
            .json(body)
            .send()
            .await
            .map_err(|e| FetchError::transport(url, e))?;
        let mut raw = read_response(url, response, ContentFormat::Html).await?;
        raw.final_url = url.to_owned();
        Ok(raw)
    }
}

/// Parse `url` and require an absolute http(s) URL with a host.
pub(crate) fn validate_url(url: &str) -> Result<reqwest::Url, FetchError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| FetchError::InvalidUrl {
        url: url.to_owned(),
        reason: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(FetchError::InvalidUrl {
            url: url.to_owned(),
            reason: "must be an absolute http(s) URL".to_owned(),
        });
    }
    Ok(parsed)
}

async fn read_response(
    url: &str,
    response: reqwest::Response,
    format: ContentFormat,
) -> Result<RawContent, FetchError> {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(60);
        return Err(FetchError::RateLimited {
            domain: extract_domain(url),
            retry_after_secs,
        });
    }

    if status == StatusCode::NOT_FOUND {
        return Err(FetchError::NotFound {
            url: url.to_owned(),
        });
    }

    if !status.is_success() {
        return Err(FetchError::UnexpectedStatus {
            status: status.as_u16(),
            url: url.to_owned(),
        });
    }

    let final_url = response.url().to_string();
    let body = response
        .text()
        .await
        .map_err(|e| FetchError::transport(url, e))?;

    if body.trim().is_empty() {
        return Err(FetchError::EmptyBody {
            url: url.to_owned(),
        });
    }

    Ok(RawContent {
        requested_url: url.to_owned(),
        final_url,
        status: status.as_u16(),
        format,
        body,
    })
}
