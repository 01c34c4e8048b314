use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("HTTP error for {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("rate limited by {domain} (retry after {retry_after_secs}s)")]
    RateLimited {
        domain: String,
        retry_after_secs: u64,
    },

    #[error("not found: {url}")]
    NotFound { url: String },

    #[error("unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("empty body from {url}")]
    EmptyBody { url: String },

    #[error("invalid target URL \"{url}\": {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("app {app_id} not found in the {country} store")]
    AppNotFound { app_id: String, country: String },
}

impl FetchError {
    /// Wrap a transport-level `reqwest` failure, separating timeouts out.
    pub(crate) fn transport(url: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            FetchError::Timeout {
                url: url.to_owned(),
            }
        } else {
            FetchError::Http {
                url: url.to_owned(),
                source,
            }
        }
    }

    /// Whether the same request might succeed if tried again later.
    ///
    /// Timeouts, connection failures, 429 and 5xx responses are transient.
    /// A 404, any other 4xx, an empty body, a malformed URL or payload is not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout { .. } | FetchError::RateLimited { .. } => true,
            FetchError::Http { source, .. } => !source.is_builder() && !source.is_decode(),
            FetchError::UnexpectedStatus { status, .. } => *status >= 500 || *status == 408,
            FetchError::Client(_)
            | FetchError::NotFound { .. }
            | FetchError::EmptyBody { .. }
            | FetchError::InvalidUrl { .. }
            | FetchError::Deserialize { .. }
            | FetchError::AppNotFound { .. } => false,
        }
    }
}
