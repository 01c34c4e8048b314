use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("classification request timed out")]
    Timeout,

    #[error("HTTP error: {0}")]
    Http(#[source] reqwest::Error),

    #[error("classification service rate limited (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("classification service returned {status}")]
    Server { status: u16 },

    #[error("classification service rejected credentials ({status})")]
    Auth { status: u16 },

    #[error("unexpected HTTP status {status} from classification service")]
    UnexpectedStatus { status: u16 },

    #[error("malformed classification response: {0}")]
    Malformed(String),

    #[error("classification circuit is open")]
    CircuitOpen,

    #[error("classification service is not configured")]
    NotConfigured,
}

impl ClassifierError {
    pub(crate) fn transport(source: reqwest::Error) -> Self {
        if source.is_timeout() {
            ClassifierError::Timeout
        } else {
            ClassifierError::Http(source)
        }
    }

    /// Timeouts, transport failures, 429 and 5xx may succeed on a later try.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            ClassifierError::Timeout
            | ClassifierError::RateLimited { .. }
            | ClassifierError::Server { .. } => true,
            ClassifierError::Http(e) => !e.is_builder() && !e.is_decode(),
            ClassifierError::Client(_)
            | ClassifierError::Auth { .. }
            | ClassifierError::UnexpectedStatus { .. }
            | ClassifierError::Malformed(_)
            | ClassifierError::CircuitOpen
            | ClassifierError::NotConfigured => false,
        }
    }

    /// Whether this failure says something about the health of the remote
    /// service. A malformed answer means the service is up.
    #[must_use]
    pub fn counts_against_breaker(&self) -> bool {
        self.is_retryable() || matches!(self, ClassifierError::Auth { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(ClassifierError::Timeout.is_retryable());
        assert!(ClassifierError::Server { status: 502 }.is_retryable());
        assert!(ClassifierError::RateLimited {
            retry_after_secs: 1
        }
        .is_retryable());
    }

    #[test]
    fn terminal_errors_are_not_retryable() {
        assert!(!ClassifierError::Auth { status: 401 }.is_retryable());
        assert!(!ClassifierError::Malformed("x".to_owned()).is_retryable());
        assert!(!ClassifierError::CircuitOpen.is_retryable());
        assert!(!ClassifierError::NotConfigured.is_retryable());
    }

    #[test]
    fn malformed_does_not_trip_breaker_but_auth_does() {
        assert!(!ClassifierError::Malformed("x".to_owned()).counts_against_breaker());
        assert!(ClassifierError::Auth { status: 403 }.counts_against_breaker());
    }
}
