use std::sync::Arc;
use std::time::Duration;

use crate::breaker::CircuitBreaker;
use crate::error::ClassifierError;
use crate::retry::retry_with_backoff;
use crate::service::ClassificationService;
use crate::types::{ClassificationRequest, ClassificationResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, counting the first.
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(2),
        }
    }
}

/// Classification service wrapped with bounded retry and a circuit breaker.
///
/// Cheap to clone; clones share the breaker.
#[derive(Clone)]
pub struct Classifier {
    service: Arc<dyn ClassificationService>,
    policy: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
}

impl Classifier {
    #[must_use]
    pub fn new(
        service: Arc<dyn ClassificationService>,
        policy: RetryPolicy,
        breaker: CircuitBreaker,
    ) -> Self {
        Self {
            service,
            policy,
            breaker: Arc::new(breaker),
        }
    }

    /// Classify one diff.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierError::CircuitOpen`] without calling the service
    /// while the breaker is open, the first non-retryable error, or the last
    /// retryable error once attempts are exhausted.
    pub async fn classify(
        &self,
        request: &ClassificationRequest,
    ) -> Result<ClassificationResult, ClassifierError> {
        if !self.breaker.try_acquire() {
            return Err(ClassifierError::CircuitOpen);
        }

        let result = retry_with_backoff(self.policy.max_attempts, self.policy.backoff_base, || {
            self.service.classify_once(request)
        })
        .await;

        match &result {
            Ok(_) => self.breaker.record_success(),
            Err(e) if e.counts_against_breaker() => self.breaker.record_failure(),
            Err(_) => self.breaker.release_trial(),
        }
        result
    }
}
