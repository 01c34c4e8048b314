//! Exponential back-off with jitter for classification calls.

use std::future::Future;
use std::time::Duration;

use crate::error::ClassifierError;

const MAX_DELAY_MS: u64 = 60_000;

/// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`, capped
/// at 60 s, then scaled by a random factor in `[0.75, 1.25)`.
pub(crate) fn backoff_delay(backoff_base: Duration, retry: u32) -> Duration {
    let base_ms = u64::try_from(backoff_base.as_millis()).unwrap_or(u64::MAX);
    let computed = base_ms.saturating_mul(1u64 << retry.saturating_sub(1).min(10));
    let capped = computed.min(MAX_DELAY_MS);
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let delay_ms = (capped as f64 * (rand::random::<f64>() * 0.5 + 0.75)) as u64;
    Duration::from_millis(delay_ms)
}

/// Runs `operation` up to `max_attempts` times in total, backing off between
/// retryable failures. Non-retryable errors are returned at once.
pub(crate) async fn retry_with_backoff<T, F, Fut>(
    max_attempts: u32,
    backoff_base: Duration,
    mut operation: F,
) -> Result<T, ClassifierError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClassifierError>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retryable() || attempt >= max_attempts {
                    return Err(err);
                }
                let delay = backoff_delay(backoff_base, attempt);
                tracing::warn!(
                    attempt,
                    max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "classification failed, retrying after back-off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn backoff_doubles_within_jitter_bounds() {
        let base = Duration::from_secs(2);
        for (retry, nominal_ms) in [(1u32, 2_000u64), (2, 4_000), (3, 8_000)] {
            let ms = u64::try_from(backoff_delay(base, retry).as_millis()).unwrap();
            assert!(ms >= nominal_ms * 3 / 4, "retry {retry}: {ms}ms");
            assert!(ms < nominal_ms * 5 / 4, "retry {retry}: {ms}ms");
        }
    }

    #[test]
    fn backoff_is_capped() {
        let ms = backoff_delay(Duration::from_secs(2), 30).as_millis();
        assert!(ms < 75_000);
    }

    #[tokio::test]
    async fn retries_server_errors_up_to_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(3, Duration::ZERO, || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ClassifierError::Server { status: 500 })
            }
        })
        .await;
        assert!(matches!(result, Err(ClassifierError::Server { status: 500 })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn auth_failure_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(3, Duration::ZERO, || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ClassifierError::Auth { status: 401 })
            }
        })
        .await;
        assert!(matches!(result, Err(ClassifierError::Auth { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_after_transient_timeout() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(3, Duration::ZERO, || {
            let c = Arc::clone(&c);
            async move {
                if c.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ClassifierError::Timeout)
                } else {
                    Ok(5)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 5);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn default_schedule_waits_about_six_seconds_over_three_attempts() {
        let started = tokio::time::Instant::now();
        let _ = retry_with_backoff(3, Duration::from_secs(2), || async {
            Err::<(), _>(ClassifierError::Timeout)
        })
        .await;
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(4_500), "{waited:?}");
        assert!(waited < Duration::from_millis(7_500), "{waited:?}");
    }
}
