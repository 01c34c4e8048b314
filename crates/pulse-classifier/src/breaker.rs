//! Consecutive-failure circuit breaker for the classification service.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed { consecutive_failures: u32 },
    Open { until: Instant },
    /// Cooldown elapsed; one trial call is in flight.
    HalfOpen,
}

/// Opens after `failure_threshold` consecutive failures and rejects calls
/// until `cooldown` has passed. The first call after the cooldown is a
/// trial: success closes the circuit, failure opens it again.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    state: Mutex<State>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            state: Mutex::new(State::Closed {
                consecutive_failures: 0,
            }),
        }
    }

    /// Returns `true` if a call may go through now.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.lock();
        match *state {
            State::Closed { .. } => true,
            State::Open { until } if Instant::now() >= until => {
                *state = State::HalfOpen;
                true
            }
            State::Open { .. } | State::HalfOpen => false,
        }
    }

    pub fn record_success(&self) {
        *self.lock() = State::Closed {
            consecutive_failures: 0,
        };
    }

    pub fn record_failure(&self) {
        let mut state = self.lock();
        let next = match *state {
            State::Closed {
                consecutive_failures,
            } => {
                let failures = consecutive_failures + 1;
                if failures >= self.failure_threshold {
                    tracing::warn!(
                        failures,
                        cooldown_secs = self.cooldown.as_secs(),
                        "classification circuit opened"
                    );
                    State::Open {
                        until: Instant::now() + self.cooldown,
                    }
                } else {
                    State::Closed {
                        consecutive_failures: failures,
                    }
                }
            }
            State::HalfOpen | State::Open { .. } => State::Open {
                until: Instant::now() + self.cooldown,
            },
        };
        *state = next;
    }

    /// Release a half-open trial slot without recording an outcome.
    pub fn release_trial(&self) {
        let mut state = self.lock();
        if *state == State::HalfOpen {
            *state = State::Open {
                until: Instant::now(),
            };
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(*self.lock(), State::Open { .. } | State::HalfOpen)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // State is plain data; a poisoned lock still holds a usable value.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_and_recovers_after_cooldown() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(30));
        assert!(breaker.try_acquire());
        breaker.record_failure();
        assert!(breaker.try_acquire());
        breaker.record_failure();
        assert!(!breaker.try_acquire());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(breaker.try_acquire(), "trial call after cooldown");
        assert!(!breaker.try_acquire(), "only one trial at a time");
        breaker.record_success();
        assert!(breaker.try_acquire());
        assert!(!breaker.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_trial_reopens() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(10));
        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(breaker.try_acquire());
        breaker.record_failure();
        assert!(!breaker.try_acquire());
    }

    #[test]
    fn success_resets_failure_count() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(10));
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert!(breaker.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn released_trial_can_be_retaken() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(10));
        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(breaker.try_acquire());
        breaker.release_trial();
        assert!(breaker.try_acquire());
    }
}
