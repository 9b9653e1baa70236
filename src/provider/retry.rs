//! Bounded retry with exponential backoff and jitter.
//!
//! This is the ONLY retry loop in the crate. Backends wrap their raw HTTP
//! calls in `with_retry`; the batch runner and the orchestrator observe a
//! single final outcome per task. Two stacked retry loops multiply attempts
//! silently — keeping the mechanism here makes that state unrepresentable.

use std::time::Duration;

use rand::Rng;

use super::types::ProviderError;

/// Backoff policy for one backend.
///
/// Backends tune `max_attempts`/`base_delay` to their rate-limit behavior;
/// the mechanism (exponential growth, full jitter, hint honoring) is shared.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles per attempt after that.
    pub base_delay: Duration,
    /// Ceiling for any single computed delay, hint included.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries. Used by probe calls, where a failed
    /// attempt simply marks the provider unavailable.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before the next attempt, after `attempt` failed (1-based).
    ///
    /// A provider-supplied hint wins over the computed backoff; both are
    /// clamped to `max_delay`. Jitter adds 0-50% on top so simultaneous
    /// clients do not re-burst in lockstep.
    fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let base = hint.unwrap_or(exponential).min(self.max_delay);

        let jitter_ms = if base.is_zero() {
            0
        } else {
            rand::thread_rng().gen_range(0..=base.as_millis() as u64 / 2)
        };
        (base + Duration::from_millis(jitter_ms)).min(self.max_delay)
    }
}

/// Run `op` until it succeeds, fails terminally, or exhausts the policy.
///
/// `op` receives the 1-based attempt number. Non-retryable errors propagate
/// immediately; retryable ones sleep the computed backoff and go again.
pub fn with_retry<T>(
    policy: &RetryPolicy,
    label: &str,
    mut op: impl FnMut(u32) -> Result<T, ProviderError>,
) -> Result<T, ProviderError> {
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt, err.retry_hint());
                tracing::warn!(
                    label,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retryable provider failure, backing off"
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => {
                if err.is_retryable() {
                    tracing::warn!(label, attempt, error = %err, "Retries exhausted");
                }
                return Err(err);
            }
        }
    }
}

/// Parse a Retry-After header value (seconds form only; HTTP-date values
/// from the wild are rare enough to ignore).
pub fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    value?.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::types::ProviderKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    fn transient() -> ProviderError {
        ProviderError::Transient {
            provider: ProviderKind::Ollama,
            detail: "connection reset".into(),
        }
    }

    #[test]
    fn succeeds_first_try_without_delay() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(3), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ProviderError>(42)
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(3), "test", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            if attempt < 3 {
                Err(transient())
            } else {
                Ok("ok")
            }
        });
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn exhausts_bounded_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(3), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(transient())
        });
        assert_eq!(result.unwrap_err().kind_str(), "transient");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn auth_error_propagates_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(5), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Auth {
                provider: ProviderKind::OpenAi,
                detail: "bad key".into(),
            })
        });
        assert_eq!(result.unwrap_err().kind_str(), "auth");
        assert_eq!(calls.load(Ordering::SeqCst), 1, "Auth must not be retried");
    }

    #[test]
    fn malformed_is_terminal_per_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(5), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Malformed {
                provider: ProviderKind::Claude,
                detail: "truncated".into(),
                stop_reason: Some("max_tokens".into()),
                output_tokens: Some(1024),
            })
        });
        assert_eq!(result.unwrap_err().kind_str(), "malformed");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn policy_none_gives_single_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&RetryPolicy::none(), "probe", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(transient())
        });
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delay_honors_rate_limit_hint_up_to_cap() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(50),
        };
        let hinted = policy.delay_for(1, Some(Duration::from_secs(120)));
        assert!(hinted <= Duration::from_millis(50), "hint must be capped");

        let small_hint = policy.delay_for(1, Some(Duration::from_millis(10)));
        assert!(small_hint >= Duration::from_millis(10));
    }

    #[test]
    fn delay_grows_exponentially() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(60),
        };
        // Jitter adds at most 50%, so attempt 3 (400ms base) always exceeds
        // attempt 1's maximum (150ms).
        let first = policy.delay_for(1, None);
        let third = policy.delay_for(3, None);
        assert!(first <= Duration::from_millis(150));
        assert!(third >= Duration::from_millis(400));
    }

    #[test]
    fn parse_retry_after_seconds() {
        assert_eq!(
            parse_retry_after(Some("7")),
            Some(Duration::from_secs(7))
        );
        assert_eq!(parse_retry_after(Some(" 12 ")), Some(Duration::from_secs(12)));
        assert_eq!(parse_retry_after(Some("Wed, 21 Oct")), None);
        assert_eq!(parse_retry_after(None), None);
    }
}
