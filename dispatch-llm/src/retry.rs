//! Bounded, jittered retry under a wall-clock deadline.
//!
//! Wraps a single upstream generation call. Transient failures (rate
//! limits, overload, gateway errors, timeouts, network faults) are retried
//! with capped exponential backoff and uniform jitter; everything else
//! returns immediately. The remaining budget is checked BEFORE sleeping,
//! so the controller never exceeds the deadline by more than one in-flight
//! attempt.

use dispatch_core::{UpstreamError, EMPTY_RESPONSE_REASON};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::GeneratedText;

/// HTTP statuses treated as transient: rate-limited, bad gateway, service
/// unavailable, gateway timeout, and Anthropic's overloaded code.
pub const TRANSIENT_STATUSES: [u16; 5] = [429, 502, 503, 504, 529];

/// Whether `status` belongs to the transient set.
pub fn is_transient_status(status: u16) -> bool {
    TRANSIENT_STATUSES.contains(&status)
}

/// Budget for one wrapped upstream operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryBudget {
    /// Hard wall-clock deadline for the whole operation.
    pub deadline: Duration,
    /// Maximum number of retries after the initial attempt.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles per retry.
    pub initial_delay: Duration,
    /// Upper bound for the exponential delay.
    pub max_delay: Duration,
    /// Uniform jitter added to every delay, spreading out retry storms
    /// across concurrent callers.
    pub max_jitter: Duration,
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(30),
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            max_jitter: Duration::from_millis(300),
        }
    }
}

impl RetryBudget {
    /// Create a budget with the given deadline and retry count.
    pub fn new(deadline: Duration, max_attempts: u32) -> Self {
        Self {
            deadline,
            max_attempts,
            ..Self::default()
        }
    }

    /// Set the initial backoff delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the backoff cap.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the jitter bound.
    pub fn with_max_jitter(mut self, jitter: Duration) -> Self {
        self.max_jitter = jitter;
        self
    }
}

/// Outcome of one budgeted operation. Ephemeral, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome {
    pub ok: bool,
    /// Total attempts made, including the initial one.
    pub attempts: u32,
    pub elapsed_ms: u64,
    /// Last HTTP status observed, if any.
    pub code: Option<u16>,
    pub reason: Option<String>,
    pub value: Option<GeneratedText>,
}

impl RetryOutcome {
    fn success(attempts: u32, elapsed_ms: u64, value: GeneratedText) -> Self {
        Self {
            ok: true,
            attempts,
            elapsed_ms,
            code: None,
            reason: None,
            value: Some(value),
        }
    }

    fn failure(
        attempts: u32,
        elapsed_ms: u64,
        code: Option<u16>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            ok: false,
            attempts,
            elapsed_ms,
            code,
            reason: Some(reason.into()),
            value: None,
        }
    }

    /// Whether the operation failed because the upstream validly produced
    /// nothing. Emptiness is cached by the coordinator, not retried.
    pub fn is_empty_response(&self) -> bool {
        self.reason.as_deref() == Some(EMPTY_RESPONSE_REASON)
    }
}

/// Drive `op` to completion under `budget`.
///
/// Each attempt runs with a timeout no larger than the remaining budget;
/// an attempt cut off by the deadline surfaces as a timeout outcome rather
/// than hanging.
pub async fn call_with_budget<F, Fut>(mut op: F, budget: &RetryBudget) -> RetryOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<GeneratedText, UpstreamError>>,
{
    let started = Instant::now();
    let mut attempts: u32 = 0;
    let mut delay = budget.initial_delay;

    loop {
        let remaining = budget.deadline.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return RetryOutcome::failure(
                attempts,
                elapsed_ms(started),
                None,
                "deadline_exceeded",
            );
        }

        attempts += 1;
        match tokio::time::timeout(remaining, op()).await {
            Err(_) => {
                // The deadline fired mid-attempt; the in-flight call is
                // dropped and the timeout is surfaced, never a hang.
                return RetryOutcome::failure(
                    attempts,
                    elapsed_ms(started),
                    None,
                    "deadline_exceeded",
                );
            }
            Ok(Ok(text)) if text.is_empty() => {
                return RetryOutcome::failure(
                    attempts,
                    elapsed_ms(started),
                    None,
                    EMPTY_RESPONSE_REASON,
                );
            }
            Ok(Ok(text)) => {
                return RetryOutcome::success(attempts, elapsed_ms(started), text);
            }
            Ok(Err(err)) => {
                let code = err.status();
                if !err.is_retryable() {
                    return RetryOutcome::failure(
                        attempts,
                        elapsed_ms(started),
                        code,
                        err.to_string(),
                    );
                }
                if attempts > budget.max_attempts {
                    return RetryOutcome::failure(
                        attempts,
                        elapsed_ms(started),
                        code,
                        format!("retries_exhausted: {}", err),
                    );
                }

                let sleep_for = delay + jitter(budget.max_jitter);
                // Budget check happens before sleeping, not after.
                if started.elapsed() + sleep_for >= budget.deadline {
                    return RetryOutcome::failure(
                        attempts,
                        elapsed_ms(started),
                        code,
                        format!("deadline_exceeded: {}", err),
                    );
                }

                debug!(
                    attempt = attempts,
                    delay_ms = sleep_for.as_millis() as u64,
                    error = %err,
                    "transient upstream failure, backing off"
                );
                tokio::time::sleep(sleep_for).await;
                delay = (delay * 2).min(budget.max_delay);
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn jitter(max_jitter: Duration) -> Duration {
    let max_ms = max_jitter.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..max_ms))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn transient(status: u16) -> UpstreamError {
        UpstreamError::Transient {
            status,
            reason: "upstream unhappy".to_string(),
        }
    }

    fn budget_without_jitter() -> RetryBudget {
        // Deterministic delays under the paused test clock.
        RetryBudget::default().with_max_jitter(Duration::ZERO)
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let outcome = call_with_budget(
            || async { Ok(GeneratedText::from_content("{\"ok\":true}")) },
            &budget_without_jitter(),
        )
        .await;

        assert!(outcome.ok);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.value.unwrap().content, "{\"ok\":true}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_response_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&calls);

        let outcome = call_with_budget(
            move || {
                let counted = Arc::clone(&counted);
                async move {
                    counted.fetch_add(1, Ordering::SeqCst);
                    Ok(GeneratedText::from_content("   "))
                }
            },
            &budget_without_jitter(),
        )
        .await;

        assert!(!outcome.ok);
        assert!(outcome.is_empty_response());
        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_after_initial_plus_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&calls);
        let budget = RetryBudget::new(Duration::from_secs(120), 3)
            .with_max_jitter(Duration::ZERO);

        let outcome = call_with_budget(
            move || {
                let counted = Arc::clone(&counted);
                async move {
                    counted.fetch_add(1, Ordering::SeqCst);
                    Err::<GeneratedText, _>(transient(503))
                }
            },
            &budget,
        )
        .await;

        assert!(!outcome.ok);
        assert_eq!(outcome.attempts, 4); // initial + 3 retries
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(outcome.code, Some(503));
        assert!(outcome.reason.unwrap().starts_with("retries_exhausted"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&calls);

        let outcome = call_with_budget(
            move || {
                let counted = Arc::clone(&counted);
                async move {
                    if counted.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(transient(429))
                    } else {
                        Ok(GeneratedText::from_content("recovered"))
                    }
                }
            },
            &budget_without_jitter(),
        )
        .await;

        assert!(outcome.ok);
        assert_eq!(outcome.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_returns_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&calls);

        let outcome = call_with_budget(
            move || {
                let counted = Arc::clone(&counted);
                async move {
                    counted.fetch_add(1, Ordering::SeqCst);
                    Err::<GeneratedText, _>(UpstreamError::Fatal {
                        status: 400,
                        reason: "malformed request".to_string(),
                    })
                }
            },
            &budget_without_jitter(),
        )
        .await;

        assert!(!outcome.ok);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.code, Some(400));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cuts_off_slow_attempt() {
        let budget = RetryBudget::new(Duration::from_secs(1), 3)
            .with_max_jitter(Duration::ZERO);

        let outcome = call_with_budget(
            || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(GeneratedText::from_content("too late"))
            },
            &budget,
        )
        .await;

        assert!(!outcome.ok);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.reason.as_deref(), Some("deadline_exceeded"));
        // The controller aborted at the deadline instead of hanging.
        assert!(outcome.elapsed_ms <= 1_100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_checked_before_sleeping() {
        // Two fast transient failures with a deadline too small for the
        // second backoff: the controller must stop before sleeping past it.
        let budget = RetryBudget::new(Duration::from_millis(700), 5)
            .with_initial_delay(Duration::from_millis(500))
            .with_max_jitter(Duration::ZERO);

        let outcome = call_with_budget(
            || async { Err::<GeneratedText, _>(transient(503)) },
            &budget,
        )
        .await;

        assert!(!outcome.ok);
        assert_eq!(outcome.attempts, 2);
        assert!(outcome.reason.unwrap().starts_with("deadline_exceeded"));
        assert!(outcome.elapsed_ms <= 700 + 500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_and_timeout_errors_are_retryable() {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&calls);

        let outcome = call_with_budget(
            move || {
                let counted = Arc::clone(&counted);
                async move {
                    match counted.fetch_add(1, Ordering::SeqCst) {
                        0 => Err(UpstreamError::Network {
                            reason: "connection reset".to_string(),
                        }),
                        1 => Err(UpstreamError::Timeout { elapsed_ms: 200 }),
                        _ => Ok(GeneratedText::from_content("finally")),
                    }
                }
            },
            &budget_without_jitter(),
        )
        .await;

        assert!(outcome.ok);
        assert_eq!(outcome.attempts, 3);
    }

    #[test]
    fn test_transient_status_set() {
        for status in TRANSIENT_STATUSES {
            assert!(is_transient_status(status));
        }
        assert!(!is_transient_status(200));
        assert!(!is_transient_status(400));
        assert!(!is_transient_status(401));
        assert!(!is_transient_status(500));
    }
}
