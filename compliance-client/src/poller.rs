//! Generic repeated-request primitive.
//!
//! A [`StatusPoller`] owns a monotonic generation counter. Every call to
//! [`StatusPoller::run`] starts a new generation, which implicitly cancels
//! any previous cycle on the same poller, and every step after an await
//! point re-checks the generation so a late-arriving response from a stale
//! cycle is discarded instead of applied. Cancellation is therefore a
//! "would-be-applied-but-stale" guard rather than a hard network abort, and
//! [`StatusPoller::cancel`] is safe to call any number of times.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use compliance_client_sdk::{ApiError, ApiResult};
use tracing::{debug, warn};

/// Cadence and limits for one polling cycle.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    /// Hard attempt ceiling; `None` polls until a terminal status arrives.
    pub max_attempts: Option<u32>,
    /// Extra attempts tolerated after non-404 errors before giving up.
    pub error_budget: u32,
}

/// How a polling cycle ended.
#[derive(Debug)]
pub enum PollOutcome<T> {
    /// The inspector declared the fetched value terminal.
    Terminal { value: T, attempt: u32 },
    /// The attempt ceiling was reached; carries the last non-terminal
    /// value observed so callers can surface a degraded result.
    Timeout { attempts: u32, last: Option<T> },
    /// A non-404 error exhausted the error budget.
    Failed { attempt: u32, error: ApiError },
    /// A newer cycle started or `cancel` was called.
    Cancelled,
}

/// Repeated-request scheduler with generation-based cancellation.
#[derive(Debug, Clone, Default)]
pub struct StatusPoller {
    generation: Arc<AtomicU64>,
}

impl StatusPoller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invalidate any in-flight cycle. Idempotent.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Run one polling cycle.
    ///
    /// `fetch` is invoked once per attempt (1-based). `inspect` sees every
    /// successfully fetched value after the staleness check and returns
    /// true to stop; it is the place for both terminal predicates and
    /// per-tick observation (progress reporting).
    ///
    /// A 404-class error is transient by definition here — the backend does
    /// not know the resource yet — and never consumes the error budget.
    pub async fn run<T, F, Fut, P>(
        &self,
        config: PollConfig,
        mut fetch: F,
        mut inspect: P,
    ) -> PollOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ApiResult<T>>,
        P: FnMut(u32, &T) -> bool,
    {
        // Starting a new cycle invalidates any previous one on this poller.
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut attempt: u32 = 1;
        let mut error_strikes: u32 = 0;
        let mut last: Option<T> = None;

        loop {
            if !self.is_current(generation) {
                return PollOutcome::Cancelled;
            }
            let result = fetch(attempt).await;
            // The cycle may have been cancelled while the request was in
            // flight; its result must not be acted upon.
            if !self.is_current(generation) {
                return PollOutcome::Cancelled;
            }

            match result {
                Ok(value) => {
                    error_strikes = 0;
                    if inspect(attempt, &value) {
                        return PollOutcome::Terminal { value, attempt };
                    }
                    last = Some(value);
                }
                Err(error) if error.is_not_found() => {
                    debug!(attempt, "resource not visible to backend yet, retrying");
                }
                Err(error) => {
                    error_strikes += 1;
                    if error_strikes > config.error_budget {
                        return PollOutcome::Failed { attempt, error };
                    }
                    warn!(attempt, strikes = error_strikes, %error, "poll attempt failed, retrying");
                }
            }

            if let Some(max) = config.max_attempts {
                if attempt >= max {
                    return PollOutcome::Timeout {
                        attempts: attempt,
                        last,
                    };
                }
            }
            attempt += 1;
            tokio::time::sleep(config.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn fast(max_attempts: Option<u32>) -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(1),
            max_attempts,
            error_budget: 2,
        }
    }

    #[tokio::test]
    async fn test_stops_when_inspector_says_terminal() {
        let poller = StatusPoller::new();
        let outcome = poller
            .run(
                fast(Some(30)),
                |attempt| async move { Ok::<_, ApiError>(attempt) },
                |_, value| *value == 5,
            )
            .await;
        match outcome {
            PollOutcome::Terminal { value, attempt } => {
                assert_eq!(value, 5);
                assert_eq!(attempt, 5);
            }
            other => panic!("expected terminal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_carries_last_observed_value() {
        let poller = StatusPoller::new();
        let outcome = poller
            .run(
                fast(Some(3)),
                |attempt| async move { Ok::<_, ApiError>(attempt * 10) },
                |_, _| false,
            )
            .await;
        match outcome {
            PollOutcome::Timeout { attempts, last } => {
                assert_eq!(attempts, 3);
                assert_eq!(last, Some(30));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_not_found_is_transient_and_spares_error_budget() {
        let poller = StatusPoller::new();
        let calls = AtomicU32::new(0);
        let outcome = poller
            .run(
                fast(Some(30)),
                |_| {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        if n <= 5 {
                            Err(ApiError::not_found("doc"))
                        } else {
                            Ok(n)
                        }
                    }
                },
                |_, _| true,
            )
            .await;
        assert!(matches!(outcome, PollOutcome::Terminal { value: 6, .. }));
    }

    #[tokio::test]
    async fn test_repeated_errors_exhaust_budget_and_fail() {
        let poller = StatusPoller::new();
        let calls = AtomicU32::new(0);
        let outcome = poller
            .run(
                fast(Some(30)),
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async {
                        Err::<u32, _>(ApiError::Backend {
                            status: 500,
                            message: "boom".into(),
                        })
                    }
                },
                |_, _| true,
            )
            .await;
        match outcome {
            PollOutcome::Failed { attempt, error } => {
                // budget of 2 extra attempts: fails on the third error
                assert_eq!(attempt, 3);
                assert!(error.to_string().contains("boom"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_success_resets_error_strikes() {
        let poller = StatusPoller::new();
        let calls = AtomicU32::new(0);
        // alternate error/success: never two consecutive strikes, so the
        // budget of 2 is never exhausted
        let outcome = poller
            .run(
                fast(Some(10)),
                |_| {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        if n % 2 == 1 {
                            Err(ApiError::Backend {
                                status: 500,
                                message: "flaky".into(),
                            })
                        } else {
                            Ok(n)
                        }
                    }
                },
                |_, value| *value >= 8,
            )
            .await;
        assert!(matches!(outcome, PollOutcome::Terminal { value: 8, .. }));
    }

    #[tokio::test]
    async fn test_cancel_stops_a_sleeping_cycle() {
        let poller = StatusPoller::new();
        let handle = {
            let poller = poller.clone();
            tokio::spawn(async move {
                poller
                    .run(
                        PollConfig {
                            interval: Duration::from_millis(50),
                            max_attempts: None,
                            error_budget: 2,
                        },
                        |_| async { Ok::<_, ApiError>(0u32) },
                        |_, _| false,
                    )
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        poller.cancel();
        poller.cancel(); // idempotent
        let outcome = handle.await.unwrap();
        assert!(matches!(outcome, PollOutcome::Cancelled));
    }

    #[tokio::test]
    async fn test_new_cycle_cancels_the_previous_one() {
        let poller = StatusPoller::new();
        let first = {
            let poller = poller.clone();
            tokio::spawn(async move {
                poller
                    .run(
                        PollConfig {
                            interval: Duration::from_millis(50),
                            max_attempts: None,
                            error_budget: 2,
                        },
                        |_| async { Ok::<_, ApiError>(0u32) },
                        |_, _| false,
                    )
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        // at most one live cycle per poller: starting a second cycle
        // invalidates the first
        let second = poller
            .run(
                fast(Some(1)),
                |_| async { Ok::<_, ApiError>(1u32) },
                |_, _| true,
            )
            .await;
        assert!(matches!(second, PollOutcome::Terminal { .. }));
        assert!(matches!(first.await.unwrap(), PollOutcome::Cancelled));
    }

    #[tokio::test]
    async fn test_in_flight_result_is_discarded_after_cancel() {
        let poller = StatusPoller::new();
        let handle = {
            let poller = poller.clone();
            tokio::spawn(async move {
                poller
                    .run(
                        fast(None),
                        |_| async {
                            tokio::time::sleep(Duration::from_millis(40)).await;
                            Ok::<_, ApiError>(42u32)
                        },
                        |_, _| true,
                    )
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        poller.cancel();
        // the fetch completes with a terminal value, but the cycle was
        // cancelled while it was in flight
        let outcome = handle.await.unwrap();
        assert!(matches!(outcome, PollOutcome::Cancelled));
    }
}
