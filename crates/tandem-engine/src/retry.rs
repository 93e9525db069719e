//! Bounded retry with configurable backoff for remote-I/O steps.
//!
//! The retry budget is per branch, not per step: `retry_count` in the branch
//! state is incremented for every scheduled retry and never resets during a
//! run, so a branch that burned its budget authenticating has nothing left
//! for extraction.

use std::time::Duration;

use tandem_types::{Error, Platform, Result, RunState};

/// Backoff policy controlling the delay between retry attempts.
#[derive(Debug, Clone)]
pub enum BackoffPolicy {
    /// Fixed delay between retries.
    Fixed(Duration),
    /// Exponential backoff: base * 2^attempt, capped at max.
    Exponential { base: Duration, max: Duration },
    /// No delay between retries.
    None,
}

impl BackoffPolicy {
    /// Compute the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        match self {
            BackoffPolicy::Fixed(d) => *d,
            BackoffPolicy::Exponential { base, max } => {
                let millis = base.as_millis() as u64 * 2u64.saturating_pow(attempt as u32);
                Duration::from_millis(millis).min(*max)
            }
            BackoffPolicy::None => Duration::ZERO,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

/// Run `f` with the default transience rule: retry exactly the errors
/// [`Error::is_transient`] reports.
pub async fn run_with_retry<T, F, Fut>(
    state: &RunState,
    platform: Platform,
    step: &str,
    policy: &BackoffPolicy,
    f: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    run_with_retry_if(state, platform, step, policy, Error::is_transient, f).await
}

/// Run `f`, retrying errors matched by `retry_on` while the branch retry
/// budget lasts.
///
/// Every failed attempt records the failure description in the branch state
/// and appends a journal entry with the attempt number; a scheduled retry
/// additionally increments `retry_count`. Errors not matched by `retry_on`
/// propagate immediately without consuming budget. The terminal failure is
/// surfaced verbatim to the caller. A later success clears the branch error
/// field.
pub async fn run_with_retry_if<T, F, Fut, P>(
    state: &RunState,
    platform: Platform,
    step: &str,
    policy: &BackoffPolicy,
    retry_on: P,
    f: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
    P: Fn(&Error) -> bool,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(value) => {
                if attempt > 1 {
                    state.branch(platform).write().await.error = None;
                    state.log(
                        Some(platform),
                        format!("{step} succeeded on attempt {attempt}"),
                    );
                }
                return Ok(value);
            }
            Err(e) if retry_on(&e) => {
                let budget_left = {
                    let mut guard = state.branch(platform).write().await;
                    guard.error = Some(e.to_string());
                    if guard.retry_count < state.max_retries {
                        guard.retry_count += 1;
                        true
                    } else {
                        false
                    }
                };
                if !budget_left {
                    state.log(
                        Some(platform),
                        format!("{step} attempt {attempt} failed, retry budget exhausted: {e}"),
                    );
                    return Err(e);
                }
                state.log(
                    Some(platform),
                    format!("{step} attempt {attempt} failed, retrying: {e}"),
                );
                let delay = policy.delay_for_attempt((attempt - 1) as usize);
                tracing::warn!(
                    platform = %platform,
                    step,
                    attempt,
                    delay_ms = %delay.as_millis(),
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                state.branch(platform).write().await.error = Some(e.to_string());
                state.log(Some(platform), format!("{step} attempt {attempt} failed: {e}"));
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn transient() -> Error {
        Error::Timeout {
            endpoint: "https://console.example/tasks".into(),
            timeout_ms: 100,
        }
    }

    fn fatal() -> Error {
        Error::AuthRejected {
            platform: Platform::Console,
            message: "bad password".into(),
        }
    }

    // 1. Success on first try touches nothing
    #[tokio::test]
    async fn success_on_first_try() {
        let state = RunState::new(3);
        let result = run_with_retry(&state, Platform::Console, "authenticate", &BackoffPolicy::None, || async {
            Ok(42u32)
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        let guard = state.branch(Platform::Console).read().await;
        assert_eq!(guard.retry_count, 0);
        assert!(guard.error.is_none());
        assert!(state.journal().is_empty());
    }

    // 2. A step that always fails transiently runs exactly max_retries + 1 times
    #[tokio::test]
    async fn always_transient_runs_n_plus_one_times() {
        let state = RunState::new(3);
        let calls = Arc::new(AtomicUsize::new(0));
        let cc = calls.clone();

        let result: Result<()> = run_with_retry(
            &state,
            Platform::Console,
            "extract",
            &BackoffPolicy::None,
            move || {
                let cc = cc.clone();
                async move {
                    cc.fetch_add(1, Ordering::SeqCst);
                    Err(transient())
                }
            },
        )
        .await;

        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), Error::Timeout { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let guard = state.branch(Platform::Console).read().await;
        assert_eq!(guard.retry_count, 3);
        assert!(guard.error.is_some());
    }

    // 3. Fatal error propagates immediately without consuming budget
    #[tokio::test]
    async fn fatal_error_does_not_retry() {
        let state = RunState::new(5);
        let calls = Arc::new(AtomicUsize::new(0));
        let cc = calls.clone();

        let result: Result<()> = run_with_retry(
            &state,
            Platform::Console,
            "authenticate",
            &BackoffPolicy::None,
            move || {
                let cc = cc.clone();
                async move {
                    cc.fetch_add(1, Ordering::SeqCst);
                    Err(fatal())
                }
            },
        )
        .await;

        assert!(matches!(result.unwrap_err(), Error::AuthRejected { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.branch(Platform::Console).read().await.retry_count, 0);
    }

    // 4. A successful retry clears the error field
    #[tokio::test]
    async fn successful_retry_clears_error() {
        let state = RunState::new(3);
        let calls = Arc::new(AtomicUsize::new(0));
        let cc = calls.clone();

        let result = run_with_retry(
            &state,
            Platform::Publisher,
            "extract",
            &BackoffPolicy::None,
            move || {
                let cc = cc.clone();
                async move {
                    if cc.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(transient())
                    } else {
                        Ok("rows")
                    }
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), "rows");
        let guard = state.branch(Platform::Publisher).read().await;
        assert_eq!(guard.retry_count, 1);
        assert!(guard.error.is_none());
    }

    // 5. The budget is shared across steps of the same branch
    #[tokio::test]
    async fn budget_is_shared_across_steps() {
        let state = RunState::new(3);
        // First step consumes 2 retries then succeeds.
        let calls = Arc::new(AtomicUsize::new(0));
        let cc = calls.clone();
        run_with_retry(&state, Platform::Console, "authenticate", &BackoffPolicy::None, move || {
            let cc = cc.clone();
            async move {
                if cc.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transient())
                } else {
                    Ok(())
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(state.branch(Platform::Console).read().await.retry_count, 2);

        // Second step only has 1 retry left: 2 attempts total.
        let calls = Arc::new(AtomicUsize::new(0));
        let cc = calls.clone();
        let result: Result<()> =
            run_with_retry(&state, Platform::Console, "extract", &BackoffPolicy::None, move || {
                let cc = cc.clone();
                async move {
                    cc.fetch_add(1, Ordering::SeqCst);
                    Err(transient())
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(state.branch(Platform::Console).read().await.retry_count, 3);
    }

    // 6. The custom predicate can widen the retryable set
    #[tokio::test]
    async fn predicate_widens_retryable_errors() {
        let state = RunState::new(2);
        let calls = Arc::new(AtomicUsize::new(0));
        let cc = calls.clone();

        let result = run_with_retry_if(
            &state,
            Platform::Console,
            "classify",
            &BackoffPolicy::None,
            |e| e.is_transient() || matches!(e, Error::MalformedResponse { .. }),
            move || {
                let cc = cc.clone();
                async move {
                    if cc.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(Error::MalformedResponse {
                            service: "classifier".into(),
                            message: "junk completion".into(),
                        })
                    } else {
                        Ok("report")
                    }
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), "report");
        assert_eq!(state.branch(Platform::Console).read().await.retry_count, 1);
    }

    // 7. Journal records every failed attempt
    #[tokio::test]
    async fn journal_records_attempts() {
        let state = RunState::new(1);
        let _: Result<()> = run_with_retry(
            &state,
            Platform::Console,
            "extract",
            &BackoffPolicy::None,
            || async { Err(transient()) },
        )
        .await;

        let entries = state.journal().entries();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].message.contains("attempt 1"));
        assert!(entries[1].message.contains("attempt 2"));
        assert!(entries[1].message.contains("exhausted"));
    }

    // --- BackoffPolicy ---

    #[test]
    fn fixed_backoff_constant_delay() {
        let policy = BackoffPolicy::Fixed(Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(9), Duration::from_millis(200));
    }

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let policy = BackoffPolicy::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(500));
    }

    #[test]
    fn none_backoff_zero_delay() {
        assert_eq!(BackoffPolicy::None.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(BackoffPolicy::None.delay_for_attempt(99), Duration::ZERO);
    }

    #[test]
    fn default_backoff_is_exponential() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(20), Duration::from_secs(30));
    }
}
