use std::future::Future;
use std::time::Duration;

use futures::future::LocalBoxFuture;
use rand::Rng;
use tokio::time::sleep;
use tracing::warn;

use super::error::{BrowserError, BrowserResult};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    backoff_ms: [u64; 2],
}

#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    pub result: T,
    pub attempts: usize,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, backoff_ms: [u64; 2]) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_ms,
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    fn backoff_delay(&self) -> Duration {
        let [lower, upper] = self.backoff_ms;
        if upper == 0 {
            return Duration::from_millis(0);
        }
        let ms = rand::thread_rng().gen_range(lower..=upper.max(lower));
        Duration::from_millis(ms)
    }

    // Returns the delay before the next attempt, or None once the budget
    // is spent. `attempt` has already been incremented by the caller.
    fn note_failure(&self, label: &str, attempt: usize, error: &BrowserError) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let delay = self.backoff_delay();
        warn!(
            label,
            attempt,
            wait_ms = delay.as_millis() as u64,
            error = %error,
            "retrying operation"
        );
        Some(delay)
    }

    pub async fn run<F, Fut, T>(
        &self,
        label: &str,
        mut action: F,
    ) -> BrowserResult<RetryOutcome<T>>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = BrowserResult<T>>,
    {
        let mut attempt = 0usize;
        loop {
            match action(attempt).await {
                Ok(result) => {
                    return Ok(RetryOutcome {
                        result,
                        attempts: attempt + 1,
                    });
                }
                Err(error) => {
                    attempt += 1;
                    match self.note_failure(label, attempt, &error) {
                        None => return Err(error),
                        Some(delay) if !delay.is_zero() => sleep(delay).await,
                        Some(_) => {}
                    }
                }
            }
        }
    }

    /// Variant of [`RetryPolicy::run`] for operations that need exclusive
    /// access to shared state between attempts, such as activating an element
    /// on a live surface.
    pub async fn run_on<S, T, F>(
        &self,
        label: &str,
        state: &mut S,
        mut action: F,
    ) -> BrowserResult<RetryOutcome<T>>
    where
        S: ?Sized,
        F: for<'a> FnMut(&'a mut S, usize) -> LocalBoxFuture<'a, BrowserResult<T>>,
    {
        let mut attempt = 0usize;
        loop {
            match action(state, attempt).await {
                Ok(result) => {
                    return Ok(RetryOutcome {
                        result,
                        attempts: attempt + 1,
                    });
                }
                Err(error) => {
                    attempt += 1;
                    match self.note_failure(label, attempt, &error) {
                        None => return Err(error),
                        Some(delay) if !delay.is_zero() => sleep(delay).await,
                        Some(_) => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn retry_recovers_after_transient_failure() {
        let policy = RetryPolicy::new(3, [0, 0]);
        let attempt_state = Arc::new(Mutex::new(0usize));
        let state = Arc::clone(&attempt_state);

        let outcome = policy
            .run("activate", move |_| {
                let state = Arc::clone(&state);
                async move {
                    let mut guard = state.lock().unwrap();
                    if *guard == 0 {
                        *guard += 1;
                        Err(BrowserError::Timeout("location unchanged".into()))
                    } else {
                        Ok::<_, BrowserError>("ok".to_string())
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.result, "ok");
    }

    #[tokio::test]
    async fn retry_returns_last_error_after_max_attempts() {
        let policy = RetryPolicy::new(2, [0, 0]);
        let calls = Arc::new(Mutex::new(0usize));
        let state = Arc::clone(&calls);

        let result = policy
            .run("activate", move |_| {
                let state = Arc::clone(&state);
                async move {
                    *state.lock().unwrap() += 1;
                    Err::<(), BrowserError>(BrowserError::Timeout("location unchanged".into()))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn run_on_threads_mutable_state_through_attempts() {
        let policy = RetryPolicy::new(3, [0, 0]);
        let mut calls = 0usize;
        let outcome = policy
            .run_on("activate", &mut calls, |calls, attempt| {
                Box::pin(async move {
                    *calls += 1;
                    if attempt < 2 {
                        Err(BrowserError::Timeout("not yet".into()))
                    } else {
                        Ok(*calls)
                    }
                })
            })
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.result, 3);
    }

    #[tokio::test]
    async fn zero_attempts_clamps_to_one() {
        let policy = RetryPolicy::new(0, [0, 0]);
        assert_eq!(policy.max_attempts(), 1);
        let result = policy
            .run("activate", |_| async {
                Err::<(), BrowserError>(BrowserError::Timeout("never valid".into()))
            })
            .await;
        assert!(result.is_err());
    }
}
