use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::clock::Clock;

pub const DEFAULT_ATTEMPTS: u32 = 5;

/// Transient-vs-permanent classification for retried operations.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

/// Run `op` up to `attempts` times, sleeping `attempt * attempt` seconds
/// between tries. Permanent errors are returned immediately.
pub async fn retry<T, E, F, Fut>(clock: &dyn Clock, attempts: u32, mut op: F) -> Result<T, E>
where
    E: Retryable + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = attempts.max(1);
    let mut last_err = None;
    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => {
                debug!(attempt, error = %e, "operation failed");
                if attempt < attempts {
                    warn!(attempt, error = %e, "retrying after backoff");
                    clock
                        .sleep(Duration::from_secs(u64::from(attempt * attempt)))
                        .await;
                }
                last_err = Some(e);
            }
        }
    }
    Err(last_err.expect("at least one attempt"))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::clock::ManualClock;

    #[derive(Debug)]
    struct Flaky(bool);

    impl Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "flaky")
        }
    }

    impl Retryable for Flaky {
        fn is_transient(&self) -> bool {
            self.0
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let clock = ManualClock::default();
        let calls = AtomicU32::new(0);
        let result: Result<u32, Flaky> = retry(&clock, 5, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Flaky(true))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let clock = ManualClock::default();
        let calls = AtomicU32::new(0);
        let result: Result<u32, Flaky> = retry(&clock, 5, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Flaky(false)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_attempts_on_persistent_transient_failure() {
        let clock = ManualClock::default();
        let calls = AtomicU32::new(0);
        let result: Result<u32, Flaky> = retry(&clock, 3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Flaky(true)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
