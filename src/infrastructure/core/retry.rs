//! Bounded exponential-backoff retry for idempotent operations.
//!
//! Only read paths go through here. Writes (order placement, cancel, close,
//! leverage) are not idempotent and must never be retried.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

const BASE_DELAY: Duration = Duration::from_millis(500);
const MAX_DELAY: Duration = Duration::from_secs(10);

/// Run `op` up to `max_attempts` times, sleeping 0.5s, 1s, 2s, ... (capped at
/// 10s) between attempts. Returns the last error if all attempts fail.
pub async fn with_retry<T, E, F, Fut>(
    op_name: &str,
    max_attempts: u32,
    mut op: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if attempt >= max_attempts {
                    warn!(op = op_name, attempts = attempt, error = %e, "Retries exhausted");
                    return Err(e);
                }
                let delay = (BASE_DELAY * 2u32.pow(attempt - 1)).min(MAX_DELAY);
                warn!(op = op_name, attempt, error = %e, ?delay, "Retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<u32, String> = with_retry("op", 3, move || {
            let calls = Arc::clone(&calls_clone);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("transient".to_string())
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_and_returns_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<u32, String> = with_retry("op", 3, move || {
            let calls = Arc::clone(&calls_clone);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("persistent".to_string())
            }
        })
        .await;

        assert_eq!(result.unwrap_err(), "persistent");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_first_try_success_no_sleep() {
        let result: Result<&str, &str> = with_retry("op", 3, || async { Ok("done") }).await;
        assert_eq!(result.unwrap(), "done");
    }
}
