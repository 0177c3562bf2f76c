//! Retry on SQLite lock contention
//!
//! Queue claims, job pushes and record counter updates come from many worker
//! tasks at once and can hit `database is locked`. They go through
//! [`retry_on_lock`], which waits at most `database.max_lock_wait_ms`.

use sam_common::Result;
use std::time::Duration;
use tokio::time::Instant;

const FIRST_BACKOFF_MS: u64 = 5;

/// Longest single sleep: a quarter of the wait window, at least the first backoff
fn backoff_cap(max_wait_ms: u64) -> u64 {
    (max_wait_ms / 4).max(FIRST_BACKOFF_MS)
}

/// Run `operation`, retrying while it fails with lock contention
///
/// Other errors return at once. When the window closes the last lock error
/// is returned unchanged, so callers still see a database error (the API
/// worker defers its counter update on it).
pub async fn retry_on_lock<F, Fut, T>(
    operation_name: &str,
    max_wait_ms: u64,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let deadline = Instant::now() + Duration::from_millis(max_wait_ms);
    let cap = backoff_cap(max_wait_ms);
    let mut backoff_ms = FIRST_BACKOFF_MS;
    let mut attempts = 1u32;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if attempts > 1 {
                    tracing::debug!(operation = operation_name, attempts, "Database lock cleared");
                }
                return Ok(value);
            }
            Err(err) if err.is_lock_contention() => err,
            Err(err) => return Err(err),
        };

        let now = Instant::now();
        if now >= deadline {
            tracing::warn!(
                operation = operation_name,
                attempts,
                max_wait_ms,
                "Database still locked, giving up"
            );
            return Err(err);
        }

        let pause = Duration::from_millis(backoff_ms).min(deadline - now);
        tracing::debug!(
            operation = operation_name,
            attempts,
            pause_ms = pause.as_millis() as u64,
            "Database locked"
        );
        tokio::time::sleep(pause).await;
        backoff_ms = (backoff_ms * 2).min(cap);
        attempts += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sam_common::Error;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    type Attempt<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

    fn locked() -> Error {
        Error::Database(sqlx::Error::Protocol("database is locked".to_string()))
    }

    fn counted<T: Send + 'static>(
        calls: &Arc<AtomicUsize>,
        answer: impl Fn(usize) -> Result<T> + Clone + Send + 'static,
    ) -> impl FnMut() -> Attempt<T> {
        let calls = calls.clone();
        move || -> Attempt<T> {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            let answer = answer.clone();
            Box::pin(async move { answer(n) })
        }
    }

    #[test]
    fn backoff_is_bounded_by_the_window() {
        assert_eq!(backoff_cap(5000), 1250);
        assert_eq!(backoff_cap(8), FIRST_BACKOFF_MS);
    }

    #[tokio::test]
    async fn lock_contention_is_retried_until_it_clears() {
        let calls = Arc::new(AtomicUsize::new(0));
        let op = counted(&calls, |n| if n < 2 { Err(locked()) } else { Ok(7) });

        let result = retry_on_lock("claim_job", 5000, op).await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn expired_window_returns_the_lock_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let op = counted(&calls, |_| Err::<i32, _>(locked()));

        let result = retry_on_lock("update_counts", 30, op).await;

        let err = result.unwrap_err();
        assert!(err.is_lock_contention(), "unexpected error: {}", err);
        assert!(calls.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let op = counted(&calls, |_| Err::<i32, _>(Error::NotFound("Upload 4".to_string())));

        let result = retry_on_lock("update_counts", 5000, op).await;

        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
