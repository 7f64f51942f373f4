//! Retry on SQLite lock contention
//!
//! Scheduled and manual syncs may write concurrently; a write that hits
//! "database is locked" is retried with exponential backoff (10ms doubling,
//! capped at 1s) until `max_wait_ms` elapses. Other errors return at once.

use mdash_common::{Error, Result};
use std::future::Future;
use std::time::{Duration, Instant};

fn is_lock_error(err: &Error) -> bool {
    match err {
        Error::Database(db_err) => db_err.to_string().contains("database is locked"),
        Error::Internal(msg) => msg.contains("database is locked"),
        _ => false,
    }
}

pub async fn retry_on_lock<F, Fut, T>(operation_name: &str, max_wait_ms: u64, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let max_duration = Duration::from_millis(max_wait_ms);
    let mut attempt = 0u32;
    let mut backoff_ms = 10u64;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Database operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) if !is_lock_error(&err) => return Err(err),
            Err(_) => {
                let elapsed = started.elapsed();
                if elapsed >= max_duration {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        max_wait_ms,
                        "Database operation failed: max retry time exceeded"
                    );
                    return Err(Error::Internal(format!(
                        "Database locked after {} attempts ({} ms elapsed)",
                        attempt,
                        elapsed.as_millis()
                    )));
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms,
                    "Database locked, will retry after backoff"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(1000);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_attempt_success() {
        let result = retry_on_lock("op", 1000, || async { Ok::<_, Error>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_retries_lock_errors() {
        let mut attempts = 0;
        let result = retry_on_lock("op", 5000, || {
            attempts += 1;
            let current = attempts;
            async move {
                if current < 3 {
                    Err(Error::Internal("database is locked".to_string()))
                } else {
                    Ok(current)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_other_errors_not_retried() {
        let mut attempts = 0;
        let result: Result<()> = retry_on_lock("op", 5000, || {
            attempts += 1;
            async { Err(Error::InvalidInput("bad".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let result: Result<()> = retry_on_lock("op", 30, || async {
            Err(Error::Internal("database is locked".to_string()))
        })
        .await;
        match result {
            Err(Error::Internal(msg)) => assert!(msg.contains("attempts")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
