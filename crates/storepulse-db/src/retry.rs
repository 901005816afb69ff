//! Retry with exponential back-off and jitter for retryable state-store
//! writes (progress updates, checkpoint updates).
//!
//! This is the single retry policy in the system. It deliberately does NOT
//! cover per-record reconciliation writes: those failures are accumulated in
//! batch counters, never retried.

use std::future::Future;
use std::time::Duration;

use crate::DbError;

/// Returns `true` for errors that are worth retrying after a back-off delay.
///
/// Transient pool/network conditions qualify; anything the database actively
/// rejected (constraint violations, bad transitions, missing rows) does not —
/// retrying cannot fix it.
pub(crate) fn is_retriable(err: &DbError) -> bool {
    match err {
        DbError::Sqlx(e) => matches!(
            e,
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
        ),
        DbError::MissingDatabaseUrl
        | DbError::NotFound
        | DbError::InvalidProgressTransition { .. }
        | DbError::Migration(_) => false,
    }
}

/// Runs `operation` with up to `max_retries` additional attempts on transient
/// errors. Delay doubles per attempt from `backoff_base_ms`, with ±25%
/// jitter, capped at 30 s. Non-retriable errors return immediately.
///
/// # Errors
///
/// Returns the last error once retries are exhausted, or the first
/// non-retriable error.
pub async fn with_backoff<T, F, Fut>(
    max_retries: u32,
    backoff_base_ms: u64,
    mut operation: F,
) -> Result<T, DbError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DbError>>,
{
    const MAX_DELAY_MS: u64 = 30_000;
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_retriable(&err) || attempt >= max_retries {
                    return Err(err);
                }
                attempt += 1;
                let computed = backoff_base_ms.saturating_mul(1u64 << (attempt - 1).min(10));
                let capped = computed.min(MAX_DELAY_MS);
                #[allow(
                    clippy::cast_possible_truncation,
                    clippy::cast_sign_loss,
                    clippy::cast_precision_loss
                )]
                let delay_ms = (capped as f64 * (rand::random::<f64>() * 0.5 + 0.75)) as u64;
                tracing::warn!(
                    attempt,
                    max_retries,
                    delay_ms,
                    error = %err,
                    "transient database error, retrying after back-off"
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_not_retriable() {
        assert!(!is_retriable(&DbError::NotFound));
    }

    #[test]
    fn invalid_transition_is_not_retriable() {
        assert!(!is_retriable(&DbError::InvalidProgressTransition { id: 1 }));
    }

    #[test]
    fn pool_timeout_is_retriable() {
        assert!(is_retriable(&DbError::Sqlx(sqlx::Error::PoolTimedOut)));
    }

    #[test]
    fn io_error_is_retriable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(is_retriable(&DbError::Sqlx(sqlx::Error::Io(io))));
    }

    #[tokio::test]
    async fn succeeds_immediately_on_first_try() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = with_backoff(3, 0, || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<u32, DbError>(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn does_not_retry_not_found() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = with_backoff(3, 0, || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>(DbError::NotFound)
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1, "NotFound must not retry");
        assert!(matches!(result, Err(DbError::NotFound)));
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = with_backoff(3, 0, || {
            let c = Arc::clone(&c);
            async move {
                let attempt = c.fetch_add(1, Ordering::SeqCst) + 1;
                if attempt < 3 {
                    Err::<u32, _>(DbError::Sqlx(sqlx::Error::PoolTimedOut))
                } else {
                    Ok(99)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 99, "should succeed after retries");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = with_backoff(2, 0, || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>(DbError::Sqlx(sqlx::Error::PoolTimedOut))
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3, "initial try + 2 retries");
        assert!(result.is_err());
    }
}
