//! Retry policy for transient store failures.
//!
//! Connectivity faults are retried with exponential backoff up to a small
//! fixed attempt count, then surfaced as [`LedgerError::TransientStore`].
//! Domain rejections and constraint violations are never retried.

use std::future::Future;
use std::time::Duration;

use guildbank_core::error::{LedgerError, Result};

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(50);

/// Classify a sqlx failure: connectivity problems are transient, everything
/// else is a hard database fault.
pub(crate) fn map_sqlx(e: sqlx::Error) -> LedgerError {
    if is_transient(&e) {
        LedgerError::TransientStore {
            detail: e.to_string(),
        }
    } else {
        LedgerError::Database {
            detail: e.to_string(),
        }
    }
}

fn is_transient(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => true,
        // Serialization failures and deadlocks clear on a fresh attempt.
        sqlx::Error::Database(db) => matches!(db.code().as_deref(), Some("40001" | "40P01")),
        _ => false,
    }
}

/// Run `attempt` until it succeeds, fails non-transiently, or exhausts the
/// retry budget.
pub(crate) async fn with_retry<T, F, Fut>(op: &'static str, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = INITIAL_BACKOFF;
    let mut tries = 0u32;
    loop {
        tries += 1;
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(LedgerError::TransientStore { detail }) if tries < MAX_ATTEMPTS => {
                tracing::warn!(
                    op = op,
                    attempt = tries,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %detail,
                    "transient store failure, retrying"
                );
                metrics::counter!("ledger.store.retry").increment(1);
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> LedgerError {
        LedgerError::TransientStore {
            detail: "connection reset".to_string(),
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_ref = calls.clone();
        let result = with_retry("test", move || {
            let calls = calls_ref.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transient())
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_the_attempt_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_ref = calls.clone();
        let result: Result<()> = with_retry("test", move || {
            let calls = calls_ref.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(transient())
            }
        })
        .await;
        assert!(matches!(result, Err(LedgerError::TransientStore { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn domain_rejections_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_ref = calls.clone();
        let result: Result<()> = with_retry("test", move || {
            let calls = calls_ref.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LedgerError::InsufficientBalance)
            }
        })
        .await;
        assert!(matches!(result, Err(LedgerError::InsufficientBalance)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
