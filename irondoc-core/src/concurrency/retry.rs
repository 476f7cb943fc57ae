// src/concurrency/retry.rs
//! Retry-on-conflict wrapper
//!
//! ```ignore
//! let retry = OccRetry::new(engine.clone()).with_max_retries(3);
//! let id = retry
//!     .execute(|txn| {
//!         let users = users.clone();
//!         async move { users.insert_in(&txn, user).await }
//!     })
//!     .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::{IronDocError, Result};
use crate::storage::{StorageEngine, Transaction};

/// Runs `begin -> operation -> commit`, retrying the whole unit on `Conflict`.
///
/// Retry `n` waits `base_delay * 2^n` first. Non-conflict errors are returned
/// at once, after the transaction has been rolled back.
#[derive(Debug, Clone)]
pub struct OccRetry {
    engine: StorageEngine,
    max_retries: u32,
    base_delay: Duration,
}

impl OccRetry {
    pub fn new(engine: StorageEngine) -> Self {
        let defaults = RetryConfig::default();
        OccRetry {
            engine,
            max_retries: defaults.max_retries,
            base_delay: defaults.base_delay(),
        }
    }

    pub fn from_config(engine: StorageEngine, config: &RetryConfig) -> Self {
        OccRetry {
            engine,
            max_retries: config.max_retries,
            base_delay: config.base_delay(),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Backoff before retry number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Execute `operation` in a fresh transaction per attempt.
    ///
    /// The transaction handed to the operation is committed by this method;
    /// the operation only stages work in it.
    pub async fn execute<R, F, Fut>(&self, mut operation: F) -> Result<R>
    where
        F: FnMut(Transaction) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let txn = self.engine.begin_transaction().await?;
            let conflict = match operation(txn.clone()).await {
                Ok(value) => match txn.commit().await {
                    Ok(_) => return Ok(value),
                    Err(err) if err.is_retryable() => err,
                    Err(err) => return Err(err),
                },
                Err(err) => {
                    txn.rollback().await?;
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    err
                }
            };

            if attempt >= self.max_retries {
                warn!(
                    attempts = attempt + 1,
                    error = %conflict,
                    "giving up after repeated conflicts"
                );
                return Err(IronDocError::MaxRetriesExceeded {
                    max_retries: self.max_retries,
                });
            }

            let delay = self.delay_for(attempt);
            debug!(
                txn_id = %txn.id(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                "conflict, retrying"
            );
            drop(txn);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IsolationLevel;
    use crate::storage::PageId;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn conflict() -> IronDocError {
        IronDocError::Conflict {
            transaction_id: crate::storage::TransactionId(1),
            page_id: PageId(1),
        }
    }

    #[test]
    fn test_delay_doubles() {
        let retry = OccRetry::new(StorageEngine::with_isolation(IsolationLevel::Optimistic))
            .with_base_delay(Duration::from_millis(1));
        assert_eq!(retry.delay_for(0), Duration::from_millis(1));
        assert_eq!(retry.delay_for(3), Duration::from_millis(8));
        // very large attempts saturate instead of overflowing
        assert!(retry.delay_for(64) >= retry.delay_for(31));
    }

    #[tokio::test]
    async fn test_always_conflicting_gives_up_after_n_plus_one_attempts() {
        let engine = StorageEngine::with_isolation(IsolationLevel::Optimistic);
        let retry = OccRetry::new(engine).with_max_retries(3);
        let attempts = Arc::new(AtomicU32::new(0));

        let result: Result<()> = retry
            .execute(|_txn| {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(conflict())
                }
            })
            .await;

        assert!(matches!(result, Err(IronDocError::MaxRetriesExceeded { max_retries: 3 })));
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_non_conflict_error_not_retried() {
        let engine = StorageEngine::with_isolation(IsolationLevel::Optimistic);
        let retry = OccRetry::new(engine.clone());
        let attempts = Arc::new(AtomicU32::new(0));

        let result: Result<()> = retry
            .execute(|_txn| {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(IronDocError::DuplicateKey("k".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(IronDocError::DuplicateKey(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(engine.stats().aborts, 1);
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_conflict() {
        let engine = StorageEngine::with_isolation(IsolationLevel::Optimistic);
        let page = engine.bootstrap_page(b"0".to_vec());
        let retry = OccRetry::new(engine.clone());
        let attempts = Arc::new(AtomicU32::new(0));

        let value = retry
            .execute(|txn| {
                let attempts = attempts.clone();
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        return Err(conflict());
                    }
                    txn.write(page, b"done".to_vec())?;
                    Ok(n)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 2);
        assert_eq!(engine.read_latest(page).as_deref(), Some(&b"done"[..]));
    }
}
