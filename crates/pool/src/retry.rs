//! Caller-side retry for acquisitions.
//!
//! The pool never retries on its own; `retry_attempts` and `retry_delay`
//! only drive this helper.

use std::future::Future;
use std::time::Duration;

use crate::config::PoolConfig;
use crate::error::Result;
use crate::handle::Handle;
use crate::pool::Pool;

/// Fixed-delay retry of retryable pool errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub attempts: u32,
    /// Pause before each retry
    pub delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// Policy taken from `retry_attempts` and `retry_delay`.
    #[must_use]
    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.retry_attempts, config.retry_delay)
    }

    /// Run `op`, retrying while it fails with a retryable error and
    /// attempts remain. The last error is returned unchanged.
    pub async fn run<F, Fut, T>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries = 0;
        loop {
            match op().await {
                Err(err) if err.is_retryable() && retries < self.attempts => {
                    retries += 1;
                    tracing::warn!(
                        retry = retries,
                        max_retries = self.attempts,
                        delay_ms = self.delay.as_millis() as u64,
                        error = %err,
                        "Retrying pool operation"
                    );
                    tokio::time::sleep(self.delay).await;
                }
                result => return result,
            }
        }
    }
}

impl Pool {
    /// [`acquire`](Self::acquire) under the pool's configured retry policy.
    pub async fn acquire_with_retry(&self) -> Result<Handle> {
        let policy = RetryPolicy::from_config(&self.config());
        let pool = self;
        policy.run(move || pool.acquire()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn timeout() -> Error {
        Error::AcquisitionTimeout {
            waited_ms: 1,
            active: 1,
            max_resources: 1,
            queued: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_timeouts_until_success() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let policy = RetryPolicy::new(3, Duration::from_millis(10));

        let result = policy
            .run(move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 { Err(timeout()) } else { Ok(n) }
            })
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_configured_attempts() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let policy = RetryPolicy::new(2, Duration::from_millis(10));

        let result: Result<()> = policy
            .run(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(timeout())
            })
            .await;

        assert!(matches!(result, Err(Error::AcquisitionTimeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_return_immediately() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let policy = RetryPolicy::new(5, Duration::from_secs(60));

        let result: Result<()> = policy
            .run(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::Shutdown)
            })
            .await;

        assert_eq!(result, Err(Error::Shutdown));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_with_retry_waits_out_a_busy_pool() {
        let pool = Pool::new(
            PoolConfig::default()
                .with_max_resources(1)
                .with_acquisition_timeout(Duration::from_millis(50))
                .with_retry(3, Duration::from_millis(20)),
        )
        .unwrap();
        let held = pool.acquire().await.unwrap();

        let releaser = {
            let pool = pool.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                pool.release(held);
            })
        };

        let handle = pool.acquire_with_retry().await.unwrap();
        assert_eq!(handle, held);
        releaser.await.unwrap();
        assert!(pool.stats().timed_out >= 1);
    }
}
