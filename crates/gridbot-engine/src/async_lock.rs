/*
[INPUT]:  Async closures representing a bot's critical sections (persistence
          writes, subscription-map edits, commit of WorkingGrid->MasterGrid).
[OUTPUT]: `AsyncLock<T>`, a FIFO single-writer mutex with optional timeout
          and cancellation on the *queued* waiter.
[POS]:    Concurrency primitive - underlies Store, the commit path, and the
          asset/account resolution cache's FIFO-lock-with-TOCTOU-recheck pattern.
[UPDATE]: When adding a new kind of critical section that must serialize.
*/

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum AsyncLockError {
    #[error("timed out waiting for the lock")]
    Timeout,
    #[error("acquire was cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Default)]
pub struct AcquireOptions {
    pub timeout: Option<Duration>,
    pub cancel_token: Option<CancellationToken>,
}

impl AcquireOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            cancel_token: None,
        }
    }

    pub fn with_cancel_token(cancel_token: CancellationToken) -> Self {
        Self {
            timeout: None,
            cancel_token: Some(cancel_token),
        }
    }
}

/// A single-writer mutex serializing access to `T`. Built on
/// `tokio::sync::Mutex`, whose waiter queue is already FIFO; this wrapper
/// adds the timeout/cancellation semantics the pipeline needs: a timeout
/// or cancellation only ever aborts the *waiting* acquire, never a
/// section already running inside another task.
pub struct AsyncLock<T> {
    inner: Arc<Mutex<T>>,
}

impl<T> Clone for AsyncLock<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> AsyncLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(value)),
        }
    }

    /// Run `task` with exclusive access to the guarded value. `task`
    /// borrows the guard rather than owning it so callers can perform
    /// a reload-then-mutate sequence (Store's pattern) inside one section.
    pub async fn acquire<F, Fut, R>(
        &self,
        opts: AcquireOptions,
        task: F,
    ) -> Result<R, AsyncLockError>
    where
        F: FnOnce(&mut T) -> Fut,
        Fut: Future<Output = R>,
    {
        let mut guard = match (opts.timeout, opts.cancel_token) {
            (None, None) => self.inner.lock().await,
            (Some(timeout), None) => tokio::time::timeout(timeout, self.inner.lock())
                .await
                .map_err(|_| AsyncLockError::Timeout)?,
            (None, Some(token)) => tokio::select! {
                guard = self.inner.lock() => guard,
                _ = token.cancelled() => return Err(AsyncLockError::Cancelled),
            },
            (Some(timeout), Some(token)) => tokio::select! {
                result = tokio::time::timeout(timeout, self.inner.lock()) => {
                    result.map_err(|_| AsyncLockError::Timeout)?
                }
                _ = token.cancelled() => return Err(AsyncLockError::Cancelled),
            },
        };

        Ok(task(&mut guard).await)
    }
}
