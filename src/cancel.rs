//! Cooperative cancellation token.
//!
//! A `CancelToken` is cloned into every stage of a run. Loops check it at the
//! top of each iteration via [`CancelToken::ensure`]; in-flight network calls
//! are raced against it via [`CancelToken::bound`] so they unblock promptly.
//! Cancellation is sticky: once fired, every check fails from then on.

use crate::error::FetchError;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation. Idempotent; wakes every pending `cancelled()` wait.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Fail fast if cancellation has been signaled.
    pub fn ensure(&self) -> Result<(), FetchError> {
        if self.is_cancelled() {
            Err(FetchError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolve once cancellation is signaled.
    pub async fn cancelled(&self) {
        loop {
            // Register before re-checking the flag so a cancel() between the
            // check and the await cannot be missed.
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Run a fallible future, aborting with [`FetchError::Cancelled`] the
    /// moment this token fires.
    pub async fn bound<T, F>(&self, fut: F) -> Result<T, FetchError>
    where
        F: Future<Output = Result<T, FetchError>>,
    {
        tokio::select! {
            _ = self.cancelled() => Err(FetchError::Cancelled),
            result = fut => result,
        }
    }
}
