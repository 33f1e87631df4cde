//! Per-operation cancellation context.
//!
//! Every call that can block on the network (connect, ping, drop, begin,
//! commit, abort, disconnect) takes a [`Context`]. When its token is
//! cancelled or its deadline passes, the pending driver future is dropped and
//! the operation fails with [`AdapterError::Cancelled`] or
//! [`AdapterError::DeadlineExceeded`].

use crate::error::{AdapterError, AdapterResult};
use std::future::Future;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline unless
    /// [`cancel`](Self::cancel) is called on it or one of its clones.
    pub fn background() -> Self {
        Self::default()
    }

    /// Bind the context to an existing cancellation token.
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// A background context that expires after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().timeout(timeout)
    }

    /// Derive a context that expires after `timeout`, or at the current
    /// deadline if that comes first. Shares this context's token.
    pub fn timeout(&self, timeout: Duration) -> Self {
        self.deadline(Instant::now() + timeout)
    }

    /// Derive a context with the earlier of `deadline` and the current one.
    pub fn deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        };
        Self {
            token: self.token.clone(),
            deadline: Some(deadline),
        }
    }

    /// Derive a context that is cancelled with this one, but can also be
    /// cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Cancel this context and every clone and child of it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn deadline_at(&self) -> Option<Instant> {
        self.deadline
    }

    /// Run `fut` unless the context is done first.
    ///
    /// An already cancelled or expired context fails without polling `fut`.
    pub async fn run<T, F>(&self, operation: &str, fut: F) -> AdapterResult<T>
    where
        F: Future<Output = AdapterResult<T>>,
    {
        if self.token.is_cancelled() {
            return Err(AdapterError::cancelled(operation));
        }
        if self.deadline.is_some_and(|deadline| deadline <= Instant::now()) {
            return Err(AdapterError::deadline_exceeded(operation));
        }

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(AdapterError::cancelled(operation)),
            _ = sleep_until(self.deadline) => Err(AdapterError::deadline_exceeded(operation)),
            result = fut => result,
        }
    }

    /// Lock `mutex`, waiting no longer than the context allows.
    ///
    /// An uncontended lock is taken even when the context is already done, so
    /// the caller's next driver call is the one that reports the context error.
    pub async fn lock<'a, T>(
        &self,
        operation: &str,
        mutex: &'a Mutex<T>,
    ) -> AdapterResult<MutexGuard<'a, T>> {
        if let Ok(guard) = mutex.try_lock() {
            return Ok(guard);
        }
        self.run(operation, async { Ok(mutex.lock().await) }).await
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
