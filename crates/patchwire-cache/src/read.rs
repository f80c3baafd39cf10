//! Tagged read results and the pending-read future.

use std::fmt;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::oneshot;

use crate::channel::{Delivery, OperationChannel, SubscriberId, Update};
use crate::error::{CacheError, Result};
use crate::key::OperationKey;

/// Outcome of a cache read.
///
/// The caller decides how to handle `Pending`: await it, poll it later, or
/// render a placeholder and drop it.
pub enum ReadResult<T> {
    /// Committed data was already present.
    Ready(T),
    /// The data has not arrived yet.
    Pending(PendingRead<T>),
    /// The read can never succeed.
    Failed(CacheError),
}

impl<T> ReadResult<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, ReadResult::Ready(_))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ReadResult::Pending(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ReadResult::Failed(_))
    }

    /// The value, if it was ready.
    pub fn ready(self) -> Option<T> {
        match self {
            ReadResult::Ready(value) => Some(value),
            _ => None,
        }
    }

    /// Set a deadline on a pending read. Other variants are unchanged.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        match self {
            ReadResult::Pending(pending) => ReadResult::Pending(pending.with_timeout(timeout)),
            other => other,
        }
    }

    /// Wait for the value if needed.
    pub async fn resolve(self) -> Result<T> {
        match self {
            ReadResult::Ready(value) => Ok(value),
            ReadResult::Pending(pending) => pending.wait().await,
            ReadResult::Failed(err) => Err(err),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ReadResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadResult::Ready(value) => f.debug_tuple("Ready").field(value).finish(),
            ReadResult::Pending(pending) => f.debug_tuple("Pending").field(pending).finish(),
            ReadResult::Failed(err) => f.debug_tuple("Failed").field(err).finish(),
        }
    }
}

/// Withdraws a one-shot subscription unless it already fired.
///
/// Withdrawal counts as lost interest, so it may dispose the operation.
pub(crate) struct SubscriptionGuard {
    channel: Arc<OperationChannel>,
    id: SubscriberId,
}

impl SubscriptionGuard {
    pub(crate) fn new(channel: Arc<OperationChannel>, id: SubscriberId) -> Self {
        Self { channel, id }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.channel.unsubscribe(self.id);
    }
}

type Finish<T> = Box<dyn FnOnce(Update) -> T + Send>;

/// A read waiting for its path to arrive.
///
/// Dropping it, or letting its deadline pass, withdraws the subscription.
pub struct PendingRead<T> {
    operation: OperationKey,
    rx: oneshot::Receiver<Delivery>,
    finish: Finish<T>,
    timeout: Option<Duration>,
    guard: SubscriptionGuard,
}

impl<T> PendingRead<T> {
    pub(crate) fn new(
        operation: OperationKey,
        rx: oneshot::Receiver<Delivery>,
        finish: Finish<T>,
        guard: SubscriptionGuard,
    ) -> Self {
        Self {
            operation,
            rx,
            finish,
            timeout: None,
            guard,
        }
    }

    /// Fail with [`CacheError::Timeout`] if nothing arrives within `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn operation(&self) -> &OperationKey {
        &self.operation
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub async fn wait(self) -> Result<T> {
        let PendingRead {
            operation,
            rx,
            finish,
            timeout,
            guard,
        } = self;

        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    drop(guard);
                    return Err(CacheError::Timeout(limit));
                }
            },
            None => rx.await,
        };

        // A fired subscription has already removed itself, so this is a no-op.
        drop(guard);

        match received {
            Ok(Ok(update)) => Ok(finish(update)),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(CacheError::Disposed(operation)),
        }
    }
}

impl<T: Send + 'static> IntoFuture for PendingRead<T> {
    type Output = Result<T>;
    type IntoFuture = BoxFuture<'static, Result<T>>;

    fn into_future(self) -> Self::IntoFuture {
        self.wait().boxed()
    }
}

impl<T> fmt::Debug for PendingRead<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRead")
            .field("operation", &self.operation)
            .field("timeout", &self.timeout)
            .field("subscriber", &self.guard.id)
            .finish()
    }
}
