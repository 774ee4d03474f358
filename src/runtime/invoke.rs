use std::{
    fmt,
    future::{Future, IntoFuture},
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use futures::{future::BoxFuture, FutureExt};
use tokio::{task::AbortHandle, time::Instant};
use tracing::debug;

use crate::{
    codec::Codec,
    error::RuntimeError,
    id::{ActionId, GlobalId},
};

use super::{
    parcel::{CorrelationId, Response},
    pending::{PendingTable, ReplyReceiver},
    Runtime,
};

/// A call waiting to be issued.
///
/// The call is issued by [`send`](InvokeRequest::send), or by awaiting the request directly.
#[must_use = "request won't be sent without awaiting, or calling `send`"]
pub struct InvokeRequest<'a, R, C: Codec> {
    runtime: &'a Runtime<C>,
    target: GlobalId,
    action: ActionId,
    args: Result<Vec<u8>, RuntimeError>,
    timeout: Option<Duration>,
    decode: fn(&C, Vec<u8>) -> Result<R, RuntimeError>,
}

impl<'a, R, C> InvokeRequest<'a, R, C>
where
    R: Send + 'static,
    C: Codec,
{
    pub(crate) fn new(
        runtime: &'a Runtime<C>,
        target: GlobalId,
        action: ActionId,
        args: Result<Vec<u8>, RuntimeError>,
        decode: fn(&C, Vec<u8>) -> Result<R, RuntimeError>,
    ) -> Self {
        InvokeRequest {
            runtime,
            target,
            action,
            args,
            timeout: runtime.config().call_timeout,
            decode,
        }
    }

    /// Fails the call with [`RuntimeError::Timeout`] if no reply arrives within `duration`.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Waits for the reply forever.
    pub fn without_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    /// Issues the call.
    ///
    /// Returns immediately; the returned [`Invocation`] resolves once the reply arrives.
    pub fn send(self) -> Invocation<R> {
        let codec = self.runtime.codec().clone();
        let decode = self.decode;
        self.runtime
            .issue_invoke(self.target, self.action, self.args, self.timeout)
            .map(move |bytes| decode(&codec, bytes))
    }
}

impl<R, C> IntoFuture for InvokeRequest<'_, R, C>
where
    R: Send + 'static,
    C: Codec,
{
    type Output = Result<R, RuntimeError>;
    type IntoFuture = Invocation<R>;

    fn into_future(self) -> Self::IntoFuture {
        self.send()
    }
}

impl<R, C: Codec> fmt::Debug for InvokeRequest<'_, R, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvokeRequest")
            .field("target", &self.target)
            .field("action", &self.action)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// An issued call.
///
/// Resolves exactly once with the result, or with [`RuntimeError::Timeout`] or
/// [`RuntimeError::Canceled`]. Dropping the invocation before it resolves cancels it.
#[must_use = "dropping an invocation cancels it"]
pub struct Invocation<R> {
    cancel: CancelHandle,
    future: BoxFuture<'static, Result<R, RuntimeError>>,
}

impl Invocation<Response> {
    /// Wraps a registered request.
    ///
    /// The deadline is armed here, at issuance, so the entry is retired on time even if the
    /// invocation is never polled.
    pub(crate) fn pending(
        pending: Arc<PendingTable>,
        correlation_id: CorrelationId,
        rx: ReplyReceiver,
        timeout: Option<Duration>,
    ) -> Self {
        let deadline = timeout.map(|timeout| {
            let deadline = Instant::now() + timeout;
            let pending = pending.clone();
            tokio::spawn(async move {
                tokio::time::sleep_until(deadline).await;
                if let Some(expired) = pending.take(correlation_id) {
                    debug!(%correlation_id, "invocation timed out");
                    expired.fulfill(Err(RuntimeError::Timeout));
                }
            })
            .abort_handle()
        });
        let guard = RetireOnDrop {
            pending: pending.clone(),
            correlation_id,
            deadline,
        };
        let future = async move {
            let reply = rx.await;
            drop(guard);
            reply.unwrap_or(Err(RuntimeError::Canceled))
        }
        .boxed();

        Invocation {
            cancel: CancelHandle {
                pending,
                correlation_id,
            },
            future,
        }
    }
}

impl<R: Send + 'static> Invocation<R> {
    pub(crate) fn map<U, F>(self, f: F) -> Invocation<U>
    where
        F: FnOnce(R) -> Result<U, RuntimeError> + Send + 'static,
    {
        let future = self.future;
        Invocation {
            cancel: self.cancel,
            future: async move { future.await.and_then(f) }.boxed(),
        }
    }
}

impl<R> Invocation<R> {
    /// The correlation id of the underlying request.
    pub fn correlation_id(&self) -> CorrelationId {
        self.cancel.correlation_id
    }

    /// Returns a handle able to cancel this invocation from elsewhere.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Cancels the invocation, see [`CancelHandle::cancel`].
    pub fn cancel(&self) -> bool {
        self.cancel.cancel()
    }
}

impl<R> Future for Invocation<R> {
    type Output = Result<R, RuntimeError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.future.poll_unpin(cx)
    }
}

impl<R> fmt::Debug for Invocation<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("correlation_id", &self.cancel.correlation_id)
            .finish_non_exhaustive()
    }
}

/// Cancels an [`Invocation`].
#[derive(Clone)]
pub struct CancelHandle {
    pending: Arc<PendingTable>,
    correlation_id: CorrelationId,
}

impl CancelHandle {
    /// Resolves the invocation with [`RuntimeError::Canceled`] and discards any later reply.
    ///
    /// The action keeps running if it already started. Returns `false` if the invocation had
    /// already resolved.
    pub fn cancel(&self) -> bool {
        self.pending
            .complete(self.correlation_id, Err(RuntimeError::Canceled))
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CancelHandle")
            .field(&self.correlation_id)
            .finish()
    }
}

struct RetireOnDrop {
    pending: Arc<PendingTable>,
    correlation_id: CorrelationId,
    deadline: Option<AbortHandle>,
}

impl Drop for RetireOnDrop {
    fn drop(&mut self) {
        if let Some(deadline) = &self.deadline {
            deadline.abort();
        }
        self.pending.retire(self.correlation_id);
    }
}
