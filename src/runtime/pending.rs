use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::{
    error::RuntimeError,
    id::{ActionId, GlobalId},
};

use super::parcel::{CorrelationId, Response};

pub(crate) type ReplySender = oneshot::Sender<Result<Response, RuntimeError>>;
pub(crate) type ReplyReceiver = oneshot::Receiver<Result<Response, RuntimeError>>;

/// An issued request awaiting its reply.
#[derive(Debug)]
pub(crate) struct PendingInvocation {
    /// The instance whose location the reply reveals.
    pub(crate) target: Option<GlobalId>,
    pub(crate) action: Option<ActionId>,
    reply: ReplySender,
}

/// The requests this locality issued which haven't been answered yet.
///
/// An entry is fulfilled by whoever removes it, which happens exactly once: on reply, on
/// timeout, or on cancellation. A reply finding no entry arrived too late and is discarded.
#[derive(Debug, Default)]
pub(crate) struct PendingTable {
    next_id: AtomicU64,
    entries: DashMap<CorrelationId, PendingInvocation>,
}

impl PendingTable {
    pub(crate) fn register(
        &self,
        target: Option<GlobalId>,
        action: Option<ActionId>,
    ) -> (CorrelationId, ReplyReceiver) {
        let correlation_id = CorrelationId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (reply, rx) = oneshot::channel();
        self.entries.insert(
            correlation_id,
            PendingInvocation {
                target,
                action,
                reply,
            },
        );
        (correlation_id, rx)
    }

    /// Removes an entry without fulfilling it.
    pub(crate) fn take(&self, correlation_id: CorrelationId) -> Option<PendingInvocation> {
        self.entries
            .remove(&correlation_id)
            .map(|(_, pending)| pending)
    }

    /// Fulfills an entry, returning `false` if it was already gone.
    pub(crate) fn complete(
        &self,
        correlation_id: CorrelationId,
        result: Result<Response, RuntimeError>,
    ) -> bool {
        match self.take(correlation_id) {
            Some(pending) => {
                pending.fulfill(result);
                true
            }
            None => {
                debug!(%correlation_id, "discarded late reply");
                false
            }
        }
    }

    /// Drops an entry so a later reply is discarded.
    pub(crate) fn retire(&self, correlation_id: CorrelationId) -> bool {
        let retired = self.take(correlation_id).is_some();
        if retired {
            trace!(%correlation_id, "retired pending invocation");
        }
        retired
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

impl PendingInvocation {
    pub(crate) fn fulfill(self, result: Result<Response, RuntimeError>) {
        // The receiver is gone if the caller dropped the future in the meantime.
        let _ = self.reply.send(result);
    }
}
