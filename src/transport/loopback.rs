//! An in-process cluster connecting any number of localities over Tokio channels.
//!
//! ```
//! use agora::{transport::{loopback::LoopbackNetwork, Transport}, LocalityId};
//!
//! # tokio_test::block_on(async {
//! let network = LoopbackNetwork::new();
//! let l1 = network.endpoint(LocalityId::new(1));
//! let l2 = network.endpoint(LocalityId::new(2));
//!
//! assert_eq!(l1.peers(), [LocalityId::new(2)]);
//! l1.send(l2.here(), b"hello".to_vec()).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

use std::{
    fmt,
    sync::{Arc, Mutex},
};

use dashmap::{DashMap, DashSet};
use futures::{future::BoxFuture, FutureExt, StreamExt};
use once_cell::sync::OnceCell;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::trace;

use crate::{error::TransportError, id::LocalityId};

use super::{InboundHandler, Transport};

type Inbox = mpsc::UnboundedSender<(LocalityId, Vec<u8>)>;

/// A set of in-process localities.
///
/// Cloning the network returns another handle to the same cluster.
#[derive(Clone, Debug, Default)]
pub struct LoopbackNetwork {
    inner: Arc<NetworkInner>,
}

#[derive(Debug, Default)]
struct NetworkInner {
    inboxes: DashMap<LocalityId, Inbox>,
    severed: DashSet<(LocalityId, LocalityId)>,
}

impl LoopbackNetwork {
    /// Creates an empty network.
    pub fn new() -> Self {
        LoopbackNetwork::default()
    }

    /// Joins `locality` to the network, returning its transport endpoint.
    ///
    /// Joining a locality twice replaces the previous endpoint.
    pub fn endpoint(&self, locality: LocalityId) -> Arc<LoopbackTransport> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.inboxes.insert(locality, tx);
        Arc::new(LoopbackTransport {
            here: locality,
            network: self.clone(),
            inbox: Mutex::new(Some(rx)),
            handler: OnceCell::new(),
        })
    }

    /// The localities that joined the network.
    pub fn localities(&self) -> Vec<LocalityId> {
        let mut localities: Vec<_> = self
            .inner
            .inboxes
            .iter()
            .map(|entry| *entry.key())
            .collect();
        localities.sort_unstable();
        localities
    }

    /// Silently drops every message sent from `from` to `to` until the link is healed.
    pub fn sever(&self, from: LocalityId, to: LocalityId) {
        self.inner.severed.insert((from, to));
    }

    /// Restores delivery from `from` to `to`.
    pub fn heal(&self, from: LocalityId, to: LocalityId) {
        self.inner.severed.remove(&(from, to));
    }

    fn deliver(
        &self,
        from: LocalityId,
        to: LocalityId,
        message: Vec<u8>,
    ) -> Result<(), TransportError> {
        if self.inner.severed.contains(&(from, to)) {
            trace!(%from, %to, "dropped message on severed link");
            return Ok(());
        }
        let inbox = self
            .inner
            .inboxes
            .get(&to)
            .map(|inbox| inbox.clone())
            .ok_or(TransportError::Unreachable(to))?;
        inbox
            .send((from, message))
            .map_err(|_| TransportError::Unreachable(to))
    }
}

/// One locality's endpoint on a [`LoopbackNetwork`].
pub struct LoopbackTransport {
    here: LocalityId,
    network: LoopbackNetwork,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<(LocalityId, Vec<u8>)>>>,
    handler: OnceCell<InboundHandler>,
}

impl fmt::Debug for LoopbackTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackTransport")
            .field("here", &self.here)
            .field("receiving", &self.handler.get().is_some())
            .finish()
    }
}

impl LoopbackTransport {
    /// The network this endpoint belongs to.
    pub fn network(&self) -> &LoopbackNetwork {
        &self.network
    }
}

impl Transport for LoopbackTransport {
    fn here(&self) -> LocalityId {
        self.here
    }

    fn peers(&self) -> Vec<LocalityId> {
        self.network
            .localities()
            .into_iter()
            .filter(|locality| *locality != self.here)
            .collect()
    }

    fn send(
        &self,
        to: LocalityId,
        message: Vec<u8>,
    ) -> BoxFuture<'static, Result<(), TransportError>> {
        futures::future::ready(self.network.deliver(self.here, to, message)).boxed()
    }

    /// Starts draining the inbox into `handler` on a new task.
    ///
    /// Messages sent before a handler was registered are buffered. Must be called from within a
    /// Tokio runtime.
    fn on_receive(&self, handler: InboundHandler) {
        if self.handler.set(handler.clone()).is_err() {
            return;
        }
        let Some(inbox) = self.inbox.lock().ok().and_then(|mut inbox| inbox.take()) else {
            return;
        };
        let here = self.here;
        tokio::spawn(async move {
            let mut inbox = UnboundedReceiverStream::new(inbox);
            while let Some((from, message)) = inbox.next().await {
                handler(from, message);
            }
            trace!(%here, "loopback inbox closed");
        });
    }
}
