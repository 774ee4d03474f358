//! The transport capability the runtime sends parcels through.
//!
//! The runtime never opens connections itself. It hands opaque, already encoded messages to a
//! [`Transport`] addressed by [`LocalityId`], and receives inbound messages through the handler
//! it registers with [`Transport::on_receive`].
//!
//! Delivery may be lossy. Callers observe lost messages as timeouts, and the runtime never
//! retries on its own. Duplication and corruption are assumed to be handled by the transport.
//!
//! Two implementations ship with the crate:
//!
//! - [`loopback`]: an in-process cluster over Tokio channels, with fault injection.
//! - `libp2p` (feature `remote`): QUIC connections between processes.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::{error::TransportError, id::LocalityId};

#[cfg(feature = "remote")]
pub mod libp2p;
pub mod loopback;

/// Handler invoked for every inbound message, with the locality that sent it.
pub type InboundHandler = Arc<dyn Fn(LocalityId, Vec<u8>) + Send + Sync>;

/// Moves opaque messages between localities.
pub trait Transport: Send + Sync + 'static {
    /// The locality this endpoint represents.
    fn here(&self) -> LocalityId;

    /// The other localities currently reachable.
    fn peers(&self) -> Vec<LocalityId>;

    /// Hands a message over for delivery to `to`.
    ///
    /// Resolving successfully means the transport accepted the message, not that it arrived.
    fn send(
        &self,
        to: LocalityId,
        message: Vec<u8>,
    ) -> BoxFuture<'static, Result<(), TransportError>>;

    /// Registers the handler for inbound messages.
    ///
    /// Only the first registration takes effect.
    fn on_receive(&self, handler: InboundHandler);
}
