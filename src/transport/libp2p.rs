//! Localities as libp2p peers, connected over QUIC.
//!
//! Every message is sent as a CBOR request-response exchange, acknowledged by the receiving
//! peer once it has been handed to the runtime. Each locality is mapped to a peer through
//! [`Libp2pTransport::add_peer`], with a multiaddr ending in `/p2p/<peer id>`.
//!
//! ```no_run
//! use agora::{transport::libp2p::Libp2pTransport, LocalityId};
//! use libp2p_identity::Keypair;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Libp2pTransport::new(
//!     LocalityId::new(1),
//!     Keypair::generate_ed25519(),
//!     "/ip4/0.0.0.0/udp/8020/quic-v1".parse()?,
//! )?;
//! transport.add_peer(
//!     LocalityId::new(2),
//!     "/ip4/10.0.0.2/udp/8020/quic-v1/p2p/12D3KooWAbC...".parse()?,
//! )?;
//! # Ok(())
//! # }
//! ```

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use ::libp2p::{
    multiaddr::Protocol,
    request_response::{self, OutboundRequestId, ProtocolSupport},
    swarm::{NetworkBehaviour, SwarmEvent},
    Multiaddr, PeerId, StreamProtocol, Swarm, SwarmBuilder,
};
use dashmap::DashMap;
use futures::{future::BoxFuture, FutureExt, StreamExt};
use libp2p_identity::Keypair;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::{error::TransportError, id::LocalityId};

use super::{InboundHandler, Transport};

const PROTOCOL: StreamProtocol = StreamProtocol::new("/agora/parcel/1");

#[derive(Debug, Serialize, Deserialize)]
struct Datagram {
    from: LocalityId,
    payload: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Ack;

#[derive(NetworkBehaviour)]
struct ParcelBehaviour {
    parcels: request_response::cbor::Behaviour<Datagram, Ack>,
}

enum Command {
    Send {
        peer: PeerId,
        datagram: Datagram,
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
    AddPeer {
        peer: PeerId,
        addr: Multiaddr,
    },
}

/// A transport connecting localities running in separate processes.
pub struct Libp2pTransport {
    here: LocalityId,
    local_peer_id: PeerId,
    peers: DashMap<LocalityId, PeerId>,
    commands: mpsc::UnboundedSender<Command>,
    handler: Arc<OnceCell<InboundHandler>>,
}

impl Libp2pTransport {
    /// Starts a swarm for `here` listening on `listen`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        here: LocalityId,
        keypair: Keypair,
        listen: Multiaddr,
    ) -> Result<Self, TransportError> {
        let mut swarm = SwarmBuilder::with_existing_identity(keypair)
            .with_tokio()
            .with_quic()
            .with_behaviour(|_| ParcelBehaviour {
                parcels: request_response::cbor::Behaviour::new(
                    [(PROTOCOL, ProtocolSupport::Full)],
                    request_response::Config::default(),
                ),
            })
            .map_err(|err| TransportError::Other(Box::new(err)))?
            .with_swarm_config(|c| c.with_idle_connection_timeout(Duration::from_secs(60)))
            .build();
        swarm
            .listen_on(listen)
            .map_err(|err| TransportError::Other(Box::new(err)))?;

        let local_peer_id = *swarm.local_peer_id();
        let (commands, rx) = mpsc::unbounded_channel();
        let handler = Arc::new(OnceCell::new());
        tokio::spawn(run_swarm(swarm, rx, handler.clone()));

        Ok(Libp2pTransport {
            here,
            local_peer_id,
            peers: DashMap::new(),
            commands,
            handler,
        })
    }

    /// The peer id of this endpoint.
    pub fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    /// Maps `locality` to the peer reachable at `addr`.
    ///
    /// `addr` must end with the `/p2p/<peer id>` component.
    pub fn add_peer(&self, locality: LocalityId, addr: Multiaddr) -> Result<(), TransportError> {
        let Some(Protocol::P2p(peer)) = addr.iter().last() else {
            return Err(TransportError::Other(
                format!("multiaddr {addr} does not end with a peer id").into(),
            ));
        };
        self.peers.insert(locality, peer);
        self.commands
            .send(Command::AddPeer { peer, addr })
            .map_err(|_| TransportError::Closed)
    }
}

impl fmt::Debug for Libp2pTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Libp2pTransport")
            .field("here", &self.here)
            .field("local_peer_id", &self.local_peer_id)
            .field("peers", &self.peers)
            .finish()
    }
}

impl Transport for Libp2pTransport {
    fn here(&self) -> LocalityId {
        self.here
    }

    fn peers(&self) -> Vec<LocalityId> {
        let mut peers: Vec<_> = self.peers.iter().map(|entry| *entry.key()).collect();
        peers.sort_unstable();
        peers
    }

    fn send(
        &self,
        to: LocalityId,
        message: Vec<u8>,
    ) -> BoxFuture<'static, Result<(), TransportError>> {
        let Some(peer) = self.peers.get(&to).map(|peer| *peer) else {
            return futures::future::ready(Err(TransportError::Unreachable(to))).boxed();
        };
        let (reply, rx) = oneshot::channel();
        let sent = self.commands.send(Command::Send {
            peer,
            datagram: Datagram {
                from: self.here,
                payload: message,
            },
            reply,
        });
        async move {
            sent.map_err(|_| TransportError::Closed)?;
            rx.await.map_err(|_| TransportError::Closed)?
        }
        .boxed()
    }

    fn on_receive(&self, handler: InboundHandler) {
        let _ = self.handler.set(handler);
    }
}

async fn run_swarm(
    mut swarm: Swarm<ParcelBehaviour>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    handler: Arc<OnceCell<InboundHandler>>,
) {
    let mut in_flight: HashMap<OutboundRequestId, oneshot::Sender<Result<(), TransportError>>> =
        HashMap::new();

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send { peer, datagram, reply }) => {
                    let request_id = swarm.behaviour_mut().parcels.send_request(&peer, datagram);
                    in_flight.insert(request_id, reply);
                }
                Some(Command::AddPeer { peer, addr }) => {
                    swarm.add_peer_address(peer, addr);
                }
                None => break,
            },
            Some(event) = swarm.next() => handle_event(&mut swarm, &mut in_flight, &handler, event),
        }
    }

    trace!("swarm command channel closed");
}

fn handle_event(
    swarm: &mut Swarm<ParcelBehaviour>,
    in_flight: &mut HashMap<OutboundRequestId, oneshot::Sender<Result<(), TransportError>>>,
    handler: &OnceCell<InboundHandler>,
    event: SwarmEvent<ParcelBehaviourEvent>,
) {
    match event {
        SwarmEvent::NewListenAddr { address, .. } => {
            debug!(%address, "listening");
        }
        SwarmEvent::Behaviour(ParcelBehaviourEvent::Parcels(event)) => match event {
            request_response::Event::Message { message, .. } => match message {
                request_response::Message::Request {
                    request, channel, ..
                } => {
                    if swarm
                        .behaviour_mut()
                        .parcels
                        .send_response(channel, Ack)
                        .is_err()
                    {
                        debug!(from = %request.from, "failed to acknowledge datagram");
                    }
                    match handler.get() {
                        Some(handler) => handler(request.from, request.payload),
                        None => warn!(from = %request.from, "dropped datagram without handler"),
                    }
                }
                request_response::Message::Response { request_id, .. } => {
                    if let Some(reply) = in_flight.remove(&request_id) {
                        let _ = reply.send(Ok(()));
                    }
                }
            },
            request_response::Event::OutboundFailure {
                request_id, error, ..
            } => {
                if let Some(reply) = in_flight.remove(&request_id) {
                    let _ = reply.send(Err(TransportError::Other(Box::new(error))));
                }
            }
            request_response::Event::InboundFailure { peer, error, .. } => {
                debug!(%peer, %error, "inbound datagram failed");
            }
            request_response::Event::ResponseSent { .. } => {}
        },
        _ => {}
    }
}
