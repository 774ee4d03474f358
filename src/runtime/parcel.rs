//! Messages exchanged between localities.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    error::RuntimeError,
    id::{ActionId, ComponentTypeId, GlobalId, LocalHandle, LocalityId},
};

/// Correlates a reply with the request that caused it.
///
/// Correlation ids are only unique on the locality which issued the request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(u64);

impl CorrelationId {
    pub(crate) const fn new(raw: u64) -> Self {
        CorrelationId(raw)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message on the wire.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) enum Parcel {
    Request {
        correlation_id: CorrelationId,
        /// The locality awaiting the reply.
        origin: LocalityId,
        /// How many times the request was forwarded.
        hops: u8,
        body: Request,
    },
    Reply {
        correlation_id: CorrelationId,
        /// The locality which handled the request.
        responder: LocalityId,
        result: Result<Response, RuntimeError>,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) enum Request {
    Invoke {
        target: GlobalId,
        action: ActionId,
        args: Vec<u8>,
    },
    Resolve {
        target: GlobalId,
    },
    Retire {
        target: GlobalId,
    },
    Migrate {
        target: GlobalId,
        to: LocalityId,
    },
    Create {
        component: ComponentTypeId,
        count: usize,
        args: Vec<u8>,
    },
    InstanceCount {
        component: ComponentTypeId,
    },
    /// Restores a migrating instance on the receiving locality.
    Adopt {
        target: GlobalId,
        component: ComponentTypeId,
        state: Vec<u8>,
    },
    /// Tells the home locality where a migrated instance went.
    Rebind {
        target: GlobalId,
        to: LocalityId,
    },
    /// Tells the home locality a migrated instance was retired.
    Release {
        target: GlobalId,
    },
}

impl Request {
    /// The instance the request must be delivered to, following it when it migrates.
    pub(crate) fn target(&self) -> Option<GlobalId> {
        match self {
            Request::Invoke { target, .. }
            | Request::Resolve { target }
            | Request::Retire { target }
            | Request::Migrate { target, .. } => Some(*target),
            Request::Create { .. }
            | Request::InstanceCount { .. }
            | Request::Adopt { .. }
            | Request::Rebind { .. }
            | Request::Release { .. } => None,
        }
    }

    /// The instance whose location a successful reply reveals.
    pub(crate) fn locates(&self) -> Option<GlobalId> {
        match self {
            Request::Invoke { target, .. } | Request::Resolve { target } => Some(*target),
            _ => None,
        }
    }

    pub(crate) fn action(&self) -> Option<ActionId> {
        match self {
            Request::Invoke { action, .. } => Some(*action),
            _ => None,
        }
    }

    /// Size of the encoded arguments or state carried by the request.
    pub(crate) fn payload_len(&self) -> usize {
        match self {
            Request::Invoke { args, .. } | Request::Create { args, .. } => args.len(),
            Request::Adopt { state, .. } => state.len(),
            _ => 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum Response {
    Invoked(Vec<u8>),
    Resolved {
        locality: LocalityId,
        handle: LocalHandle,
    },
    Created(Vec<GlobalId>),
    InstanceCount(usize),
    Done,
}

impl Response {
    pub(crate) fn into_invoked(self) -> Result<Vec<u8>, RuntimeError> {
        match self {
            Response::Invoked(bytes) => Ok(bytes),
            other => Err(other.unexpected()),
        }
    }

    pub(crate) fn into_resolved(self) -> Result<(LocalityId, LocalHandle), RuntimeError> {
        match self {
            Response::Resolved { locality, handle } => Ok((locality, handle)),
            other => Err(other.unexpected()),
        }
    }

    pub(crate) fn into_created(self) -> Result<Vec<GlobalId>, RuntimeError> {
        match self {
            Response::Created(ids) => Ok(ids),
            other => Err(other.unexpected()),
        }
    }

    pub(crate) fn into_instance_count(self) -> Result<usize, RuntimeError> {
        match self {
            Response::InstanceCount(count) => Ok(count),
            other => Err(other.unexpected()),
        }
    }

    pub(crate) fn into_done(self) -> Result<(), RuntimeError> {
        match self {
            Response::Done => Ok(()),
            other => Err(other.unexpected()),
        }
    }

    fn unexpected(&self) -> RuntimeError {
        RuntimeError::Codec(format!("unexpected response {self:?}"))
    }
}

#[cfg(test)]
mod tests {
    use crate::codec::{Codec, MsgPack};

    use super::*;

    #[test]
    fn parcels_survive_the_codec() {
        let target = GlobalId::new(LocalityId::new(1), 3);
        let parcel = Parcel::Request {
            correlation_id: CorrelationId::new(7),
            origin: LocalityId::new(2),
            hops: 1,
            body: Request::Invoke {
                target,
                action: ActionId::new(ComponentTypeId::new("counter"), "get_x"),
                args: vec![0xc0],
            },
        };

        let bytes = MsgPack.encode(&parcel).unwrap();
        match MsgPack.decode::<Parcel>(&bytes).unwrap() {
            Parcel::Request {
                correlation_id,
                origin,
                hops,
                body,
            } => {
                assert_eq!(correlation_id, CorrelationId::new(7));
                assert_eq!(origin, LocalityId::new(2));
                assert_eq!(hops, 1);
                assert_eq!(body.target(), Some(target));
                assert_eq!(body.locates(), Some(target));
            }
            parcel => panic!("unexpected parcel {parcel:?}"),
        }
    }

    #[test]
    fn payload_len_counts_carried_bytes() {
        let component = ComponentTypeId::new("counter");
        let create = Request::Create {
            component,
            count: 2,
            args: vec![1, 2, 3],
        };
        let resolve = Request::Resolve {
            target: GlobalId::new(LocalityId::new(1), 0),
        };
        assert_eq!(create.payload_len(), 3);
        assert_eq!(resolve.payload_len(), 0);
    }

    #[test]
    fn errors_ride_in_replies() {
        let parcel = Parcel::Reply {
            correlation_id: CorrelationId::new(1),
            responder: LocalityId::new(3),
            result: Err(RuntimeError::TargetGone),
        };
        let bytes = MsgPack.encode(&parcel).unwrap();
        assert!(matches!(
            MsgPack.decode::<Parcel>(&bytes).unwrap(),
            Parcel::Reply {
                result: Err(RuntimeError::TargetGone),
                ..
            }
        ));
    }

    #[test]
    fn unexpected_responses_are_errors() {
        assert_eq!(
            Response::Done.into_invoked().unwrap_err().to_string(),
            "codec error: unexpected response Done"
        );
        assert_eq!(Response::InstanceCount(2).into_instance_count(), Ok(2));
    }
}
