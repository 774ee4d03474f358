//! Defines error handling constructs for agora.
//!
//! Every public operation of the runtime resolves exactly once, either with a value or with one
//! of the [`RuntimeError`] kinds below. Runtime errors are serializable so they can travel back
//! to the caller inside a reply parcel when the failure happens on another locality.

use std::{error, fmt};

use serde::{Deserialize, Serialize};

use crate::id::{ActionId, ComponentTypeId, GlobalId, LocalityId};

/// A dyn boxed error.
pub type BoxError = Box<dyn error::Error + Send + Sync + 'static>;

/// Error returned by creation, resolution and invocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeError {
    /// The global id was never registered, or has since been retired.
    UnknownId(GlobalId),
    /// The component type is not registered on the constructing locality.
    UnknownType(ComponentTypeId),
    /// The action is not registered on the executing locality.
    UnknownAction(ActionId),
    /// The action belongs to a different component type than the target instance.
    BadComponentType {
        /// The component type the action was registered for.
        expected: ComponentTypeId,
        /// The component type of the target instance.
        found: ComponentTypeId,
    },
    /// The component's constructor returned an error.
    ConstructionFailed(String),
    /// The invoked method returned an error.
    ActionFailed(String),
    /// The local handle no longer denotes a live instance.
    TargetGone,
    /// The distribution policy has no candidate localities.
    NoCandidates,
    /// The referenced global id could not be resolved for placement.
    NotFound(GlobalId),
    /// The component type was not registered as migratable.
    NotMigratable(ComponentTypeId),
    /// The call deadline elapsed before a reply arrived.
    Timeout,
    /// The call was canceled before a reply arrived.
    Canceled,
    /// The codec failed to encode or decode a payload.
    Codec(String),
    /// The transport failed to deliver a message.
    Transport(String),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::UnknownId(id) => write!(f, "unknown id {id}"),
            RuntimeError::UnknownType(component) => {
                write!(f, "unknown component type '{component}'")
            }
            RuntimeError::UnknownAction(action) => write!(f, "unknown action '{action}'"),
            RuntimeError::BadComponentType { expected, found } => write!(
                f,
                "bad component type: action expects '{expected}' but target is '{found}'"
            ),
            RuntimeError::ConstructionFailed(err) => write!(f, "construction failed: {err}"),
            RuntimeError::ActionFailed(err) => write!(f, "action failed: {err}"),
            RuntimeError::TargetGone => write!(f, "target instance is gone"),
            RuntimeError::NoCandidates => write!(f, "no candidate localities"),
            RuntimeError::NotFound(id) => write!(f, "{id} could not be resolved"),
            RuntimeError::NotMigratable(component) => {
                write!(f, "component type '{component}' is not migratable")
            }
            RuntimeError::Timeout => write!(f, "timeout"),
            RuntimeError::Canceled => write!(f, "canceled"),
            RuntimeError::Codec(err) => write!(f, "codec error: {err}"),
            RuntimeError::Transport(err) => write!(f, "transport error: {err}"),
        }
    }
}

impl error::Error for RuntimeError {}

impl From<CodecError> for RuntimeError {
    fn from(err: CodecError) -> Self {
        RuntimeError::Codec(err.to_string())
    }
}

impl From<TransportError> for RuntimeError {
    fn from(err: TransportError) -> Self {
        RuntimeError::Transport(err.to_string())
    }
}

/// An error that can occur when registering component types and actions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistrationError {
    /// A factory is already registered for the component type.
    DuplicateComponent(ComponentTypeId),
    /// A thunk is already registered for the action.
    DuplicateAction(ActionId),
}

impl fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationError::DuplicateComponent(component) => {
                write!(f, "component type '{component}' is already registered")
            }
            RegistrationError::DuplicateAction(action) => {
                write!(f, "action '{action}' is already registered")
            }
        }
    }
}

impl error::Error for RegistrationError {}

/// Failure of the injected codec.
#[derive(Debug)]
pub enum CodecError {
    /// Failed to serialize a value.
    Encode(BoxError),
    /// Failed to deserialize a value.
    Decode(BoxError),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Encode(err) => write!(f, "failed to encode: {err}"),
            CodecError::Decode(err) => write!(f, "failed to decode: {err}"),
        }
    }
}

impl error::Error for CodecError {}

/// Failure of the transport collaborator to hand a message over.
#[derive(Debug)]
pub enum TransportError {
    /// No route to the locality is known.
    Unreachable(LocalityId),
    /// The transport has been shut down.
    Closed,
    /// Any other transport failure.
    Other(BoxError),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Unreachable(locality) => {
                write!(f, "locality {locality} is unreachable")
            }
            TransportError::Closed => write!(f, "transport closed"),
            TransportError::Other(err) => err.fmt(f),
        }
    }
}

impl error::Error for TransportError {}
