//! Identifiers used across the global address space.
//!
//! Every object created through the runtime is addressed by a [`GlobalId`], which embeds the
//! [`LocalityId`] of the locality that minted it. Any locality can therefore compute the *home*
//! of an id without contacting a central authority; only the local handle has to be looked up
//! on the locality hosting the instance.

use std::{error, fmt};

use internment::Intern;
use serde::{Deserialize, Serialize};

/// Identifies one addressable execution domain (a process or machine) in the cluster.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalityId(u32);

impl LocalityId {
    /// Creates a locality id from its raw number.
    pub const fn new(id: u32) -> Self {
        LocalityId(id)
    }

    /// Returns the raw locality number.
    pub const fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for LocalityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

impl fmt::Debug for LocalityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LocalityId({})", self.0)
    }
}

impl From<u32> for LocalityId {
    fn from(id: u32) -> Self {
        LocalityId(id)
    }
}

/// A cluster-wide unique identifier for an object instance.
///
/// `GlobalId` combines the home [`LocalityId`] which minted it with a sequence number that is
/// strictly increasing on that locality. Sequence numbers are never rewound, so an id is never
/// reused for another instance once its original instance has been retired.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GlobalId {
    locality: LocalityId,
    sequence: u64,
}

impl GlobalId {
    /// Size of the byte representation produced by [`GlobalId::to_bytes`].
    pub const BYTES_LEN: usize = 12;

    /// Creates a `GlobalId` from its parts.
    ///
    /// Ids are normally minted by the address table; constructing one by hand is only useful for
    /// decoding ids received from elsewhere.
    pub const fn new(locality: LocalityId, sequence: u64) -> Self {
        GlobalId { locality, sequence }
    }

    /// Returns the home locality which minted this id.
    ///
    /// The instance may have since migrated; the home locality always knows where it lives.
    pub const fn locality(&self) -> LocalityId {
        self.locality
    }

    /// Returns the per-locality sequence number.
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Serializes the `GlobalId` into a byte array.
    ///
    /// The layout is the little endian locality followed by the little endian sequence.
    pub fn to_bytes(&self) -> [u8; Self::BYTES_LEN] {
        let mut bytes = [0u8; Self::BYTES_LEN];
        bytes[..4].copy_from_slice(&self.locality.0.to_le_bytes());
        bytes[4..].copy_from_slice(&self.sequence.to_le_bytes());
        bytes
    }

    /// Deserializes a `GlobalId` from a byte slice produced by [`GlobalId::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, GlobalIdFromBytesError> {
        if bytes.len() != Self::BYTES_LEN {
            return Err(GlobalIdFromBytesError::InvalidLength(bytes.len()));
        }

        let locality = u32::from_le_bytes(
            bytes[..4]
                .try_into()
                .map_err(|_| GlobalIdFromBytesError::InvalidLength(bytes.len()))?,
        );
        let sequence = u64::from_le_bytes(
            bytes[4..]
                .try_into()
                .map_err(|_| GlobalIdFromBytesError::InvalidLength(bytes.len()))?,
        );

        Ok(GlobalId::new(LocalityId(locality), sequence))
    }
}

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GlobalId({}, {})", self.sequence, self.locality)
    }
}

impl fmt::Debug for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GlobalId({:?}, {:?})", self.sequence, self.locality)
    }
}

/// Errors that can occur when deserializing a `GlobalId` from bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GlobalIdFromBytesError {
    /// The byte slice has the wrong length.
    InvalidLength(usize),
}

impl fmt::Display for GlobalIdFromBytesError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GlobalIdFromBytesError::InvalidLength(len) => write!(
                f,
                "expected {} bytes for a global id, got {len}",
                GlobalId::BYTES_LEN
            ),
        }
    }
}

impl error::Error for GlobalIdFromBytesError {}

/// A stable identifier for a registered component type.
///
/// Every locality able to construct a type must register it under the same id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentTypeId(Intern<String>);

impl ComponentTypeId {
    /// Creates (or reuses) the interned id for a component name.
    pub fn new(name: &str) -> Self {
        ComponentTypeId(Intern::new(name.to_owned()))
    }

    /// Returns the component name.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for ComponentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for ComponentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentTypeId({:?})", self.as_str())
    }
}

/// A stable identifier for a remotely invocable method of a component type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionId {
    component: ComponentTypeId,
    method: Intern<String>,
}

impl ActionId {
    /// Creates the action id for `method` on `component`.
    pub fn new(component: ComponentTypeId, method: &str) -> Self {
        ActionId {
            component,
            method: Intern::new(method.to_owned()),
        }
    }

    /// The component type the action belongs to.
    pub fn component(&self) -> ComponentTypeId {
        self.component
    }

    /// The method name.
    pub fn method(&self) -> &str {
        self.method.as_str()
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.component, self.method())
    }
}

impl fmt::Debug for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActionId({:?}, {:?})", self.component.as_str(), self.method())
    }
}

/// A locality-local handle to a live component instance.
///
/// Handles are only meaningful on the locality that issued them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalHandle(u64);

impl LocalHandle {
    pub(crate) const fn new(raw: u64) -> Self {
        LocalHandle(raw)
    }

    /// Returns the raw handle value.
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LocalHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
