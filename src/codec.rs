//! Serialization capability used for action arguments, results and parcels.
//!
//! The runtime is generic over the codec and defaults to [`MsgPack`].

use std::fmt;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::CodecError;

/// Encodes and decodes values exchanged between localities.
///
/// Every locality in a cluster must use the same codec.
pub trait Codec: Clone + fmt::Debug + Send + Sync + 'static {
    /// Serializes a value into bytes.
    fn encode<T>(&self, value: &T) -> Result<Vec<u8>, CodecError>
    where
        T: Serialize + ?Sized;

    /// Deserializes a value from bytes.
    fn decode<T>(&self, bytes: &[u8]) -> Result<T, CodecError>
    where
        T: DeserializeOwned;
}

/// MessagePack codec with named struct fields.
#[derive(Clone, Copy, Debug, Default)]
pub struct MsgPack;

impl Codec for MsgPack {
    fn encode<T>(&self, value: &T) -> Result<Vec<u8>, CodecError>
    where
        T: Serialize + ?Sized,
    {
        rmp_serde::to_vec_named(value).map_err(|err| CodecError::Encode(Box::new(err)))
    }

    fn decode<T>(&self, bytes: &[u8]) -> Result<T, CodecError>
    where
        T: DeserializeOwned,
    {
        rmp_serde::from_slice(bytes).map_err(|err| CodecError::Decode(Box::new(err)))
    }
}
