//! MessagePack codec helpers.
//!
//! Thin wrappers around `rmp-serde`. Every payload that crosses the network
//! boundary, whether a component delta, a networked event or a bound-UI state,
//! goes through [`encode`] and [`decode`]. Structs are written with field
//! names so peers tolerate added fields.

use serde::{Deserialize, Serialize};

use crate::error::NetError;
use crate::messages::{NetMessage, TypedPayload};

/// Encode a value to MessagePack bytes.
///
/// # Errors
///
/// Returns [`NetError::Encode`] if serialisation fails.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, NetError> {
    rmp_serde::to_vec_named(value).map_err(NetError::Encode)
}

/// Decode a value from MessagePack bytes.
///
/// # Errors
///
/// Returns [`NetError::Decode`] if deserialisation fails.
pub fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, NetError> {
    rmp_serde::from_slice(bytes).map_err(NetError::Decode)
}

/// Encode a typed message together with its type tag.
///
/// # Errors
///
/// Returns [`NetError::Encode`] if serialisation fails.
pub fn encode_typed<M: NetMessage>(message: &M) -> Result<TypedPayload, NetError> {
    Ok(TypedPayload {
        kind: M::message_type_id(),
        bytes: encode(message)?,
    })
}
