//! The serialization seam: items never enter or leave a spool without
//! passing through a [`Codec`].

use crate::BoxError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encode/decode pair for the items flowing through a spool.
///
/// `decode(encode(x))` must reproduce `x` for every item in the domain;
/// encoded sizes may vary freely from item to item.
pub trait Codec<T>: Send + Sync {
    /// Serializes `item` into `buf`. The buffer arrives cleared.
    fn encode(&self, item: &T, buf: &mut Vec<u8>) -> Result<(), BoxError>;

    /// Deserializes one item from exactly the bytes `encode` produced.
    fn decode(&self, bytes: &[u8]) -> Result<T, BoxError>;
}

/// [`Codec`] for any serde-serializable type, via bincode.
///
/// The default choice: derive `Serialize`/`Deserialize` on the item type
/// and no hand-written codec is needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl<T> Codec<T> for BincodeCodec
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, item: &T, buf: &mut Vec<u8>) -> Result<(), BoxError> {
        bincode::serialize_into(buf, item).map_err(BoxError::from)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, BoxError> {
        bincode::deserialize(bytes).map_err(BoxError::from)
    }
}

/// [`Codec`] built from a plain closure pair, for item types that are not
/// serde-serializable or need a bespoke wire form.
pub struct FnCodec<E, D> {
    encode: E,
    decode: D,
}

impl<E, D> FnCodec<E, D> {
    /// Wraps the given encode/decode closures.
    pub fn new(encode: E, decode: D) -> Self {
        Self { encode, decode }
    }
}

impl<T, E, D> Codec<T> for FnCodec<E, D>
where
    E: Fn(&T, &mut Vec<u8>) -> Result<(), BoxError> + Send + Sync,
    D: Fn(&[u8]) -> Result<T, BoxError> + Send + Sync,
{
    fn encode(&self, item: &T, buf: &mut Vec<u8>) -> Result<(), BoxError> {
        (self.encode)(item, buf)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, BoxError> {
        (self.decode)(bytes)
    }
}
