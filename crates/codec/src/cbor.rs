use crate::{Codec, Error, Result};

use std::fmt::{self, Debug};
use std::marker::PhantomData;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Compact binary encoding via `ciborium`.
pub struct CborCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> CborCodec<T> {
    /// Create a codec for `T`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for CborCodec<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for CborCodec<T> {}

impl<T> Debug for CborCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CborCodec<{}>", std::any::type_name::<T>())
    }
}

impl<T> Default for CborCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Codec for CborCodec<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    type Value = T;

    fn encode(&self, value: &T) -> Result<Bytes> {
        let mut buffer = Vec::new();
        ciborium::ser::into_writer(value, &mut buffer).map_err(|e| Error::Encode(e.to_string()))?;
        Ok(Bytes::from(buffer))
    }

    fn decode(&self, bytes: Bytes) -> Result<T> {
        ciborium::de::from_reader(&bytes[..]).map_err(|e| Error::Decode(e.to_string()))
    }
}
