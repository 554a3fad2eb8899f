use crate::{Codec, Error, Result};

use std::error::Error as StdError;
use std::fmt::{self, Debug};
use std::marker::PhantomData;

use bytes::Bytes;

/// Uses a type's own `TryFrom<Bytes>` and `TryInto<Bytes>` conversions.
///
/// Encoding consumes a clone of the value, since `TryInto` takes ownership.
pub struct ConvertCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> ConvertCodec<T> {
    /// Create a codec for `T`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for ConvertCodec<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ConvertCodec<T> {}

impl<T> Debug for ConvertCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConvertCodec<{}>", std::any::type_name::<T>())
    }
}

impl<T> Default for ConvertCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, D, S> Codec for ConvertCodec<T>
where
    T: Clone + TryFrom<Bytes, Error = D> + TryInto<Bytes, Error = S> + Send + Sync + 'static,
    D: StdError,
    S: StdError,
{
    type Value = T;

    fn encode(&self, value: &T) -> Result<Bytes> {
        value
            .clone()
            .try_into()
            .map_err(|e: S| Error::Encode(e.to_string()))
    }

    fn decode(&self, bytes: Bytes) -> Result<T> {
        T::try_from(bytes).map_err(|e| Error::Decode(e.to_string()))
    }
}
