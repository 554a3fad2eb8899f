use crate::{Codec, Error, Result};

use std::fmt::{self, Debug};
use std::marker::PhantomData;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// JSON via `serde_json`. Human-readable on the wire, which helps when the
/// transport is a chat channel someone may be looking at.
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    /// Create a codec for `T`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for JsonCodec<T> {}

impl<T> Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JsonCodec<{}>", std::any::type_name::<T>())
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Codec for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    type Value = T;

    fn encode(&self, value: &T) -> Result<Bytes> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| Error::Encode(e.to_string()))
    }

    fn decode(&self, bytes: Bytes) -> Result<T> {
        serde_json::from_slice(&bytes).map_err(|e| Error::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Order {
        id: u64,
        item: String,
        quantities: Vec<u32>,
    }

    #[test]
    fn test_encodes_plain_json() {
        let codec = JsonCodec::<Order>::new();
        let order = Order {
            id: 7,
            item: "lamp".to_string(),
            quantities: vec![1, 2],
        };

        let encoded = codec.encode(&order).unwrap();
        assert_eq!(&encoded[..], br#"{"id":7,"item":"lamp","quantities":[1,2]}"#);
    }

    #[test]
    fn test_decode_error() {
        let codec = JsonCodec::<Order>::new();
        assert_matches!(
            codec.decode(Bytes::from_static(b"{\"id\":")),
            Err(Error::Decode(_))
        );
    }

    proptest! {
        #[test]
        fn round_trip(id in any::<u64>(), item in "[a-z ]{0,32}", quantities in proptest::collection::vec(any::<u32>(), 0..8)) {
            let codec = JsonCodec::<Order>::new();
            let order = Order { id, item, quantities };
            let decoded = codec.decode(codec.encode(&order).unwrap()).unwrap();
            prop_assert_eq!(decoded, order);
        }
    }
}
