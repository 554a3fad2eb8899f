//! Pluggable conversion between application values and transport bytes.
//!
//! A codec is a pure, stateless transform. Every implementation must satisfy
//! the round-trip law: `decode(encode(v)) == v` for every value it accepts.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod cbor;
mod convert;
mod error;
mod json;

pub use cbor::CborCodec;
pub use convert::ConvertCodec;
pub use error::{Error, Result};
pub use json::JsonCodec;

use std::fmt::Debug;

use bytes::Bytes;

/// Serializes values of one type to bytes and back.
pub trait Codec
where
    Self: Clone + Debug + Send + Sync + 'static,
{
    /// The application value carried by this codec.
    type Value: Send + 'static;

    /// Serialize a value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encode`] if the value cannot be represented.
    fn encode(&self, value: &Self::Value) -> Result<Bytes>;

    /// Deserialize a value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the bytes are not a valid encoding.
    fn decode(&self, bytes: Bytes) -> Result<Self::Value>;
}

/// Passes bytes through untouched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RawCodec;

impl Codec for RawCodec {
    type Value = Bytes;

    fn encode(&self, value: &Bytes) -> Result<Bytes> {
        Ok(value.clone())
    }

    fn decode(&self, bytes: Bytes) -> Result<Bytes> {
        Ok(bytes)
    }
}

/// UTF-8 text.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Utf8Codec;

impl Codec for Utf8Codec {
    type Value = String;

    fn encode(&self, value: &String) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(value.as_bytes()))
    }

    fn decode(&self, bytes: Bytes) -> Result<String> {
        String::from_utf8(bytes.to_vec()).map_err(|e| Error::Decode(e.to_string()))
    }
}
