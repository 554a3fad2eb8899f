use thiserror::Error;

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while converting values to and from bytes.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The value could not be serialized.
    #[error("failed to encode value: {0}")]
    Encode(String),

    /// The bytes do not describe a valid value.
    #[error("failed to decode value: {0}")]
    Decode(String),
}
