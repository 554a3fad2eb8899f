use thiserror::Error;

/// Errors building an [`HttpBackend`](crate::HttpBackend).
#[derive(Debug, Error)]
pub enum Error {
    /// The base URL does not parse.
    #[error("invalid base url: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),

    /// The token cannot be sent as a header.
    #[error("token contains characters not allowed in a header")]
    InvalidToken,

    /// The HTTP client could not be built.
    #[error(transparent)]
    Client(#[from] reqwest::Error),
}
