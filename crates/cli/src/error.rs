use thiserror::Error;

/// CLI error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Settings file or section error.
    #[error(transparent)]
    Config(#[from] piggyback_socket::ConfigError),

    /// HTTP backend could not be built.
    #[error(transparent)]
    Http(#[from] piggyback_backend_http::Error),

    /// Socket error.
    #[error(transparent)]
    Socket(#[from] piggyback_socket::Error),

    /// Reading input or writing output failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// No backend by that name.
    #[error("unknown backend {0:?}, expected \"memory\" or \"http\"")]
    UnknownBackend(String),
}
