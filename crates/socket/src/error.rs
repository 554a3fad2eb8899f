use crate::SocketMode;

use std::path::PathBuf;

use piggyback_backend::{ConnectionError, PollError, PublishError};
use thiserror::Error;

/// Result type for socket operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that cross the socket boundary.
///
/// Rate limiting, reordering and dropped frames are absorbed by the
/// dispatcher and only show up in [`SocketStats`](crate::SocketStats).
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The backend refused a connection and retrying cannot help.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Every connect attempt failed.
    #[error("connect failed after {attempts} attempts: {last}")]
    ConnectRetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// Error from the final attempt.
        last: ConnectionError,
    },

    /// The backend permanently refused a payload.
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// A payload kept failing transiently; the socket faulted with it still queued.
    #[error("publish of sequence {sequence} failed after {attempts} attempts: {last}")]
    PublishRetriesExhausted {
        /// Sequence number of the stuck envelope.
        sequence: u64,
        /// Attempts made.
        attempts: u32,
        /// Error from the final attempt.
        last: PublishError,
    },

    /// Polling failed beyond recovery.
    #[error("polling failed: {0}")]
    Poll(PollError),

    /// The backend session kept dropping right after being re-established.
    #[error("backend session lost {drops} times in a row: {last}")]
    SessionLost {
        /// Consecutive lost sessions.
        drops: u32,
        /// Poll error that ended the final session.
        last: PollError,
    },

    /// The outbound queue is full and the send policy is non-blocking.
    #[error("outbound queue full (capacity {capacity})")]
    QueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },

    /// The codec rejected a value or a payload.
    #[error(transparent)]
    Codec(#[from] piggyback_codec::Error),

    /// Framing failed.
    #[error(transparent)]
    Envelope(#[from] piggyback_envelope::Error),

    /// The socket is faulted and must be reconnected.
    #[error("socket is faulted")]
    Faulted,

    /// The socket was closed.
    #[error("socket is closed")]
    Closed,

    /// The socket or its parent context was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The operation does not apply to this socket mode.
    #[error("{operation} is not supported on a {mode} socket")]
    UnsupportedOperation {
        /// Attempted operation.
        operation: &'static str,
        /// Mode of the socket.
        mode: SocketMode,
    },

    /// Topics are framed with a 16-bit length.
    #[error("topic of {len} bytes exceeds the 65535 byte limit")]
    TopicTooLong {
        /// Topic length in bytes.
        len: usize,
    },
}

/// Errors loading settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The settings file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The settings are not valid TOML for the expected layout.
    #[error(transparent)]
    Parse(#[from] toml::de::Error),

    /// A backend section does not match the backend's options.
    #[error("invalid [backend.{backend}] section: {source}")]
    Backend {
        /// Backend name.
        backend: String,
        /// Underlying error.
        source: toml::de::Error,
    },

    /// A value is out of range.
    #[error("invalid setting {key}: {reason}")]
    Invalid {
        /// Offending key.
        key: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}
