//! Message-queue sockets over parasitic transports.
//!
//! A [`Socket`] combines a [`Backend`](piggyback_backend::Backend), a
//! [`Codec`](piggyback_codec::Codec) and the envelope layer into PUSH/PULL
//! and PUB/SUB primitives with bounded queues, per-sender ordering,
//! retry with backoff and reconnection.
//!
//! ```text
//! send(value) -> encode -> wrap -> outbound queue -> dispatcher -> publish
//! poll -> dispatcher -> unwrap/reorder -> decode -> inbound queue -> receive
//! ```
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod backoff;
mod config;
mod dispatcher;
mod error;
mod message;
mod mode;
mod options;
mod queue;
mod shared;
mod socket;
mod stats;
mod topic;

pub use config::{AppSettings, Settings, SocketSettings};
pub use error::{ConfigError, Error, Result};
pub use message::Message;
pub use mode::{ConnectionState, SocketMode};
pub use options::{SendPolicy, SocketOptions};
pub use socket::Socket;
pub use stats::SocketStats;
