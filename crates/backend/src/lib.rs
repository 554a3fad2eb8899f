//! Abstract interface for parasitic transports.
//!
//! A backend adapts some always-on hosted service (a chat channel, a
//! comment thread, anything that can carry a short opaque message) into a
//! uniform transport contract: publish one payload, poll for payloads that
//! appeared since the last poll, and report connectivity.
//!
//! Backends make no ordering or exactly-once promises. Framing, ordering and
//! deduplication live above this layer.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod shared;

pub use error::{ConnectionError, PollError, PublishError};
pub use shared::{DEFAULT_INBOX_CAPACITY, SharedBackend};

use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;

/// A transport over a third-party hosted service.
///
/// Implementations own their connection handle and use interior mutability,
/// so every operation takes `&self`. Callers other than the dispatcher should
/// not retry failed operations themselves.
#[async_trait]
pub trait Backend
where
    Self: Debug + Send + Sync + 'static,
{
    /// Short name of the service this backend talks to, used in logs.
    fn name(&self) -> &str;

    /// Establish a session with the external service.
    async fn connect(&self) -> Result<(), ConnectionError>;

    /// Release the session. Calling this on a disconnected backend is a no-op.
    async fn disconnect(&self);

    /// Deliver one opaque payload to the external service.
    async fn publish(&self, payload: Bytes) -> Result<(), PublishError>;

    /// Return the payloads observed since the previous call, in the order the
    /// service exposes them. An empty vector means nothing new arrived.
    async fn poll(&self) -> Result<Vec<Bytes>, PollError>;

    /// Whether a session is currently established.
    fn is_connected(&self) -> bool;

    /// Largest payload the service accepts, if it enforces one.
    fn max_payload_size(&self) -> Option<usize> {
        None
    }
}
