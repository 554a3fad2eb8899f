//! In-memory backend for testing.
//!
//! Simulates a hosted channel within the process: a shared, ordered message
//! history that backends post to and page through with a cursor, plus fault
//! injection for connect failures, rate limits, latency and outages.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod channel;
mod faults;

pub use channel::{DEFAULT_RETENTION, MemoryChannel};
pub use faults::MemoryFaults;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use piggyback_backend::{Backend, ConnectionError, PollError, PublishError};
use tracing::{debug, info};

/// Where a new backend starts reading.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StartFrom {
    /// Only messages posted after the first connect.
    #[default]
    Latest,
    /// Every message the channel still retains.
    Beginning,
}

/// Options for [`MemoryBackend`].
#[derive(Clone, Debug)]
pub struct MemoryBackendOptions {
    /// Where reading starts on the first connect.
    pub start_from: StartFrom,

    /// Most messages returned by one poll.
    pub page_size: usize,

    /// Largest accepted payload, if limited.
    pub max_payload_size: Option<usize>,
}

impl Default for MemoryBackendOptions {
    fn default() -> Self {
        Self {
            start_from: StartFrom::Latest,
            page_size: 100,
            max_payload_size: None,
        }
    }
}

/// Backend over a [`MemoryChannel`].
///
/// Each backend keeps its own read cursor. The cursor is positioned on the
/// first connect and kept across reconnects, so nothing posted while the
/// backend was disconnected is missed.
#[derive(Debug)]
pub struct MemoryBackend {
    channel: MemoryChannel,
    options: MemoryBackendOptions,
    cursor: AtomicU64,
    positioned: AtomicBool,
    connected: AtomicBool,
}

impl MemoryBackend {
    /// Create a backend with options.
    pub const fn new(channel: MemoryChannel, options: MemoryBackendOptions) -> Self {
        Self {
            channel,
            options,
            cursor: AtomicU64::new(0),
            positioned: AtomicBool::new(false),
            connected: AtomicBool::new(false),
        }
    }

    /// Create a backend with default options.
    pub fn new_default(channel: MemoryChannel) -> Self {
        Self::new(channel, MemoryBackendOptions::default())
    }

    /// The channel this backend talks to.
    pub const fn channel(&self) -> &MemoryChannel {
        &self.channel
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn connect(&self) -> Result<(), ConnectionError> {
        let faults = self.channel.faults();
        if faults.is_unreachable() {
            return Err(ConnectionError::Unreachable(format!(
                "memory channel {} is unreachable",
                self.channel.name()
            )));
        }
        if faults.take_connect_failure() {
            return Err(ConnectionError::Unreachable(
                "injected connect failure".to_string(),
            ));
        }

        if !self.positioned.swap(true, Ordering::SeqCst) {
            let cursor = match self.options.start_from {
                StartFrom::Latest => self.channel.latest_id(),
                StartFrom::Beginning => 0,
            };
            self.cursor.store(cursor, Ordering::SeqCst);
        }

        self.connected.store(true, Ordering::SeqCst);
        info!("Connected to memory channel {}", self.channel.name());
        Ok(())
    }

    async fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            debug!("Disconnected from memory channel {}", self.channel.name());
        }
    }

    async fn publish(&self, payload: Bytes) -> Result<(), PublishError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(PublishError::NotConnected);
        }

        match self.options.max_payload_size {
            Some(max) if payload.len() > max => {
                return Err(PublishError::PayloadTooLarge {
                    size: payload.len(),
                    max,
                });
            }
            _ => {}
        }

        let faults = self.channel.faults();
        let latency = faults.publish_latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if faults.is_unreachable() {
            return Err(PublishError::transient("channel unreachable"));
        }
        if faults.take_publish_rejection() {
            return Err(PublishError::fatal("injected publish rejection"));
        }
        if faults.take_publish_failure() {
            return Err(PublishError::transient("injected publish failure"));
        }

        let id = self.channel.post(payload);
        debug!("Posted message {} to memory channel {}", id, self.channel.name());
        Ok(())
    }

    async fn poll(&self) -> Result<Vec<Bytes>, PollError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(PollError::Disconnected);
        }

        let faults = self.channel.faults();
        if faults.is_unreachable() {
            return Err(PollError::Transient("channel unreachable".to_string()));
        }
        if faults.take_poll_rate_limit() {
            return Err(PollError::RateLimited { retry_after: None });
        }

        let cursor = self.cursor.load(Ordering::SeqCst);
        let page = self
            .channel
            .messages_after(cursor, self.options.page_size.max(1));

        if let Some((last, _)) = page.last() {
            self.cursor.store(*last, Ordering::SeqCst);
        }

        Ok(page.into_iter().map(|(_, payload)| payload).collect())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn max_payload_size(&self) -> Option<usize> {
        self.options.max_payload_size
    }
}
