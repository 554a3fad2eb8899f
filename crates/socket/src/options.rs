use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

/// What `send` does when the outbound queue is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendPolicy {
    /// Wait for a slot.
    #[default]
    Blocking,
    /// Fail with [`Error::QueueFull`](crate::Error::QueueFull).
    NonBlocking,
}

/// Socket tuning.
#[derive(Clone, Debug)]
pub struct SocketOptions {
    /// Envelopes queued or in flight before `send` applies backpressure.
    pub queue_capacity: usize,
    /// Decoded values buffered for `receive`.
    pub inbound_capacity: usize,
    /// How far ahead of a gap a frame may arrive and still be held.
    pub reorder_window: u64,
    /// How long a gap may stay open before it is skipped.
    pub gap_timeout: Duration,
    /// How long a silent sender's ordering state is kept.
    pub sender_idle_timeout: Duration,
    /// Retries after the first attempt, for connects, publishes and polls.
    pub max_retries: u32,
    /// First retry delay.
    pub retry_base_delay: Duration,
    /// Retry delay cap.
    pub retry_max_delay: Duration,
    /// Delay between polls when the backend is not pushing back.
    pub poll_interval: Duration,
    /// Slowest poll cadence under rate limiting.
    pub max_poll_interval: Duration,
    /// Full-queue behaviour of `send`.
    pub send_policy: SendPolicy,
    /// How long `close` waits for queued envelopes to drain.
    pub close_timeout: Duration,
    /// Context whose cancellation also cancels the socket.
    pub parent: Option<CancellationToken>,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            inbound_capacity: 256,
            reorder_window: 32,
            gap_timeout: Duration::from_secs(5),
            sender_idle_timeout: Duration::from_secs(300),
            max_retries: 5,
            retry_base_delay: Duration::from_millis(250),
            retry_max_delay: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
            max_poll_interval: Duration::from_secs(30),
            send_policy: SendPolicy::Blocking,
            close_timeout: Duration::from_secs(5),
            parent: None,
        }
    }
}

impl SocketOptions {
    /// Set the outbound queue capacity (minimum 1).
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set the inbound buffer capacity (minimum 1).
    #[must_use]
    pub fn with_inbound_capacity(mut self, capacity: usize) -> Self {
        self.inbound_capacity = capacity.max(1);
        self
    }

    /// Set the reorder window (minimum 1).
    #[must_use]
    pub fn with_reorder_window(mut self, window: u64) -> Self {
        self.reorder_window = window.max(1);
        self
    }

    /// Set the gap timeout.
    #[must_use]
    pub const fn with_gap_timeout(mut self, timeout: Duration) -> Self {
        self.gap_timeout = timeout;
        self
    }

    /// Set how long a silent sender is remembered.
    #[must_use]
    pub const fn with_sender_idle_timeout(mut self, timeout: Duration) -> Self {
        self.sender_idle_timeout = timeout;
        self
    }

    /// Set the retry budget.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the retry delay bounds.
    #[must_use]
    pub fn with_retry_delays(mut self, base: Duration, max: Duration) -> Self {
        self.retry_base_delay = base;
        self.retry_max_delay = max.max(base);
        self
    }

    /// Set the poll cadence bounds.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration, max: Duration) -> Self {
        self.poll_interval = interval;
        self.max_poll_interval = max.max(interval);
        self
    }

    /// Set the send policy.
    #[must_use]
    pub const fn with_send_policy(mut self, policy: SendPolicy) -> Self {
        self.send_policy = policy;
        self
    }

    /// Set the close timeout.
    #[must_use]
    pub const fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Govern the socket with a parent cancellation context.
    #[must_use]
    pub fn with_parent(mut self, parent: CancellationToken) -> Self {
        self.parent = Some(parent);
        self
    }
}
