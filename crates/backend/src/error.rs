use std::time::Duration;

use thiserror::Error;

/// Failure to establish a session with the external service.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConnectionError {
    /// The service could not be reached.
    #[error("service unreachable: {0}")]
    Unreachable(String),

    /// The service rejected the credentials.
    #[error("authentication rejected: {0}")]
    Unauthorized(String),

    /// The channel does not exist on the service.
    #[error("channel not found: {0}")]
    NotFound(String),

    /// Any other connection failure.
    #[error("connection failed: {0}")]
    Other(String),
}

impl ConnectionError {
    /// Whether another connect attempt could succeed without operator action.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Other(_))
    }
}

/// Failure to publish a payload.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PublishError {
    /// Rate limiting or a temporary fault. Safe to retry after a delay.
    #[error("transient publish failure: {reason}")]
    Transient {
        /// Human-readable cause.
        reason: String,
        /// Delay requested by the service before the next attempt.
        retry_after: Option<Duration>,
    },

    /// The payload exceeds what the service accepts.
    #[error("payload of {size} bytes exceeds the service limit of {max} bytes")]
    PayloadTooLarge {
        /// Size of the rejected payload.
        size: usize,
        /// Largest accepted payload.
        max: usize,
    },

    /// The service permanently refused the payload.
    #[error("fatal publish failure: {reason}")]
    Fatal {
        /// Human-readable cause.
        reason: String,
    },

    /// The backend has no session.
    #[error("backend is not connected")]
    NotConnected,
}

impl PublishError {
    /// A retryable failure without a service-provided delay.
    pub fn transient<R: Into<String>>(reason: R) -> Self {
        Self::Transient {
            reason: reason.into(),
            retry_after: None,
        }
    }

    /// A rate-limit rejection carrying the delay the service asked for.
    #[must_use]
    pub fn rate_limited(retry_after: Duration) -> Self {
        Self::Transient {
            reason: "rate limited".to_string(),
            retry_after: Some(retry_after),
        }
    }

    /// A permanent rejection.
    pub fn fatal<R: Into<String>>(reason: R) -> Self {
        Self::Fatal {
            reason: reason.into(),
        }
    }

    /// Whether the dispatcher may retry the publish.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::NotConnected)
    }

    /// Delay requested by the service, if any.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Failure to poll for new payloads.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PollError {
    /// The service is throttling reads; the poll cadence should slow down.
    #[error("polling rate limited")]
    RateLimited {
        /// Delay requested by the service before the next poll.
        retry_after: Option<Duration>,
    },

    /// A temporary read failure.
    #[error("transient poll failure: {0}")]
    Transient(String),

    /// The session was lost and must be re-established.
    #[error("backend disconnected")]
    Disconnected,

    /// The service refuses reads permanently.
    #[error("fatal poll failure: {0}")]
    Fatal(String),
}
