use std::fmt;

/// Role of a socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SocketMode {
    /// Enqueues values for delivery.
    Push,
    /// Consumes delivered values.
    Pull,
    /// Sends values tagged with a topic.
    Pub,
    /// Consumes values whose topic matches a subscription.
    Sub,
}

impl SocketMode {
    /// Whether the socket sends.
    #[must_use]
    pub const fn sends(self) -> bool {
        matches!(self, Self::Push | Self::Pub)
    }

    /// Whether the socket receives.
    #[must_use]
    pub const fn receives(self) -> bool {
        matches!(self, Self::Pull | Self::Sub)
    }

    /// Whether payloads carry a topic header.
    #[must_use]
    pub const fn topics(self) -> bool {
        matches!(self, Self::Pub | Self::Sub)
    }
}

impl fmt::Display for SocketMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Push => "PUSH",
            Self::Pull => "PULL",
            Self::Pub => "PUB",
            Self::Sub => "SUB",
        };
        f.write_str(name)
    }
}

/// Connection lifecycle of a socket.
///
/// ```text
/// Disconnected -> Connecting -> Connected -> Faulted -> Connecting -> ...
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No session, and no dispatcher working on one.
    Disconnected,
    /// The dispatcher is establishing a session.
    Connecting,
    /// The dispatcher is moving envelopes.
    Connected,
    /// The dispatcher gave up; `reconnect` resumes.
    Faulted,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Faulted => "faulted",
        };
        f.write_str(name)
    }
}
