//! Connection lifecycle states.

use std::fmt;

/// Where a connection is in its lifecycle.
///
/// ```text
/// Connecting -> Handshaking -> Running -> Closing -> Closed
///                    |            |                    ^
///                    +------------+----> Failed -------+
/// ```
///
/// `Failed` records that the connection ended because of an error; it is
/// followed by `Closed` once the transport has been released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Opening the TCP connection (including retries).
    Connecting,
    /// Version, security, init, pixel format and encodings exchange.
    Handshaking,
    /// Receive loop active.
    Running,
    /// Close requested by the caller.
    Closing,
    /// Terminal.
    Closed,
    /// An error ended the connection.
    Failed,
}

impl ConnectionState {
    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Handshaking)
                | (Connecting, Failed)
                | (Handshaking, Running)
                | (Handshaking, Failed)
                | (Running, Closing)
                | (Running, Failed)
                | (Closing, Closed)
                | (Failed, Closed)
        )
    }

    /// Closed or failed; no further traffic will happen.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Running => "running",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
            ConnectionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionState::*;

    #[test]
    fn test_happy_path() {
        assert!(Connecting.can_transition_to(Handshaking));
        assert!(Handshaking.can_transition_to(Running));
        assert!(Running.can_transition_to(Closing));
        assert!(Closing.can_transition_to(Closed));
    }

    #[test]
    fn test_failure_paths() {
        assert!(Handshaking.can_transition_to(Failed));
        assert!(Running.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Closed));
        assert!(!Closed.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Running));
        assert!(Failed.is_terminal());
        assert!(!Running.is_terminal());
    }
}
