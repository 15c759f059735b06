//! Error taxonomy for the driver.
//!
//! Engine failures arrive as [`RfbClientError`] and are classified by
//! [`DriverError::from_client`]. Per-connection errors leave the driver as
//! [`ErrorReport`]s, which serialize without any Rust types attached.

use rfb_client::RfbClientError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors surfaced by [`SessionManager`](crate::SessionManager).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// Connecting, handshaking or negotiating failed. Only returned by
    /// `connect`.
    #[error("connect error: {0}")]
    Connect(String),

    /// Malformed server message, bad encoding subtype, rectangle outside the
    /// framebuffer.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// I/O failure or reset.
    #[error("transport error: {0}")]
    Transport(String),

    /// A per-connection budget was exceeded.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Unknown connection name, invalid region or invalid event.
    #[error("usage error: {0}")]
    Usage(String),

    /// Driver configuration could not be loaded or is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// The timing profile could not be serialized or written.
    #[error("profile error: {0}")]
    Profile(String),
}

impl DriverError {
    /// Classify an engine error.
    #[must_use]
    pub fn from_client(err: &RfbClientError) -> Self {
        let message = err.to_string();
        match err {
            RfbClientError::ConnectionFailed(_)
            | RfbClientError::Handshake(_)
            | RfbClientError::Security(_)
            | RfbClientError::AuthFailed(_) => Self::Connect(message),
            RfbClientError::Protocol(_)
            | RfbClientError::Encoding(_)
            | RfbClientError::UnsupportedEncoding(_)
            | RfbClientError::UnexpectedMessage(_) => Self::Protocol(message),
            RfbClientError::Transport(_) | RfbClientError::ConnectionClosed => {
                Self::Transport(message)
            }
            RfbClientError::Timeout(_) => Self::Timeout(message),
            RfbClientError::InvalidInput(_) => Self::Usage(message),
            RfbClientError::Config(_) => Self::Config(message),
        }
    }

    /// Error for a name that has no live connection.
    pub(crate) fn unknown(name: &str) -> Self {
        Self::Usage(format!("no connection named '{}'", name))
    }

    /// Which bucket of the taxonomy this error is in.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connect(_) => ErrorKind::Connect,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Usage(_) => ErrorKind::Usage,
            Self::Config(_) => ErrorKind::Config,
            Self::Profile(_) => ErrorKind::Profile,
        }
    }

    /// Serializable form.
    #[must_use]
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// Error kind as exposed to callers that do not link against this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// [`DriverError::Connect`].
    #[serde(rename = "ConnectError")]
    Connect,
    /// [`DriverError::Protocol`].
    #[serde(rename = "ProtocolError")]
    Protocol,
    /// [`DriverError::Transport`].
    #[serde(rename = "TransportError")]
    Transport,
    /// [`DriverError::Timeout`].
    #[serde(rename = "TimeoutError")]
    Timeout,
    /// [`DriverError::Usage`].
    #[serde(rename = "UsageError")]
    Usage,
    /// [`DriverError::Config`].
    #[serde(rename = "ConfigError")]
    Config,
    /// [`DriverError::Profile`].
    #[serde(rename = "ProfileError")]
    Profile,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connect => "ConnectError",
            Self::Protocol => "ProtocolError",
            Self::Transport => "TransportError",
            Self::Timeout => "TimeoutError",
            Self::Usage => "UsageError",
            Self::Config => "ConfigError",
            Self::Profile => "ProfileError",
        };
        f.write_str(s)
    }
}

/// One connection's error entry in a step result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Taxonomy bucket, serialized as e.g. `"TimeoutError"`.
    pub kind: ErrorKind,
    /// Human-readable description, including the engine's message.
    pub message: String,
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl From<DriverError> for ErrorReport {
    fn from(err: DriverError) -> Self {
        err.report()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io;
    use std::time::Duration;

    #[test]
    fn test_classification() {
        let cases = [
            (RfbClientError::ConnectionFailed("refused".into()), ErrorKind::Connect),
            (RfbClientError::AuthFailed("bad password".into()), ErrorKind::Connect),
            (RfbClientError::Protocol("rect outside".into()), ErrorKind::Protocol),
            (
                RfbClientError::Encoding(anyhow::anyhow!("bad tight subtype")),
                ErrorKind::Protocol,
            ),
            (RfbClientError::UnsupportedEncoding(16), ErrorKind::Protocol),
            (
                RfbClientError::Transport(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
                ErrorKind::Transport,
            ),
            (RfbClientError::ConnectionClosed, ErrorKind::Transport),
            (RfbClientError::Timeout(Duration::from_secs(1)), ErrorKind::Timeout),
            (RfbClientError::InvalidInput("x".into()), ErrorKind::Usage),
        ];
        for (err, kind) in cases {
            assert_eq!(DriverError::from_client(&err).kind(), kind, "{}", err);
        }
    }

    #[test]
    fn test_report_keeps_engine_message() {
        let err = DriverError::from_client(&RfbClientError::Protocol("rect 9x9 outside".into()));
        let report = err.report();
        assert_eq!(report.kind, ErrorKind::Protocol);
        assert!(report.message.contains("rect 9x9 outside"));
    }

    #[test]
    fn test_report_serializes_kind_names() {
        let report = DriverError::unknown("c9").report();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["kind"], "UsageError");
        assert_eq!(json["message"], "usage error: no connection named 'c9'");

        let back: ErrorReport = serde_json::from_value(json).unwrap();
        assert_eq!(back, report);
    }
}
