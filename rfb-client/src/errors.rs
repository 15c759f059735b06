//! Error types for the RFB client.

use std::io;
use thiserror::Error;

/// Errors that can occur while connecting to or running an RFB connection.
#[derive(Debug, Error)]
pub enum RfbClientError {
    /// Transport-level error (TCP reset, unexpected EOF, write failure).
    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),

    /// TCP connection could not be established.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// RFB version exchange or ServerInit failed.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Security negotiation failed (no common type, server refusal).
    #[error("Security negotiation failed: {0}")]
    Security(String),

    /// Authentication failed (wrong password, etc.).
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// Protocol error (malformed message, rectangle outside the framebuffer).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Rectangle decoding failed.
    #[error("Encoding error: {0:#}")]
    Encoding(#[from] anyhow::Error),

    /// The server sent a rectangle in an encoding that was not requested.
    #[error("Unsupported encoding: {0}")]
    UnsupportedEncoding(i32),

    /// An operation did not finish within its budget.
    #[error("Connection timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// Unknown server message type.
    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    /// Caller-supplied input was rejected (bad region, out-of-range event).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection has been closed.
    #[error("Connection closed")]
    ConnectionClosed,
}

impl RfbClientError {
    /// Returns true if this error is potentially retryable.
    ///
    /// Only failures to open the TCP connection are retried while a start
    /// timeout is running; everything after the socket is up is fatal.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionFailed(_))
    }

    /// Returns true if this is a fatal error that should not be retried.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !self.is_retryable()
    }

    /// Wrap a decoder failure. I/O errors at the root are transport
    /// failures (the peer went away mid-rectangle), anything else is bad data.
    pub(crate) fn from_decode(err: anyhow::Error) -> Self {
        match err.root_cause().downcast_ref::<io::Error>() {
            Some(io_err) if io_err.kind() != io::ErrorKind::InvalidData => {
                Self::Transport(io::Error::new(io_err.kind(), format!("{err:#}")))
            }
            _ => Self::Encoding(err),
        }
    }

    /// Map an I/O error raised while parsing `what`. Malformed data becomes a
    /// protocol error; everything else stays a transport error.
    pub(crate) fn from_read(what: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::InvalidData => Self::Protocol(format!("failed to read {what}: {err}")),
            _ => Self::Transport(err),
        }
    }
}
