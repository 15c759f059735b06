//! Transport layer for RFB connections.
//!
//! A [`Transport`] is a connected byte stream that can be split into the
//! buffered [`RfbInStream`]/[`RfbOutStream`] pair used by the rest of the
//! client. Plain TCP is the only network transport; [`Transport::from_stream`]
//! wraps any other duplex stream (tests use `tokio::io::duplex`).
//!
//! ```no_run
//! use rfb_client::transport::Transport;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Transport::connect_tcp("localhost", 5900).await?;
//! let (input, output) = transport.split();
//! # Ok(())
//! # }
//! ```

use crate::errors::RfbClientError;
use rfb_protocol::io::{RfbInStream, RfbOutStream};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Read half of a transport.
pub type TransportRead = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of a transport.
pub type TransportWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// A connected, not yet split, byte stream.
pub struct Transport {
    read: TransportRead,
    write: TransportWrite,
    peer: String,
}

impl Transport {
    /// Connect via plain TCP with TCP_NODELAY set.
    ///
    /// # Errors
    ///
    /// Returns [`RfbClientError::ConnectionFailed`] if DNS resolution or the
    /// connect fails.
    pub async fn connect_tcp(host: &str, port: u16) -> Result<Self, RfbClientError> {
        let addr = format!("{}:{}", host, port);
        let stream = TcpStream::connect(&addr).await.map_err(|e| {
            RfbClientError::ConnectionFailed(format!("Failed to connect to {}: {}", addr, e))
        })?;

        stream.set_nodelay(true).map_err(|e| {
            RfbClientError::ConnectionFailed(format!("Failed to set TCP_NODELAY: {}", e))
        })?;

        let peer = match (stream.local_addr(), stream.peer_addr()) {
            (Ok(local), Ok(peer)) => {
                tracing::info!("Connected via TCP: local={} -> remote={}", local, peer);
                peer.to_string()
            }
            _ => {
                tracing::info!("Connected to {} via plain TCP", addr);
                addr
            }
        };

        let (read, write) = stream.into_split();
        Ok(Self {
            read: Box::new(read),
            write: Box::new(write),
            peer,
        })
    }

    /// Wrap an already-connected duplex stream.
    pub fn from_stream<S>(stream: S, peer: impl Into<String>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read, write) = tokio::io::split(stream);
        Self {
            read: Box::new(read),
            write: Box::new(write),
            peer: peer.into(),
        }
    }

    /// Remote address, for logging.
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Split into buffered input and output streams.
    #[must_use]
    pub fn split(self) -> (RfbInStream<TransportRead>, RfbOutStream<TransportWrite>) {
        (RfbInStream::new(self.read), RfbOutStream::new(self.write))
    }
}
