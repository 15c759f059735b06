//! RFB (Remote Framebuffer) wire protocol.
//!
//! - [`io`]: buffered big-endian streams
//! - [`handshake`]: version, security and init exchange
//! - [`messages`]: client and server message codecs
//!
//! Transport setup and the per-connection state machine live in `rfb-client`.

pub mod handshake;
pub mod io;
pub mod messages;

pub use handshake::NegotiatedVersion;
pub use io::{RfbInStream, RfbOutStream};
pub use messages::{ClientMessage, ServerMessage};
