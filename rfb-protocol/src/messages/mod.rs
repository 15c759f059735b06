//! RFB protocol messages.
//!
//! - [`types`]: pixel format, rectangle header and numeric constants
//! - [`server`]: server-to-client messages
//! - [`client`]: client-to-server messages
//!
//! All integers are big-endian. Flag bytes must be exactly 0 or 1.
//!
//! A FramebufferUpdate is only parsed up to its rectangle count: the
//! rectangles and their encoding payloads are read by the client's decode
//! loop, because only a decoder knows how long a payload is.

pub mod client;
mod framing_tests;
pub mod server;
pub mod types;

pub use types::{
    PixelFormat, Rectangle, ENCODING_RAW, ENCODING_TIGHT, ENCODING_ZRLE,
    PSEUDO_ENCODING_DESKTOP_SIZE, PSEUDO_ENCODING_LAST_RECT,
};

pub use server::{ColorMapEntry, FramebufferUpdate, ServerCutText, ServerInit, SetColorMapEntries};

pub use client::{
    ClientCutText, ClientInit, FramebufferUpdateRequest, KeyEvent, PointerEvent, SetEncodings,
    SetPixelFormat,
};

use crate::io::{RfbInStream, RfbOutStream};
use tokio::io::{AsyncRead, AsyncWrite};

/// Client-to-server messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    SetPixelFormat(SetPixelFormat),
    SetEncodings(SetEncodings),
    FramebufferUpdateRequest(FramebufferUpdateRequest),
    KeyEvent(KeyEvent),
    PointerEvent(PointerEvent),
    ClientCutText(ClientCutText),
}

impl ClientMessage {
    /// Read one message including its type byte. Used by test servers.
    pub async fn read_from<R: AsyncRead + Unpin>(
        stream: &mut RfbInStream<R>,
    ) -> std::io::Result<Self> {
        let msg_type = stream.read_u8().await?;
        Ok(match msg_type {
            types::MSG_SET_PIXEL_FORMAT => {
                ClientMessage::SetPixelFormat(SetPixelFormat::read_from(stream).await?)
            }
            types::MSG_SET_ENCODINGS => {
                ClientMessage::SetEncodings(SetEncodings::read_from(stream).await?)
            }
            types::MSG_FRAMEBUFFER_UPDATE_REQUEST => ClientMessage::FramebufferUpdateRequest(
                FramebufferUpdateRequest::read_from(stream).await?,
            ),
            types::MSG_KEY_EVENT => ClientMessage::KeyEvent(KeyEvent::read_from(stream).await?),
            types::MSG_POINTER_EVENT => {
                ClientMessage::PointerEvent(PointerEvent::read_from(stream).await?)
            }
            types::MSG_CLIENT_CUT_TEXT => {
                ClientMessage::ClientCutText(ClientCutText::read_from(stream).await?)
            }
            other => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("unknown client message type: {}", other),
                ))
            }
        })
    }

    pub fn write_to<W: AsyncWrite + Unpin>(
        &self,
        stream: &mut RfbOutStream<W>,
    ) -> std::io::Result<()> {
        match self {
            ClientMessage::SetPixelFormat(msg) => return msg.write_to(stream),
            ClientMessage::SetEncodings(msg) => msg.write_to(stream),
            ClientMessage::FramebufferUpdateRequest(msg) => msg.write_to(stream),
            ClientMessage::KeyEvent(msg) => msg.write_to(stream),
            ClientMessage::PointerEvent(msg) => msg.write_to(stream),
            ClientMessage::ClientCutText(msg) => msg.write_to(stream),
        }
        Ok(())
    }
}

/// Server-to-client messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Header only; the rectangles follow on the stream.
    FramebufferUpdate(FramebufferUpdate),
    SetColorMapEntries(SetColorMapEntries),
    Bell,
    ServerCutText(ServerCutText),
}

impl ServerMessage {
    pub async fn read_from<R: AsyncRead + Unpin>(
        stream: &mut RfbInStream<R>,
    ) -> std::io::Result<Self> {
        let msg_type = stream.read_u8().await?;
        match msg_type {
            types::MSG_FRAMEBUFFER_UPDATE => Ok(ServerMessage::FramebufferUpdate(
                FramebufferUpdate::read_from(stream).await?,
            )),
            types::MSG_SET_COLOR_MAP_ENTRIES => Ok(ServerMessage::SetColorMapEntries(
                SetColorMapEntries::read_from(stream).await?,
            )),
            types::MSG_BELL => Ok(ServerMessage::Bell),
            types::MSG_SERVER_CUT_TEXT => Ok(ServerMessage::ServerCutText(
                ServerCutText::read_from(stream).await?,
            )),
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown server message type: {}", msg_type),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_client_message_dispatch() {
        let msgs = vec![
            ClientMessage::KeyEvent(KeyEvent {
                down: false,
                key: 0x61,
            }),
            ClientMessage::PointerEvent(PointerEvent {
                button_mask: 1,
                x: 5,
                y: 6,
            }),
            ClientMessage::ClientCutText(ClientCutText {
                text: b"hi".to_vec(),
            }),
        ];

        let mut buffer = Vec::new();
        let mut out = RfbOutStream::new(&mut buffer);
        for msg in &msgs {
            msg.write_to(&mut out).unwrap();
        }
        out.flush().await.unwrap();

        let mut input = RfbInStream::new(Cursor::new(buffer));
        for expected in msgs {
            assert_eq!(ClientMessage::read_from(&mut input).await.unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn test_unknown_server_message() {
        let mut input = RfbInStream::new(Cursor::new(vec![99u8]));
        let err = ServerMessage::read_from(&mut input).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_bell() {
        let mut buffer = Vec::new();
        let mut out = RfbOutStream::new(&mut buffer);
        server::write_bell(&mut out);
        out.flush().await.unwrap();
        let mut input = RfbInStream::new(Cursor::new(buffer));
        assert_eq!(
            ServerMessage::read_from(&mut input).await.unwrap(),
            ServerMessage::Bell
        );
    }
}
