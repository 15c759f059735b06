//! Client-to-server RFB messages.
//!
//! `read_from` methods expect the message-type byte to have been consumed
//! already (see [`ClientMessage::read_from`](super::ClientMessage::read_from)).

use super::types::{
    PixelFormat, MSG_CLIENT_CUT_TEXT, MSG_FRAMEBUFFER_UPDATE_REQUEST, MSG_KEY_EVENT,
    MSG_POINTER_EVENT, MSG_SET_ENCODINGS, MSG_SET_PIXEL_FORMAT,
};
use crate::io::{RfbInStream, RfbOutStream};
use tokio::io::{AsyncRead, AsyncWrite};

fn read_flag(name: &str, value: u8) -> std::io::Result<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("{} flag must be 0 or 1, got {}", name, other),
        )),
    }
}

/// ClientInit: one byte, the shared-session flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientInit {
    pub shared: bool,
}

impl ClientInit {
    pub async fn read_from<R: AsyncRead + Unpin>(
        stream: &mut RfbInStream<R>,
    ) -> std::io::Result<Self> {
        let shared = read_flag("shared", stream.read_u8().await?)?;
        Ok(Self { shared })
    }

    pub fn write_to<W: AsyncWrite + Unpin>(&self, stream: &mut RfbOutStream<W>) {
        stream.write_u8(self.shared as u8);
    }
}

/// SetPixelFormat: type 0, 3 bytes padding, 16-byte pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetPixelFormat {
    pub pixel_format: PixelFormat,
}

impl SetPixelFormat {
    pub async fn read_from<R: AsyncRead + Unpin>(
        stream: &mut RfbInStream<R>,
    ) -> std::io::Result<Self> {
        stream.skip(3).await?;
        Ok(Self {
            pixel_format: PixelFormat::read_from(stream).await?,
        })
    }

    pub fn write_to<W: AsyncWrite + Unpin>(
        &self,
        stream: &mut RfbOutStream<W>,
    ) -> std::io::Result<()> {
        stream.write_u8(MSG_SET_PIXEL_FORMAT);
        stream.write_bytes(&[0, 0, 0]);
        self.pixel_format.write_to(stream)
    }
}

/// SetEncodings: encodings and pseudo-encodings in order of preference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetEncodings {
    pub encodings: Vec<i32>,
}

impl SetEncodings {
    pub async fn read_from<R: AsyncRead + Unpin>(
        stream: &mut RfbInStream<R>,
    ) -> std::io::Result<Self> {
        stream.skip(1).await?;
        let count = stream.read_u16().await? as usize;
        let mut encodings = Vec::with_capacity(count);
        for _ in 0..count {
            encodings.push(stream.read_i32().await?);
        }
        Ok(Self { encodings })
    }

    pub fn write_to<W: AsyncWrite + Unpin>(&self, stream: &mut RfbOutStream<W>) {
        stream.write_u8(MSG_SET_ENCODINGS);
        stream.write_u8(0);
        stream.write_u16(self.encodings.len() as u16);
        for encoding in &self.encodings {
            stream.write_i32(*encoding);
        }
    }
}

/// FramebufferUpdateRequest for a region, incremental or full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferUpdateRequest {
    pub incremental: bool,
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

impl FramebufferUpdateRequest {
    pub async fn read_from<R: AsyncRead + Unpin>(
        stream: &mut RfbInStream<R>,
    ) -> std::io::Result<Self> {
        let incremental = read_flag("incremental", stream.read_u8().await?)?;
        Ok(Self {
            incremental,
            x: stream.read_u16().await?,
            y: stream.read_u16().await?,
            width: stream.read_u16().await?,
            height: stream.read_u16().await?,
        })
    }

    pub fn write_to<W: AsyncWrite + Unpin>(&self, stream: &mut RfbOutStream<W>) {
        stream.write_u8(MSG_FRAMEBUFFER_UPDATE_REQUEST);
        stream.write_u8(self.incremental as u8);
        stream.write_u16(self.x);
        stream.write_u16(self.y);
        stream.write_u16(self.width);
        stream.write_u16(self.height);
    }
}

/// KeyEvent: press or release of an X11 keysym.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub down: bool,
    pub key: u32,
}

impl KeyEvent {
    pub async fn read_from<R: AsyncRead + Unpin>(
        stream: &mut RfbInStream<R>,
    ) -> std::io::Result<Self> {
        let down = read_flag("down", stream.read_u8().await?)?;
        stream.skip(2).await?;
        Ok(Self {
            down,
            key: stream.read_u32().await?,
        })
    }

    pub fn write_to<W: AsyncWrite + Unpin>(&self, stream: &mut RfbOutStream<W>) {
        stream.write_u8(MSG_KEY_EVENT);
        stream.write_u8(self.down as u8);
        stream.write_u16(0);
        stream.write_u32(self.key);
    }
}

/// PointerEvent: absolute position plus the full 8-button mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerEvent {
    pub button_mask: u8,
    pub x: u16,
    pub y: u16,
}

impl PointerEvent {
    pub async fn read_from<R: AsyncRead + Unpin>(
        stream: &mut RfbInStream<R>,
    ) -> std::io::Result<Self> {
        Ok(Self {
            button_mask: stream.read_u8().await?,
            x: stream.read_u16().await?,
            y: stream.read_u16().await?,
        })
    }

    pub fn write_to<W: AsyncWrite + Unpin>(&self, stream: &mut RfbOutStream<W>) {
        stream.write_u8(MSG_POINTER_EVENT);
        stream.write_u8(self.button_mask);
        stream.write_u16(self.x);
        stream.write_u16(self.y);
    }
}

/// ClientCutText: Latin-1 clipboard text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCutText {
    pub text: Vec<u8>,
}

impl ClientCutText {
    pub async fn read_from<R: AsyncRead + Unpin>(
        stream: &mut RfbInStream<R>,
    ) -> std::io::Result<Self> {
        stream.skip(3).await?;
        let text = stream
            .read_length_prefixed(super::server::MAX_TEXT_LENGTH)
            .await?;
        Ok(Self { text })
    }

    pub fn write_to<W: AsyncWrite + Unpin>(&self, stream: &mut RfbOutStream<W>) {
        stream.write_u8(MSG_CLIENT_CUT_TEXT);
        stream.write_bytes(&[0, 0, 0]);
        stream.write_u32(self.text.len() as u32);
        stream.write_bytes(&self.text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    async fn flushed(f: impl FnOnce(&mut RfbOutStream<&mut Vec<u8>>)) -> Vec<u8> {
        let mut buffer = Vec::new();
        let mut out = RfbOutStream::new(&mut buffer);
        f(&mut out);
        out.flush().await.unwrap();
        buffer
    }

    #[tokio::test]
    async fn test_key_event_layout() {
        let bytes = flushed(|out| {
            KeyEvent {
                down: true,
                key: 0xFF0D,
            }
            .write_to(out)
        })
        .await;
        assert_eq!(bytes, vec![4, 1, 0, 0, 0, 0, 0xFF, 0x0D]);
    }

    #[tokio::test]
    async fn test_pointer_event_layout() {
        let bytes = flushed(|out| {
            PointerEvent {
                button_mask: 0b101,
                x: 300,
                y: 2,
            }
            .write_to(out)
        })
        .await;
        assert_eq!(bytes, vec![5, 5, 0x01, 0x2C, 0, 2]);
    }

    #[tokio::test]
    async fn test_set_encodings_layout() {
        let bytes = flushed(|out| {
            SetEncodings {
                encodings: vec![7, -224],
            }
            .write_to(out)
        })
        .await;
        assert_eq!(
            bytes,
            vec![2, 0, 0, 2, 0, 0, 0, 7, 0xFF, 0xFF, 0xFF, 0x20]
        );

        let mut input = RfbInStream::new(Cursor::new(bytes));
        input.read_u8().await.unwrap();
        let msg = SetEncodings::read_from(&mut input).await.unwrap();
        assert_eq!(msg.encodings, vec![7, -224]);
    }

    #[tokio::test]
    async fn test_update_request_rejects_bad_flag() {
        let mut input = RfbInStream::new(Cursor::new(vec![2, 0, 0, 0, 0, 0, 1, 0, 1]));
        assert!(FramebufferUpdateRequest::read_from(&mut input).await.is_err());
    }

    #[tokio::test]
    async fn test_update_request_round_trip() {
        let req = FramebufferUpdateRequest {
            incremental: true,
            x: 1,
            y: 2,
            width: 30,
            height: 40,
        };
        let bytes = flushed(|out| req.write_to(out)).await;
        assert_eq!(bytes.len(), 10);
        let mut input = RfbInStream::new(Cursor::new(bytes));
        assert_eq!(input.read_u8().await.unwrap(), MSG_FRAMEBUFFER_UPDATE_REQUEST);
        assert_eq!(
            FramebufferUpdateRequest::read_from(&mut input).await.unwrap(),
            req
        );
    }
}
