//! Server-to-client RFB messages.

use super::types::{
    PixelFormat, MSG_BELL, MSG_FRAMEBUFFER_UPDATE, MSG_SERVER_CUT_TEXT, MSG_SET_COLOR_MAP_ENTRIES,
};
use crate::io::{RfbInStream, RfbOutStream};
use tokio::io::{AsyncRead, AsyncWrite};

/// Desktop names and cut text longer than this are rejected.
pub const MAX_TEXT_LENGTH: usize = 1 << 20;

/// ServerInit: framebuffer geometry, native pixel format and desktop name.
///
/// ```text
/// width u16 | height u16 | PixelFormat (16) | name_len u32 | name
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInit {
    pub framebuffer_width: u16,
    pub framebuffer_height: u16,
    pub pixel_format: PixelFormat,
    pub name: String,
}

impl ServerInit {
    pub async fn read_from<R: AsyncRead + Unpin>(
        stream: &mut RfbInStream<R>,
    ) -> std::io::Result<Self> {
        let framebuffer_width = stream.read_u16().await?;
        let framebuffer_height = stream.read_u16().await?;
        let pixel_format = PixelFormat::read_from(stream).await?;
        let name_bytes = stream.read_length_prefixed(MAX_TEXT_LENGTH).await?;

        Ok(Self {
            framebuffer_width,
            framebuffer_height,
            pixel_format,
            // Desktop names are Latin-1 in older servers, never fail on them.
            name: String::from_utf8_lossy(&name_bytes).into_owned(),
        })
    }

    pub fn write_to<W: AsyncWrite + Unpin>(
        &self,
        stream: &mut RfbOutStream<W>,
    ) -> std::io::Result<()> {
        stream.write_u16(self.framebuffer_width);
        stream.write_u16(self.framebuffer_height);
        self.pixel_format.write_to(stream)?;
        stream.write_u32(self.name.len() as u32);
        stream.write_bytes(self.name.as_bytes());
        Ok(())
    }
}

/// Header of a FramebufferUpdate.
///
/// Only the rectangle count is parsed here. Each rectangle (a 12-byte
/// [`Rectangle`](super::types::Rectangle) header followed by an
/// encoding-specific payload) must be consumed by the caller in order, since
/// payload lengths are only known to the decoder.
///
/// A count of `0xFFFF` means "until a LastRect pseudo-rectangle".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferUpdate {
    pub num_rects: u16,
}

impl FramebufferUpdate {
    pub const UNTIL_LAST_RECT: u16 = 0xFFFF;

    /// Read the header after the message-type byte.
    pub async fn read_from<R: AsyncRead + Unpin>(
        stream: &mut RfbInStream<R>,
    ) -> std::io::Result<Self> {
        stream.skip(1).await?; // padding
        Ok(Self {
            num_rects: stream.read_u16().await?,
        })
    }

    /// Write the message type and header. Rectangles follow separately.
    pub fn write_to<W: AsyncWrite + Unpin>(&self, stream: &mut RfbOutStream<W>) {
        stream.write_u8(MSG_FRAMEBUFFER_UPDATE);
        stream.write_u8(0);
        stream.write_u16(self.num_rects);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorMapEntry {
    pub red: u16,
    pub green: u16,
    pub blue: u16,
}

/// SetColorMapEntries. Only meaningful for colour-mapped pixel formats, which
/// this client never requests; it is parsed so the stream stays in sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetColorMapEntries {
    pub first_color: u16,
    pub colors: Vec<ColorMapEntry>,
}

impl SetColorMapEntries {
    pub async fn read_from<R: AsyncRead + Unpin>(
        stream: &mut RfbInStream<R>,
    ) -> std::io::Result<Self> {
        stream.skip(1).await?;
        let first_color = stream.read_u16().await?;
        let count = stream.read_u16().await? as usize;
        let mut colors = Vec::with_capacity(count);
        for _ in 0..count {
            colors.push(ColorMapEntry {
                red: stream.read_u16().await?,
                green: stream.read_u16().await?,
                blue: stream.read_u16().await?,
            });
        }
        Ok(Self {
            first_color,
            colors,
        })
    }

    pub fn write_to<W: AsyncWrite + Unpin>(&self, stream: &mut RfbOutStream<W>) {
        stream.write_u8(MSG_SET_COLOR_MAP_ENTRIES);
        stream.write_u8(0);
        stream.write_u16(self.first_color);
        stream.write_u16(self.colors.len() as u16);
        for c in &self.colors {
            stream.write_u16(c.red);
            stream.write_u16(c.green);
            stream.write_u16(c.blue);
        }
    }
}

/// ServerCutText: clipboard contents from the server (Latin-1 on the wire).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCutText {
    pub text: Vec<u8>,
}

impl ServerCutText {
    pub async fn read_from<R: AsyncRead + Unpin>(
        stream: &mut RfbInStream<R>,
    ) -> std::io::Result<Self> {
        stream.skip(3).await?;
        let text = stream.read_length_prefixed(MAX_TEXT_LENGTH).await?;
        Ok(Self { text })
    }

    pub fn write_to<W: AsyncWrite + Unpin>(&self, stream: &mut RfbOutStream<W>) {
        stream.write_u8(MSG_SERVER_CUT_TEXT);
        stream.write_bytes(&[0, 0, 0]);
        stream.write_u32(self.text.len() as u32);
        stream.write_bytes(&self.text);
    }
}

pub fn write_bell<W: AsyncWrite + Unpin>(stream: &mut RfbOutStream<W>) {
    stream.write_u8(MSG_BELL);
}
