//! Core RFB wire types: [`PixelFormat`], [`Rectangle`] and the numeric
//! constants for encodings, pseudo-encodings and message types.

use crate::io::{RfbInStream, RfbOutStream};
use tokio::io::{AsyncRead, AsyncWrite};

/// Wire pixel format (16 bytes).
///
/// ```text
/// bits_per_pixel u8 | depth u8 | big_endian u8 | true_color u8
/// red_max u16 | green_max u16 | blue_max u16
/// red_shift u8 | green_shift u8 | blue_shift u8 | padding [u8; 3]
/// ```
///
/// The two flag bytes must be 0 or 1. Padding is ignored on read and written
/// as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    pub bits_per_pixel: u8,
    pub depth: u8,
    pub big_endian: u8,
    pub true_color: u8,
    pub red_max: u16,
    pub green_max: u16,
    pub blue_max: u16,
    pub red_shift: u8,
    pub green_shift: u8,
    pub blue_shift: u8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> u8 {
        self.bits_per_pixel.div_ceil(8)
    }

    pub async fn read_from<R: AsyncRead + Unpin>(
        stream: &mut RfbInStream<R>,
    ) -> std::io::Result<Self> {
        let bits_per_pixel = stream.read_u8().await?;
        let depth = stream.read_u8().await?;
        let big_endian = stream.read_u8().await?;
        let true_color = stream.read_u8().await?;
        check_flag("big_endian", big_endian)?;
        check_flag("true_color", true_color)?;

        let pf = Self {
            bits_per_pixel,
            depth,
            big_endian,
            true_color,
            red_max: stream.read_u16().await?,
            green_max: stream.read_u16().await?,
            blue_max: stream.read_u16().await?,
            red_shift: stream.read_u8().await?,
            green_shift: stream.read_u8().await?,
            blue_shift: stream.read_u8().await?,
        };
        stream.skip(3).await?;
        Ok(pf)
    }

    pub fn write_to<W: AsyncWrite + Unpin>(
        &self,
        stream: &mut RfbOutStream<W>,
    ) -> std::io::Result<()> {
        check_flag("big_endian", self.big_endian)?;
        check_flag("true_color", self.true_color)?;

        stream.write_u8(self.bits_per_pixel);
        stream.write_u8(self.depth);
        stream.write_u8(self.big_endian);
        stream.write_u8(self.true_color);
        stream.write_u16(self.red_max);
        stream.write_u16(self.green_max);
        stream.write_u16(self.blue_max);
        stream.write_u8(self.red_shift);
        stream.write_u8(self.green_shift);
        stream.write_u8(self.blue_shift);
        stream.write_bytes(&[0, 0, 0]);
        Ok(())
    }
}

fn check_flag(name: &str, value: u8) -> std::io::Result<()> {
    if value > 1 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("{} must be 0 or 1, got {}", name, value),
        ));
    }
    Ok(())
}

/// Rectangle header inside a FramebufferUpdate (12 bytes). The
/// encoding-specific payload follows on the wire and is read by a decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rectangle {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
    pub encoding: i32,
}

impl Rectangle {
    pub async fn read_from<R: AsyncRead + Unpin>(
        stream: &mut RfbInStream<R>,
    ) -> std::io::Result<Self> {
        Ok(Self {
            x: stream.read_u16().await?,
            y: stream.read_u16().await?,
            width: stream.read_u16().await?,
            height: stream.read_u16().await?,
            encoding: stream.read_i32().await?,
        })
    }

    pub fn write_to<W: AsyncWrite + Unpin>(&self, stream: &mut RfbOutStream<W>) {
        stream.write_u16(self.x);
        stream.write_u16(self.y);
        stream.write_u16(self.width);
        stream.write_u16(self.height);
        stream.write_i32(self.encoding);
    }
}

// Encodings
pub const ENCODING_RAW: i32 = 0;
pub const ENCODING_TIGHT: i32 = 7;
pub const ENCODING_ZRLE: i32 = 16;

// Pseudo-encodings
pub const PSEUDO_ENCODING_DESKTOP_SIZE: i32 = -223;
pub const PSEUDO_ENCODING_LAST_RECT: i32 = -224;
/// QualityLevel 0..=9 is sent as `PSEUDO_ENCODING_QUALITY_LEVEL_0 + level`.
pub const PSEUDO_ENCODING_QUALITY_LEVEL_0: i32 = -32;
/// CompressLevel 0..=9.
pub const PSEUDO_ENCODING_COMPRESS_LEVEL_0: i32 = -256;
/// TurboVNC FineQualityLevel 0..=100.
pub const PSEUDO_ENCODING_FINE_QUALITY_LEVEL_0: i32 = -512;
/// TurboVNC SubsampleLevel 0..=3.
pub const PSEUDO_ENCODING_SUBSAMPLE_LEVEL_0: i32 = -768;

// Security types
pub const SECURITY_TYPE_INVALID: u8 = 0;
pub const SECURITY_TYPE_NONE: u8 = 1;
pub const SECURITY_TYPE_VNC_AUTH: u8 = 2;

// Client-to-server message types
pub const MSG_SET_PIXEL_FORMAT: u8 = 0;
pub const MSG_SET_ENCODINGS: u8 = 2;
pub const MSG_FRAMEBUFFER_UPDATE_REQUEST: u8 = 3;
pub const MSG_KEY_EVENT: u8 = 4;
pub const MSG_POINTER_EVENT: u8 = 5;
pub const MSG_CLIENT_CUT_TEXT: u8 = 6;

// Server-to-client message types
pub const MSG_FRAMEBUFFER_UPDATE: u8 = 0;
pub const MSG_SET_COLOR_MAP_ENTRIES: u8 = 1;
pub const MSG_BELL: u8 = 2;
pub const MSG_SERVER_CUT_TEXT: u8 = 3;
