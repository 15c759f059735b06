//! Rectangle decoders for RFB framebuffer updates.
//!
//! A [`Decoder`] reads one rectangle's encoding-specific payload from an
//! [`RfbInStream`], converts it from the negotiated wire pixel format and
//! writes it into a [`MutablePixelBuffer`]. Decoders fail on malformed or
//! out-of-bounds data; the caller treats that as a protocol error.
//!
//! Supported encodings:
//!
//! - [`ENCODING_RAW`] (0): uncompressed pixels
//! - [`ENCODING_TIGHT`] (7): fill, JPEG, or zlib with copy/palette/gradient filters
//! - [`ENCODING_ZRLE`] (16): zlib-compressed 64x64 tiles with palette and RLE
//!
//! Pseudo-encodings such as DesktopSize and LastRect carry no payload and
//! are handled by the client's update loop.

use anyhow::Result;
use tokio::io::AsyncRead;

pub use rfb_pixelbuffer::MutablePixelBuffer;
pub use rfb_protocol::io::RfbInStream;
pub use rfb_protocol::messages::types::{
    PixelFormat, Rectangle, ENCODING_RAW, ENCODING_TIGHT, ENCODING_ZRLE,
    PSEUDO_ENCODING_DESKTOP_SIZE, PSEUDO_ENCODING_LAST_RECT,
};

pub mod raw;
pub use raw::RawDecoder;

pub mod tight;
pub use tight::TightDecoder;

pub mod zrle;
pub use zrle::ZRLEDecoder;

/// Decodes one encoding type.
///
/// Implementations must consume exactly the rectangle's payload and must not
/// write outside the rectangle.
#[allow(async_fn_in_trait)]
pub trait Decoder {
    /// The `ENCODING_*` value this decoder handles.
    fn encoding_type(&self) -> i32;

    /// Decode a single rectangle from `stream` into `buffer`.
    ///
    /// `pixel_format` is the format negotiated with SetPixelFormat, i.e. the
    /// format of pixels on the wire.
    async fn decode<R: AsyncRead + Unpin>(
        &self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        pixel_format: &PixelFormat,
        buffer: &mut dyn MutablePixelBuffer,
    ) -> Result<()>;
}
