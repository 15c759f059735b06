//! Framebuffer update decoding.
//!
//! [`UpdateDecoder`] owns the decoders and the receive task's working
//! buffer. It reads the rectangles of one FramebufferUpdate, checks each
//! header against the sanity limits, dispatches to the decoder for its
//! encoding, and reports what changed as an [`AppliedUpdate`].

use crate::errors::RfbClientError;
use crate::framebuffer::{AppliedUpdate, UpdateStats};
use rfb_common::Rect;
use rfb_encodings::{self as enc, Decoder, MutablePixelBuffer, RfbInStream};
use rfb_pixelbuffer::{ManagedPixelBuffer, PixelBuffer as _, PixelFormat};
use rfb_protocol::messages::types::Rectangle;
use rfb_protocol::messages::FramebufferUpdate;
use tokio::io::AsyncRead;

/// Widest rectangle or desktop accepted from a server.
pub const MAX_RECT_WIDTH: u16 = 5120;
/// Tallest rectangle or desktop accepted from a server.
pub const MAX_RECT_HEIGHT: u16 = 2880;

/// Concrete decoder wrapper; [`Decoder`] uses async fns and is not object safe.
enum DecoderEntry {
    Raw(enc::RawDecoder),
    Tight(enc::TightDecoder),
    Zrle(enc::ZRLEDecoder),
}

impl DecoderEntry {
    async fn decode<R: AsyncRead + Unpin>(
        &self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        pixel_format: &rfb_protocol::messages::PixelFormat,
        buffer: &mut dyn MutablePixelBuffer,
    ) -> anyhow::Result<()> {
        match self {
            Self::Raw(d) => d.decode(stream, rect, pixel_format, buffer).await,
            Self::Tight(d) => d.decode(stream, rect, pixel_format, buffer).await,
            Self::Zrle(d) => d.decode(stream, rect, pixel_format, buffer).await,
        }
    }
}

/// Decoders plus the working buffer they write into.
pub struct UpdateDecoder {
    label: String,
    buffer: ManagedPixelBuffer,
    wire_format: rfb_protocol::messages::PixelFormat,
    raw: DecoderEntry,
    tight: DecoderEntry,
    zrle: DecoderEntry,
    max_rects: usize,
}

impl UpdateDecoder {
    /// Decoder for a `width` x `height` desktop whose pixels arrive in
    /// `pixel_format`. Updates with more than `max_rects` rectangles are
    /// rejected.
    #[must_use]
    pub fn new(label: &str, width: u32, height: u32, pixel_format: PixelFormat, max_rects: usize) -> Self {
        Self {
            label: label.to_string(),
            buffer: ManagedPixelBuffer::new(width, height, pixel_format),
            wire_format: pixel_format.into(),
            raw: DecoderEntry::Raw(enc::RawDecoder),
            tight: DecoderEntry::Tight(enc::TightDecoder::default()),
            zrle: DecoderEntry::Zrle(enc::ZRLEDecoder::default()),
            max_rects,
        }
    }

    /// The working buffer.
    #[must_use]
    pub fn buffer(&self) -> &ManagedPixelBuffer {
        &self.buffer
    }

    /// Read and apply the rectangles of an update whose header has already
    /// been read.
    pub async fn apply_update<R: AsyncRead + Unpin>(
        &mut self,
        stream: &mut RfbInStream<R>,
        header: FramebufferUpdate,
    ) -> Result<AppliedUpdate, RfbClientError> {
        let until_last_rect = header.num_rects == FramebufferUpdate::UNTIL_LAST_RECT;
        if !until_last_rect && header.num_rects as usize > self.max_rects {
            return Err(RfbClientError::Protocol(format!(
                "update carries {} rectangles (limit {})",
                header.num_rects, self.max_rects
            )));
        }

        let mut applied = AppliedUpdate {
            stats: UpdateStats {
                updates: 1,
                ..UpdateStats::default()
            },
            ..AppliedUpdate::default()
        };

        let mut index = 0usize;
        loop {
            if !until_last_rect && index == header.num_rects as usize {
                break;
            }
            if index >= self.max_rects {
                return Err(RfbClientError::Protocol(format!(
                    "update without LastRect exceeded {} rectangles",
                    self.max_rects
                )));
            }
            index += 1;

            let rect = Rectangle::read_from(stream)
                .await
                .map_err(|e| RfbClientError::from_read("Rectangle header", e))?;
            tracing::trace!(
                "[{}] rect {}: x={}, y={}, w={}, h={}, encoding={}",
                self.label,
                index,
                rect.x,
                rect.y,
                rect.width,
                rect.height,
                rect.encoding
            );

            if rect.encoding == enc::PSEUDO_ENCODING_LAST_RECT {
                break;
            }
            self.apply_rectangle(stream, &rect, &mut applied).await?;
        }

        Ok(applied)
    }

    async fn apply_rectangle<R: AsyncRead + Unpin>(
        &mut self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        applied: &mut AppliedUpdate,
    ) -> Result<(), RfbClientError> {
        if rect.x > MAX_RECT_WIDTH
            || rect.y > MAX_RECT_HEIGHT
            || rect.width > MAX_RECT_WIDTH
            || rect.height > MAX_RECT_HEIGHT
        {
            return Err(RfbClientError::Protocol(format!(
                "implausible rectangle {}x{}+{}+{} (encoding {})",
                rect.width, rect.height, rect.x, rect.y, rect.encoding
            )));
        }

        if rect.encoding == enc::PSEUDO_ENCODING_DESKTOP_SIZE {
            let (width, height) = (u32::from(rect.width), u32::from(rect.height));
            if width == 0 || height == 0 {
                return Err(RfbClientError::Protocol(format!(
                    "DesktopSize to empty geometry {}x{}",
                    width, height
                )));
            }
            tracing::info!("[{}] desktop resized to {}x{}", self.label, width, height);
            self.buffer.resize(width, height);
            applied.resized = Some((width, height));
            applied.dirty.clear();
            return Ok(());
        }

        let area = Rect::new(
            i32::from(rect.x),
            i32::from(rect.y),
            u32::from(rect.width),
            u32::from(rect.height),
        );
        let (width, height) = self.buffer.dimensions();
        if !area.fits_within(width, height) {
            return Err(RfbClientError::Protocol(format!(
                "rectangle {} outside {}x{} framebuffer",
                area, width, height
            )));
        }

        let decoder = match rect.encoding {
            enc::ENCODING_RAW => &self.raw,
            enc::ENCODING_TIGHT => &self.tight,
            enc::ENCODING_ZRLE => &self.zrle,
            other => return Err(RfbClientError::UnsupportedEncoding(other)),
        };
        decoder
            .decode(stream, rect, &self.wire_format, &mut self.buffer)
            .await
            .map_err(RfbClientError::from_decode)?;

        if !area.is_empty() {
            applied.dirty.push(area);
        }
        applied.stats.rectangles += 1;
        applied.stats.pixels += area.area();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rfb_protocol::io::RfbOutStream;
    use rfb_protocol::messages::types::ENCODING_RAW;
    use std::io::Cursor;

    fn header(x: u16, y: u16, width: u16, height: u16, encoding: i32) -> Rectangle {
        Rectangle {
            x,
            y,
            width,
            height,
            encoding,
        }
    }

    /// Serialize rectangle headers and payloads into a byte stream.
    async fn wire(parts: Vec<(Rectangle, Vec<u8>)>) -> Vec<u8> {
        let mut out = RfbOutStream::new(Vec::new());
        for (rect, payload) in parts {
            rect.write_to(&mut out);
            out.write_bytes(&payload);
        }
        out.flush().await.unwrap();
        out.into_inner()
    }

    fn decoder(width: u32, height: u32) -> UpdateDecoder {
        UpdateDecoder::new("t", width, height, PixelFormat::rgbx8888(), 1000)
    }

    #[tokio::test]
    async fn test_raw_rectangles_are_applied() {
        let payload: Vec<u8> = (0..2 * 2 * 4).map(|i| i as u8).collect();
        let bytes = wire(vec![(header(1, 1, 2, 2, ENCODING_RAW), payload.clone())]).await;
        let mut stream = RfbInStream::new(Cursor::new(bytes));

        let mut dec = decoder(4, 4);
        let applied = dec
            .apply_update(&mut stream, FramebufferUpdate { num_rects: 1 })
            .await
            .unwrap();

        assert_eq!(applied.dirty, vec![Rect::new(1, 1, 2, 2)]);
        assert_eq!(applied.stats.rectangles, 1);
        assert_eq!(applied.stats.pixels, 4);
        assert_eq!(dec.buffer().read_rect(Rect::new(1, 1, 2, 2)).unwrap(), payload);
    }

    #[tokio::test]
    async fn test_until_last_rect() {
        let bytes = wire(vec![
            (header(0, 0, 1, 1, ENCODING_RAW), vec![9, 9, 9, 0]),
            (header(0, 0, 0, 0, enc::PSEUDO_ENCODING_LAST_RECT), Vec::new()),
        ])
        .await;
        let total = bytes.len() as u64;
        let mut stream = RfbInStream::new(Cursor::new(bytes));

        let applied = decoder(2, 2)
            .apply_update(&mut stream, FramebufferUpdate { num_rects: 0xFFFF })
            .await
            .unwrap();
        assert_eq!(applied.stats.rectangles, 1);
        assert_eq!(stream.consumed(), total);
    }

    #[tokio::test]
    async fn test_desktop_size_resizes_working_buffer() {
        let bytes = wire(vec![(
            header(0, 0, 320, 200, enc::PSEUDO_ENCODING_DESKTOP_SIZE),
            Vec::new(),
        )])
        .await;
        let mut stream = RfbInStream::new(Cursor::new(bytes));

        let mut dec = decoder(640, 480);
        let applied = dec
            .apply_update(&mut stream, FramebufferUpdate { num_rects: 1 })
            .await
            .unwrap();
        assert_eq!(applied.resized, Some((320, 200)));
        assert_eq!(dec.buffer().dimensions(), (320, 200));
        assert_eq!(applied.stats.rectangles, 0);
    }

    #[tokio::test]
    async fn test_out_of_bounds_rectangle_is_protocol_error() {
        let bytes = wire(vec![(header(3, 3, 2, 2, ENCODING_RAW), vec![0; 16])]).await;
        let mut stream = RfbInStream::new(Cursor::new(bytes));

        let err = decoder(4, 4)
            .apply_update(&mut stream, FramebufferUpdate { num_rects: 1 })
            .await
            .unwrap_err();
        assert!(matches!(err, RfbClientError::Protocol(ref m) if m.contains("outside")));
    }

    #[tokio::test]
    async fn test_implausible_rectangle() {
        let bytes = wire(vec![(header(0, 0, 6000, 1, ENCODING_RAW), Vec::new())]).await;
        let mut stream = RfbInStream::new(Cursor::new(bytes));

        let err = decoder(4, 4)
            .apply_update(&mut stream, FramebufferUpdate { num_rects: 1 })
            .await
            .unwrap_err();
        assert!(matches!(err, RfbClientError::Protocol(ref m) if m.contains("implausible")));
    }

    #[tokio::test]
    async fn test_too_many_rectangles() {
        let mut stream = RfbInStream::new(Cursor::new(Vec::new()));
        let mut dec = UpdateDecoder::new("t", 4, 4, PixelFormat::rgbx8888(), 10);
        let err = dec
            .apply_update(&mut stream, FramebufferUpdate { num_rects: 11 })
            .await
            .unwrap_err();
        assert!(matches!(err, RfbClientError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_last_rect_loop_is_bounded() {
        let parts = (0..3)
            .map(|_| (header(0, 0, 1, 1, ENCODING_RAW), vec![0u8; 4]))
            .collect();
        let bytes = wire(parts).await;
        let mut stream = RfbInStream::new(Cursor::new(bytes));
        let mut dec = UpdateDecoder::new("t", 4, 4, PixelFormat::rgbx8888(), 2);
        let err = dec
            .apply_update(&mut stream, FramebufferUpdate { num_rects: 0xFFFF })
            .await
            .unwrap_err();
        assert!(matches!(err, RfbClientError::Protocol(ref m) if m.contains("LastRect")));
    }

    #[tokio::test]
    async fn test_unrequested_encoding() {
        let bytes = wire(vec![(header(0, 0, 1, 1, 5), Vec::new())]).await;
        let mut stream = RfbInStream::new(Cursor::new(bytes));
        let err = decoder(4, 4)
            .apply_update(&mut stream, FramebufferUpdate { num_rects: 1 })
            .await
            .unwrap_err();
        assert!(matches!(err, RfbClientError::UnsupportedEncoding(5)));
    }

    #[tokio::test]
    async fn test_truncated_payload_is_transport_error() {
        let bytes = wire(vec![(header(0, 0, 2, 2, ENCODING_RAW), vec![0; 5])]).await;
        let mut stream = RfbInStream::new(Cursor::new(bytes));
        let err = decoder(4, 4)
            .apply_update(&mut stream, FramebufferUpdate { num_rects: 1 })
            .await
            .unwrap_err();
        assert!(matches!(err, RfbClientError::Transport(_)));
    }
}
