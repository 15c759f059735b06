//! Raw encoding (type 0): `width * height` pixels in the negotiated format,
//! no compression.

use crate::{Decoder, MutablePixelBuffer, PixelFormat, Rectangle, RfbInStream, ENCODING_RAW};
use anyhow::{bail, Context, Result};
use rfb_common::Rect;
use rfb_pixelbuffer::PixelBuffer;
use tokio::io::AsyncRead;

pub struct RawDecoder;

impl Decoder for RawDecoder {
    fn encoding_type(&self) -> i32 {
        ENCODING_RAW
    }

    async fn decode<R: AsyncRead + Unpin>(
        &self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        pixel_format: &PixelFormat,
        buffer: &mut dyn MutablePixelBuffer,
    ) -> Result<()> {
        let start = stream.consumed();
        if rect.width == 0 || rect.height == 0 {
            return Ok(());
        }

        let dest = Rect::new(
            rect.x as i32,
            rect.y as i32,
            rect.width as u32,
            rect.height as u32,
        );
        let (width, height) = buffer.dimensions();
        if !dest.fits_within(width, height) {
            bail!("Raw: rectangle {} outside framebuffer {}x{}", dest, width, height);
        }

        let wire = rfb_pixelbuffer::PixelFormat::from(*pixel_format);
        let bpp = wire.bytes_per_pixel() as usize;
        let mut data = vec![0u8; dest.area() as usize * bpp];
        stream
            .read_bytes(&mut data)
            .await
            .context("Failed to read raw pixel data from stream")?;

        let target = *buffer.pixel_format();
        if target != wire {
            let mut converted =
                Vec::with_capacity(dest.area() as usize * target.bytes_per_pixel() as usize);
            for px in data.chunks_exact(bpp) {
                let [r, g, b] = wire.unpack_rgb(px).unwrap_or([0, 0, 0]);
                converted.extend_from_slice(&target.pack_rgb(r, g, b));
            }
            data = converted;
        }

        buffer
            .image_rect(dest, &data, dest.width as usize)
            .context("Failed to write raw pixel data to buffer")?;

        tracing::debug!(
            target: "rfb_encodings::framing",
            "Raw decode end: rect={} bytes_consumed={}",
            dest,
            stream.consumed() - start
        );
        Ok(())
    }
}
