//! Tight encoding decoder (type 7).
//!
//! # Wire format
//!
//! Every rectangle starts with a compression-control byte:
//!
//! ```text
//! bit 7..4  mode:  0x8 FILL, 0x9 JPEG, 0x0-0x7 BASIC, anything else invalid
//! bit 3..0  reset: bit i set => reset zlib stream i before decoding
//! ```
//!
//! In BASIC mode bits 4-5 select one of four persistent zlib streams and
//! bit 6 announces an explicit filter byte (COPY, PALETTE or GRADIENT).
//!
//! Pixels on the wire are TPIXELs: 3 bytes R,G,B when the negotiated format
//! is 32bpp/depth 24 with 8-bit channels, otherwise the native pixel bytes.
//!
//! Payloads shorter than 12 bytes are sent as-is. Longer ones are prefixed
//! by a compact length (1-3 bytes, 7 bits each, the third byte contributes
//! all 8 bits) and zlib-compressed with a sync flush, continuing the
//! selected stream's history across rectangles.
//!
//! ```no_run
//! use rfb_encodings::{Decoder, TightDecoder, ENCODING_TIGHT};
//!
//! let decoder = TightDecoder::default();
//! assert_eq!(decoder.encoding_type(), ENCODING_TIGHT);
//! ```

use crate::{Decoder, MutablePixelBuffer, PixelFormat, Rectangle, RfbInStream, ENCODING_TIGHT};
use anyhow::{anyhow, bail, Context, Result};
use flate2::{Decompress, FlushDecompress, Status};
use parking_lot::Mutex;
use rfb_common::Rect;
use rfb_pixelbuffer::PixelBuffer;
use std::io::Cursor;
use tokio::io::AsyncRead;

const TIGHT_FILL: u8 = 0x08;
const TIGHT_JPEG: u8 = 0x09;
const TIGHT_EXPLICIT_FILTER: u8 = 0x40;

const TIGHT_FILTER_COPY: u8 = 0x00;
const TIGHT_FILTER_PALETTE: u8 = 0x01;
const TIGHT_FILTER_GRADIENT: u8 = 0x02;

const TIGHT_MAX_WIDTH: u16 = 2048;
const TIGHT_MIN_TO_COMPRESS: usize = 12;

/// Tight decoder with four persistent zlib streams.
///
/// One decoder belongs to one connection; streams carry history from one
/// rectangle to the next until the server resets them.
pub struct TightDecoder {
    zlib_streams: Mutex<[Option<Decompress>; 4]>,
}

impl Default for TightDecoder {
    fn default() -> Self {
        Self {
            zlib_streams: Mutex::new([None, None, None, None]),
        }
    }
}

/// How TPIXELs look for a given negotiated pixel format.
struct TPixel {
    native: rfb_pixelbuffer::PixelFormat,
    rgb: bool,
}

impl TPixel {
    fn new(pixel_format: &PixelFormat) -> Self {
        let native = rfb_pixelbuffer::PixelFormat::from(*pixel_format);
        Self {
            rgb: native.is_888(),
            native,
        }
    }

    fn size(&self) -> usize {
        if self.rgb {
            3
        } else {
            self.native.bytes_per_pixel() as usize
        }
    }

    /// Raw channel values, each in `0..=max`.
    fn channels(&self, bytes: &[u8]) -> Result<[u32; 3]> {
        if self.rgb {
            return Ok([bytes[0] as u32, bytes[1] as u32, bytes[2] as u32]);
        }
        self.native
            .channels(bytes)
            .ok_or_else(|| anyhow!("Tight: cannot unpack pixel in {:?}", self.native))
    }

    fn maxima(&self) -> [u32; 3] {
        if self.rgb {
            [255, 255, 255]
        } else {
            self.native.channel_maxima()
        }
    }

    fn to_rgb(&self, channels: [u32; 3]) -> [u8; 3] {
        if self.rgb {
            [channels[0] as u8, channels[1] as u8, channels[2] as u8]
        } else {
            self.native.channels_to_rgb(channels)
        }
    }

    /// Convert a TPIXEL to a pixel in the destination buffer's format.
    fn convert(&self, bytes: &[u8], dest: &rfb_pixelbuffer::PixelFormat) -> Result<Vec<u8>> {
        let [r, g, b] = self.to_rgb(self.channels(bytes)?);
        Ok(dest.pack_rgb(r, g, b))
    }
}

impl TightDecoder {
    /// Read a Tight compact length (1-3 bytes).
    async fn read_compact_length<R: AsyncRead + Unpin>(
        stream: &mut RfbInStream<R>,
    ) -> Result<usize> {
        let b0 = stream.read_u8().await.context("Tight: compact length")?;
        let mut length = (b0 & 0x7F) as usize;
        if b0 & 0x80 == 0 {
            return Ok(length);
        }

        let b1 = stream.read_u8().await.context("Tight: compact length")?;
        length |= ((b1 & 0x7F) as usize) << 7;
        if b1 & 0x80 == 0 {
            return Ok(length);
        }

        let b2 = stream.read_u8().await.context("Tight: compact length")?;
        Ok(length | (b2 as usize) << 14)
    }

    /// Read `size` bytes of (possibly compressed) payload.
    async fn read_payload<R: AsyncRead + Unpin>(
        &self,
        stream: &mut RfbInStream<R>,
        stream_id: usize,
        size: usize,
    ) -> Result<Vec<u8>> {
        if size < TIGHT_MIN_TO_COMPRESS {
            let mut data = vec![0u8; size];
            stream
                .read_bytes(&mut data)
                .await
                .with_context(|| format!("Tight: reading {} uncompressed bytes", size))?;
            return Ok(data);
        }

        let compressed_len = Self::read_compact_length(stream).await?;
        let mut compressed = vec![0u8; compressed_len];
        stream
            .read_bytes(&mut compressed)
            .await
            .with_context(|| format!("Tight: reading {} compressed bytes", compressed_len))?;
        self.decompress_zlib(stream_id, &compressed, size)
    }

    /// Inflate `input` on the persistent stream `stream_id`, which must
    /// produce exactly `expected_size` bytes.
    fn decompress_zlib(
        &self,
        stream_id: usize,
        input: &[u8],
        expected_size: usize,
    ) -> Result<Vec<u8>> {
        let mut streams = self.zlib_streams.lock();
        let decompressor = streams[stream_id].get_or_insert_with(|| Decompress::new(true));

        let mut output = vec![0u8; expected_size];
        let start_in = decompressor.total_in();
        let start_out = decompressor.total_out();

        loop {
            let consumed = (decompressor.total_in() - start_in) as usize;
            let produced = (decompressor.total_out() - start_out) as usize;
            if produced == expected_size {
                break;
            }
            let status = decompressor
                .decompress(
                    &input[consumed..],
                    &mut output[produced..],
                    FlushDecompress::Sync,
                )
                .with_context(|| {
                    format!(
                        "Tight: zlib stream {} failed (in={}, expected_out={})",
                        stream_id,
                        input.len(),
                        expected_size
                    )
                })?;

            let progressed = decompressor.total_in() - start_in != consumed as u64
                || decompressor.total_out() - start_out != produced as u64;
            if !progressed || status == Status::StreamEnd {
                break;
            }
        }

        let produced = (decompressor.total_out() - start_out) as usize;
        if produced != expected_size {
            bail!(
                "Tight: zlib stream {} produced {} bytes, expected {}",
                stream_id,
                produced,
                expected_size
            );
        }
        Ok(output)
    }

    fn decode_copy(
        tpixel: &TPixel,
        data: &[u8],
        dest: Rect,
        buffer: &mut dyn MutablePixelBuffer,
    ) -> Result<()> {
        let target = *buffer.pixel_format();
        let size = tpixel.size();
        let mut pixels = Vec::with_capacity(dest.area() as usize * target.bytes_per_pixel() as usize);
        for px in data.chunks_exact(size) {
            pixels.extend_from_slice(&tpixel.convert(px, &target)?);
        }
        buffer.image_rect(dest, &pixels, dest.width as usize)
    }

    fn decode_palette(
        palette: &[Vec<u8>],
        data: &[u8],
        dest: Rect,
        buffer: &mut dyn MutablePixelBuffer,
    ) -> Result<()> {
        let width = dest.width as usize;
        let height = dest.height as usize;
        let bpp = buffer.pixel_format().bytes_per_pixel() as usize;
        let mut pixels = Vec::with_capacity(width * height * bpp);

        let push = |index: usize, pixels: &mut Vec<u8>| -> Result<()> {
            let colour = palette.get(index).ok_or_else(|| {
                anyhow!(
                    "Tight PALETTE: index {} out of range (palette size {})",
                    index,
                    palette.len()
                )
            })?;
            pixels.extend_from_slice(colour);
            Ok(())
        };

        if palette.len() == 2 {
            let row_bytes = width.div_ceil(8);
            for row in data.chunks_exact(row_bytes).take(height) {
                for x in 0..width {
                    let bit = (row[x / 8] >> (7 - (x % 8))) & 1;
                    push(bit as usize, &mut pixels)?;
                }
            }
        } else {
            for &index in &data[..width * height] {
                push(index as usize, &mut pixels)?;
            }
        }

        buffer.image_rect(dest, &pixels, width)
    }

    /// Undo the gradient filter. Each channel is predicted as
    /// `clamp(left + up - upleft, 0, max)`; the wire carries the difference.
    fn decode_gradient(
        tpixel: &TPixel,
        pixel_format: &PixelFormat,
        data: &[u8],
        dest: Rect,
        buffer: &mut dyn MutablePixelBuffer,
    ) -> Result<()> {
        if !matches!(pixel_format.bits_per_pixel, 16 | 32) || pixel_format.true_color == 0 {
            bail!(
                "Tight gradient filter requires a 16/32 bpp true-colour format, got {} bpp",
                pixel_format.bits_per_pixel
            );
        }

        let width = dest.width as usize;
        let maxima = tpixel.maxima();
        let target = *buffer.pixel_format();
        let mut prev_row = vec![[0u32; 3]; width];
        let mut this_row = vec![[0u32; 3]; width];
        let mut pixels = Vec::with_capacity(dest.area() as usize * target.bytes_per_pixel() as usize);

        for row in data.chunks_exact(width * tpixel.size()).take(dest.height as usize) {
            for (x, px) in row.chunks_exact(tpixel.size()).enumerate() {
                let diff = tpixel.channels(px)?;
                for c in 0..3 {
                    let left = if x > 0 { this_row[x - 1][c] as i64 } else { 0 };
                    let up_left = if x > 0 { prev_row[x - 1][c] as i64 } else { 0 };
                    let up = prev_row[x][c] as i64;
                    let predicted = (left + up - up_left).clamp(0, maxima[c] as i64) as u32;
                    this_row[x][c] = predicted.wrapping_add(diff[c]) & maxima[c];
                }
                let [r, g, b] = tpixel.to_rgb(this_row[x]);
                pixels.extend_from_slice(&target.pack_rgb(r, g, b));
            }
            std::mem::swap(&mut prev_row, &mut this_row);
        }

        buffer.image_rect(dest, &pixels, width)
    }

    fn decode_jpeg(jpeg: &[u8], dest: Rect, buffer: &mut dyn MutablePixelBuffer) -> Result<()> {
        let mut decoder = jpeg_decoder::Decoder::new(Cursor::new(jpeg));
        let decoded = decoder.decode().context("Tight: JPEG decode failed")?;
        let info = decoder
            .info()
            .ok_or_else(|| anyhow!("Tight: JPEG decoder returned no metadata"))?;

        if info.width as u32 != dest.width || info.height as u32 != dest.height {
            bail!(
                "Tight JPEG: dimension mismatch (JPEG {}x{} vs rect {}x{})",
                info.width,
                info.height,
                dest.width,
                dest.height
            );
        }

        let target = *buffer.pixel_format();
        let mut pixels = Vec::with_capacity(dest.area() as usize * target.bytes_per_pixel() as usize);
        match info.pixel_format {
            jpeg_decoder::PixelFormat::RGB24 => {
                for rgb in decoded.chunks_exact(3) {
                    pixels.extend_from_slice(&target.pack_rgb(rgb[0], rgb[1], rgb[2]));
                }
            }
            jpeg_decoder::PixelFormat::L8 => {
                for &l in &decoded {
                    pixels.extend_from_slice(&target.pack_rgb(l, l, l));
                }
            }
            other => bail!("Tight JPEG: unsupported pixel format {:?}", other),
        }
        buffer.image_rect(dest, &pixels, dest.width as usize)
    }
}

impl Decoder for TightDecoder {
    fn encoding_type(&self) -> i32 {
        ENCODING_TIGHT
    }

    async fn decode<R: AsyncRead + Unpin>(
        &self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        pixel_format: &PixelFormat,
        buffer: &mut dyn MutablePixelBuffer,
    ) -> Result<()> {
        let start = stream.consumed();
        tracing::debug!(
            target: "rfb_encodings::framing",
            "Tight decode start: rect=[{},{} {}x{}]",
            rect.x, rect.y, rect.width, rect.height
        );

        if rect.width == 0 || rect.height == 0 {
            return Ok(());
        }
        if rect.width > TIGHT_MAX_WIDTH {
            bail!(
                "Tight: rectangle too wide ({} > {} max)",
                rect.width,
                TIGHT_MAX_WIDTH
            );
        }

        let dest = Rect::new(
            rect.x as i32,
            rect.y as i32,
            rect.width as u32,
            rect.height as u32,
        );
        let (width, height) = buffer.dimensions();
        if !dest.fits_within(width, height) {
            bail!(
                "Tight: rectangle {} outside framebuffer {}x{}",
                dest,
                width,
                height
            );
        }

        let comp_ctl = stream
            .read_u8()
            .await
            .with_context(|| format!("Tight: reading control byte for {}", dest))?;

        {
            let mut streams = self.zlib_streams.lock();
            for (i, slot) in streams.iter_mut().enumerate() {
                if comp_ctl & (1 << i) != 0 {
                    tracing::trace!("Tight: reset zlib stream {}", i);
                    *slot = None;
                }
            }
        }

        let tpixel = TPixel::new(pixel_format);
        let mode = comp_ctl >> 4;

        let kind = match mode {
            TIGHT_FILL => {
                let mut px = vec![0u8; tpixel.size()];
                stream
                    .read_bytes(&mut px)
                    .await
                    .context("Tight FILL: reading pixel")?;
                let colour = tpixel.convert(&px, buffer.pixel_format())?;
                buffer
                    .fill_rect(dest, &colour)
                    .context("Tight FILL: filling rectangle")?;
                "FILL"
            }
            TIGHT_JPEG => {
                let len = Self::read_compact_length(stream).await?;
                let mut jpeg = vec![0u8; len];
                stream
                    .read_bytes(&mut jpeg)
                    .await
                    .with_context(|| format!("Tight JPEG: reading {} bytes", len))?;
                Self::decode_jpeg(&jpeg, dest, buffer)?;
                "JPEG"
            }
            m if m & 0x08 != 0 => {
                bail!("Tight: invalid compression type {:#x}", m);
            }
            _ => {
                let stream_id = ((comp_ctl >> 4) & 0x03) as usize;
                let filter = if comp_ctl & TIGHT_EXPLICIT_FILTER != 0 {
                    stream.read_u8().await.context("Tight: reading filter id")?
                } else {
                    TIGHT_FILTER_COPY
                };

                let w = rect.width as usize;
                let h = rect.height as usize;
                match filter {
                    TIGHT_FILTER_COPY => {
                        let data = self
                            .read_payload(stream, stream_id, w * h * tpixel.size())
                            .await?;
                        Self::decode_copy(&tpixel, &data, dest, buffer)?;
                        "COPY"
                    }
                    TIGHT_FILTER_PALETTE => {
                        let count = stream.read_u8().await.context("Tight PALETTE: size")? as usize + 1;
                        let mut raw = vec![0u8; count * tpixel.size()];
                        stream
                            .read_bytes(&mut raw)
                            .await
                            .context("Tight PALETTE: reading colours")?;
                        let target = *buffer.pixel_format();
                        let palette = raw
                            .chunks_exact(tpixel.size())
                            .map(|px| tpixel.convert(px, &target))
                            .collect::<Result<Vec<_>>>()?;

                        let index_size = if count == 2 { w.div_ceil(8) * h } else { w * h };
                        let data = self.read_payload(stream, stream_id, index_size).await?;
                        Self::decode_palette(&palette, &data, dest, buffer)?;
                        "PALETTE"
                    }
                    TIGHT_FILTER_GRADIENT => {
                        let data = self
                            .read_payload(stream, stream_id, w * h * tpixel.size())
                            .await?;
                        Self::decode_gradient(&tpixel, pixel_format, &data, dest, buffer)?;
                        "GRADIENT"
                    }
                    other => bail!("Tight: invalid filter type {}", other),
                }
            }
        };

        tracing::debug!(
            target: "rfb_encodings::framing",
            "Tight decode end ({}): bytes_consumed={}",
            kind,
            stream.consumed() - start
        );
        Ok(())
    }
}
