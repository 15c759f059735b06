//! ZRLE encoding (type 16): zlib-compressed 64x64 tiles.
//!
//! A rectangle's payload is a `u32` length followed by that many bytes of a
//! zlib stream that lives as long as the connection. Inflated, it holds the
//! rectangle's tiles in row-major order, each at most 64x64 pixels.
//!
//! Every tile starts with a subencoding byte. Bit 7 is the RLE flag and bits
//! 0-6 are the palette size:
//!
//! | palette | RLE | tile body                                        |
//! |---------|-----|--------------------------------------------------|
//! | 0       | no  | raw CPIXELs                                      |
//! | 1       | -   | one CPIXEL filling the tile                      |
//! | 2-16    | no  | palette, then 1/2/4-bit indices, rows padded     |
//! | 17-127  | no  | palette, then one index byte per pixel           |
//! | 0       | yes | runs of (CPIXEL, run length)                     |
//! | 2-127   | yes | palette, then runs of (index, optional length)   |
//!
//! A CPIXEL is a pixel in the negotiated format, except that 32bpp formats of
//! depth 24 or less whose colour fits in three bytes send only those bytes.
//! Run lengths are one plus the sum of their bytes, where 255 continues.

use crate::{Decoder, MutablePixelBuffer, PixelFormat, Rectangle, RfbInStream, ENCODING_ZRLE};
use anyhow::{anyhow, bail, Context, Result};
use flate2::{Decompress, FlushDecompress};
use parking_lot::Mutex;
use rfb_common::Rect;
use rfb_pixelbuffer::PixelBuffer;
use tokio::io::AsyncRead;

const TILE_SIZE: u16 = 64;

/// Longest compressed payload accepted for one rectangle.
const MAX_COMPRESSED_LEN: usize = 64 << 20;

/// ZRLE decoder holding the connection's zlib stream.
pub struct ZRLEDecoder {
    inflater: Mutex<Decompress>,
}

impl Default for ZRLEDecoder {
    fn default() -> Self {
        Self {
            inflater: Mutex::new(Decompress::new(true)),
        }
    }
}

impl Decoder for ZRLEDecoder {
    fn encoding_type(&self) -> i32 {
        ENCODING_ZRLE
    }

    async fn decode<R: AsyncRead + Unpin>(
        &self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        pixel_format: &PixelFormat,
        buffer: &mut dyn MutablePixelBuffer,
    ) -> Result<()> {
        let len = stream.read_u32().await.context("ZRLE: compressed length")? as usize;
        if len > MAX_COMPRESSED_LEN {
            bail!("ZRLE: compressed length {} exceeds {}", len, MAX_COMPRESSED_LEN);
        }
        let mut compressed = vec![0u8; len];
        stream
            .read_bytes(&mut compressed)
            .await
            .with_context(|| format!("ZRLE: reading {} compressed bytes", len))?;

        let dest = Rect::new(
            rect.x as i32,
            rect.y as i32,
            rect.width as u32,
            rect.height as u32,
        );
        let (width, height) = buffer.dimensions();
        if !dest.fits_within(width, height) {
            bail!("ZRLE: rectangle {} outside framebuffer {}x{}", dest, width, height);
        }

        // Inflate even for an empty rectangle so the stream stays in step.
        let data = self.inflate(&compressed, max_inflated_len(rect))?;
        if dest.is_empty() {
            return Ok(());
        }

        let pixels = CPixel::new(pixel_format, *buffer.pixel_format())?;
        let mut cursor = ByteCursor::new(&data);
        for ty in (0..rect.height).step_by(TILE_SIZE as usize) {
            let tile_h = TILE_SIZE.min(rect.height - ty);
            for tx in (0..rect.width).step_by(TILE_SIZE as usize) {
                let tile_w = TILE_SIZE.min(rect.width - tx);
                let tile = Rect::new(
                    (rect.x + tx) as i32,
                    (rect.y + ty) as i32,
                    tile_w as u32,
                    tile_h as u32,
                );
                decode_tile(&mut cursor, &pixels, tile, buffer)
                    .with_context(|| format!("ZRLE: tile {}", tile))?;
            }
        }

        if cursor.remaining() > 0 {
            bail!("ZRLE: {} trailing bytes after rectangle {}", cursor.remaining(), dest);
        }
        Ok(())
    }
}

impl ZRLEDecoder {
    /// Inflate one rectangle's chunk of the stream. Output beyond `limit`
    /// bytes is an error.
    fn inflate(&self, input: &[u8], limit: usize) -> Result<Vec<u8>> {
        let mut inflater = self.inflater.lock();
        let mut output = Vec::with_capacity((input.len() * 4).clamp(1024, limit.max(1024)));
        let mut consumed = 0;

        loop {
            if output.len() == output.capacity() {
                if output.len() >= limit {
                    bail!("ZRLE: inflated data exceeds {} bytes", limit);
                }
                output.reserve(output.capacity());
            }
            let before_in = inflater.total_in();
            let before_out = output.len();
            inflater
                .decompress_vec(&input[consumed..], &mut output, FlushDecompress::Sync)
                .context("ZRLE: zlib stream failed")?;
            consumed += (inflater.total_in() - before_in) as usize;

            // Done once all input is in and the last pass left room spare.
            if consumed == input.len() && output.len() < output.capacity() {
                break;
            }
            if consumed < input.len()
                && output.len() == before_out
                && output.len() < output.capacity()
            {
                bail!("ZRLE: zlib stream stalled with {} bytes unread", input.len() - consumed);
            }
        }
        Ok(output)
    }
}

/// Upper bound on a rectangle's inflated size: every tile as plain RLE with
/// a full palette, one-pixel runs and 4-byte pixels.
fn max_inflated_len(rect: &Rectangle) -> usize {
    let tiles = (rect.width as usize).div_ceil(TILE_SIZE as usize)
        * (rect.height as usize).div_ceil(TILE_SIZE as usize);
    tiles * (1 + 127 * 4) + rect.width as usize * rect.height as usize * 6 + 1024
}

/// How CPIXELs are read and converted to the buffer's format.
struct CPixel {
    wire: rfb_pixelbuffer::PixelFormat,
    target: rfb_pixelbuffer::PixelFormat,
    /// Bytes per CPIXEL on the wire.
    size: usize,
    /// Offset of the CPIXEL bytes inside a full wire pixel.
    offset: usize,
}

impl CPixel {
    fn new(pixel_format: &PixelFormat, target: rfb_pixelbuffer::PixelFormat) -> Result<Self> {
        let wire = rfb_pixelbuffer::PixelFormat::from(*pixel_format);
        let bpp = wire.bytes_per_pixel() as usize;
        if !(1..=4).contains(&bpp) || !wire.true_color {
            bail!("ZRLE: unsupported pixel format {:?}", wire);
        }

        let (mut size, mut offset) = (bpp, 0);
        if bpp == 4 && wire.depth <= 24 {
            let max = (u32::from(wire.red_max) << wire.red_shift)
                | (u32::from(wire.green_max) << wire.green_shift)
                | (u32::from(wire.blue_max) << wire.blue_shift);
            let fits_low = max < 1 << 24;
            let fits_high = max & 0xFF == 0;
            // Offset is in memory order: the significant bytes come first
            // when they are the low bytes of a little-endian pixel or the
            // high bytes of a big-endian one.
            if (fits_low && !wire.big_endian) || (fits_high && wire.big_endian) {
                size = 3;
            } else if fits_low || fits_high {
                size = 3;
                offset = 1;
            }
        }
        Ok(Self { wire, target, size, offset })
    }

    /// Read one CPIXEL and return it in the target format.
    fn read(&self, cursor: &mut ByteCursor<'_>) -> Result<Vec<u8>> {
        let bytes = cursor.take(self.size).context("ZRLE: pixel")?;
        let mut full = [0u8; 4];
        full[self.offset..self.offset + self.size].copy_from_slice(bytes);
        let full = &full[..self.wire.bytes_per_pixel() as usize];
        if self.wire == self.target {
            return Ok(full.to_vec());
        }
        let [r, g, b] = self
            .wire
            .unpack_rgb(full)
            .ok_or_else(|| anyhow!("ZRLE: cannot unpack pixel in {:?}", self.wire))?;
        Ok(self.target.pack_rgb(r, g, b))
    }

    fn palette(&self, cursor: &mut ByteCursor<'_>, size: usize) -> Result<Vec<Vec<u8>>> {
        (0..size).map(|_| self.read(cursor)).collect()
    }
}

fn decode_tile(
    cursor: &mut ByteCursor<'_>,
    pixels: &CPixel,
    tile: Rect,
    buffer: &mut dyn MutablePixelBuffer,
) -> Result<()> {
    let subencoding = cursor.byte().context("ZRLE: subencoding")?;
    let rle = subencoding & 0x80 != 0;
    let palette_size = (subencoding & 0x7F) as usize;
    let (w, h) = (tile.width as usize, tile.height as usize);
    let area = w * h;

    if palette_size == 1 {
        let colour = pixels.read(cursor)?;
        return buffer.fill_rect(tile, &colour);
    }

    let out: Vec<u8> = match (rle, palette_size) {
        (false, 0) => {
            let mut out = Vec::with_capacity(area * pixels.target.bytes_per_pixel() as usize);
            for _ in 0..area {
                out.extend_from_slice(&pixels.read(cursor)?);
            }
            out
        }
        (false, 2..=16) => {
            let palette = pixels.palette(cursor, palette_size)?;
            let bits = match palette_size {
                2 => 1,
                3 | 4 => 2,
                _ => 4,
            };
            let row_bytes = (w * bits).div_ceil(8);
            let mut out = Vec::with_capacity(area * palette[0].len());
            for _ in 0..h {
                let row = cursor.take(row_bytes).context("ZRLE: packed palette row")?;
                for x in 0..w {
                    let bit = x * bits;
                    let shift = 8 - bits - bit % 8;
                    let index = ((row[bit / 8] >> shift) & ((1 << bits) - 1)) as usize;
                    out.extend_from_slice(lookup(&palette, index)?);
                }
            }
            out
        }
        (false, _) => {
            let palette = pixels.palette(cursor, palette_size)?;
            let indices = cursor.take(area).context("ZRLE: palette indices")?;
            let mut out = Vec::with_capacity(area * palette[0].len());
            for &index in indices {
                out.extend_from_slice(lookup(&palette, index as usize)?);
            }
            out
        }
        (true, 0) => {
            let mut out = Vec::new();
            let mut filled = 0;
            while filled < area {
                let colour = pixels.read(cursor)?;
                let run = run_length(cursor, area - filled)?;
                for _ in 0..run {
                    out.extend_from_slice(&colour);
                }
                filled += run;
            }
            out
        }
        (true, _) => {
            let palette = pixels.palette(cursor, palette_size)?;
            let mut out = Vec::with_capacity(area * palette[0].len());
            let mut filled = 0;
            while filled < area {
                let code = cursor.byte().context("ZRLE: palette run")?;
                let colour = lookup(&palette, (code & 0x7F) as usize)?;
                let run = if code & 0x80 != 0 {
                    run_length(cursor, area - filled)?
                } else {
                    1
                };
                for _ in 0..run {
                    out.extend_from_slice(colour);
                }
                filled += run;
            }
            out
        }
    };

    buffer.image_rect(tile, &out, w)
}

fn lookup(palette: &[Vec<u8>], index: usize) -> Result<&[u8]> {
    palette
        .get(index)
        .map(Vec::as_slice)
        .ok_or_else(|| anyhow!("ZRLE: palette index {} out of range ({})", index, palette.len()))
}

/// Read a run length; runs may not overflow the `left` pixels of the tile.
fn run_length(cursor: &mut ByteCursor<'_>, left: usize) -> Result<usize> {
    let mut run = 1usize;
    loop {
        let byte = cursor.byte().context("ZRLE: run length")?;
        run += byte as usize;
        if run > left {
            bail!("ZRLE: run of {} overflows tile ({} pixels left)", run, left);
        }
        if byte != 255 {
            return Ok(run);
        }
    }
}

struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            bail!("need {} bytes, {} left", n, self.remaining());
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use rfb_pixelbuffer::ManagedPixelBuffer;
    use std::io::{Cursor, Write};

    fn rgbx() -> PixelFormat {
        rfb_pixelbuffer::PixelFormat::rgbx8888().into()
    }

    fn rect(x: u16, y: u16, width: u16, height: u16) -> Rectangle {
        Rectangle {
            x,
            y,
            width,
            height,
            encoding: ENCODING_ZRLE,
        }
    }

    fn buffer(w: u32, h: u32) -> ManagedPixelBuffer {
        ManagedPixelBuffer::new(w, h, rfb_pixelbuffer::PixelFormat::rgbx8888())
    }

    /// Length-prefixed chunk of `encoder`'s stream holding `tiles`.
    fn chunk(encoder: &mut ZlibEncoder<Vec<u8>>, tiles: &[u8]) -> Vec<u8> {
        encoder.write_all(tiles).unwrap();
        encoder.flush().unwrap();
        let compressed = std::mem::take(encoder.get_mut());
        let mut out = (compressed.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(&compressed);
        out
    }

    fn encoder() -> ZlibEncoder<Vec<u8>> {
        ZlibEncoder::new(Vec::new(), Compression::default())
    }

    async fn decode(
        decoder: &ZRLEDecoder,
        bytes: Vec<u8>,
        r: Rectangle,
        buffer: &mut ManagedPixelBuffer,
    ) -> Result<u64> {
        let mut stream = RfbInStream::new(Cursor::new(bytes));
        decoder.decode(&mut stream, &r, &rgbx(), buffer).await?;
        Ok(stream.consumed())
    }

    fn rgb_at(buffer: &ManagedPixelBuffer, x: u32, y: u32) -> [u8; 3] {
        let pixel = buffer.read_rect(Rect::new(x as i32, y as i32, 1, 1)).unwrap();
        [pixel[0], pixel[1], pixel[2]]
    }

    #[tokio::test]
    async fn test_solid_tile() {
        let decoder = ZRLEDecoder::default();
        let mut fb = buffer(8, 8);
        let bytes = chunk(&mut encoder(), &[1, 10, 20, 30]);
        let len = bytes.len() as u64;

        let consumed = decode(&decoder, bytes, rect(2, 2, 4, 3), &mut fb).await.unwrap();
        assert_eq!(consumed, len);
        assert_eq!(rgb_at(&fb, 2, 2), [10, 20, 30]);
        assert_eq!(rgb_at(&fb, 5, 4), [10, 20, 30]);
        assert_eq!(rgb_at(&fb, 6, 4), [0, 0, 0]);
    }

    #[tokio::test]
    async fn test_raw_tile_uses_three_byte_cpixels() {
        let decoder = ZRLEDecoder::default();
        let mut fb = buffer(2, 1);
        let bytes = chunk(&mut encoder(), &[0, 1, 2, 3, 4, 5, 6]);

        decode(&decoder, bytes, rect(0, 0, 2, 1), &mut fb).await.unwrap();
        assert_eq!(rgb_at(&fb, 0, 0), [1, 2, 3]);
        assert_eq!(rgb_at(&fb, 1, 0), [4, 5, 6]);
    }

    #[tokio::test]
    async fn test_packed_palette_rows_are_padded() {
        let decoder = ZRLEDecoder::default();
        let mut fb = buffer(3, 2);
        // Two colours, 1-bit indices: row 0 = 1,0,1 and row 1 = 0,1,1.
        let tiles = [2, 0, 0, 0, 255, 255, 255, 0b1010_0000, 0b0110_0000];
        decode(&decoder, chunk(&mut encoder(), &tiles), rect(0, 0, 3, 2), &mut fb)
            .await
            .unwrap();

        let white = [255, 255, 255];
        assert_eq!(rgb_at(&fb, 0, 0), white);
        assert_eq!(rgb_at(&fb, 1, 0), [0, 0, 0]);
        assert_eq!(rgb_at(&fb, 2, 0), white);
        assert_eq!(rgb_at(&fb, 0, 1), [0, 0, 0]);
        assert_eq!(rgb_at(&fb, 2, 1), white);
    }

    #[tokio::test]
    async fn test_plain_and_palette_rle() {
        let decoder = ZRLEDecoder::default();
        let mut fb = buffer(4, 2);
        let mut zlib = encoder();

        // Plain RLE: 3 pixels of red then 5 of blue.
        let plain = [128, 255, 0, 0, 2, 0, 0, 255, 4];
        decode(&decoder, chunk(&mut zlib, &plain), rect(0, 0, 4, 2), &mut fb)
            .await
            .unwrap();
        assert_eq!(rgb_at(&fb, 2, 0), [255, 0, 0]);
        assert_eq!(rgb_at(&fb, 3, 0), [0, 0, 255]);
        assert_eq!(rgb_at(&fb, 3, 1), [0, 0, 255]);

        // Palette RLE on the same stream: one green, then a run of 7 grey.
        let palette = [130, 0, 255, 0, 9, 9, 9, 0x00, 0x81, 6];
        decode(&decoder, chunk(&mut zlib, &palette), rect(0, 0, 4, 2), &mut fb)
            .await
            .unwrap();
        assert_eq!(rgb_at(&fb, 0, 0), [0, 255, 0]);
        assert_eq!(rgb_at(&fb, 1, 0), [9, 9, 9]);
        assert_eq!(rgb_at(&fb, 3, 1), [9, 9, 9]);
    }

    #[tokio::test]
    async fn test_tiles_are_row_major_64_square() {
        let decoder = ZRLEDecoder::default();
        let mut fb = buffer(70, 2);
        // Two tiles across: 64x2 then 6x2, both solid.
        let tiles = [1, 1, 1, 1, 1, 2, 2, 2];
        decode(&decoder, chunk(&mut encoder(), &tiles), rect(0, 0, 70, 2), &mut fb)
            .await
            .unwrap();
        assert_eq!(rgb_at(&fb, 63, 1), [1, 1, 1]);
        assert_eq!(rgb_at(&fb, 64, 0), [2, 2, 2]);
        assert_eq!(rgb_at(&fb, 69, 1), [2, 2, 2]);
    }

    #[tokio::test]
    async fn test_run_past_tile_end_is_error() {
        let decoder = ZRLEDecoder::default();
        let mut fb = buffer(2, 2);
        let tiles = [128, 1, 1, 1, 10];
        let err = decode(&decoder, chunk(&mut encoder(), &tiles), rect(0, 0, 2, 2), &mut fb)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("overflows tile"), "{:#}", err);
    }

    #[tokio::test]
    async fn test_palette_index_out_of_range_is_error() {
        let decoder = ZRLEDecoder::default();
        let mut fb = buffer(2, 1);
        // 17-colour palette RLE, then a single pixel of colour 20.
        let mut tiles = vec![0x80 | 17];
        tiles.extend_from_slice(&[0; 17 * 3]);
        tiles.push(20);
        let err = decode(&decoder, chunk(&mut encoder(), &tiles), rect(0, 0, 2, 1), &mut fb)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("out of range"), "{:#}", err);
    }

    #[tokio::test]
    async fn test_trailing_bytes_are_error() {
        let decoder = ZRLEDecoder::default();
        let mut fb = buffer(1, 1);
        let tiles = [1, 5, 5, 5, 0];
        let err = decode(&decoder, chunk(&mut encoder(), &tiles), rect(0, 0, 1, 1), &mut fb)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("trailing"), "{:#}", err);
    }

    #[tokio::test]
    async fn test_rectangle_outside_framebuffer_is_error() {
        let decoder = ZRLEDecoder::default();
        let mut fb = buffer(4, 4);
        let bytes = chunk(&mut encoder(), &[1, 0, 0, 0]);
        assert!(decode(&decoder, bytes, rect(3, 3, 2, 2), &mut fb).await.is_err());
    }
}
