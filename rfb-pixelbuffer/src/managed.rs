//! Vec-backed pixel buffer.
//!
//! ```
//! use rfb_pixelbuffer::{ManagedPixelBuffer, MutablePixelBuffer, PixelBuffer, PixelFormat};
//! use rfb_common::Rect;
//!
//! let mut buffer = ManagedPixelBuffer::new(100, 100, PixelFormat::rgbx8888());
//! let red = buffer.pixel_format().pack_rgb(255, 0, 0);
//! buffer.fill_rect(Rect::new(10, 10, 50, 50), &red).unwrap();
//! assert_eq!(buffer.dimensions(), (100, 100));
//! ```

use crate::{MutablePixelBuffer, PixelBuffer, PixelFormat};
use anyhow::{anyhow, Result};
use rfb_common::Rect;

/// Owns its pixels in a single contiguous `Vec<u8>`, rows tightly packed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedPixelBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
}

impl ManagedPixelBuffer {
    /// Allocate a zeroed buffer.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let bpp = format.bytes_per_pixel() as usize;
        Self {
            width,
            height,
            format,
            data: vec![0u8; width as usize * height as usize * bpp],
        }
    }

    /// Change the geometry. Pixel contents are reset to zero.
    pub fn resize(&mut self, width: u32, height: u32) {
        let bpp = self.format.bytes_per_pixel() as usize;
        self.width = width;
        self.height = height;
        self.data.clear();
        self.data.resize(width as usize * height as usize * bpp, 0);
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row length in pixels.
    pub fn stride(&self) -> usize {
        self.width as usize
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Bytes of the pixel at (`x`, `y`), or `None` if outside the buffer.
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let bpp = self.format.bytes_per_pixel() as usize;
        let start = (y as usize * self.stride() + x as usize) * bpp;
        self.data.get(start..start + bpp)
    }

    /// Packed 8-bit RGB copy of the whole buffer, row-major, 3 bytes per pixel.
    pub fn to_rgb24(&self) -> Vec<u8> {
        let bpp = self.format.bytes_per_pixel() as usize;
        let mut out = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        for px in self.data.chunks_exact(bpp) {
            out.extend_from_slice(&self.format.unpack_rgb(px).unwrap_or([0, 0, 0]));
        }
        out
    }

    fn validate_rect(&self, rect: Rect) -> Result<()> {
        if !rect.fits_within(self.width, self.height) {
            return Err(anyhow!(
                "Rectangle out of bounds: {} (buffer size: {}x{})",
                rect,
                self.width,
                self.height
            ));
        }
        Ok(())
    }

    fn offset(&self, x: i32, y: i32) -> usize {
        (y as usize * self.stride() + x as usize) * self.format.bytes_per_pixel() as usize
    }
}

impl PixelBuffer for ManagedPixelBuffer {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn pixel_format(&self) -> &PixelFormat {
        &self.format
    }

    fn read_rect(&self, rect: Rect) -> Option<Vec<u8>> {
        self.validate_rect(rect).ok()?;
        let row_bytes = rect.width as usize * self.format.bytes_per_pixel() as usize;
        let mut out = Vec::with_capacity(row_bytes * rect.height as usize);
        for y in 0..rect.height as i32 {
            let start = self.offset(rect.x, rect.y + y);
            out.extend_from_slice(&self.data[start..start + row_bytes]);
        }
        Some(out)
    }
}

impl MutablePixelBuffer for ManagedPixelBuffer {
    fn fill_rect(&mut self, rect: Rect, pixel: &[u8]) -> Result<()> {
        self.validate_rect(rect)?;

        let bpp = self.format.bytes_per_pixel() as usize;
        if pixel.len() != bpp {
            return Err(anyhow!(
                "Invalid pixel size: got {} bytes, expected {}",
                pixel.len(),
                bpp
            ));
        }

        for y in 0..rect.height as i32 {
            let start = self.offset(rect.x, rect.y + y);
            let row = &mut self.data[start..start + rect.width as usize * bpp];
            for px in row.chunks_exact_mut(bpp) {
                px.copy_from_slice(pixel);
            }
        }
        Ok(())
    }

    fn image_rect(&mut self, dest: Rect, pixels: &[u8], stride: usize) -> Result<()> {
        self.validate_rect(dest)?;
        if dest.is_empty() {
            return Ok(());
        }

        let bpp = self.format.bytes_per_pixel() as usize;
        let row_bytes = dest.width as usize * bpp;
        let src_stride = if stride == 0 { dest.width as usize } else { stride } * bpp;

        let required = src_stride * (dest.height as usize - 1) + row_bytes;
        if pixels.len() < required {
            return Err(anyhow!(
                "Insufficient source data: got {} bytes, need at least {}",
                pixels.len(),
                required
            ));
        }

        for y in 0..dest.height as usize {
            let dst = self.offset(dest.x, dest.y + y as i32);
            let src = y * src_stride;
            self.data[dst..dst + row_bytes].copy_from_slice(&pixels[src..src + row_bytes]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(w: u32, h: u32) -> ManagedPixelBuffer {
        ManagedPixelBuffer::new(w, h, PixelFormat::rgbx8888())
    }

    #[test]
    fn test_create_buffer() {
        let buffer = buffer(100, 80);
        assert_eq!(buffer.dimensions(), (100, 80));
        assert_eq!(buffer.stride(), 100);
        assert_eq!(buffer.data().len(), 100 * 80 * 4);
    }

    #[test]
    fn test_resize_clears() {
        let mut buffer = buffer(4, 4);
        buffer.fill_rect(Rect::full(4, 4), &[1, 2, 3, 0]).unwrap();
        buffer.resize(8, 2);
        assert_eq!(buffer.dimensions(), (8, 2));
        assert_eq!(buffer.data().len(), 8 * 2 * 4);
        assert!(buffer.data().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_fill_rect() {
        let mut buffer = buffer(100, 100);
        let red = buffer.pixel_format().pack_rgb(255, 0, 0);
        buffer.fill_rect(Rect::new(10, 10, 20, 20), &red).unwrap();

        assert_eq!(buffer.pixel(15, 15).unwrap(), &red[..]);
        assert_eq!(buffer.pixel(9, 15).unwrap(), &[0, 0, 0, 0]);
        assert_eq!(buffer.pixel(30, 30).unwrap(), &[0, 0, 0, 0]);
    }

    #[test]
    fn test_fill_rect_rejects_wrong_pixel_size() {
        let mut buffer = buffer(10, 10);
        assert!(buffer.fill_rect(Rect::new(0, 0, 1, 1), &[1, 2, 3]).is_err());
    }

    #[test]
    fn test_image_rect_and_read_back() {
        let mut buffer = buffer(10, 10);
        let pixels: Vec<u8> = (0..2 * 3 * 4).map(|i| i as u8).collect();
        buffer.image_rect(Rect::new(4, 5, 2, 3), &pixels, 0).unwrap();
        assert_eq!(buffer.read_rect(Rect::new(4, 5, 2, 3)).unwrap(), pixels);
    }

    #[test]
    fn test_image_rect_with_stride() {
        let mut buffer = buffer(4, 4);
        // Source rows are 3 pixels wide, only the first 2 are copied.
        let src: Vec<u8> = (0..3 * 2 * 4).map(|i| i as u8).collect();
        buffer.image_rect(Rect::new(0, 0, 2, 2), &src, 3).unwrap();
        assert_eq!(buffer.pixel(0, 1).unwrap(), &src[12..16]);
    }

    #[test]
    fn test_out_of_bounds_rejected() {
        let mut buffer = buffer(10, 10);
        let before = buffer.clone();
        assert!(buffer.fill_rect(Rect::new(5, 5, 6, 1), &[0, 0, 0, 0]).is_err());
        assert!(buffer.image_rect(Rect::new(0, 9, 1, 2), &[0; 8], 0).is_err());
        assert!(buffer.read_rect(Rect::new(0, 0, 11, 1)).is_none());
        assert_eq!(buffer, before);
    }

    #[test]
    fn test_insufficient_source_data() {
        let mut buffer = buffer(10, 10);
        let err = buffer.image_rect(Rect::new(0, 0, 2, 2), &[0; 15], 0).unwrap_err();
        assert!(err.to_string().contains("Insufficient source data"));
    }

    #[test]
    fn test_to_rgb24() {
        let mut buffer = buffer(2, 1);
        buffer.fill_rect(Rect::new(1, 0, 1, 1), &[10, 20, 30, 0]).unwrap();
        assert_eq!(buffer.to_rgb24(), vec![0, 0, 0, 10, 20, 30]);
    }
}
