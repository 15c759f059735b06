//! Pixel buffer traits.
//!
//! Decoders write through [`MutablePixelBuffer`] so they never need to know
//! how the destination stores its pixels. Every write is bounds-checked
//! against the buffer dimensions; an out-of-range rectangle is an error and
//! leaves the buffer untouched.

use crate::PixelFormat;
use anyhow::Result;
use rfb_common::Rect;

/// Read access to a rectangular pixel surface.
///
/// Buffers are `Send` so a decoder holding `&mut dyn MutablePixelBuffer`
/// across an await can run on a spawned task.
pub trait PixelBuffer: Send {
    /// Width and height in pixels.
    fn dimensions(&self) -> (u32, u32);

    fn pixel_format(&self) -> &PixelFormat;

    /// Copy `rect` out as tightly packed rows (stride == `rect.width`).
    ///
    /// Returns `None` if `rect` does not fit inside the buffer.
    fn read_rect(&self, rect: Rect) -> Option<Vec<u8>>;
}

/// Write access used by decoders.
pub trait MutablePixelBuffer: PixelBuffer {
    /// Fill `rect` with a single pixel, given in the buffer's pixel format.
    fn fill_rect(&mut self, rect: Rect, pixel: &[u8]) -> Result<()>;

    /// Copy pixel rows into `dest`.
    ///
    /// `stride` is the source row length in pixels; 0 means tightly packed.
    fn image_rect(&mut self, dest: Rect, pixels: &[u8], stride: usize) -> Result<()>;
}
