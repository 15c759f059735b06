//! Pixel formats and pixel buffers for the RFB client.
//!
//! Decoders write through [`MutablePixelBuffer`]; the connection's
//! framebuffer is a [`ManagedPixelBuffer`] in [`PixelFormat::rgbx8888`].

pub mod buffer;
pub mod format;
pub mod managed;

pub use buffer::{MutablePixelBuffer, PixelBuffer};
pub use format::PixelFormat;
pub use managed::ManagedPixelBuffer;
