//! Framebuffer bookkeeping shared between a connection's receive task and
//! its readers.
//!
//! The receive task decodes each FramebufferUpdate into a private working
//! buffer and then publishes the changed rectangles here in one locked
//! operation, so a reader never sees half an update. Readers take a
//! [`Snapshot`], which drains the dirty list and the update counters.

use crate::errors::RfbClientError;
use rfb_common::Rect;
use rfb_pixelbuffer::{ManagedPixelBuffer, MutablePixelBuffer, PixelBuffer, PixelFormat};

/// Dirty rectangles kept before they are collapsed into their bounding box.
const MAX_DIRTY_RECTS: usize = 256;

/// Counters over the updates applied since the last snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateStats {
    /// FramebufferUpdate messages applied.
    pub updates: u64,
    /// Rectangles decoded (pseudo-rectangles excluded).
    pub rectangles: u64,
    /// Pixels covered by those rectangles.
    pub pixels: u64,
    /// Wire bytes consumed, message headers included.
    pub bytes: u64,
}

impl UpdateStats {
    fn absorb(&mut self, other: &UpdateStats) {
        self.updates += other.updates;
        self.rectangles += other.rectangles;
        self.pixels += other.pixels;
        self.bytes += other.bytes;
    }
}

/// Result of decoding one FramebufferUpdate into the working buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedUpdate {
    /// Regions written by decoders.
    pub dirty: Vec<Rect>,
    /// New geometry if the update carried a DesktopSize rectangle.
    pub resized: Option<(u32, u32)>,
    /// Counters for this update alone.
    pub stats: UpdateStats,
}

/// Dense pixel copy of a framebuffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Layout of `data`; always RGBX8888.
    pub pixel_format: PixelFormat,
    /// `width * height * 4` bytes, row-major, R G B X per pixel.
    pub data: Vec<u8>,
}

impl Frame {
    /// Packed RGB24 copy (`height * width * 3` bytes).
    #[must_use]
    pub fn to_rgb(&self) -> Vec<u8> {
        let bpp = self.pixel_format.bytes_per_pixel() as usize;
        let mut out = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        for px in self.data.chunks_exact(bpp) {
            out.extend_from_slice(&self.pixel_format.unpack_rgb(px).unwrap_or([0, 0, 0]));
        }
        out
    }
}

/// What a reader gets from [`FrameBuffer::take_snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Current pixels.
    pub frame: Frame,
    /// Regions changed since the previous snapshot.
    pub dirty: Vec<Rect>,
    /// Update counters since the previous snapshot.
    pub stats: UpdateStats,
}

/// Pixels, dirty regions, subscription and counters for one connection.
#[derive(Debug)]
pub struct FrameBuffer {
    buffer: ManagedPixelBuffer,
    dirty: Vec<Rect>,
    subscription: Vec<Rect>,
    stats: UpdateStats,
    unconsumed: usize,
}

impl FrameBuffer {
    /// Zeroed RGBX buffer of the negotiated size with the whole frame dirty.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            buffer: ManagedPixelBuffer::new(width, height, PixelFormat::rgbx8888()),
            dirty: vec![Rect::full(width, height)],
            subscription: Vec::new(),
            stats: UpdateStats::default(),
            unconsumed: 0,
        }
    }

    /// Current width and height.
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.buffer.dimensions()
    }

    /// The underlying pixels.
    #[must_use]
    pub fn buffer(&self) -> &ManagedPixelBuffer {
        &self.buffer
    }

    /// Current subscription. Empty means the full frame.
    #[must_use]
    pub fn subscription(&self) -> &[Rect] {
        &self.subscription
    }

    /// Replace the subscription. Every rectangle must be non-empty and lie
    /// within the framebuffer; otherwise nothing changes.
    pub fn set_subscription(&mut self, regions: Vec<Rect>) -> Result<(), RfbClientError> {
        let (width, height) = self.dimensions();
        if let Some(bad) = regions
            .iter()
            .find(|r| r.is_empty() || !r.fits_within(width, height))
        {
            return Err(RfbClientError::InvalidInput(format!(
                "region {} is empty or outside the {}x{} framebuffer",
                bad, width, height
            )));
        }
        self.subscription = regions;
        Ok(())
    }

    /// Regions to ask the server for: the subscription, or the full frame.
    #[must_use]
    pub fn request_regions(&self) -> Vec<Rect> {
        if self.subscription.is_empty() {
            let (width, height) = self.dimensions();
            vec![Rect::full(width, height)]
        } else {
            self.subscription.clone()
        }
    }

    /// Applied updates not yet consumed by a snapshot.
    #[must_use]
    pub fn unconsumed(&self) -> usize {
        self.unconsumed
    }

    /// Copy the regions an update touched from `source` (the receive task's
    /// working buffer) and record them. Returns the unconsumed update count.
    pub fn publish(
        &mut self,
        source: &ManagedPixelBuffer,
        update: &AppliedUpdate,
    ) -> Result<usize, RfbClientError> {
        if let Some((width, height)) = update.resized {
            self.resize(width, height);
        }

        if source.dimensions() != self.dimensions() {
            return Err(RfbClientError::Protocol(format!(
                "working buffer {:?} does not match framebuffer {:?}",
                source.dimensions(),
                self.dimensions()
            )));
        }

        for rect in &update.dirty {
            let pixels = source.read_rect(*rect).ok_or_else(|| {
                RfbClientError::Protocol(format!("dirty region {} outside framebuffer", rect))
            })?;
            self.buffer
                .image_rect(*rect, &pixels, rect.width as usize)
                .map_err(RfbClientError::Encoding)?;
            self.mark_dirty(*rect);
        }

        self.stats.absorb(&update.stats);
        self.unconsumed += 1;
        Ok(self.unconsumed)
    }

    /// Drain dirty regions and counters along with a copy of the pixels.
    pub fn take_snapshot(&mut self) -> Snapshot {
        self.unconsumed = 0;
        Snapshot {
            frame: self.frame(),
            dirty: std::mem::take(&mut self.dirty),
            stats: std::mem::take(&mut self.stats),
        }
    }

    /// Copy of the pixels without consuming anything.
    #[must_use]
    pub fn frame(&self) -> Frame {
        let (width, height) = self.dimensions();
        Frame {
            width,
            height,
            pixel_format: *self.buffer.pixel_format(),
            data: self.buffer.data().to_vec(),
        }
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.buffer.resize(width, height);
        let before = self.subscription.len();
        self.subscription.retain(|r| r.fits_within(width, height));
        if self.subscription.len() != before {
            tracing::info!(
                "dropped {} subscription region(s) that no longer fit {}x{}",
                before - self.subscription.len(),
                width,
                height
            );
        }
        self.dirty.clear();
        self.dirty.push(Rect::full(width, height));
    }

    fn mark_dirty(&mut self, rect: Rect) {
        if rect.is_empty() {
            return;
        }
        if self.dirty.len() >= MAX_DIRTY_RECTS {
            let bounds = self.dirty.iter().fold(rect, |acc, r| acc.union(r));
            self.dirty.clear();
            self.dirty.push(bounds);
        } else {
            self.dirty.push(rect);
        }
    }
}
