//! What `step` hands back for each connection.

use crate::errors::ErrorReport;
use rfb_client::{Frame, Rect, Snapshot, UpdateStats};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Pixels plus the regions that changed since the previous step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    /// RGBX pixels, `width * height * 4` bytes.
    pub frame: Frame,
    /// Regions updated since the previous step; empty if nothing changed.
    pub dirty: Vec<Rect>,
}

impl Observation {
    /// Frame width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.frame.width
    }

    /// Frame height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.frame.height
    }

    /// Packed RGB24, row-major, `height * width * 3` bytes.
    #[must_use]
    pub fn to_rgb(&self) -> Vec<u8> {
        self.frame.to_rgb()
    }
}

/// Update counters since the previous step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Info {
    /// Framebuffer updates applied.
    #[serde(rename = "stats.vnc.updates.n")]
    pub updates: u64,
    /// Pixel rectangles decoded, pseudo-rectangles excluded.
    #[serde(rename = "stats.vnc.updates.rectangles")]
    pub rectangles: u64,
    /// Pixels covered by those rectangles.
    #[serde(rename = "stats.vnc.updates.pixels")]
    pub pixels: u64,
    /// Wire bytes consumed while reading the updates.
    #[serde(rename = "stats.vnc.updates.bytes")]
    pub bytes: u64,
}

impl From<&UpdateStats> for Info {
    fn from(stats: &UpdateStats) -> Self {
        Self {
            updates: stats.updates,
            rectangles: stats.rectangles,
            pixels: stats.pixels,
            bytes: stats.bytes,
        }
    }
}

/// One batched step result, keyed by connection name.
#[derive(Debug, Default)]
pub struct StepResult {
    /// Frame and dirty regions of every connection that answered.
    pub observations: HashMap<String, Observation>,
    /// Update counters, present exactly when an observation is.
    pub infos: HashMap<String, Info>,
    /// Per-name failures. A name can have both an error and an observation.
    pub errors: HashMap<String, ErrorReport>,
}

impl StepResult {
    pub(crate) fn absorb(&mut self, name: &str, snapshot: Snapshot) {
        self.infos.insert(name.to_string(), Info::from(&snapshot.stats));
        self.observations.insert(
            name.to_string(),
            Observation {
                frame: snapshot.frame,
                dirty: snapshot.dirty,
            },
        );
    }

    /// True when no name produced anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty() && self.infos.is_empty() && self.errors.is_empty()
    }
}
