//! Pixel format descriptions and conversions.
//!
//! Only true-colour formats are handled. A pixel value is assembled from
//! `bytes_per_pixel()` bytes in the format's byte order; each channel is then
//! extracted with `(value >> shift) & max`.
//!
//! Stride values passed around alongside pixel data are measured in
//! **pixels**, not bytes.
//!
//! ```
//! use rfb_pixelbuffer::PixelFormat;
//!
//! let pf = PixelFormat::rgbx8888();
//! assert_eq!(pf.pack_rgb(0x11, 0x22, 0x33), [0x11, 0x22, 0x33, 0x00]);
//! assert_eq!(pf.unpack_rgb(&[0x11, 0x22, 0x33, 0x00]), Some([0x11, 0x22, 0x33]));
//! ```

use rfb_protocol::messages::types::PixelFormat as WirePixelFormat;

/// Local pixel format. Mirrors the wire `PixelFormat` with real booleans.
#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub struct PixelFormat {
    pub bits_per_pixel: u8,
    pub depth: u8,
    pub big_endian: bool,
    pub true_color: bool,
    pub red_max: u16,
    pub green_max: u16,
    pub blue_max: u16,
    pub red_shift: u8,
    pub green_shift: u8,
    pub blue_shift: u8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> u8 {
        self.bits_per_pixel.div_ceil(8)
    }

    /// 32bpp little-endian with red in the lowest byte, so a pixel reads
    /// R, G, B, X in memory. This is the format the client asks servers for.
    pub const fn rgbx8888() -> Self {
        Self {
            bits_per_pixel: 32,
            depth: 24,
            big_endian: false,
            true_color: true,
            red_max: 255,
            green_max: 255,
            blue_max: 255,
            red_shift: 0,
            green_shift: 8,
            blue_shift: 16,
        }
    }

    /// True for 32bpp, depth 24, true colour with full 8-bit channels. Tight
    /// sends such pixels as 3-byte RGB (TPIXEL).
    pub fn is_888(&self) -> bool {
        self.bits_per_pixel == 32
            && self.depth == 24
            && self.true_color
            && self.red_max == 255
            && self.green_max == 255
            && self.blue_max == 255
    }

    /// Pack 8-bit RGB into this format, scaling to the channel maxima.
    pub fn pack_rgb(&self, r: u8, g: u8, b: u8) -> Vec<u8> {
        let mut out = vec![0u8; self.bytes_per_pixel() as usize];
        self.pack_rgb_into(r, g, b, &mut out);
        out
    }

    /// Like [`pack_rgb`](Self::pack_rgb) but writes into `out`, which must
    /// hold at least `bytes_per_pixel()` bytes.
    pub fn pack_rgb_into(&self, r: u8, g: u8, b: u8, out: &mut [u8]) {
        let scale = |v: u8, max: u16| (v as u32 * max as u32) / 255;
        let value = (scale(r, self.red_max) << self.red_shift)
            | (scale(g, self.green_max) << self.green_shift)
            | (scale(b, self.blue_max) << self.blue_shift);

        let bpp = self.bytes_per_pixel() as usize;
        for i in 0..bpp.min(out.len()) {
            let byte = (value >> (8 * i)) as u8;
            if self.big_endian {
                out[bpp - 1 - i] = byte;
            } else {
                out[i] = byte;
            }
        }
    }

    /// Unpack a pixel into 8-bit RGB. Returns `None` if `pixel` is shorter
    /// than `bytes_per_pixel()` or a channel max is zero.
    pub fn unpack_rgb(&self, pixel: &[u8]) -> Option<[u8; 3]> {
        self.channels(pixel).map(|c| self.channels_to_rgb(c))
    }

    /// Raw channel values of a pixel, each in `0..=max`.
    pub fn channels(&self, pixel: &[u8]) -> Option<[u32; 3]> {
        let bpp = self.bytes_per_pixel() as usize;
        if pixel.len() < bpp || self.channel_maxima().contains(&0) {
            return None;
        }

        let value = if self.big_endian {
            pixel[..bpp].iter().fold(0u32, |acc, &b| (acc << 8) | b as u32)
        } else {
            pixel[..bpp]
                .iter()
                .rev()
                .fold(0u32, |acc, &b| (acc << 8) | b as u32)
        };

        Some([
            (value >> self.red_shift) & self.red_max as u32,
            (value >> self.green_shift) & self.green_max as u32,
            (value >> self.blue_shift) & self.blue_max as u32,
        ])
    }

    pub fn channel_maxima(&self) -> [u32; 3] {
        [
            self.red_max as u32,
            self.green_max as u32,
            self.blue_max as u32,
        ]
    }

    /// Scale raw channel values to 8 bits.
    pub fn channels_to_rgb(&self, channels: [u32; 3]) -> [u8; 3] {
        let maxima = self.channel_maxima();
        let mut rgb = [0u8; 3];
        for i in 0..3 {
            if maxima[i] != 0 {
                rgb[i] = ((channels[i].min(maxima[i]) * 255) / maxima[i]) as u8;
            }
        }
        rgb
    }
}

impl From<WirePixelFormat> for PixelFormat {
    fn from(pf: WirePixelFormat) -> Self {
        Self {
            bits_per_pixel: pf.bits_per_pixel,
            depth: pf.depth,
            big_endian: pf.big_endian != 0,
            true_color: pf.true_color != 0,
            red_max: pf.red_max,
            green_max: pf.green_max,
            blue_max: pf.blue_max,
            red_shift: pf.red_shift,
            green_shift: pf.green_shift,
            blue_shift: pf.blue_shift,
        }
    }
}

impl From<PixelFormat> for WirePixelFormat {
    fn from(pf: PixelFormat) -> Self {
        Self {
            bits_per_pixel: pf.bits_per_pixel,
            depth: pf.depth,
            big_endian: u8::from(pf.big_endian),
            true_color: u8::from(pf.true_color),
            red_max: pf.red_max,
            green_max: pf.green_max,
            blue_max: pf.blue_max,
            red_shift: pf.red_shift,
            green_shift: pf.green_shift,
            blue_shift: pf.blue_shift,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgbx_layout() {
        let pf = PixelFormat::rgbx8888();
        assert_eq!(pf.bytes_per_pixel(), 4);
        assert!(pf.is_888());
        assert_eq!(pf.pack_rgb(255, 0, 0), vec![255, 0, 0, 0]);
        assert_eq!(pf.pack_rgb(0, 0, 255), vec![0, 0, 255, 0]);
    }

    #[test]
    fn test_big_endian_bgr() {
        let pf = PixelFormat {
            big_endian: true,
            red_shift: 16,
            green_shift: 8,
            blue_shift: 0,
            ..PixelFormat::rgbx8888()
        };
        let px = pf.pack_rgb(0xAA, 0xBB, 0xCC);
        assert_eq!(px, vec![0x00, 0xAA, 0xBB, 0xCC]);
        assert_eq!(pf.unpack_rgb(&px), Some([0xAA, 0xBB, 0xCC]));
    }

    #[test]
    fn test_rgb565_scaling() {
        let pf = PixelFormat {
            bits_per_pixel: 16,
            depth: 16,
            big_endian: false,
            true_color: true,
            red_max: 31,
            green_max: 63,
            blue_max: 31,
            red_shift: 11,
            green_shift: 5,
            blue_shift: 0,
        };
        let white = pf.pack_rgb(255, 255, 255);
        assert_eq!(white, vec![0xFF, 0xFF]);
        assert_eq!(pf.unpack_rgb(&white), Some([255, 255, 255]));
        assert_eq!(pf.channels(&white), Some([31, 63, 31]));
        assert_eq!(pf.channels_to_rgb([0, 63, 0]), [0, 255, 0]);
        assert!(!pf.is_888());
    }

    #[test]
    fn test_unpack_short_pixel() {
        assert_eq!(PixelFormat::rgbx8888().unpack_rgb(&[1, 2]), None);
    }

    #[test]
    fn test_wire_round_trip() {
        let wire: WirePixelFormat = PixelFormat::rgbx8888().into();
        assert_eq!(wire.big_endian, 0);
        assert_eq!(wire.true_color, 1);
        assert_eq!(PixelFormat::from(wire), PixelFormat::rgbx8888());
    }
}
