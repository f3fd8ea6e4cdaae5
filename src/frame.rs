//! Frame containers.
//!
//! - `Frame`: one captured RGB24 image, owned by the loop for a single iteration.
//! - `AnnotatedFrame`: a copy of a `Frame` with detection rectangles drawn on it.
//!
//! The loop keeps at most one of each. There is no frame history.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};

/// Bytes per pixel for the packed RGB24 layout every source normalizes to.
pub const RGB_CHANNELS: usize = 3;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One captured image.
///
/// Pixels are packed row-major RGB24 (`width * height * 3` bytes).
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    captured_at: DateTime<Local>,
}

impl Frame {
    /// Wrap an RGB24 buffer. Fails when the buffer length does not match the dimensions.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        Self::with_capture_time(data, width, height, Local::now())
    }

    pub fn with_capture_time(
        data: Vec<u8>,
        width: u32,
        height: u32,
        captured_at: DateTime<Local>,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        let expected = rgb_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "frame length mismatch: expected {} bytes for {}x{}, got {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            captured_at,
        })
    }

    /// Solid-color frame, mostly useful for tests and synthetic sources.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Result<Self> {
        let len = rgb_len(width, height)?;
        let mut data = Vec::with_capacity(len);
        for _ in 0..len / RGB_CHANNELS {
            data.extend_from_slice(&rgb);
        }
        Self::new(data, width, height)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn captured_at(&self) -> DateTime<Local> {
        self.captured_at
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Pixel at `(x, y)`, or `None` when out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = self.offset(x, y);
        Some([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        ])
    }

    /// Set one pixel. Out-of-bounds writes are ignored.
    pub fn set_pixel(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let offset = self.offset(x, y);
        self.data[offset..offset + RGB_CHANNELS].copy_from_slice(&rgb);
    }

    /// Convert to an `image` buffer for encoding.
    pub fn to_rgb_image(&self) -> Result<image::RgbImage> {
        image::RgbImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| anyhow!("frame buffer does not fit {}x{}", self.width, self.height))
    }

    pub fn from_rgb_image(img: image::RgbImage) -> Result<Self> {
        let (width, height) = img.dimensions();
        Self::new(img.into_raw(), width, height)
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * RGB_CHANNELS
    }
}

pub(crate) fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(RGB_CHANNELS))
        .ok_or_else(|| anyhow!("frame dimensions overflow: {}x{}", width, height))
}

// ----------------------------------------------------------------------------
// AnnotatedFrame
// ----------------------------------------------------------------------------

/// A frame copy with one rectangle drawn per matching detection.
///
/// Built by `detect::annotate`. Replaced, never merged, when the next batch arrives.
#[derive(Clone, Debug, PartialEq)]
pub struct AnnotatedFrame {
    frame: Frame,
    rects: Vec<crate::detect::PixelRect>,
}

impl AnnotatedFrame {
    pub(crate) fn new(frame: Frame, rects: Vec<crate::detect::PixelRect>) -> Self {
        Self { frame, rects }
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Rectangles drawn on this frame, in detection order.
    pub fn rects(&self) -> &[crate::detect::PixelRect] {
        &self.rects
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
