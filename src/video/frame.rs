//! Frame and region value types for the capture pipeline.
//!
//! These are the passive pixel-memory descriptions the rest of the
//! pipeline operates on. [`RawFrame`] is the internal representation of
//! a grabbed frame; [`DirtyRegion`], [`MoveRegion`] and [`EncodedRegion`]
//! are the region shapes that travel (as metadata) toward the session
//! layer.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

// ── PixelFormat ──────────────────────────────────────────────────

/// Pixel layout for raw captured frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 4 bytes per pixel: Blue, Green, Red, Alpha (DXGI default).
    Bgra8,
    /// 4 bytes per pixel: Red, Green, Blue, Alpha.
    Rgba8,
}

impl PixelFormat {
    /// Bytes consumed by a single pixel in this format.
    pub const fn bytes_per_pixel(self) -> usize {
        4
    }
}

// ── Rect ─────────────────────────────────────────────────────────

/// A rectangle in frame coordinates (pixels).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rect {
    /// Left edge in pixels.
    pub x: u32,
    /// Top edge in pixels.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle covering a whole `width × height` frame.
    pub fn full_frame(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Right edge (exclusive).
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// Bottom edge (exclusive).
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// Whether two rectangles overlap (touching edges do not count).
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// Smallest rectangle covering both `self` and `other`.
    pub fn union(&self, other: &Rect) -> Rect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        Rect::new(x, y, right - x, bottom - y)
    }

    /// Grow the rectangle by `margin` pixels on all sides, clamping the
    /// origin at zero.
    pub fn inflated(&self, margin: u32) -> Rect {
        let x = self.x.saturating_sub(margin);
        let y = self.y.saturating_sub(margin);
        Rect::new(
            x,
            y,
            self.width + (self.x - x) + margin,
            self.height + (self.y - y) + margin,
        )
    }

    /// Area in pixels.
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

// ── RawFrame ─────────────────────────────────────────────────────

/// A raw, uncompressed frame obtained from the grab backend.
///
/// The `data` buffer holds `height` rows of `stride` bytes each.
/// `stride` is `width * 4` unless the backend reports GPU row padding
/// explicitly (e.g. DXGI may pad rows to 256-byte boundaries).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Row pitch in **bytes** (may exceed `width * 4`).
    pub stride: u32,
    /// Pixel layout.
    pub format: PixelFormat,
    /// Raw pixel data — `stride * height` bytes.
    pub data: Vec<u8>,
}

impl RawFrame {
    /// Build a tightly packed BGRA frame (`stride == width * 4`).
    ///
    /// # Panics
    ///
    /// Panics if `data.len() != width * height * 4`.
    pub fn new_bgra(width: u32, height: u32, data: Vec<u8>) -> Self {
        assert_eq!(
            data.len(),
            width as usize * height as usize * 4,
            "BGRA buffer must be width * height * 4 bytes"
        );
        Self {
            width,
            height,
            stride: width * 4,
            format: PixelFormat::Bgra8,
            data,
        }
    }

    /// Total byte size the raw bitmap occupies (including row padding).
    pub fn byte_len(&self) -> usize {
        self.stride as usize * self.height as usize
    }

    /// Byte size of the frame with padding stripped.
    pub fn packed_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }

    /// Returns the packed pixel bytes of one row (padding stripped).
    pub fn packed_row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride as usize;
        &self.data[start..start + self.width as usize * 4]
    }

    /// Copy a rectangular sub-region into a tightly packed buffer,
    /// independent of the source stride.
    ///
    /// # Panics
    ///
    /// Panics if `rect` does not lie within the frame.
    pub fn extract_region(&self, rect: Rect) -> DirtyRegion {
        assert!(
            rect.right() <= self.width && rect.bottom() <= self.height,
            "region outside frame bounds"
        );
        let row_bytes = rect.width as usize * 4;
        let mut pixels = Vec::with_capacity(row_bytes * rect.height as usize);
        for row in 0..rect.height {
            let y = (rect.y + row) as usize;
            let offset = y * self.stride as usize + rect.x as usize * 4;
            pixels.extend_from_slice(&self.data[offset..offset + row_bytes]);
        }
        DirtyRegion {
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
            pixels,
        }
    }
}

// ── DirtyRegion ──────────────────────────────────────────────────

/// A changed rectangle with its own tightly packed pixel buffer
/// (`width * height * 4` bytes, no stride padding).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirtyRegion {
    pub x: u32,
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Packed BGRA pixels for exactly this rectangle.
    pub pixels: Vec<u8>,
}

impl DirtyRegion {
    /// Geometry of this region.
    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }
}

// ── MoveRegion ───────────────────────────────────────────────────

/// A hint from the grab backend that a block of pixels merely
/// relocated. Passed through unmodified; this core never produces one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MoveRegion {
    pub source_x: u32,
    pub source_y: u32,
    pub dest_x: u32,
    pub dest_y: u32,
    pub width: u32,
    pub height: u32,
}

// ── EncodedRegion ────────────────────────────────────────────────

/// One JPEG-compressed region, ready for delivery to a viewer.
///
/// A full-frame encode is a single region whose rectangle equals the
/// whole display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncodedRegion {
    /// Whether this region is part of a keyframe.
    pub keyframe: bool,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Compressed JPEG bytes. Owned — remains valid after the engine
    /// state it came from is torn down.
    pub data: Bytes,
}

impl EncodedRegion {
    /// Geometry of this region.
    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }
}

// ── Tests ────────────────────────────────────────────────────────
