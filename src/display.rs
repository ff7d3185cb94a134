//! Display identity and geometry.
//!
//! A [`DisplayDescriptor`] is reported by the grab backend; the `id` is
//! stable per physical display across captures, while display set
//! membership and bounds may change between captures (hot-plug,
//! resolution switches).

use serde::{Deserialize, Serialize};

/// Stable identifier for a physical display.
pub type DisplayId = u32;

/// One physical display as reported by the grab backend.
///
/// Width and height are derived from the virtual-desktop bounds rather
/// than stored, so a descriptor can never carry inconsistent geometry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DisplayDescriptor {
    /// Stable display id.
    pub id: DisplayId,
    /// Human-readable monitor name.
    pub friendly_name: String,
    /// Whether this is the primary display.
    pub is_primary: bool,
    /// Left edge in virtual-desktop coordinates.
    pub left: i32,
    /// Top edge in virtual-desktop coordinates.
    pub top: i32,
    /// Right edge in virtual-desktop coordinates (exclusive).
    pub right: i32,
    /// Bottom edge in virtual-desktop coordinates (exclusive).
    pub bottom: i32,
}

impl DisplayDescriptor {
    /// Width in pixels.
    pub fn width(&self) -> u32 {
        (self.right - self.left).max(0) as u32
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        (self.bottom - self.top).max(0) as u32
    }
}
