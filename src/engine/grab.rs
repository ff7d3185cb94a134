//! Interface to the external screen-grab backend.
//!
//! The OS-level capture implementation (DXGI duplication, BitBlt
//! fallback, or another platform's equivalent) lives outside this
//! crate; the engine consumes it through [`GrabSource`]. A backend may
//! optionally report driver-level dirty and move rectangles, in which
//! case the engine skips its own software diffing for that capture.

use crate::display::{DisplayDescriptor, DisplayId};
use crate::error::MiraError;
use crate::video::frame::{DirtyRegion, MoveRegion, RawFrame};

// ── GrabOutput ───────────────────────────────────────────────────

/// One successful grab.
#[derive(Debug, Clone)]
pub struct GrabOutput {
    /// The full raw frame (BGRA).
    pub frame: RawFrame,
    /// Dirty rectangles the driver itself diffed. `Some(&[])` means
    /// the driver diffed and found nothing; `None` means the backend
    /// does not diff and the engine must.
    pub dirty_regions: Option<Vec<DirtyRegion>>,
    /// Move hints from the driver, passed through unmodified.
    pub move_regions: Vec<MoveRegion>,
}

impl GrabOutput {
    /// A grab carrying only the full frame (no driver diff data).
    pub fn full_frame(frame: RawFrame) -> Self {
        Self {
            frame,
            dirty_regions: None,
            move_regions: Vec::new(),
        }
    }
}

// ── GrabSource ───────────────────────────────────────────────────

/// The external grab backend, as seen by the capture engine.
///
/// Retry policy (e.g. falling back from DXGI to BitBlt) is the
/// backend's own concern; the engine surfaces a grab failure as a
/// failed capture and simply tries again next cycle.
pub trait GrabSource: Send {
    /// Enumerate the displays currently available for capture.
    fn displays(&mut self) -> Result<Vec<DisplayDescriptor>, MiraError>;

    /// Grab the current contents of one display.
    fn capture(&mut self, display: DisplayId) -> Result<GrabOutput, MiraError>;
}
