//! Per-display codec state and the keyframe/delta decision.
//!
//! One [`CodecState`] exists per display id. It owns the previous-frame
//! double buffer, the periodic keyframe timer, the force-keyframe flag
//! set when a new viewer selects the display, and the scroll
//! accumulators carried alongside (wheel emulation — unrelated to the
//! frame decision itself).

use std::time::{Duration, Instant};

use crate::video::dirty::{DetectOutcome, DirtyDetector};
use crate::video::frame::{DirtyRegion, RawFrame, Rect};

/// A keyframe is forced whenever this much time has passed since the
/// last one, even if nothing on screen changed.
pub const KEYFRAME_INTERVAL: Duration = Duration::from_millis(3000);

/// One wheel notch in OS scroll units.
pub const SCROLL_NOTCH: i32 = 120;

// ── FrameDecision ────────────────────────────────────────────────

/// Classification of one capture attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameDecision {
    /// Transmit the whole frame.
    Keyframe,
    /// Transmit the listed changed rectangles (software diff).
    Delta(Vec<Rect>),
    /// Transmit the driver-supplied dirty regions as-is (the backend
    /// already did the diffing — software diff skipped).
    DriverDelta,
    /// Nothing changed; skip the frame entirely.
    NoChange,
}

impl FrameDecision {
    /// Whether this decision transmits the entire frame.
    pub fn is_keyframe(&self) -> bool {
        matches!(self, FrameDecision::Keyframe)
    }
}

// ── CodecState ───────────────────────────────────────────────────

/// Keyframe/delta state machine for a single display.
///
/// States are `NoPreviousFrame` (before the first successful capture
/// or right after a resolution change) and `Steady`. The orchestrator
/// owns this exclusively; capture requests for one display are
/// serialized by the caller, so no internal locking happens here.
#[derive(Debug)]
pub struct CodecState {
    width: u32,
    height: u32,
    previous: Option<RawFrame>,
    last_keyframe: Instant,
    keyframe_interval: Duration,
    force_next_keyframe: bool,
    v_scroll: i32,
    h_scroll: i32,
}

impl Default for CodecState {
    fn default() -> Self {
        Self::new(KEYFRAME_INTERVAL)
    }
}

impl CodecState {
    /// Create state with an explicit periodic-keyframe interval.
    pub fn new(keyframe_interval: Duration) -> Self {
        Self {
            width: 0,
            height: 0,
            previous: None,
            last_keyframe: Instant::now(),
            keyframe_interval,
            force_next_keyframe: false,
            v_scroll: 0,
            h_scroll: 0,
        }
    }

    /// Request that the next capture be a keyframe (new viewer joined;
    /// never show it stale content).
    pub fn force_keyframe(&mut self) {
        self.force_next_keyframe = true;
    }

    /// Whether a previous frame is currently held.
    pub fn has_previous(&self) -> bool {
        self.previous.is_some()
    }

    /// Dimensions of the last committed capture (`0 × 0` before the
    /// first one).
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Classify one capture attempt. Decision order:
    ///
    /// 1. Dimensions changed → drop the previous frame, keyframe.
    /// 2. No previous frame, forced, or keyframe timer elapsed → keyframe.
    /// 3. Driver supplied dirty rects → trust them, skip software diff.
    /// 4. Software diff → no-change / keyframe / delta regions.
    ///
    /// This only *classifies* — nothing is adopted as the new previous
    /// frame until [`commit`](Self::commit) is called after the encode
    /// or shared-memory write succeeded. A failed capture therefore
    /// leaves the previous frame untouched and the next cycle retries.
    pub fn classify(
        &mut self,
        frame: &RawFrame,
        driver_dirty: Option<&[DirtyRegion]>,
        detector: &DirtyDetector,
    ) -> FrameDecision {
        if frame.width != self.width || frame.height != self.height {
            // Resize invalidates the previous frame outright; even if
            // this capture later fails, the old buffer is useless.
            self.previous = None;
            self.width = frame.width;
            self.height = frame.height;
            return FrameDecision::Keyframe;
        }

        if self.force_next_keyframe || self.last_keyframe.elapsed() >= self.keyframe_interval {
            return FrameDecision::Keyframe;
        }

        let Some(previous) = &self.previous else {
            return FrameDecision::Keyframe;
        };

        if let Some(dirty) = driver_dirty {
            // The backend already diffed. An empty list means it saw
            // no change at all.
            return if dirty.is_empty() {
                FrameDecision::NoChange
            } else {
                FrameDecision::DriverDelta
            };
        }

        match detector.detect(frame, previous) {
            DetectOutcome::NoChange => FrameDecision::NoChange,
            DetectOutcome::Keyframe => FrameDecision::Keyframe,
            DetectOutcome::Regions(regions) => FrameDecision::Delta(regions),
        }
    }

    /// Record a successful (non-no-change) capture: the current frame
    /// becomes the new previous frame, and a keyframe send resets the
    /// timer and clears the force flag.
    pub fn commit(&mut self, frame: &RawFrame, keyframe: bool) {
        self.adopt(frame);
        if keyframe {
            self.last_keyframe = Instant::now();
            self.force_next_keyframe = false;
        }
    }

    /// Copy `frame` into the retained previous-frame buffer, reusing
    /// the existing allocation when the layout matches (double-buffer
    /// discipline — no per-capture allocation churn in steady state).
    fn adopt(&mut self, frame: &RawFrame) {
        match &mut self.previous {
            Some(prev)
                if prev.data.len() == frame.data.len()
                    && prev.stride == frame.stride
                    && prev.width == frame.width
                    && prev.height == frame.height =>
            {
                prev.data.copy_from_slice(&frame.data);
                prev.format = frame.format;
            }
            _ => {
                self.previous = Some(frame.clone());
            }
        }
        self.width = frame.width;
        self.height = frame.height;
    }

    // ── Scroll accumulation ──────────────────────────────────────

    /// Fold raw wheel deltas into the accumulators.
    pub fn accumulate_scroll(&mut self, vertical: i32, horizontal: i32) {
        self.v_scroll += vertical;
        self.h_scroll += horizontal;
    }

    /// Drain whole wheel notches, keeping sub-notch remainders for the
    /// next injection cycle. Returns `(vertical, horizontal)` notch
    /// counts (signed).
    pub fn take_scroll_steps(&mut self) -> (i32, i32) {
        let v = self.v_scroll / SCROLL_NOTCH;
        let h = self.h_scroll / SCROLL_NOTCH;
        self.v_scroll -= v * SCROLL_NOTCH;
        self.h_scroll -= h * SCROLL_NOTCH;
        (v, h)
    }

    #[cfg(test)]
    pub(crate) fn backdate_keyframe_timer(&mut self, by: Duration) {
        self.last_keyframe -= by;
    }
}

// ── Tests ────────────────────────────────────────────────────────
