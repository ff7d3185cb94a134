//! Capture orchestration: per-display pipelines glued end to end.
//!
//! The engine owns one [`CodecState`] (and, in shared-memory mode, one
//! [`SharedSegment`]) per display id, created lazily on first capture
//! and destroyed by [`remove_display`](CaptureEngine::remove_display).
//! Capture requests for a given display are serialized by the caller;
//! the coarse map lock here only protects creation/lookup/removal
//! across *different* displays, never concurrent writers to one
//! display's state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::display::{DisplayDescriptor, DisplayId};
use crate::engine::grab::{GrabOutput, GrabSource};
use crate::error::MiraError;
use crate::shm::{RegionWriteInfo, SegmentToken, SharedSegment};
use crate::video::dirty::{BLOCK_SIZE, DirtyDetector};
use crate::video::frame::{DirtyRegion, EncodedRegion, MoveRegion, Rect};
use crate::video::jpeg::{DEFAULT_QUALITY, RegionEncoder};
use crate::video::state::{CodecState, FrameDecision, KEYFRAME_INTERVAL};

// ── Configuration ────────────────────────────────────────────────

/// How capture payloads leave the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// Encode regions to JPEG in-process (client-local rendering).
    InProcess,
    /// Write raw regions into a per-display shared segment
    /// (session-isolated capture process); viewers read the pixels
    /// directly and only metadata travels over RPC.
    SharedMemory,
}

/// Engine construction parameters.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// JPEG quality, validated into `[10, 100]` at engine build time.
    pub quality: u8,
    /// Payload path.
    pub mode: TransportMode,
    /// Dirty-detection tile size in pixels.
    pub block_size: u32,
    /// Periodic keyframe interval.
    pub keyframe_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            quality: DEFAULT_QUALITY,
            mode: TransportMode::InProcess,
            block_size: BLOCK_SIZE,
            keyframe_interval: KEYFRAME_INTERVAL,
        }
    }
}

impl EngineConfig {
    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_mode(mut self, mode: TransportMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_keyframe_interval(mut self, interval: Duration) -> Self {
        self.keyframe_interval = interval;
        self
    }
}

// ── CaptureResult ────────────────────────────────────────────────

/// Outcome of one capture request.
///
/// Region metadata owns its bytes/offsets — it stays valid even if the
/// engine state it came from is torn down right after.
#[derive(Debug, Clone)]
pub enum CaptureResult {
    /// Nothing changed; no payload was produced and no state mutated.
    NoChanges,
    /// In-process path: JPEG-compressed regions.
    Encoded {
        keyframe: bool,
        regions: Vec<EncodedRegion>,
        moves: Vec<MoveRegion>,
    },
    /// Shared-memory path: regions written into the display's segment,
    /// to be read back by offset on the viewer side.
    Shared {
        keyframe: bool,
        /// Whether offset 0 holds an entire frame.
        has_full_frame: bool,
        regions: Vec<RegionWriteInfo>,
        moves: Vec<MoveRegion>,
    },
}

impl CaptureResult {
    /// Whether this capture transmitted the entire frame.
    pub fn is_keyframe(&self) -> bool {
        match self {
            CaptureResult::NoChanges => false,
            CaptureResult::Encoded { keyframe, .. } | CaptureResult::Shared { keyframe, .. } => {
                *keyframe
            }
        }
    }
}

// ── CaptureEngine ────────────────────────────────────────────────

struct DisplayPipeline {
    codec: CodecState,
    segment: Option<SharedSegment>,
}

impl DisplayPipeline {
    fn new(keyframe_interval: Duration) -> Self {
        Self {
            codec: CodecState::new(keyframe_interval),
            segment: None,
        }
    }
}

/// The capture orchestrator.
///
/// Sequencing per request: grab raw pixels → classify keyframe /
/// delta / no-change → encode or shared-write → return metadata. On
/// any lower-layer failure the whole capture fails; partially-written
/// metadata is never returned as success.
pub struct CaptureEngine {
    source: Mutex<Box<dyn GrabSource>>,
    pipelines: Mutex<HashMap<DisplayId, Arc<Mutex<DisplayPipeline>>>>,
    encoder: RegionEncoder,
    detector: DirtyDetector,
    mode: TransportMode,
    keyframe_interval: Duration,
}

impl CaptureEngine {
    /// Build an engine over the given grab backend.
    pub fn new(source: Box<dyn GrabSource>, config: EngineConfig) -> Result<Self, MiraError> {
        let encoder = RegionEncoder::new(config.quality)?;
        Ok(Self {
            source: Mutex::new(source),
            pipelines: Mutex::new(HashMap::new()),
            encoder,
            detector: DirtyDetector::new(config.block_size),
            mode: config.mode,
            keyframe_interval: config.keyframe_interval,
        })
    }

    /// Configured payload path.
    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    /// Displays currently reported by the grab backend.
    pub fn displays(&self) -> Result<Vec<DisplayDescriptor>, MiraError> {
        self.lock_source().displays()
    }

    /// Capture one frame for `display` and return its region metadata.
    ///
    /// In shared-memory mode a typed transport failure takes the
    /// explicit fallback branch: the same capture is encoded
    /// in-process instead of being dropped.
    pub fn request_capture(
        &self,
        display: DisplayId,
        force_keyframe: bool,
    ) -> Result<CaptureResult, MiraError> {
        let pipeline = self.pipeline(display);
        let grab = self.lock_source().capture(display)?;
        let mut p = lock(&pipeline);

        if force_keyframe {
            p.codec.force_keyframe();
        }
        let decision = p
            .codec
            .classify(&grab.frame, grab.dirty_regions.as_deref(), &self.detector);
        if decision == FrameDecision::NoChange {
            return Ok(CaptureResult::NoChanges);
        }

        let result = match self.mode {
            TransportMode::InProcess => self.encode_local(&grab, &decision)?,
            TransportMode::SharedMemory => {
                match Self::write_shared(&mut p, &grab, &decision) {
                    Ok(result) => result,
                    Err(e) if e.is_transport() => {
                        // Bound outside the macro: `tracing`'s expansion
                        // shadows `display` with `field::display`.
                        let display_id = display;
                        tracing::warn!(
                            display = display_id,
                            error = %e,
                            "shared-memory write failed; falling back to in-process encode"
                        );
                        self.encode_local(&grab, &decision)?
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        // Only a fully successful capture advances the previous frame.
        p.codec.commit(&grab.frame, decision.is_keyframe());
        Ok(result)
    }

    /// Token for `display`'s current shared segment.
    ///
    /// Callable only after the session layer has proven the caller's
    /// authorization (external concern), and only once a shared-memory
    /// capture has created the segment — before that, and after any
    /// resize recreated it, this is how clients learn the fresh token.
    pub fn request_shared_memory_token(
        &self,
        display: DisplayId,
    ) -> Result<SegmentToken, MiraError> {
        let pipeline = lock(&self.pipelines)
            .get(&display)
            .cloned()
            .ok_or(MiraError::SegmentNotFound)?;
        let p = lock(&pipeline);
        p.segment
            .as_ref()
            .filter(|s| !s.is_disposed())
            .map(|s| s.token())
            .ok_or(MiraError::SegmentNotFound)
    }

    /// Force the next capture of `display` to be a keyframe (a new
    /// viewer selected it; never serve stale content).
    pub fn request_keyframe(&self, display: DisplayId) {
        let pipeline = self.pipeline(display);
        lock(&pipeline).codec.force_keyframe();
    }

    /// Fold wheel deltas into `display`'s scroll accumulators and
    /// drain whole notches for injection.
    pub fn accumulate_scroll(
        &self,
        display: DisplayId,
        vertical: i32,
        horizontal: i32,
    ) -> (i32, i32) {
        let pipeline = self.pipeline(display);
        let mut p = lock(&pipeline);
        p.codec.accumulate_scroll(vertical, horizontal);
        p.codec.take_scroll_steps()
    }

    /// Drop `display`'s codec state and dispose its shared segment
    /// (display unplugged, viewer disconnected, session ended).
    pub fn remove_display(&self, display: DisplayId) {
        let removed = lock(&self.pipelines).remove(&display);
        if let Some(pipeline) = removed {
            let mut p = lock(&pipeline);
            if let Some(segment) = p.segment.as_mut() {
                segment.dispose();
            }
        }
    }

    /// Tear the engine down: release pooled compressors and dispose
    /// every display's segment. Safe to call with captures logically
    /// pending; already-returned metadata stays valid.
    pub fn shutdown(&self) {
        self.encoder.shutdown();
        let pipelines: Vec<_> = lock(&self.pipelines).drain().map(|(_, p)| p).collect();
        for pipeline in pipelines {
            let mut p = lock(&pipeline);
            if let Some(segment) = p.segment.as_mut() {
                segment.dispose();
            }
        }
    }

    // ── Internal ─────────────────────────────────────────────────

    fn pipeline(&self, display: DisplayId) -> Arc<Mutex<DisplayPipeline>> {
        lock(&self.pipelines)
            .entry(display)
            .or_insert_with(|| Arc::new(Mutex::new(DisplayPipeline::new(self.keyframe_interval))))
            .clone()
    }

    fn lock_source(&self) -> MutexGuard<'_, Box<dyn GrabSource>> {
        self.source.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// In-process path: JPEG per region. One failed region fails the
    /// whole capture.
    fn encode_local(
        &self,
        grab: &GrabOutput,
        decision: &FrameDecision,
    ) -> Result<CaptureResult, MiraError> {
        let keyframe = decision.is_keyframe();
        let mut regions = Vec::new();
        match decision {
            FrameDecision::Keyframe => {
                let full = grab
                    .frame
                    .extract_region(Rect::full_frame(grab.frame.width, grab.frame.height));
                regions.push(self.encoder.encode(&full, true)?);
            }
            FrameDecision::Delta(rects) => {
                for rect in rects {
                    let region = grab.frame.extract_region(*rect);
                    regions.push(self.encoder.encode(&region, false)?);
                }
            }
            FrameDecision::DriverDelta => {
                for region in grab.dirty_regions.as_deref().unwrap_or(&[]) {
                    regions.push(self.encoder.encode(region, false)?);
                }
            }
            FrameDecision::NoChange => return Ok(CaptureResult::NoChanges),
        }
        Ok(CaptureResult::Encoded {
            keyframe,
            regions,
            moves: grab.move_regions.clone(),
        })
    }

    /// Cross-process path: raw pixels into the display's segment,
    /// recreated whenever the frame dimensions differ from the
    /// segment's (stale segments are never reused across a resize).
    fn write_shared(
        p: &mut DisplayPipeline,
        grab: &GrabOutput,
        decision: &FrameDecision,
    ) -> Result<CaptureResult, MiraError> {
        let (width, height) = (grab.frame.width, grab.frame.height);
        let stale = match &p.segment {
            Some(s) => s.width() != width || s.height() != height || s.is_disposed(),
            None => true,
        };
        if stale {
            if let Some(mut old) = p.segment.take() {
                old.dispose();
            }
            p.segment = Some(SharedSegment::create(width, height)?);
        }
        let Some(segment) = p.segment.as_mut() else {
            return Err(MiraError::SegmentNotFound);
        };

        let (keyframe, has_full_frame, infos) = match decision {
            FrameDecision::Keyframe => {
                let info = segment.write_keyframe(&grab.frame)?;
                (true, true, vec![info])
            }
            FrameDecision::Delta(rects) => {
                let regions: Vec<DirtyRegion> = rects
                    .iter()
                    .map(|rect| grab.frame.extract_region(*rect))
                    .collect();
                (false, false, segment.write_regions(&regions)?)
            }
            FrameDecision::DriverDelta => {
                let regions = grab.dirty_regions.as_deref().unwrap_or(&[]);
                (false, false, segment.write_regions(regions)?)
            }
            FrameDecision::NoChange => return Ok(CaptureResult::NoChanges),
        };

        Ok(CaptureResult::Shared {
            keyframe,
            has_full_frame,
            regions: infos,
            moves: grab.move_regions.clone(),
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::frame::RawFrame;

    /// Backend that replays a scripted sequence of grabs.
    struct ScriptedSource {
        frames: Vec<GrabOutput>,
        cursor: usize,
    }

    impl ScriptedSource {
        fn new(frames: Vec<GrabOutput>) -> Self {
            Self { frames, cursor: 0 }
        }
    }

    impl GrabSource for ScriptedSource {
        fn displays(&mut self) -> Result<Vec<DisplayDescriptor>, MiraError> {
            Ok(vec![DisplayDescriptor {
                id: 0,
                friendly_name: "Scripted".into(),
                is_primary: true,
                left: 0,
                top: 0,
                right: 64,
                bottom: 64,
            }])
        }

        fn capture(&mut self, _display: DisplayId) -> Result<GrabOutput, MiraError> {
            let grab = self
                .frames
                .get(self.cursor)
                .cloned()
                .ok_or_else(|| MiraError::GrabFailed("script exhausted".into()))?;
            self.cursor += 1;
            Ok(grab)
        }
    }

    fn frame(w: u32, h: u32, fill: u8) -> RawFrame {
        RawFrame::new_bgra(w, h, vec![fill; (w * h * 4) as usize])
    }

    fn engine_with(frames: Vec<GrabOutput>, config: EngineConfig) -> CaptureEngine {
        CaptureEngine::new(Box::new(ScriptedSource::new(frames)), config).unwrap()
    }

    #[test]
    fn grab_failure_propagates() {
        let engine = engine_with(vec![], EngineConfig::default());
        assert!(matches!(
            engine.request_capture(0, false),
            Err(MiraError::GrabFailed(_))
        ));
    }

    #[test]
    fn token_unavailable_before_first_shared_capture() {
        let engine = engine_with(
            vec![GrabOutput::full_frame(frame(64, 64, 0))],
            EngineConfig::default().with_mode(TransportMode::SharedMemory),
        );
        assert!(matches!(
            engine.request_shared_memory_token(0),
            Err(MiraError::SegmentNotFound)
        ));
        engine.request_capture(0, false).unwrap();
        assert!(engine.request_shared_memory_token(0).is_ok());
    }

    #[test]
    fn remove_display_disposes_the_segment() {
        let engine = engine_with(
            vec![GrabOutput::full_frame(frame(64, 64, 0))],
            EngineConfig::default().with_mode(TransportMode::SharedMemory),
        );
        engine.request_capture(0, false).unwrap();
        let token = engine.request_shared_memory_token(0).unwrap();
        engine.remove_display(0);
        assert!(matches!(
            engine.request_shared_memory_token(0),
            Err(MiraError::SegmentNotFound)
        ));
        assert!(matches!(
            SharedSegment::open(token, 64, 64),
            Err(MiraError::SegmentNotFound)
        ));
    }

    #[test]
    fn forced_keyframe_applies_to_next_capture() {
        let base = frame(64, 64, 0);
        let engine = engine_with(
            vec![
                GrabOutput::full_frame(base.clone()),
                GrabOutput::full_frame(base.clone()),
                GrabOutput::full_frame(base),
            ],
            EngineConfig::default(),
        );
        assert!(engine.request_capture(0, false).unwrap().is_keyframe());
        assert!(matches!(
            engine.request_capture(0, false).unwrap(),
            CaptureResult::NoChanges
        ));
        engine.request_keyframe(0);
        assert!(engine.request_capture(0, false).unwrap().is_keyframe());
    }

    #[test]
    fn driver_regions_are_trusted_and_encoded() {
        let base = frame(64, 64, 0);
        let dirty = DirtyRegion {
            x: 4,
            y: 4,
            width: 8,
            height: 8,
            pixels: vec![0x55; 8 * 8 * 4],
        };
        let engine = engine_with(
            vec![
                GrabOutput::full_frame(base.clone()),
                GrabOutput {
                    frame: base,
                    dirty_regions: Some(vec![dirty]),
                    move_regions: vec![MoveRegion {
                        source_x: 0,
                        source_y: 0,
                        dest_x: 16,
                        dest_y: 16,
                        width: 8,
                        height: 8,
                    }],
                },
            ],
            EngineConfig::default(),
        );
        engine.request_capture(0, false).unwrap();
        match engine.request_capture(0, false).unwrap() {
            CaptureResult::Encoded {
                keyframe,
                regions,
                moves,
            } => {
                assert!(!keyframe);
                assert_eq!(regions.len(), 1);
                assert_eq!(regions[0].rect(), Rect::new(4, 4, 8, 8));
                assert_eq!(moves.len(), 1);
            }
            other => panic!("expected encoded delta, got {other:?}"),
        }
    }

    #[test]
    fn scroll_accumulation_per_display() {
        let engine = engine_with(vec![], EngineConfig::default());
        assert_eq!(engine.accumulate_scroll(0, 130, 0), (1, 0));
        // Remainder of 10 carried on display 0, display 1 independent.
        assert_eq!(engine.accumulate_scroll(1, 115, 0), (0, 0));
        assert_eq!(engine.accumulate_scroll(0, 110, 0), (1, 0));
    }
}
