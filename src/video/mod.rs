//! Per-display video codec: frame model, dirty detection, keyframe
//! policy, JPEG region encoding.
//!
//! ```text
//! RawFrame ──► DirtyDetector ──► FrameDecision ──► RegionEncoder
//!   (grab)      (32×32 diff +      (keyframe /       (JPEG per
//!                union-find         delta /            region)
//!                merge)             no-change)
//! ```
//!
//! | Module  | Purpose                                             |
//! |---------|-----------------------------------------------------|
//! | `frame` | Pixel-memory value types (`RawFrame`, region shapes) |
//! | `dirty` | Block diffing and proximity merge                   |
//! | `state` | Per-display keyframe/delta state machine            |
//! | `jpeg`  | Pooled JPEG region compression                      |

pub mod dirty;
pub mod frame;
pub mod jpeg;
pub mod state;

// ── Re-exports ───────────────────────────────────────────────────

pub use dirty::{BLOCK_SIZE, DetectOutcome, DirtyDetector, coverage};
pub use frame::{DirtyRegion, EncodedRegion, MoveRegion, PixelFormat, RawFrame, Rect};
pub use jpeg::{DEFAULT_QUALITY, MAX_QUALITY, MIN_QUALITY, POOL_CAPACITY, RegionEncoder};
pub use state::{CodecState, FrameDecision, KEYFRAME_INTERVAL, SCROLL_NOTCH};
