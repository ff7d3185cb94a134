//! # mira-core
//!
//! Screen delta-streaming engine for the Mira remote desktop: turns
//! raw framebuffer pixels into a minimal, compressed update stream and
//! moves it across a process boundary with zero-copy shared memory.
//!
//! ## Architecture
//!
//! ```text
//! CAPTURE HOST                                    VIEWER
//! ┌────────────────────────────┐                 ┌─────────────────────┐
//! │ GrabSource (external)      │                 │ FrameUpdate handler │
//! │   ↓ RawFrame               │                 │   ↓                 │
//! │ CodecState + DirtyDetector │    RPC (meta)   │ JPEG decode, or     │
//! │   ↓ keyframe/delta/skip    │ ─────────────►  │ SharedSegment::open │
//! │ RegionEncoder  ──or──      │                 │   + read_at(offset) │
//! │ SharedSegment::write_*     │                 │                     │
//! └────────────────────────────┘                 └─────────────────────┘
//! ```
//!
//! This crate contains:
//! - **Frame model**: `RawFrame`, `DirtyRegion`, `MoveRegion`,
//!   `EncodedRegion` — passive pixel-memory value types
//! - **Dirty detection**: 32×32-block diffing with union-find
//!   proximity merge and an 80 % keyframe threshold
//! - **Codec state**: per-display keyframe/delta/no-change decisions,
//!   periodic and forced keyframes, scroll accumulators
//! - **Region encoding**: pooled JPEG compression per region
//! - **Shared-memory transport**: token-named, exactly-sized,
//!   bounds-checked segments recreated on every resize
//! - **Orchestration**: `CaptureEngine` request surface and the paced
//!   `CaptureService` loop
//! - **Error**: `MiraError` — typed, `thiserror`-based error hierarchy
//!
//! Who may view a display is decided elsewhere: the session layer
//! authenticates viewers and only then relays segment tokens; this
//! core never checks authorization itself.

pub mod display;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod service;
pub mod shm;
pub mod video;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use display::{DisplayDescriptor, DisplayId};
pub use engine::{CaptureEngine, CaptureResult, EngineConfig, GrabOutput, GrabSource, TransportMode};
pub use error::MiraError;
pub use protocol::{FramePayload, FrameUpdate, TokenRequest, TokenResponse};
pub use service::{CaptureService, CaptureServiceConfig};
pub use shm::{RegionWriteInfo, SegmentToken, SharedSegment};
pub use video::{
    BLOCK_SIZE, CodecState, DEFAULT_QUALITY, DetectOutcome, DirtyDetector, DirtyRegion,
    EncodedRegion, FrameDecision, KEYFRAME_INTERVAL, MoveRegion, PixelFormat, RawFrame, Rect,
    RegionEncoder,
};
