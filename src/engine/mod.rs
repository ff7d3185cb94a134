//! Capture engine: the grab-backend seam and the orchestrator that
//! glues codec state, dirty detection, encoding and shared-memory
//! transport into one capture sequence per display.

pub mod grab;
pub mod orchestrator;

// ── Re-exports ───────────────────────────────────────────────────

pub use grab::{GrabOutput, GrabSource};
pub use orchestrator::{CaptureEngine, CaptureResult, EngineConfig, TransportMode};
