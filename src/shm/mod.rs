//! Zero-copy shared-memory frame transport.
//!
//! The server (capturing process) writes raw region pixels into a
//! memory-mapped segment; the client (consuming process) reads them
//! directly at the offsets announced in [`RegionWriteInfo`] metadata.
//! Only the metadata travels over the RPC channel — the pixels never
//! do.
//!
//! Access control is by unguessable name: segments are addressed by a
//! 128-bit random [`SegmentToken`] obtainable only through the
//! authenticated session channel.

pub mod segment;
pub mod token;

// ── Re-exports ───────────────────────────────────────────────────

pub use segment::{RegionWriteInfo, SharedSegment};
pub use token::{SegmentToken, TOKEN_LEN};
