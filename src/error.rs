//! Domain-specific error types for the Mira capture core.
//!
//! All fallible operations return `Result<T, MiraError>`.
//! No panics on invalid input — every error is typed and recoverable.

use thiserror::Error;

/// The canonical error type for the capture core.
#[derive(Debug, Error)]
pub enum MiraError {
    // ── Capture Errors ───────────────────────────────────────────
    /// The grab backend could not produce pixels this cycle.
    ///
    /// The caller should retry on the next capture cycle; repeated
    /// failures show up as a frozen remote view, never as corruption.
    #[error("grab failed: {0}")]
    GrabFailed(String),

    /// The requested display id is not known to the grab backend.
    #[error("unknown display: {0}")]
    UnknownDisplay(u32),

    // ── Encoding Errors ──────────────────────────────────────────
    /// The JPEG compressor reported a failure for one region.
    ///
    /// A single failed region fails the whole capture — a partially
    /// updated frame is worse than a dropped one.
    #[error("region encode failed: {0}")]
    EncodeFailed(String),

    /// Quality outside the accepted `[10, 100]` range. Rejected at
    /// configuration time, never at encode time.
    #[error("invalid JPEG quality {0}: must be in 10..=100")]
    InvalidQuality(u8),

    // ── Shared-Memory Errors ─────────────────────────────────────
    /// No segment exists under the given token — either it was never
    /// created, or it was recreated under a new token after a resize.
    /// Clients must re-request the token over the session channel.
    #[error("shared segment not found")]
    SegmentNotFound,

    /// An `(offset, length)` range fell outside the segment capacity.
    #[error("segment range out of bounds: offset {offset} + len {len} > capacity {capacity}")]
    SegmentOutOfRange {
        offset: usize,
        len: usize,
        capacity: usize,
    },

    /// The segment was disposed; further reads/writes are refused
    /// instead of touching unmapped memory.
    #[error("segment disposed")]
    SegmentDisposed,

    /// A role violation: a write through the client mapping, or a read
    /// through the server mapping.
    #[error("segment role violation: {0}")]
    SegmentRole(&'static str),

    /// A token string could not be parsed.
    #[error("malformed segment token")]
    InvalidToken,

    // ── Plumbing Errors ──────────────────────────────────────────
    /// The OS reported an I/O error (segment file creation, mapping).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// Encoding or decoding of a wire payload failed.
    #[error("encoding error: {0}")]
    Encoding(String),
}

impl MiraError {
    /// Whether this error came from the shared-memory transport layer.
    ///
    /// The orchestrator uses this to take the explicit fallback branch:
    /// attempt the cross-process path, and on a typed transport error,
    /// switch to the in-process encode path for the same capture.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            MiraError::SegmentNotFound
                | MiraError::SegmentOutOfRange { .. }
                | MiraError::SegmentDisposed
                | MiraError::SegmentRole(_)
                | MiraError::Io(_)
        )
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for MiraError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        MiraError::ChannelClosed
    }
}

impl From<Box<bincode::ErrorKind>> for MiraError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        MiraError::Encoding(e.to_string())
    }
}
