//! Wire metadata exchanged with the session/routing layer.
//!
//! Pixels never travel through these messages. For the in-process path
//! a [`FrameUpdate`] carries the compressed JPEG regions; for the
//! shared-memory path it carries only [`RegionWriteInfo`] offsets and
//! the viewer reads the pixels straight out of the mapped segment.
//!
//! # Wire Protocol
//!
//! ```text
//! Viewer ──[TokenRequest]────────────────────► Capture host
//!   (only over the already-authenticated session channel)
//!
//! Capture host ──[TokenResponse]─────────────► Viewer
//!   Payload: segment token + current dimensions
//!
//! Capture host ──[FrameUpdate]───────────────► Viewer   (repeated)
//!   Payload: region metadata, FIFO per display
//! ```

use serde::{Deserialize, Serialize};

use crate::display::DisplayId;
use crate::engine::CaptureResult;
use crate::error::MiraError;
use crate::shm::{RegionWriteInfo, SegmentToken};
use crate::video::dirty::coverage;
use crate::video::frame::{EncodedRegion, MoveRegion, Rect};

// ── FrameUpdate ──────────────────────────────────────────────────

/// Region payload of one frame update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum FramePayload {
    /// JPEG-compressed regions, delivered inline.
    Encoded(Vec<EncodedRegion>),
    /// Offsets into the display's shared segment.
    Shared {
        regions: Vec<RegionWriteInfo>,
        has_full_frame: bool,
    },
}

/// One capture's metadata, delivered to viewers in capture order.
///
/// Delivery order per display is the routing layer's responsibility;
/// `sequence` is strictly increasing so reordering is detectable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrameUpdate {
    /// Which display this update belongs to.
    pub display: DisplayId,
    /// Strictly increasing per-display capture counter.
    pub sequence: u64,
    /// Whether the whole frame is transmitted.
    pub keyframe: bool,
    /// Display width at capture time.
    pub width: u32,
    /// Display height at capture time.
    pub height: u32,
    /// Region metadata.
    pub payload: FramePayload,
    /// Driver move hints, passed through unmodified.
    pub moves: Vec<MoveRegion>,
}

impl FrameUpdate {
    /// Build an update from a capture result. `None` for a no-change
    /// capture — nothing travels for those.
    pub fn from_capture(
        display: DisplayId,
        sequence: u64,
        width: u32,
        height: u32,
        result: CaptureResult,
    ) -> Option<Self> {
        let (keyframe, payload, moves) = match result {
            CaptureResult::NoChanges => return None,
            CaptureResult::Encoded {
                keyframe,
                regions,
                moves,
            } => (keyframe, FramePayload::Encoded(regions), moves),
            CaptureResult::Shared {
                keyframe,
                has_full_frame,
                regions,
                moves,
            } => (
                keyframe,
                FramePayload::Shared {
                    regions,
                    has_full_frame,
                },
                moves,
            ),
        };
        Some(Self {
            display,
            sequence,
            keyframe,
            width,
            height,
            payload,
            moves,
        })
    }

    /// Fraction of the display area this update repaints (0.0 – 1.0).
    /// A keyframe reports 1.0; deltas report their merged-region share.
    pub fn coverage(&self) -> f64 {
        let rects: Vec<Rect> = match &self.payload {
            FramePayload::Encoded(regions) => regions.iter().map(EncodedRegion::rect).collect(),
            FramePayload::Shared { regions, .. } => {
                regions.iter().map(RegionWriteInfo::rect).collect()
            }
        };
        coverage(&rects, self.width, self.height)
    }

    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MiraError> {
        bincode::serialize(self).map_err(|e| MiraError::Encoding(e.to_string()))
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MiraError> {
        bincode::deserialize(bytes).map_err(|e| MiraError::Encoding(e.to_string()))
    }
}

// ── Token exchange ───────────────────────────────────────────────

/// Viewer request for a display's current segment token.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenRequest {
    pub display: DisplayId,
}

/// Segment token plus the dimensions the segment was sized for.
///
/// After a resize the old token stops resolving; the viewer re-issues
/// a [`TokenRequest`] when `open` fails with `SegmentNotFound`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenResponse {
    pub display: DisplayId,
    pub token: SegmentToken,
    pub width: u32,
    pub height: u32,
}

impl TokenRequest {
    pub fn to_bytes(&self) -> Result<Vec<u8>, MiraError> {
        bincode::serialize(self).map_err(|e| MiraError::Encoding(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MiraError> {
        bincode::deserialize(bytes).map_err(|e| MiraError::Encoding(e.to_string()))
    }
}

impl TokenResponse {
    pub fn to_bytes(&self) -> Result<Vec<u8>, MiraError> {
        bincode::serialize(self).map_err(|e| MiraError::Encoding(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MiraError> {
        bincode::deserialize(bytes).map_err(|e| MiraError::Encoding(e.to_string()))
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn frame_update_round_trip() {
        let update = FrameUpdate {
            display: 2,
            sequence: 41,
            keyframe: false,
            width: 1920,
            height: 1080,
            payload: FramePayload::Encoded(vec![EncodedRegion {
                keyframe: false,
                x: 32,
                y: 64,
                width: 32,
                height: 32,
                data: Bytes::from_static(&[0xFF, 0xD8, 0xFF]),
            }]),
            moves: vec![MoveRegion {
                source_x: 0,
                source_y: 0,
                dest_x: 8,
                dest_y: 8,
                width: 16,
                height: 16,
            }],
        };

        let bytes = update.to_bytes().unwrap();
        let decoded = FrameUpdate::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, update);
    }

    #[test]
    fn shared_payload_round_trip() {
        let update = FrameUpdate {
            display: 0,
            sequence: 1,
            keyframe: true,
            width: 800,
            height: 600,
            payload: FramePayload::Shared {
                regions: vec![RegionWriteInfo {
                    x: 0,
                    y: 0,
                    width: 800,
                    height: 600,
                    byte_offset: 0,
                }],
                has_full_frame: true,
            },
            moves: Vec::new(),
        };
        let decoded = FrameUpdate::from_bytes(&update.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, update);
    }

    #[test]
    fn coverage_reflects_repainted_area() {
        let update = FrameUpdate {
            display: 0,
            sequence: 1,
            keyframe: false,
            width: 100,
            height: 100,
            payload: FramePayload::Encoded(vec![EncodedRegion {
                keyframe: false,
                x: 0,
                y: 0,
                width: 50,
                height: 50,
                data: Bytes::new(),
            }]),
            moves: Vec::new(),
        };
        assert!((update.coverage() - 0.25).abs() < 1e-9);

        let full = FrameUpdate {
            payload: FramePayload::Shared {
                regions: vec![RegionWriteInfo {
                    x: 0,
                    y: 0,
                    width: 100,
                    height: 100,
                    byte_offset: 0,
                }],
                has_full_frame: true,
            },
            keyframe: true,
            ..update
        };
        assert!((full.coverage() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn no_change_produces_no_update() {
        assert!(FrameUpdate::from_capture(0, 1, 64, 64, CaptureResult::NoChanges).is_none());
    }

    #[test]
    fn token_response_round_trip() {
        let resp = TokenResponse {
            display: 1,
            token: SegmentToken::generate(),
            width: 1280,
            height: 720,
        };
        let decoded = TokenResponse::from_bytes(&resp.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, resp);
    }
}
