//! Memory-mapped shared frame segments.
//!
//! One segment per display, sized exactly `width * height * 4` bytes.
//! The capturing process creates it read-write (server role); the
//! consuming process opens the same name read-only (client role) using
//! a token received over the authenticated session channel. All access
//! goes through bounds-checked `(offset, length)` ranges — no raw
//! pointers escape this module.
//!
//! A resize never reuses a segment: the server disposes the old one
//! and creates a fresh segment under a fresh token, so stale
//! client-held tokens fail with [`MiraError::SegmentNotFound`] and the
//! client re-requests the token.

use std::fs::{File, OpenOptions};
use std::path::PathBuf;

use memmap2::{Mmap, MmapMut};
use serde::{Deserialize, Serialize};

use crate::error::MiraError;
use crate::shm::token::SegmentToken;
use crate::video::frame::{DirtyRegion, RawFrame};

// ── RegionWriteInfo ──────────────────────────────────────────────

/// Where one region's packed pixels landed inside the segment.
///
/// Invariant: `byte_offset + width * height * 4 <= capacity`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegionWriteInfo {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Byte offset of this region's pixels within the segment.
    pub byte_offset: usize,
}

impl RegionWriteInfo {
    /// Packed byte length of this region.
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }

    /// Geometry of this region.
    pub fn rect(&self) -> crate::video::frame::Rect {
        crate::video::frame::Rect::new(self.x, self.y, self.width, self.height)
    }
}

// ── Mapping ──────────────────────────────────────────────────────

enum Mapping {
    /// Server role: created the OS object, maps it read-write.
    Writable(MmapMut),
    /// Client role: opened an existing object, maps it read-only.
    ReadOnly(Mmap),
}

/// Directory shared-memory segment files live in.
fn shm_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/dev/shm")
    }
    #[cfg(not(target_os = "linux"))]
    {
        std::env::temp_dir()
    }
}

// ── SharedSegment ────────────────────────────────────────────────

/// A shared-memory frame segment for one display.
///
/// # Safety
///
/// The unsafe mapping calls are confined to [`create`](Self::create)
/// and [`open`](Self::open); everything else operates on the mapped
/// slice through checked ranges. The server is the only writer and the
/// client only reads, by construction — there is no concurrent-writer
/// scenario to guard against.
pub struct SharedSegment {
    token: SegmentToken,
    path: PathBuf,
    width: u32,
    height: u32,
    capacity: usize,
    map: Option<Mapping>,
}

impl SharedSegment {
    /// Server role: mint a token, create the OS object sized exactly
    /// `width * height * 4`, and map it read-write.
    pub fn create(width: u32, height: u32) -> Result<Self, MiraError> {
        assert!(width > 0 && height > 0, "segment dimensions must be non-zero");
        let token = SegmentToken::generate();
        let capacity = width as usize * height as usize * 4;
        let path = shm_dir().join(token.segment_name());

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        file.set_len(capacity as u64)?;

        // SAFETY: we created the file and hold it exclusively at this
        // size; the mapping lives no longer than the segment.
        let map = unsafe { MmapMut::map_mut(&file)? };

        tracing::debug!(name = %token.segment_name(), capacity, "created shared segment");
        Ok(Self {
            token,
            path,
            width,
            height,
            capacity,
            map: Some(Mapping::Writable(map)),
        })
    }

    /// Client role: map the segment the server created under `token`,
    /// read-only.
    ///
    /// Fails with [`MiraError::SegmentNotFound`] if the server has not
    /// created it, has disposed it, or has since recreated it under a
    /// different token (resize) — the caller must then re-request the
    /// token over the session channel. A size mismatch against the
    /// expected dimensions is treated the same way: the segment the
    /// token referred to no longer exists in that shape.
    pub fn open(token: SegmentToken, width: u32, height: u32) -> Result<Self, MiraError> {
        let capacity = width as usize * height as usize * 4;
        let path = shm_dir().join(token.segment_name());

        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MiraError::SegmentNotFound);
            }
            Err(e) => return Err(e.into()),
        };
        if file.metadata()?.len() != capacity as u64 {
            return Err(MiraError::SegmentNotFound);
        }

        // SAFETY: read-only mapping of a file the server keeps at this
        // exact length for the segment's lifetime.
        let map = unsafe { Mmap::map(&file)? };

        Ok(Self {
            token,
            path,
            width,
            height,
            capacity,
            map: Some(Mapping::ReadOnly(map)),
        })
    }

    /// The token this segment is addressed by.
    pub fn token(&self) -> SegmentToken {
        self.token
    }

    /// Segment width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Segment height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Capacity in bytes — always `width * height * 4`.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether [`dispose`](Self::dispose) has run.
    pub fn is_disposed(&self) -> bool {
        self.map.is_none()
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<(), MiraError> {
        if offset.checked_add(len).is_none_or(|end| end > self.capacity) {
            return Err(MiraError::SegmentOutOfRange {
                offset,
                len,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    // ── Raw access ───────────────────────────────────────────────

    /// Server-only: copy `bytes` into the segment at `offset`.
    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) -> Result<(), MiraError> {
        self.check_range(offset, bytes.len())?;
        match self.map.as_mut() {
            Some(Mapping::Writable(map)) => {
                map[offset..offset + bytes.len()].copy_from_slice(bytes);
                Ok(())
            }
            Some(Mapping::ReadOnly(_)) => Err(MiraError::SegmentRole(
                "write_at requires the server mapping",
            )),
            None => Err(MiraError::SegmentDisposed),
        }
    }

    /// Client-only: copy `dest.len()` bytes from `offset` into `dest`.
    pub fn read_at(&self, offset: usize, dest: &mut [u8]) -> Result<(), MiraError> {
        dest.copy_from_slice(self.bytes_at(offset, dest.len())?);
        Ok(())
    }

    /// Client-only: borrow a checked sub-slice of the mapping — the
    /// zero-copy read path for region pixels. The server writes and
    /// never reads back; a server-side read is a role violation, same
    /// as a client-side write.
    pub fn bytes_at(&self, offset: usize, len: usize) -> Result<&[u8], MiraError> {
        self.check_range(offset, len)?;
        match self.map.as_ref() {
            Some(Mapping::ReadOnly(map)) => Ok(&map[offset..offset + len]),
            Some(Mapping::Writable(_)) => Err(MiraError::SegmentRole(
                "reads require the client mapping",
            )),
            None => Err(MiraError::SegmentDisposed),
        }
    }

    // ── Capture write protocol ───────────────────────────────────

    /// Write a full keyframe: the packed pixel buffer at offset 0.
    ///
    /// Returns the single full-frame [`RegionWriteInfo`].
    pub fn write_keyframe(&mut self, frame: &RawFrame) -> Result<RegionWriteInfo, MiraError> {
        if frame.width != self.width || frame.height != self.height {
            return Err(MiraError::SegmentOutOfRange {
                offset: 0,
                len: frame.packed_len(),
                capacity: self.capacity,
            });
        }
        // Rows are written individually so GPU row padding never
        // reaches the segment.
        let row_bytes = frame.width as usize * 4;
        for y in 0..frame.height {
            self.write_at(y as usize * row_bytes, frame.packed_row(y))?;
        }
        Ok(RegionWriteInfo {
            x: 0,
            y: 0,
            width: frame.width,
            height: frame.height,
            byte_offset: 0,
        })
    }

    /// Write delta regions sequentially from offset 0, recording where
    /// each region's packed pixels landed. The running offset is the
    /// sum of the prior regions' `width * height * 4`.
    pub fn write_regions(
        &mut self,
        regions: &[DirtyRegion],
    ) -> Result<Vec<RegionWriteInfo>, MiraError> {
        let mut infos = Vec::with_capacity(regions.len());
        let mut offset = 0usize;
        for region in regions {
            self.write_at(offset, &region.pixels)?;
            infos.push(RegionWriteInfo {
                x: region.x,
                y: region.y,
                width: region.width,
                height: region.height,
                byte_offset: offset,
            });
            offset += region.pixels.len();
        }
        Ok(infos)
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Unmap and release the OS object. Safe to call at any point,
    /// including with a write logically pending — subsequent access
    /// fails with [`MiraError::SegmentDisposed`] instead of touching
    /// unmapped memory. Idempotent.
    pub fn dispose(&mut self) {
        let Some(mapping) = self.map.take() else {
            return;
        };
        let server = matches!(mapping, Mapping::Writable(_));
        drop(mapping);
        if server {
            // The creator unlinks the backing object; readers keep
            // their own mapping alive until they dispose.
            let _ = std::fs::remove_file(&self.path);
            tracing::debug!(name = %self.token.segment_name(), "disposed shared segment");
        }
    }
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ── Tests ────────────────────────────────────────────────────────
