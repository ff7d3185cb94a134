//! JPEG region encoding with a bounded compressor pool.
//!
//! Each dirty region's packed BGRA pixels are converted to RGB and
//! compressed independently. Conversion scratch buffers are pooled
//! (cap [`POOL_CAPACITY`]) so steady-state encoding allocates only the
//! output buffer it hands back — which is pre-sized to the worst case
//! for the region and returned without a second copy.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use image::{ExtendedColorType, ImageEncoder, codecs::jpeg::JpegEncoder};

use crate::error::MiraError;
use crate::video::frame::{DirtyRegion, EncodedRegion};

/// Maximum number of idle compressors retained for reuse.
pub const POOL_CAPACITY: usize = 4;

/// Lowest accepted JPEG quality.
pub const MIN_QUALITY: u8 = 10;
/// Highest accepted JPEG quality.
pub const MAX_QUALITY: u8 = 100;
/// Default JPEG quality.
pub const DEFAULT_QUALITY: u8 = 80;

// ── Compressor ───────────────────────────────────────────────────

/// One reusable compressor: owns the BGRA→RGB conversion scratch so
/// repeated encodes of similar-sized regions stop allocating.
#[derive(Default)]
struct Compressor {
    rgb: Vec<u8>,
}

impl Compressor {
    fn compress(&mut self, region: &DirtyRegion, quality: u8) -> Result<Vec<u8>, MiraError> {
        let w = region.width as usize;
        let h = region.height as usize;
        if region.pixels.len() != w * h * 4 {
            return Err(MiraError::EncodeFailed(format!(
                "region pixel buffer is {} bytes, expected {}",
                region.pixels.len(),
                w * h * 4
            )));
        }

        self.rgb.clear();
        self.rgb.reserve(w * h * 3);
        for px in region.pixels.chunks_exact(4) {
            // BGRA → RGB
            self.rgb.push(px[2]);
            self.rgb.push(px[1]);
            self.rgb.push(px[0]);
        }

        // Worst case for baseline JPEG at these sizes: the raw RGB
        // payload plus header/table margin.
        let mut out = Vec::with_capacity(w * h * 3 + 2048);
        JpegEncoder::new_with_quality(&mut out, quality)
            .write_image(
                &self.rgb,
                region.width,
                region.height,
                ExtendedColorType::Rgb8,
            )
            .map_err(|e| MiraError::EncodeFailed(e.to_string()))?;
        Ok(out)
    }
}

// ── RegionEncoder ────────────────────────────────────────────────

/// JPEG encoder for rectangular pixel regions.
///
/// Quality is fixed at construction and validated into
/// `[MIN_QUALITY, MAX_QUALITY]` there — never at encode time. If one
/// region fails to compress, that error is returned alone; the
/// orchestrator treats it as failure of the whole capture.
pub struct RegionEncoder {
    quality: u8,
    pool: Mutex<Vec<Compressor>>,
    shutting_down: AtomicBool,
}

impl RegionEncoder {
    /// Create an encoder with the given quality.
    pub fn new(quality: u8) -> Result<Self, MiraError> {
        if !(MIN_QUALITY..=MAX_QUALITY).contains(&quality) {
            return Err(MiraError::InvalidQuality(quality));
        }
        Ok(Self {
            quality,
            pool: Mutex::new(Vec::new()),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Configured quality.
    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Compress one region into a JPEG byte range.
    pub fn encode(&self, region: &DirtyRegion, keyframe: bool) -> Result<EncodedRegion, MiraError> {
        let mut compressor = self.rent();
        let result = compressor.compress(region, self.quality);
        self.give_back(compressor);
        Ok(EncodedRegion {
            keyframe,
            x: region.x,
            y: region.y,
            width: region.width,
            height: region.height,
            data: Bytes::from(result?),
        })
    }

    /// Stop retaining pooled compressors; rented ones are released on
    /// return instead of pushed back.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.lock_pool().clear();
    }

    fn rent(&self) -> Compressor {
        self.lock_pool().pop().unwrap_or_default()
    }

    fn give_back(&self, compressor: Compressor) {
        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        let mut pool = self.lock_pool();
        if pool.len() < POOL_CAPACITY {
            pool.push(compressor);
        }
    }

    fn lock_pool(&self) -> std::sync::MutexGuard<'_, Vec<Compressor>> {
        // A poisoned pool only ever holds reusable scratch buffers, so
        // recover the guard rather than propagate the panic.
        self.pool
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn region(w: u32, h: u32, fill: u8) -> DirtyRegion {
        DirtyRegion {
            x: 8,
            y: 16,
            width: w,
            height: h,
            pixels: vec![fill; (w * h * 4) as usize],
        }
    }

    #[test]
    fn quality_validated_at_configuration_time() {
        assert!(matches!(
            RegionEncoder::new(9),
            Err(MiraError::InvalidQuality(9))
        ));
        assert!(matches!(
            RegionEncoder::new(101),
            Err(MiraError::InvalidQuality(101))
        ));
        assert!(RegionEncoder::new(10).is_ok());
        assert!(RegionEncoder::new(100).is_ok());
    }

    #[test]
    fn encode_produces_jpeg_bytes_with_region_geometry() {
        let enc = RegionEncoder::new(DEFAULT_QUALITY).unwrap();
        let encoded = enc.encode(&region(32, 32, 0x80), false).unwrap();

        assert_eq!(encoded.x, 8);
        assert_eq!(encoded.y, 16);
        assert_eq!(encoded.width, 32);
        assert_eq!(encoded.height, 32);
        assert!(!encoded.keyframe);
        // SOI marker.
        assert_eq!(&encoded.data[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn mismatched_pixel_buffer_fails_that_region() {
        let enc = RegionEncoder::new(DEFAULT_QUALITY).unwrap();
        let bad = DirtyRegion {
            x: 0,
            y: 0,
            width: 32,
            height: 32,
            pixels: vec![0; 10],
        };
        assert!(matches!(
            enc.encode(&bad, false),
            Err(MiraError::EncodeFailed(_))
        ));
    }

    #[test]
    fn pool_is_bounded() {
        let enc = RegionEncoder::new(DEFAULT_QUALITY).unwrap();
        let r = region(16, 16, 0);
        for _ in 0..POOL_CAPACITY + 3 {
            enc.encode(&r, false).unwrap();
        }
        assert!(enc.lock_pool().len() <= POOL_CAPACITY);
    }

    #[test]
    fn shutdown_stops_retaining_compressors() {
        let enc = RegionEncoder::new(DEFAULT_QUALITY).unwrap();
        enc.encode(&region(16, 16, 0), false).unwrap();
        enc.shutdown();
        // Encoding still works; the pool just stays empty.
        enc.encode(&region(16, 16, 0), true).unwrap();
        assert!(enc.lock_pool().is_empty());
    }
}
