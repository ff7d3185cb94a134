//! Block-based dirty-region detection between consecutive frames.
//!
//! Partitions the frame into 32 × 32-pixel blocks and compares each
//! block row-by-row against the previous frame. Changed blocks are
//! merged into larger rectangles by proximity (union-find over inflated
//! block bounds) so adjacent changes become one region instead of a
//! shower of tiny JPEGs, while unrelated changed areas stay separate.
//!
//! If more than 80 % of blocks changed, detection stops early and asks
//! for a keyframe instead — bounding worst-case diff cost and avoiding
//! dozens of regions when nearly everything moved anyway.

use crate::video::frame::{RawFrame, Rect};

/// Side length of a detection block, in pixels.
pub const BLOCK_SIZE: u32 = 32;

/// Blocks whose bounds, inflated by this margin, intersect are merged.
const MERGE_MARGIN: u32 = BLOCK_SIZE / 2;

// ── DetectOutcome ────────────────────────────────────────────────

/// Result of one detection pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectOutcome {
    /// Zero blocks changed — skip this frame entirely.
    NoChange,
    /// More than 80 % of blocks changed — send a keyframe instead.
    Keyframe,
    /// The merged changed rectangles.
    Regions(Vec<Rect>),
}

// ── DirtyDetector ────────────────────────────────────────────────

/// Stateless block-diff engine.
///
/// The previous frame is owned by the per-display codec state, not by
/// the detector; callers guarantee both frames have identical
/// dimensions (a resize is handled upstream by forcing a keyframe).
#[derive(Debug, Clone)]
pub struct DirtyDetector {
    block_size: u32,
}

impl Default for DirtyDetector {
    fn default() -> Self {
        Self::new(BLOCK_SIZE)
    }
}

impl DirtyDetector {
    /// Create a detector with the given tile size (in pixels).
    ///
    /// # Panics
    ///
    /// Panics if `block_size` is zero.
    pub fn new(block_size: u32) -> Self {
        assert!(block_size > 0, "block_size must be > 0");
        Self { block_size }
    }

    /// Compare `current` against `previous` and return the change set.
    ///
    /// # Panics
    ///
    /// Panics if the two frames differ in dimensions or are zero-sized —
    /// both are caller-side precondition violations, not runtime
    /// decisions.
    pub fn detect(&self, current: &RawFrame, previous: &RawFrame) -> DetectOutcome {
        assert_eq!(
            (current.width, current.height),
            (previous.width, previous.height),
            "frames must have identical dimensions"
        );
        assert!(
            current.width > 0 && current.height > 0,
            "zero-sized frames are invalid input"
        );

        let bs = self.block_size;
        let blocks_x = current.width.div_ceil(bs);
        let blocks_y = current.height.div_ceil(bs);
        let total_blocks = (blocks_x * blocks_y) as usize;

        let mut changed: Vec<Rect> = Vec::new();

        for by in 0..blocks_y {
            for bx in 0..blocks_x {
                let block = self.block_rect(bx, by, current.width, current.height);
                if block_differs(current, previous, block) {
                    changed.push(block);
                    // Early exit the instant the keyframe threshold is
                    // exceeded (strictly above 80 % of all blocks).
                    if changed.len() * 5 > total_blocks * 4 {
                        return DetectOutcome::Keyframe;
                    }
                }
            }
        }

        if changed.is_empty() {
            return DetectOutcome::NoChange;
        }

        DetectOutcome::Regions(merge_by_proximity(&changed))
    }

    /// Pixel bounds of block `(bx, by)`, clipped to the frame edges.
    fn block_rect(&self, bx: u32, by: u32, width: u32, height: u32) -> Rect {
        let x = bx * self.block_size;
        let y = by * self.block_size;
        Rect::new(
            x,
            y,
            self.block_size.min(width - x),
            self.block_size.min(height - y),
        )
    }
}

/// Row-by-row byte comparison for one block rectangle.
fn block_differs(current: &RawFrame, previous: &RawFrame, block: Rect) -> bool {
    let left = block.x as usize * 4;
    let row_bytes = block.width as usize * 4;
    let cur_stride = current.stride as usize;
    let prev_stride = previous.stride as usize;

    for y in block.y..block.bottom() {
        let cur_off = y as usize * cur_stride + left;
        let prev_off = y as usize * prev_stride + left;
        if current.data[cur_off..cur_off + row_bytes] != previous.data[prev_off..prev_off + row_bytes]
        {
            return true;
        }
    }
    false
}

// ── Proximity merge ──────────────────────────────────────────────

/// Cluster changed blocks whose inflated bounds intersect and return
/// one bounding box (of the un-inflated member blocks) per cluster.
fn merge_by_proximity(blocks: &[Rect]) -> Vec<Rect> {
    let inflated: Vec<Rect> = blocks.iter().map(|b| b.inflated(MERGE_MARGIN)).collect();

    let mut sets = DisjointSet::new(blocks.len());
    for i in 0..blocks.len() {
        for j in (i + 1)..blocks.len() {
            if inflated[i].intersects(&inflated[j]) {
                sets.union(i, j);
            }
        }
    }

    // Accumulate each component's bounding box in first-member order
    // so the output is deterministic.
    let mut order: Vec<usize> = Vec::new();
    let mut bounds: Vec<Option<Rect>> = vec![None; blocks.len()];
    for (i, block) in blocks.iter().enumerate() {
        let root = sets.find(i);
        match &mut bounds[root] {
            Some(rect) => *rect = rect.union(block),
            slot @ None => {
                *slot = Some(*block);
                order.push(root);
            }
        }
    }

    order
        .into_iter()
        .filter_map(|root| bounds[root])
        .collect()
}

/// Array-of-parents union-find with path compression, specialised for
/// block adjacency clustering.
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            // Path compression: point at the grandparent as we walk.
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent[rb] = ra;
        }
    }
}

/// Fraction of the frame area covered by `regions` (0.0 – 1.0).
pub fn coverage(regions: &[Rect], width: u32, height: u32) -> f64 {
    let total = width as f64 * height as f64;
    if total == 0.0 {
        return 0.0;
    }
    let changed: f64 = regions.iter().map(|r| r.area() as f64).sum();
    (changed / total).min(1.0)
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(w: u32, h: u32, fill: u8) -> RawFrame {
        RawFrame::new_bgra(w, h, vec![fill; (w * h * 4) as usize])
    }

    #[test]
    fn identical_frames_are_no_change() {
        let det = DirtyDetector::default();
        let a = frame(128, 128, 0xAA);
        assert_eq!(det.detect(&a, &a.clone()), DetectOutcome::NoChange);
    }

    #[test]
    fn everything_changed_is_keyframe() {
        let det = DirtyDetector::default();
        let a = frame(1920, 1080, 0x00);
        let b = frame(1920, 1080, 0xFF);
        assert_eq!(det.detect(&b, &a), DetectOutcome::Keyframe);
    }

    #[test]
    fn single_pixel_yields_one_block_region() {
        let det = DirtyDetector::default();
        let prev = frame(1920, 1080, 0);
        let mut cur = frame(1920, 1080, 0);
        // Pixel at (40, 70) → block (1, 2).
        let off = (70 * 1920 + 40) * 4;
        cur.data[off] = 0xFF;

        match det.detect(&cur, &prev) {
            DetectOutcome::Regions(regions) => {
                assert_eq!(regions.len(), 1);
                assert_eq!(regions[0], Rect::new(32, 64, 32, 32));
            }
            other => panic!("expected regions, got {other:?}"),
        }
    }

    #[test]
    fn nearby_blocks_merge_into_one_region() {
        let det = DirtyDetector::default();
        let prev = frame(256, 256, 0);
        let mut cur = frame(256, 256, 0);
        // Two horizontally adjacent blocks: (0,0) and (1,0).
        cur.data[0] = 1;
        cur.data[(40 * 4) as usize] = 1;

        match det.detect(&cur, &prev) {
            DetectOutcome::Regions(regions) => {
                assert_eq!(regions.len(), 1);
                assert_eq!(regions[0], Rect::new(0, 0, 64, 32));
            }
            other => panic!("expected regions, got {other:?}"),
        }
    }

    #[test]
    fn distant_blocks_stay_separate() {
        let det = DirtyDetector::default();
        let prev = frame(1920, 1080, 0);
        let mut cur = frame(1920, 1080, 0);
        // Opposite corners of the frame.
        cur.data[0] = 1;
        let off = (1079 * 1920 + 1919) * 4;
        cur.data[off] = 1;

        match det.detect(&cur, &prev) {
            DetectOutcome::Regions(regions) => {
                assert_eq!(regions.len(), 2);
                assert_eq!(regions[0], Rect::new(0, 0, 32, 32));
                // Last block column/row are clipped to the frame edge.
                assert_eq!(regions[1], Rect::new(1888, 1056, 32, 24));
            }
            other => panic!("expected regions, got {other:?}"),
        }
    }

    #[test]
    fn edge_blocks_are_clipped() {
        // 50×50 frame → 2×2 blocks, last ones 18 px wide/tall.
        let det = DirtyDetector::default();
        let prev = frame(50, 50, 0);
        let mut cur = frame(50, 50, 0);
        let off = (49 * 50 + 49) * 4;
        cur.data[off] = 1;

        match det.detect(&cur, &prev) {
            DetectOutcome::Regions(regions) => {
                assert_eq!(regions.len(), 1);
                assert_eq!(regions[0], Rect::new(32, 32, 18, 18));
            }
            other => panic!("expected regions, got {other:?}"),
        }
    }

    #[test]
    #[should_panic(expected = "identical dimensions")]
    fn dimension_mismatch_is_a_precondition_violation() {
        let det = DirtyDetector::default();
        let a = frame(64, 64, 0);
        let b = frame(32, 32, 0);
        det.detect(&a, &b);
    }

    #[test]
    fn coverage_ratio() {
        let regions = [Rect::new(0, 0, 50, 50)];
        let ratio = coverage(&regions, 100, 100);
        assert!((ratio - 0.25).abs() < 1e-9);
    }
}
