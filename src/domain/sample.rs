// ============================================================
// Layer 3 — Segmentation Sample
// ============================================================
// One dataset item after preprocessing, still in plain Rust
// vectors. The batcher (Layer 4) turns a Vec of these into
// tensors.
//
//   input  — normalised image, CHW order, length 3 * H * W
//   mask   — class index per pixel, row-major, length H * W
//            (None for unlabeled test data)

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationItem {
    /// Position of the item in its source dataset
    pub index:  usize,
    pub input:  Vec<f32>,
    pub mask:   Option<Vec<i64>>,
    pub height: usize,
    pub width:  usize,
}

impl SegmentationItem {
    pub fn num_pixels(&self) -> usize {
        self.height * self.width
    }

    pub fn is_labeled(&self) -> bool {
        self.mask.is_some()
    }
}
