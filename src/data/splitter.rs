// ============================================================
// Layer 4 — Train/Validation Splitter
// ============================================================
// Derives training and validation subsets from one dataset
// (the `trainval` shape of the data config).
//
// Sizes for N items and test_ratio r:
//   val_size   = max(1, round(r * N))
//   train_size = N - val_size
//
// The split is by index: the first train_size indices are the
// training subset, the rest the validation subset. With a
// `shuffle_seed` the indices are permuted first with a seeded
// Fisher-Yates shuffle, so the split stays reproducible.
//
// Subsets are views (`IndexedSubset`) over a shared dataset;
// nothing is copied.
//
// Reference: rand crate (SliceRandom, StdRng)

use burn::data::dataset::Dataset;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::config::error::ConfigError;
use crate::data::dataset::DynDataset;
use crate::domain::sample::SegmentationItem;

/// `(train_size, val_size)` for `n` items and validation ratio `ratio`.
pub fn split_sizes(ratio: f64, n: usize) -> Result<(usize, usize), ConfigError> {
    if !(ratio > 0.0 && ratio < 1.0) {
        return Err(ConfigError::invalid("test_ratio", format!("{ratio} is not in (0, 1)")));
    }
    if n == 0 {
        return Err(ConfigError::invalid("test_ratio", "cannot split an empty dataset"));
    }
    let val = ((ratio * n as f64).round() as usize).max(1);
    Ok((n - val, val))
}

// ─── IndexedSubset ────────────────────────────────────────────────────────────
/// A view of selected indices of another dataset.
#[derive(Clone)]
pub struct IndexedSubset {
    inner:   DynDataset,
    indices: Vec<usize>,
}

impl IndexedSubset {
    pub fn new(inner: DynDataset, indices: Vec<usize>) -> Self {
        Self { inner, indices }
    }

    /// Every index of `inner`, in order.
    pub fn full(inner: DynDataset) -> Self {
        let indices = (0..inner.len()).collect();
        Self { inner, indices }
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }
}

impl Dataset<SegmentationItem> for IndexedSubset {
    fn get(&self, index: usize) -> Option<SegmentationItem> {
        self.indices.get(index).and_then(|&i| self.inner.get(i))
    }

    fn len(&self) -> usize {
        self.indices.len()
    }
}

/// Split `dataset` into `(train, val)` subsets.
pub fn trainval_split(
    dataset:      DynDataset,
    test_ratio:   f64,
    shuffle_seed: Option<u64>,
) -> Result<(IndexedSubset, IndexedSubset), ConfigError> {
    let n = dataset.len();
    let (train_size, val_size) = split_sizes(test_ratio, n)?;

    let mut order: Vec<usize> = (0..n).collect();
    if let Some(seed) = shuffle_seed {
        order.shuffle(&mut StdRng::seed_from_u64(seed));
    }
    let val_indices = order.split_off(train_size);

    tracing::info!("trainval split: {} train / {} val (ratio {})", train_size, val_size, test_ratio);
    Ok((IndexedSubset::new(dataset.clone(), order), IndexedSubset::new(dataset, val_indices)))
}

// ─── Tests ────────────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::SyntheticShapes;
    use std::sync::Arc;

    fn dataset(n: usize) -> DynDataset {
        Arc::new(SyntheticShapes::new(n, [4, 4], 3, 0))
    }

    #[test]
    fn test_split_sizes_formula() {
        assert_eq!(split_sizes(0.2, 100).unwrap(), (80, 20));
        assert_eq!(split_sizes(0.25, 10).unwrap(), (7, 3)); // round(2.5) = 3
        assert_eq!(split_sizes(0.01, 10).unwrap(), (9, 1)); // at least one
        for n in 1..50 {
            let (t, v) = split_sizes(0.3, n).unwrap();
            assert_eq!(t + v, n);
            assert!(v >= 1);
        }
    }

    #[test]
    fn test_bad_ratio_rejected() {
        assert!(split_sizes(0.0, 10).is_err());
        assert!(split_sizes(1.0, 10).is_err());
        assert!(split_sizes(f64::NAN, 10).is_err());
        assert!(split_sizes(0.5, 0).is_err());
    }

    #[test]
    fn test_split_is_contiguous_by_index() {
        let (train, val) = trainval_split(dataset(10), 0.3, None).unwrap();
        assert_eq!(train.indices(), &[0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(val.indices(), &[7, 8, 9]);
        assert_eq!(val.get(0).unwrap().index, 7);
    }

    #[test]
    fn test_seeded_split_is_reproducible_and_disjoint() {
        let (a_train, a_val) = trainval_split(dataset(20), 0.25, Some(3)).unwrap();
        let (b_train, b_val) = trainval_split(dataset(20), 0.25, Some(3)).unwrap();
        assert_eq!(a_train.indices(), b_train.indices());
        assert_eq!(a_val.indices(), b_val.indices());

        let mut all: Vec<usize> = a_train.indices().iter().chain(a_val.indices()).copied().collect();
        all.sort();
        assert_eq!(all, (0..20).collect::<Vec<_>>());
    }
}
