// ============================================================
// Layer 4 — Segmentation Batcher
// ============================================================
// Implements Burn's Batcher trait to turn a Vec<SegmentationItem>
// into tensors on the target device.
//
//   Input:  N items, each input of length 3*H*W, mask of H*W
//   Output: inputs [N, 3, H, W] (float)
//           masks  [N, H, W]    (int, absent for unlabeled data)
//
// How items are stacked is chosen by a collate function looked up
// by name (`collate_fn:` in a loader node).
//
// Reference: Burn Book §4 (Batcher)

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
    tensor::TensorData,
};

use crate::domain::{registry::{Registrable, Registry}, sample::SegmentationItem};
use crate::config::error::ConfigError;

// ─── SegmentationBatch ────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct SegmentationBatch<B: Backend> {
    /// Normalised images — shape: [batch, 3, H, W]
    pub inputs:  Tensor<B, 4>,

    /// Class ids — shape: [batch, H, W]
    pub masks:   Option<Tensor<B, 3, Int>>,

    /// Dataset index of each row
    pub indices: Vec<usize>,
}

impl<B: Backend> SegmentationBatch<B> {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

// ─── Collate functions ────────────────────────────────────────────────────────
/// Host-side stacked batch, before tensors are created.
#[derive(Debug, Clone, PartialEq)]
pub struct HostBatch {
    pub inputs:  Vec<f32>,
    pub masks:   Option<Vec<i64>>,
    pub indices: Vec<usize>,
    pub height:  usize,
    pub width:   usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollateFn {
    /// Stack same-sized items; masks kept only if every item has one.
    Default,
}

impl Registrable for CollateFn {
    fn name(&self) -> &str {
        match self {
            Self::Default => "default_collate",
        }
    }
}

impl CollateFn {
    pub fn collate(&self, items: Vec<SegmentationItem>) -> HostBatch {
        match self {
            Self::Default => default_collate(items),
        }
    }
}

pub fn default_collate(items: Vec<SegmentationItem>) -> HostBatch {
    let (height, width) = items.first().map(|i| (i.height, i.width)).unwrap_or((0, 0));
    let pixels = items.first().map_or(0, SegmentationItem::num_pixels);
    let labeled = items.iter().all(SegmentationItem::is_labeled);
    if !labeled && items.iter().any(SegmentationItem::is_labeled) {
        tracing::warn!("batch mixes labeled and unlabeled items; dropping labels");
    }

    let mut inputs = Vec::with_capacity(items.len() * 3 * pixels);
    let mut masks = Vec::with_capacity(if labeled { items.len() * pixels } else { 0 });
    let mut indices = Vec::with_capacity(items.len());

    for item in items {
        debug_assert_eq!((item.height, item.width), (height, width), "default_collate needs equal sizes");
        inputs.extend_from_slice(&item.input);
        if labeled {
            if let Some(mask) = item.mask {
                masks.extend(mask);
            }
        }
        indices.push(item.index);
    }

    HostBatch { inputs, masks: labeled.then_some(masks), indices, height, width }
}

pub fn register(registry: &mut Registry<CollateFn>) -> Result<(), ConfigError> {
    registry.register(CollateFn::Default)?;
    Ok(())
}

// ─── SegmentationBatcher ──────────────────────────────────────────────────────
/// Holds the target device so tensors are created where the model lives.
#[derive(Clone, Debug)]
pub struct SegmentationBatcher<B: Backend> {
    pub device:  B::Device,
    pub collate: CollateFn,
}

impl<B: Backend> SegmentationBatcher<B> {
    pub fn new(device: B::Device, collate: CollateFn) -> Self {
        Self { device, collate }
    }
}

impl<B: Backend> Batcher<SegmentationItem, SegmentationBatch<B>> for SegmentationBatcher<B> {
    fn batch(&self, items: Vec<SegmentationItem>) -> SegmentationBatch<B> {
        let host = self.collate.collate(items);
        let n = host.indices.len();
        let (h, w) = (host.height, host.width);

        let inputs = Tensor::<B, 4>::from_data(TensorData::new(host.inputs, [n, 3, h, w]), &self.device);
        let masks = host
            .masks
            .map(|m| Tensor::<B, 3, Int>::from_data(TensorData::new(m, [n, h, w]), &self.device));

        SegmentationBatch { inputs, masks, indices: host.indices }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    fn item(index: usize, fill: f32, label: Option<i64>) -> SegmentationItem {
        SegmentationItem {
            index,
            input: vec![fill; 3 * 2 * 2],
            mask: label.map(|l| vec![l; 4]),
            height: 2,
            width: 2,
        }
    }

    #[test]
    fn test_default_collate_stacks_in_order() {
        let host = default_collate(vec![item(4, 0.0, Some(1)), item(9, 1.0, Some(2))]);
        assert_eq!(host.indices, vec![4, 9]);
        assert_eq!(host.inputs.len(), 24);
        assert_eq!(host.inputs[12], 1.0);
        assert_eq!(host.masks.unwrap(), vec![1, 1, 1, 1, 2, 2, 2, 2]);
    }

    #[test]
    fn test_unlabeled_items_give_no_masks() {
        let host = default_collate(vec![item(0, 0.0, None), item(1, 0.0, Some(1))]);
        assert!(host.masks.is_none());
    }

    #[test]
    fn test_batcher_shapes() {
        let batcher = SegmentationBatcher::<NdArray>::new(Default::default(), CollateFn::Default);
        let batch = batcher.batch(vec![item(0, 0.5, Some(1)), item(1, 0.5, Some(0)), item(2, 0.5, Some(3))]);
        assert_eq!(batch.inputs.dims(), [3, 3, 2, 2]);
        assert_eq!(batch.masks.as_ref().unwrap().dims(), [3, 2, 2]);
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn test_collate_registry_name() {
        let mut reg = Registry::new("collate_fn");
        register(&mut reg).unwrap();
        assert_eq!(reg.get("default_collate").unwrap(), &CollateFn::Default);
    }
}
