// ============================================================
// Layer 5 — Model + Criterion Wrapper
// ============================================================
// Couples a segmentation model with its loss so the learner can
// run one call per batch:
//
//   (logits, loss, components) = wrapper.forward(images, masks)
//   preds                      = predictions(logits)
//
// `valid()` maps the model to the inner backend for validation,
// keeping the same criterion.

use burn::{
    module::AutodiffModule,
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use std::collections::BTreeMap;

use crate::ml::{
    loss::{Criterion, LossError},
    model::SegmentationModel,
};

pub struct ForwardOutput<B: Backend> {
    /// Per-pixel class logits — [B, C, H, W]
    pub logits:     Tensor<B, 4>,
    /// Scalar loss — [1]
    pub loss:       Tensor<B, 1>,
    pub components: BTreeMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct ModelWithLoss<M> {
    pub model:     M,
    pub criterion: Criterion,
}

impl<M> ModelWithLoss<M> {
    pub fn new(model: M, criterion: Criterion) -> Self {
        Self { model, criterion }
    }

    pub fn forward<B>(&self, images: Tensor<B, 4>, masks: Tensor<B, 3, Int>) -> Result<ForwardOutput<B>, LossError>
    where
        B: Backend,
        M: SegmentationModel<B>,
    {
        let logits = self.model.logits(images);
        let out = self.criterion.forward(logits.clone(), masks)?;
        // reduction "none" yields one value per sample
        Ok(ForwardOutput { logits, loss: out.loss.mean(), components: out.components })
    }

    pub fn valid<B>(&self) -> ModelWithLoss<M::InnerModule>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
    {
        ModelWithLoss { model: self.model.valid(), criterion: self.criterion.clone() }
    }
}

/// Per-pixel class ids from logits: [B, C, H, W] -> [B, H, W].
pub fn predictions<B: Backend>(logits: Tensor<B, 4>) -> Tensor<B, 3, Int> {
    logits.argmax(1).squeeze::<3>(1)
}
