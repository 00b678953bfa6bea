// ============================================================
// Layer 5 — Segmentation Losses
// ============================================================
// BinaryDiceLoss, per sample over all flattened elements:
//
//   num  = 2 * Σ(p · t) + smooth
//   den  = Σ(p^exp + t^exp) + smooth
//   loss = 1 − num / den
//
// reduced over the batch with mean | sum | none.
//
// DiceLoss: softmax over the class dimension, then BinaryDiceLoss
// per class channel against the one-hot target. `ignore_index`
// skips a class, `weight` scales each class; the total is divided
// by the number of classes.
//
// `Criterion` is the configured loss used by the learner. It takes
// raw logits [B, C, H, W] and integer masks [B, H, W] and returns
// the scalar loss plus named components for logging.
//
// Reference: Milletari et al. (2016) V-Net

use burn::{
    nn::loss::CrossEntropyLossConfig,
    prelude::*,
    tensor::activation::{sigmoid, softmax},
};
use serde::Deserialize;
use std::{collections::BTreeMap, str::FromStr};
use thiserror::Error;

use crate::config::{
    error::ConfigError,
    getter::{parse_args, Args, Factory},
};
use crate::domain::registry::Registry;

// ─── Errors ───────────────────────────────────────────────────────────────────
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LossError {
    #[error("Unexpected reduction {0}")]
    UnexpectedReduction(String),

    #[error("predict & target batch size don't match ({predict} vs {target})")]
    BatchMismatch { predict: usize, target: usize },

    #[error("predict & target shape do not match ({predict:?} vs {target:?})")]
    ShapeMismatch { predict: Vec<usize>, target: Vec<usize> },

    #[error("expect weight shape [{expected}], got [{got}]")]
    WeightLength { expected: usize, got: usize },
}

// ─── Reduction ────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    Mean,
    Sum,
    None,
}

impl FromStr for Reduction {
    type Err = LossError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mean" => Ok(Self::Mean),
            "sum" => Ok(Self::Sum),
            "none" => Ok(Self::None),
            other => Err(LossError::UnexpectedReduction(other.to_string())),
        }
    }
}

// ─── BinaryDiceLoss ───────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryDiceLoss {
    pub smooth:    f64,
    pub p:         f64,
    pub reduction: Reduction,
}

impl Default for BinaryDiceLoss {
    fn default() -> Self {
        Self { smooth: 1.0, p: 2.0, reduction: Reduction::Mean }
    }
}

impl BinaryDiceLoss {
    /// predict / target: same shape, batch first. Returns [1] (mean, sum) or [B] (none).
    pub fn forward<B: Backend, const D: usize>(
        &self,
        predict: Tensor<B, D>,
        target:  Tensor<B, D>,
    ) -> Result<Tensor<B, 1>, LossError> {
        let (pd, td) = (predict.dims(), target.dims());
        if pd[0] != td[0] {
            return Err(LossError::BatchMismatch { predict: pd[0], target: td[0] });
        }
        if pd != td {
            return Err(LossError::ShapeMismatch { predict: pd.to_vec(), target: td.to_vec() });
        }

        let batch = pd[0];
        let per_sample = predict.shape().num_elements() / batch.max(1);
        let predict = predict.reshape([batch, per_sample]);
        let target = target.reshape([batch, per_sample]);

        let num = predict.clone().mul(target.clone()).sum_dim(1).mul_scalar(2.0).add_scalar(self.smooth);
        let den = (predict.powf_scalar(self.p) + target.powf_scalar(self.p)).sum_dim(1).add_scalar(self.smooth);
        let loss = num.div(den).neg().add_scalar(1.0).reshape([batch]);

        Ok(match self.reduction {
            Reduction::Mean => loss.mean(),
            Reduction::Sum => loss.sum(),
            Reduction::None => loss,
        })
    }
}

// ─── DiceLoss ─────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DiceLoss {
    pub weight:       Option<Vec<f32>>,
    pub ignore_index: Option<usize>,
    pub binary:       BinaryDiceLoss,
}

impl DiceLoss {
    /// logits: [B, C, H, W]; target: one-hot [B, C, H, W]
    pub fn forward<B: Backend>(&self, logits: Tensor<B, 4>, target: Tensor<B, 4>) -> Result<Tensor<B, 1>, LossError> {
        let (pd, td) = (logits.dims(), target.dims());
        if pd != td {
            return Err(LossError::ShapeMismatch { predict: pd.to_vec(), target: td.to_vec() });
        }
        let [b, c, h, w] = pd;
        self.check_weight(c)?;

        let probs = softmax(logits, 1);
        let mut total: Option<Tensor<B, 1>> = None;
        for i in (0..c).filter(|&i| Some(i) != self.ignore_index) {
            let p = probs.clone().slice([0..b, i..i + 1, 0..h, 0..w]);
            let t = target.clone().slice([0..b, i..i + 1, 0..h, 0..w]);
            let mut dice = self.binary.forward(p, t)?;
            if let Some(weight) = &self.weight {
                dice = dice.mul_scalar(weight[i]);
            }
            total = Some(match total {
                Some(acc) => acc + dice,
                None => dice,
            });
        }

        let device = probs.device();
        let total = total.unwrap_or_else(|| Tensor::zeros([1], &device));
        Ok(total.div_scalar(c as f64))
    }

    pub fn check_weight(&self, num_classes: usize) -> Result<(), LossError> {
        match &self.weight {
            Some(w) if w.len() != num_classes => Err(LossError::WeightLength { expected: num_classes, got: w.len() }),
            _ => Ok(()),
        }
    }
}

/// [B, H, W] class ids → one-hot [B, C, H, W] floats.
pub fn one_hot<B: Backend>(mask: Tensor<B, 3, Int>, num_classes: usize) -> Tensor<B, 4> {
    let planes = (0..num_classes)
        .map(|k| mask.clone().equal_elem(k as i64).float().unsqueeze_dim::<4>(1))
        .collect();
    Tensor::cat(planes, 1)
}

// ─── Criterion ────────────────────────────────────────────────────────────────
pub struct LossOutput<B: Backend> {
    /// Loss tensor ([1] for mean/sum reductions)
    pub loss:       Tensor<B, 1>,
    /// Named scalar components for logging
    pub components: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Criterion {
    /// sigmoid(logits[:, 0]) vs a binary mask
    BinaryDice(BinaryDiceLoss),
    Dice(DiceLoss),
    /// DiceLoss with weight / ignore_index always unset, reporting `{"loss": ...}`
    DiceWithStat(DiceLoss),
    CrossEntropy {
        weight:       Option<Vec<f32>>,
        ignore_index: Option<usize>,
    },
}

impl Criterion {
    pub fn name(&self) -> &'static str {
        match self {
            Self::BinaryDice(_) => "BinaryDiceLoss",
            Self::Dice(_) => "DiceLoss",
            Self::DiceWithStat(_) => "Dicewithstat",
            Self::CrossEntropy { .. } => "CrossEntropyLoss",
        }
    }

    /// Check class-count dependent arguments against the model.
    pub fn check_classes(&self, num_classes: usize) -> Result<(), LossError> {
        match self {
            Self::Dice(d) | Self::DiceWithStat(d) => d.check_weight(num_classes),
            Self::CrossEntropy { weight: Some(w), .. } if w.len() != num_classes => {
                Err(LossError::WeightLength { expected: num_classes, got: w.len() })
            }
            _ => Ok(()),
        }
    }

    /// logits: [B, C, H, W]; mask: [B, H, W]
    pub fn forward<B: Backend>(&self, logits: Tensor<B, 4>, mask: Tensor<B, 3, Int>) -> Result<LossOutput<B>, LossError> {
        let [b, c, h, w] = logits.dims();
        let md = mask.dims();
        if b != md[0] {
            return Err(LossError::BatchMismatch { predict: b, target: md[0] });
        }
        if [h, w] != [md[1], md[2]] {
            return Err(LossError::ShapeMismatch { predict: vec![b, c, h, w], target: md.to_vec() });
        }

        let loss = match self {
            Self::BinaryDice(bd) => {
                let probs = sigmoid(logits.slice([0..b, 0..1, 0..h, 0..w]));
                bd.forward(probs, mask.float().unsqueeze_dim::<4>(1))?
            }
            Self::Dice(d) | Self::DiceWithStat(d) => d.forward(logits, one_hot(mask, c))?,
            Self::CrossEntropy { weight, ignore_index } => {
                self.check_classes(c)?;
                let device = logits.device();
                let ce = CrossEntropyLossConfig::new()
                    .with_weights(weight.clone())
                    .with_pad_tokens(ignore_index.map(|i| vec![i]))
                    .init(&device);
                // [B, C, H, W] → [B·H·W, C]
                let flat = logits.swap_dims(1, 2).swap_dims(2, 3).reshape([b * h * w, c]);
                ce.forward(flat, mask.reshape([b * h * w]))
            }
        };

        let value = loss.clone().mean().into_scalar().elem::<f64>();
        let mut components = BTreeMap::new();
        components.insert("loss".to_string(), value);
        Ok(LossOutput { loss, components })
    }
}

// ─── Factories ────────────────────────────────────────────────────────────────
fn default_smooth() -> f64 {
    1.0
}

fn default_p() -> f64 {
    2.0
}

fn default_reduction() -> String {
    "mean".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DiceArgs {
    #[serde(default)]
    weight:       Option<Vec<f32>>,
    #[serde(default)]
    ignore_index: Option<usize>,
    #[serde(default = "default_smooth")]
    smooth:       f64,
    #[serde(default = "default_p")]
    p:            f64,
    #[serde(default = "default_reduction")]
    reduction:    String,
}

impl DiceArgs {
    fn binary(&self) -> Result<BinaryDiceLoss, ConfigError> {
        let reduction = self
            .reduction
            .parse()
            .map_err(|e: LossError| ConfigError::invalid("reduction", e.to_string()))?;
        Ok(BinaryDiceLoss { smooth: self.smooth, p: self.p, reduction })
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CrossEntropyArgs {
    #[serde(default)]
    weight:       Option<Vec<f32>>,
    #[serde(default)]
    ignore_index: Option<usize>,
}

fn binary_dice(args: Args) -> Result<Criterion, ConfigError> {
    let a: DiceArgs = parse_args("BinaryDiceLoss", args)?;
    if a.weight.is_some() || a.ignore_index.is_some() {
        return Err(ConfigError::invalid("BinaryDiceLoss", "takes no weight or ignore_index"));
    }
    Ok(Criterion::BinaryDice(a.binary()?))
}

fn dice(args: Args) -> Result<Criterion, ConfigError> {
    let a: DiceArgs = parse_args("DiceLoss", args)?;
    Ok(Criterion::Dice(DiceLoss { binary: a.binary()?, weight: a.weight, ignore_index: a.ignore_index }))
}

fn dice_with_stat(args: Args) -> Result<Criterion, ConfigError> {
    let a: DiceArgs = parse_args("Dicewithstat", args)?;
    if a.weight.is_some() || a.ignore_index.is_some() {
        tracing::warn!("Dicewithstat ignores 'weight' and 'ignore_index'; use DiceLoss to apply them");
    }
    Ok(Criterion::DiceWithStat(DiceLoss { binary: a.binary()?, weight: None, ignore_index: None }))
}

fn cross_entropy(args: Args) -> Result<Criterion, ConfigError> {
    let a: CrossEntropyArgs = parse_args("CrossEntropyLoss", args)?;
    Ok(Criterion::CrossEntropy { weight: a.weight, ignore_index: a.ignore_index })
}

pub fn register(registry: &mut Registry<Factory<Criterion>>) -> Result<(), ConfigError> {
    registry.register(Factory::new("BinaryDiceLoss", binary_dice))?;
    registry.register(Factory::new("DiceLoss", dice))?;
    registry.register(Factory::new("Dicewithstat", dice_with_stat))?;
    registry.register(Factory::new("CrossEntropyLoss", cross_entropy))?;
    Ok(())
}

// ─── Tests ────────────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    type TB = NdArray;

    fn scalar(t: Tensor<TB, 1>) -> f64 {
        t.into_scalar().elem::<f64>()
    }

    #[test]
    fn test_perfect_overlap_is_near_zero() {
        let device = Default::default();
        let ones = Tensor::<TB, 2>::ones([2, 16], &device);
        let loss = BinaryDiceLoss::default().forward(ones.clone(), ones).unwrap();
        assert!(scalar(loss).abs() < 1e-6);
    }

    #[test]
    fn test_disjoint_is_near_one() {
        let device = Default::default();
        let p = Tensor::<TB, 2>::from_data(TensorData::new(vec![1.0f32; 64].into_iter().chain(vec![0.0; 64]).collect::<Vec<_>>(), [1, 128]), &device);
        let t = Tensor::<TB, 2>::from_data(TensorData::new(vec![0.0f32; 64].into_iter().chain(vec![1.0; 64]).collect::<Vec<_>>(), [1, 128]), &device);
        let loss = scalar(BinaryDiceLoss::default().forward(p, t).unwrap());
        assert!((loss - 1.0).abs() < 0.01, "loss = {loss}");
    }

    #[test]
    fn test_reductions() {
        let device = Default::default();
        let p = Tensor::<TB, 2>::zeros([3, 4], &device);
        let t = Tensor::<TB, 2>::ones([3, 4], &device);
        let none = BinaryDiceLoss { reduction: Reduction::None, ..Default::default() }.forward(p.clone(), t.clone()).unwrap();
        assert_eq!(none.dims(), [3]);
        let sum = scalar(BinaryDiceLoss { reduction: Reduction::Sum, ..Default::default() }.forward(p.clone(), t.clone()).unwrap());
        let mean = scalar(BinaryDiceLoss::default().forward(p, t).unwrap());
        assert!((sum - 3.0 * mean).abs() < 1e-5);
    }

    #[test]
    fn test_unknown_reduction_is_rejected() {
        assert_eq!("max".parse::<Reduction>(), Err(LossError::UnexpectedReduction("max".into())));
        let args: Args = serde_yaml::from_str("{reduction: max}").unwrap();
        assert!(dice(args).is_err());
    }

    #[test]
    fn test_batch_mismatch() {
        let device = Default::default();
        let err = BinaryDiceLoss::default()
            .forward(Tensor::<TB, 2>::ones([2, 4], &device), Tensor::<TB, 2>::ones([3, 4], &device))
            .unwrap_err();
        assert_eq!(err, LossError::BatchMismatch { predict: 2, target: 3 });
    }

    #[test]
    fn test_one_hot_layout() {
        let device = Default::default();
        let mask = Tensor::<TB, 3, Int>::from_data(TensorData::new(vec![0i64, 2, 1, 2], [1, 2, 2]), &device);
        let oh = one_hot(mask, 3);
        assert_eq!(oh.dims(), [1, 3, 2, 2]);
        let values = oh.into_data().convert::<f32>().to_vec::<f32>().unwrap();
        // class planes: 0 → [1,0,0,0], 1 → [0,0,1,0], 2 → [0,1,0,1]
        assert_eq!(values, vec![1., 0., 0., 0., 0., 0., 1., 0., 0., 1., 0., 1.]);
    }

    #[test]
    fn test_dice_loss_confident_correct_prediction_is_low() {
        let device = Default::default();
        let mask = Tensor::<TB, 3, Int>::from_data(TensorData::new(vec![0i64, 1, 1, 0], [1, 2, 2]), &device);
        let logits = one_hot(mask.clone(), 2).mul_scalar(20.0);
        let out = Criterion::DiceWithStat(DiceLoss::default()).forward(logits, mask).unwrap();
        assert!(out.components["loss"] < 0.05);
    }

    #[test]
    fn test_dice_weight_length_checked() {
        let device = Default::default();
        let loss = DiceLoss { weight: Some(vec![1.0, 2.0]), ..Default::default() };
        let err = loss
            .forward(Tensor::<TB, 4>::zeros([1, 3, 2, 2], &device), Tensor::<TB, 4>::zeros([1, 3, 2, 2], &device))
            .unwrap_err();
        assert_eq!(err, LossError::WeightLength { expected: 3, got: 2 });
    }

    #[test]
    fn test_criterion_spatial_mismatch() {
        let device = Default::default();
        let err = Criterion::Dice(DiceLoss::default())
            .forward(Tensor::<TB, 4>::zeros([1, 2, 4, 4], &device), Tensor::<TB, 3, Int>::zeros([1, 3, 4], &device))
            .err()
            .unwrap();
        assert!(matches!(err, LossError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_dicewithstat_drops_weight_and_ignore_index() {
        let args: Args = serde_yaml::from_str("{weight: [1.0, 2.0], ignore_index: 0}").unwrap();
        match dice_with_stat(args).unwrap() {
            Criterion::DiceWithStat(d) => {
                assert!(d.weight.is_none());
                assert!(d.ignore_index.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_cross_entropy_runs() {
        let device = Default::default();
        let mask = Tensor::<TB, 3, Int>::zeros([2, 3, 3], &device);
        let out = Criterion::CrossEntropy { weight: None, ignore_index: None }
            .forward(Tensor::<TB, 4>::zeros([2, 4, 3, 3], &device), mask)
            .unwrap();
        // uniform logits over 4 classes → ln 4
        assert!((out.components["loss"] - 4f64.ln()).abs() < 1e-4);
    }
}
