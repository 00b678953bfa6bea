// ============================================================
// Layer 5 — Segmentation Metrics
// ============================================================
// Metrics accumulate a confusion matrix over a validation pass
// (rows = target class, columns = predicted class) and derive:
//
//   PixelAccuracy  Σ tp / Σ pixels
//   MeanIoU        mean over present classes of tp / (tp + fp + fn)
//   DiceScore      mean over present classes of 2tp / (2tp + fp + fn)
//
// Pixels whose target equals `ignore_index`, or whose ids fall
// outside [0, num_classes), are not counted.

use serde::Deserialize;

use crate::config::{
    error::ConfigError,
    getter::{parse_args, Args, Factory},
};
use crate::domain::{registry::Registry, traits::Metric};

// ─── Confusion matrix ─────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq)]
pub struct ConfusionMatrix {
    num_classes:  usize,
    ignore_index: Option<i64>,
    counts:       Vec<u64>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize, ignore_index: Option<i64>) -> Self {
        Self { num_classes, ignore_index, counts: vec![0; num_classes * num_classes] }
    }

    pub fn reset(&mut self) {
        self.counts.iter_mut().for_each(|c| *c = 0);
    }

    pub fn update(&mut self, preds: &[i64], targets: &[i64]) {
        let n = self.num_classes as i64;
        for (&p, &t) in preds.iter().zip(targets) {
            if Some(t) == self.ignore_index || !(0..n).contains(&t) || !(0..n).contains(&p) {
                continue;
            }
            self.counts[(t * n + p) as usize] += 1;
        }
    }

    pub fn get(&self, target: usize, pred: usize) -> u64 {
        self.counts[target * self.num_classes + pred]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// `(tp, fp, fn)` for class `c`
    pub fn class_stats(&self, c: usize) -> (u64, u64, u64) {
        let tp = self.get(c, c);
        let fp = (0..self.num_classes).map(|t| self.get(t, c)).sum::<u64>() - tp;
        let fn_ = (0..self.num_classes).map(|p| self.get(c, p)).sum::<u64>() - tp;
        (tp, fp, fn_)
    }

    pub fn pixel_accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let correct: u64 = (0..self.num_classes).map(|c| self.get(c, c)).sum();
        correct as f64 / total as f64
    }

    fn mean_over_classes(&self, score: impl Fn(u64, u64, u64) -> Option<f64>) -> f64 {
        let values: Vec<f64> = (0..self.num_classes)
            .filter(|&c| Some(c as i64) != self.ignore_index)
            .filter_map(|c| {
                let (tp, fp, fn_) = self.class_stats(c);
                score(tp, fp, fn_)
            })
            .collect();
        if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        }
    }

    pub fn mean_iou(&self) -> f64 {
        self.mean_over_classes(|tp, fp, fn_| {
            let union = tp + fp + fn_;
            (union > 0).then(|| tp as f64 / union as f64)
        })
    }

    pub fn dice(&self) -> f64 {
        self.mean_over_classes(|tp, fp, fn_| {
            let denom = 2 * tp + fp + fn_;
            (denom > 0).then(|| 2.0 * tp as f64 / denom as f64)
        })
    }
}

// ─── Metric implementations ───────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    PixelAccuracy,
    MeanIoU,
    DiceScore,
}

impl MetricKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PixelAccuracy => "PixelAccuracy",
            Self::MeanIoU => "MeanIoU",
            Self::DiceScore => "DiceScore",
        }
    }
}

/// A metric backed by a confusion matrix.
pub struct ConfusionMetric {
    kind:   MetricKind,
    matrix: ConfusionMatrix,
}

impl ConfusionMetric {
    pub fn new(kind: MetricKind, num_classes: usize, ignore_index: Option<i64>) -> Self {
        Self { kind, matrix: ConfusionMatrix::new(num_classes, ignore_index) }
    }
}

impl Metric for ConfusionMetric {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn reset(&mut self) {
        self.matrix.reset();
    }

    fn update(&mut self, preds: &[i64], targets: &[i64]) {
        self.matrix.update(preds, targets);
    }

    fn value(&self) -> f64 {
        match self.kind {
            MetricKind::PixelAccuracy => self.matrix.pixel_accuracy(),
            MetricKind::MeanIoU => self.matrix.mean_iou(),
            MetricKind::DiceScore => self.matrix.dice(),
        }
    }
}

// ─── Specs ────────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
struct MetricArgs {
    #[serde(default)]
    num_classes:  Option<usize>,
    #[serde(default)]
    ignore_index: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricSpec {
    pub kind:         MetricKind,
    /// None → use the model's class count
    pub num_classes:  Option<usize>,
    pub ignore_index: Option<i64>,
}

impl MetricSpec {
    pub fn build(&self, model_classes: usize) -> Box<dyn Metric> {
        let n = self.num_classes.unwrap_or(model_classes);
        Box::new(ConfusionMetric::new(self.kind, n, self.ignore_index))
    }
}

fn spec_for(kind: MetricKind, args: Args) -> Result<MetricSpec, ConfigError> {
    let a: MetricArgs = parse_args(kind.name(), args)?;
    if a.num_classes == Some(0) {
        return Err(ConfigError::invalid("num_classes", "must be at least 1"));
    }
    Ok(MetricSpec { kind, num_classes: a.num_classes, ignore_index: a.ignore_index })
}

fn pixel_accuracy(args: Args) -> Result<MetricSpec, ConfigError> {
    spec_for(MetricKind::PixelAccuracy, args)
}

fn mean_iou(args: Args) -> Result<MetricSpec, ConfigError> {
    spec_for(MetricKind::MeanIoU, args)
}

fn dice_score(args: Args) -> Result<MetricSpec, ConfigError> {
    spec_for(MetricKind::DiceScore, args)
}

pub fn register(registry: &mut Registry<Factory<MetricSpec>>) -> Result<(), ConfigError> {
    registry.register(Factory::new("PixelAccuracy", pixel_accuracy))?;
    registry.register(Factory::new("MeanIoU", mean_iou))?;
    registry.register(Factory::new("DiceScore", dice_score))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_prediction() {
        let mut m = ConfusionMatrix::new(3, None);
        m.update(&[0, 1, 2, 2], &[0, 1, 2, 2]);
        assert_eq!(m.pixel_accuracy(), 1.0);
        assert_eq!(m.mean_iou(), 1.0);
        assert_eq!(m.dice(), 1.0);
    }

    #[test]
    fn test_known_confusion() {
        // targets 0 0 1 1, preds 0 1 1 1
        let mut m = ConfusionMatrix::new(2, None);
        m.update(&[0, 1, 1, 1], &[0, 0, 1, 1]);
        assert_eq!(m.pixel_accuracy(), 0.75);
        // class 0: tp 1, fn 1 → 1/2 ; class 1: tp 2, fp 1 → 2/3
        assert!((m.mean_iou() - (0.5 + 2.0 / 3.0) / 2.0).abs() < 1e-12);
        // dice: 2/3 and 4/5
        assert!((m.dice() - (2.0 / 3.0 + 0.8) / 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_ignore_index_and_out_of_range_skipped() {
        let mut m = ConfusionMatrix::new(2, Some(255));
        m.update(&[0, 1, 1, 7], &[255, 1, 1, 0]);
        assert_eq!(m.total(), 2);
        assert_eq!(m.pixel_accuracy(), 1.0);
    }

    #[test]
    fn test_metric_trait_reset() {
        let mut metric = MetricSpec { kind: MetricKind::MeanIoU, num_classes: None, ignore_index: None }.build(2);
        metric.update(&[1, 1], &[0, 0]);
        assert_eq!(metric.value(), 0.0);
        metric.reset();
        metric.update(&[1, 0], &[1, 0]);
        assert_eq!(metric.value(), 1.0);
        assert_eq!(metric.name(), "MeanIoU");
    }

    #[test]
    fn test_factory() {
        let args: Args = serde_yaml::from_str("{num_classes: 4}").unwrap();
        assert_eq!(mean_iou(args).unwrap().num_classes, Some(4));
        let bad: Args = serde_yaml::from_str("{classes: 4}").unwrap();
        assert!(dice_score(bad).is_err());
    }
}
