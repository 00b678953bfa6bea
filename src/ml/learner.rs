// ============================================================
// Layer 5 — Learner (Training Loop)
// ============================================================
// Drives fit / validate / checkpoint cycles over the state
// machine in `state.rs`.
//
// Per epoch:
//   1. train   — forward + backward + optimizer step per batch on
//                the autodiff backend, LR from the scheduler
//   2. validate every `val_step` epochs and after the last one,
//                on the inner backend via `model.valid()`
//   3. step the LR scheduler (plateau uses the primary metric)
//   4. checkpoint `*_last` every `checkpoint_every` epochs and
//                `*_best` when the primary metric improves
//
// SemanticLearner additionally renders the last validation batch
// (inputs, labels, predictions) into `samples/` and TensorBoard.
//
// Reference: Burn Book §5 (Custom Training Loop)

use anyhow::{anyhow, Context, Result};
use burn::{
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use std::{collections::BTreeMap, path::Path};

use crate::config::{
    error::ConfigError,
    getter::{parse_args, Args, Factory},
};
use crate::data::{
    batcher::SegmentationBatch,
    error::DataError,
    loader::SplitLoader,
};
use crate::domain::{
    registry::Registry,
    traits::{Metric, Objective},
};
use crate::infra::{
    checkpoint::{CheckpointManager, Slot, TrainingSnapshot},
    dashboard::Dashboard,
    metrics::{EpochRecord, MetricsLogger},
    visualization::{SampleBatch, SampleWriter},
};
use crate::ml::{
    model::SegmentationModel,
    scheduler::LrScheduler,
    state::{LearnerState, Schedule},
    wrapper::{predictions, ModelWithLoss},
};

/// Objective name that selects the validation loss.
pub const LOSS_OBJECTIVE: &str = "loss";

// ─── Spec ─────────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnerKind {
    Semantic,
    Supervised,
}

fn default_checkpoint_every() -> usize {
    1
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LearnerArgs {
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every: usize,
    #[serde(default = "default_true")]
    pub save_best:        bool,
    #[serde(default)]
    pub primary_metric:   Option<String>,
    #[serde(default)]
    pub max_steps:        Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LearnerSpec {
    pub kind: LearnerKind,
    pub args: LearnerArgs,
}

impl LearnerSpec {
    pub fn visualize(&self) -> bool {
        self.kind == LearnerKind::Semantic
    }

    /// Pick the objective deciding "best": the named metric, else
    /// the first configured metric, else the validation loss.
    pub fn objective(&self, metric_names: &[String]) -> Result<Objective, ConfigError> {
        match self.args.primary_metric.as_deref() {
            Some(LOSS_OBJECTIVE) => Ok(Objective::new(LOSS_OBJECTIVE, false)),
            Some(name) if metric_names.iter().any(|m| m == name) => Ok(Objective::new(name, true)),
            Some(name) => Err(ConfigError::invalid(
                "learner.args.primary_metric",
                format!("'{name}' is not one of the configured metrics [{}]", metric_names.join(", ")),
            )),
            None => Ok(metric_names
                .first()
                .map(|m| Objective::new(m.clone(), true))
                .unwrap_or_else(|| Objective::new(LOSS_OBJECTIVE, false))),
        }
    }
}

fn learner_args(component: &str, args: Args) -> Result<LearnerArgs, ConfigError> {
    let a: LearnerArgs = parse_args(component, args)?;
    if a.checkpoint_every == 0 {
        return Err(ConfigError::invalid("checkpoint_every", "must be at least 1"));
    }
    if a.max_steps == Some(0) {
        return Err(ConfigError::invalid("max_steps", "must be at least 1"));
    }
    Ok(a)
}

fn semantic(args: Args) -> Result<LearnerSpec, ConfigError> {
    Ok(LearnerSpec { kind: LearnerKind::Semantic, args: learner_args("SemanticLearner", args)? })
}

fn supervised(args: Args) -> Result<LearnerSpec, ConfigError> {
    Ok(LearnerSpec { kind: LearnerKind::Supervised, args: learner_args("SupervisedLearner", args)? })
}

pub fn register(registry: &mut Registry<Factory<LearnerSpec>>) -> Result<(), ConfigError> {
    registry.register(Factory::new("SemanticLearner", semantic))?;
    registry.register(Factory::new("SupervisedLearner", supervised))?;
    Ok(())
}

// ─── Learner ──────────────────────────────────────────────────────────────────
/// Options taken from the resolved run options.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub log_step:  usize,
    pub verbose:   u32,
    /// Cap on iterations per training epoch
    pub num_iters: Option<usize>,
    /// Also render the last training batch of every epoch
    pub demo:      bool,
}

/// Result of one validation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ValReport {
    pub loss:    f64,
    pub metrics: BTreeMap<String, f64>,
}

impl ValReport {
    pub fn value_of(&self, objective: &Objective) -> f64 {
        if objective.name == LOSS_OBJECTIVE {
            return self.loss;
        }
        self.metrics.get(&objective.name).copied().unwrap_or(f64::NAN)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FitSummary {
    pub epochs:      usize,
    pub global_step: usize,
    pub objective:   Objective,
    pub best_metric: Option<f64>,
}

/// Everything a learner is assembled from.
pub struct LearnerParts<B: AutodiffBackend, M, O> {
    pub wrapper:   ModelWithLoss<M>,
    pub optim:     O,
    pub scheduler: LrScheduler,
    pub metrics:   Vec<Box<dyn Metric>>,
    pub objective: Objective,
    pub train:     Option<SplitLoader<B>>,
    pub val:       SplitLoader<B::InnerBackend>,
    pub schedule:  Schedule,
    pub run:       RunOptions,
    pub visualize: bool,
    pub device:    B::Device,
}

pub struct Learner<B: AutodiffBackend, M, O> {
    wrapper:   ModelWithLoss<M>,
    optim:     O,
    scheduler: LrScheduler,
    metrics:   Vec<Box<dyn Metric>>,
    objective: Objective,
    train:     Option<SplitLoader<B>>,
    val:       SplitLoader<B::InnerBackend>,
    schedule:  Schedule,
    run:       RunOptions,
    visualize: bool,
    device:    B::Device,
    state:     LearnerState,
    history:   Vec<EpochRecord>,
    ckpt:      CheckpointManager,
    csv:       MetricsLogger,
    dashboard: Dashboard,
    samples:   SampleWriter,
}

impl<B, M, O> Learner<B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + SegmentationModel<B>,
    M::InnerModule: SegmentationModel<B::InnerBackend>,
    O: Optimizer<M, B>,
{
    /// Set up the output files in `exp_dir`.
    pub fn new(parts: LearnerParts<B, M, O>, exp_dir: &Path) -> Result<Self> {
        let metric_names: Vec<String> = parts.metrics.iter().map(|m| m.name().to_string()).collect();
        Ok(Self {
            wrapper:   parts.wrapper,
            optim:     parts.optim,
            scheduler: parts.scheduler,
            metrics:   parts.metrics,
            objective: parts.objective,
            train:     parts.train,
            val:       parts.val,
            schedule:  parts.schedule,
            run:       parts.run,
            visualize: parts.visualize,
            device:    parts.device,
            state:     LearnerState::new(),
            history:   Vec::new(),
            ckpt:      CheckpointManager::new(exp_dir)?,
            csv:       MetricsLogger::new(exp_dir, &metric_names)?,
            dashboard: Dashboard::create(&exp_dir.join("tensorboard"))?,
            samples:   SampleWriter::new(exp_dir)?,
        })
    }

    pub fn state(&self) -> &LearnerState {
        &self.state
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.ckpt
    }

    /// Restore model, optimizer, counters and scheduler from `slot`.
    pub fn resume(self, slot: Slot) -> Result<Self> {
        let snapshot = self.ckpt.load_snapshot(slot)?;
        let model = self.ckpt.load_model::<B, M>(self.wrapper.model.clone(), slot, &self.device)?;
        let optim = self.ckpt.load_optimizer::<B, M, O>(self.optim, slot, &self.device)?;
        tracing::info!(
            "Resumed from '{}' ({}): epoch {}, step {}",
            self.ckpt.dir().display(),
            slot.as_str(),
            snapshot.learner.epoch,
            snapshot.learner.global_step,
        );
        Ok(Self {
            wrapper: ModelWithLoss::new(model, self.wrapper.criterion),
            optim,
            scheduler: snapshot.scheduler,
            state: snapshot.learner,
            history: snapshot.history,
            ..self
        })
    }

    /// Replace the weights only (`--load-model`).
    pub fn load_weights(mut self, path: &Path) -> Result<Self> {
        let model = crate::infra::checkpoint::load_model_file::<B, M>(self.wrapper.model.clone(), path, &self.device)?;
        self.wrapper.model = model;
        Ok(self)
    }

    // ─── fit ─────────────────────────────────────────────────────────────────
    pub fn fit(mut self) -> Result<FitSummary> {
        if self.train.is_none() {
            return Err(anyhow!("no training data loader configured"));
        }
        tracing::info!(
            "Training for {} epochs (objective: {}, {})",
            self.schedule.nepochs,
            self.objective.name,
            if self.objective.higher_is_better { "higher is better" } else { "lower is better" },
        );

        while !self.state.is_finished(&self.schedule) {
            self.state.begin_epoch()?;
            let lr = self.scheduler.lr(self.state.epoch);
            let train_loss = self.train_epoch(lr)?;
            let epoch = self.state.end_epoch()?;

            self.dashboard.add_scalar("train/epoch_loss", train_loss, epoch)?;
            let mut record = EpochRecord::new(epoch, self.state.global_step, lr, train_loss);

            let mut improved = false;
            if self.state.should_validate(&self.schedule) {
                self.state.enter_validation()?;
                let report = self.validate(epoch)?;
                let value = report.value_of(&self.objective);
                improved = self.state.record_metric(value, &self.objective)?;
                if self.scheduler.needs_metric() {
                    self.scheduler.observe(value);
                }
                record = record.with_validation(report.loss, report.metrics);
                self.csv.log(&record)?;
                tracing::info!(
                    "Epoch {:>3}/{} | train_loss={:.4} | val_loss={:.4} | {}={:.4}{}",
                    epoch,
                    self.schedule.nepochs,
                    train_loss,
                    record.val_loss.unwrap_or(f64::NAN),
                    self.objective.name,
                    value,
                    if improved { " (best)" } else { "" },
                );
            } else {
                tracing::info!("Epoch {:>3}/{} | train_loss={:.4}", epoch, self.schedule.nepochs, train_loss);
            }
            self.history.push(record);

            let plan = self.state.checkpoint_plan(&self.schedule, improved);
            self.state.enter_checkpointing()?;
            if plan.last {
                self.checkpoint(Slot::Last)?;
            }
            if plan.best {
                self.checkpoint(Slot::Best)?;
            }
        }

        self.state.finish()?;
        self.dashboard.flush()?;
        tracing::info!("Training complete!");
        Ok(FitSummary {
            epochs:      self.state.epoch,
            global_step: self.state.global_step,
            objective:   self.objective.clone(),
            best_metric: self.state.best_metric,
        })
    }

    /// One validation pass without parameter updates (`--test`).
    pub fn evaluate(mut self) -> Result<ValReport> {
        self.state.enter_validation()?;
        let report = self.validate(self.state.epoch)?;
        self.state.finish()?;
        self.dashboard.flush()?;
        for (name, value) in &report.metrics {
            tracing::info!("{name} = {value:.4}");
        }
        tracing::info!("val_loss = {:.4}", report.loss);
        Ok(report)
    }

    fn checkpoint(&self, slot: Slot) -> Result<()> {
        let snapshot = TrainingSnapshot {
            learner:   self.state.clone(),
            scheduler: self.scheduler.clone(),
            history:   self.history.clone(),
        };
        self.ckpt.save_model::<B, M>(&self.wrapper.model, slot)?;
        self.ckpt.save_optimizer::<B, M, O>(&self.optim, slot)?;
        self.ckpt.save_snapshot(&snapshot, slot)?;
        tracing::info!("Checkpoint '{}' saved at epoch {}", slot.as_str(), self.state.epoch);
        Ok(())
    }

    // ─── Training phase ──────────────────────────────────────────────────────
    fn train_epoch(&mut self, lr: f64) -> Result<f64> {
        let train = self.train.as_ref().context("no training data loader configured")?;
        let limit = self.run.num_iters.unwrap_or(usize::MAX);
        let expected_batches = train.num_batches().min(limit);

        let progress = (self.run.verbose == 0).then(|| {
            let pb = ProgressBar::new(expected_batches as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            pb
        });

        let mut loss_sum = 0.0f64;
        let mut batches = 0usize;
        let mut items_seen = 0usize;
        let mut truncated = false;
        let mut last: Option<(SegmentationBatch<B>, Tensor<B, 3, Int>)> = None;

        for batch in train.loader.iter() {
            if batches >= limit || self.state.steps_exhausted(&self.schedule) {
                truncated = true;
                break;
            }
            let masks = batch.masks.clone().ok_or(DataError::MissingLabels { split: "train".into() })?;
            items_seen += batch.len();

            let out = self.wrapper.forward(batch.inputs.clone(), masks)?;
            let loss_value: f64 = out.loss.clone().into_scalar().elem::<f64>();

            // Backward pass + optimizer update
            let grads = GradientsParams::from_grads(out.loss.backward(), &self.wrapper.model);
            self.wrapper.model = self.optim.step(lr, self.wrapper.model.clone(), grads);

            let step = self.state.record_step()?;
            loss_sum += loss_value;
            batches += 1;

            if step % self.run.log_step == 0 {
                self.dashboard.add_scalar("train/loss", loss_value, step)?;
                self.dashboard.add_scalar("train/lr", lr, step)?;
                for (name, value) in &out.components {
                    self.dashboard.add_scalar(&format!("train/{name}"), *value, step)?;
                }
                if self.run.verbose > 0 {
                    tracing::info!("step {step} | loss={loss_value:.4} | lr={lr:.3e}");
                }
            }
            if let Some(pb) = &progress {
                pb.inc(1);
                pb.set_message(format!("epoch {} loss={loss_value:.4}", self.state.epoch + 1));
            }
            if self.run.demo {
                let preds = predictions(out.logits.detach());
                last = Some((batch, preds));
            }
        }
        if let Some(pb) = progress {
            pb.finish_and_clear();
        }

        if !truncated && items_seen != train.num_items {
            return Err(DataError::MissingItems { split: "train".into(), expected: train.num_items, seen: items_seen }.into());
        }

        if let Some((batch, preds)) = last {
            let step = self.state.epoch + 1;
            let sample = sample_batch(batch, preds)?;
            self.samples.write("train", &sample, &mut self.dashboard, step)?;
        }

        Ok(if batches > 0 { loss_sum / batches as f64 } else { f64::NAN })
    }

    // ─── Validation phase ────────────────────────────────────────────────────
    fn validate(&mut self, step: usize) -> Result<ValReport> {
        // dropout / batch-norm in inference mode, no autodiff graph
        let model = self.wrapper.valid::<B>();
        self.metrics.iter_mut().for_each(|m| m.reset());

        let mut loss_sum = 0.0f64;
        let mut items = 0usize;
        let mut last: Option<(SegmentationBatch<B::InnerBackend>, Tensor<B::InnerBackend, 3, Int>)> = None;

        for batch in self.val.loader.iter() {
            let masks = batch.masks.clone().ok_or(DataError::MissingLabels { split: "val".into() })?;
            let n = batch.len();
            let out = model.forward(batch.inputs.clone(), masks.clone())?;
            loss_sum += out.loss.into_scalar().elem::<f64>() * n as f64;
            items += n;

            let preds = predictions(out.logits);
            let pred_host = int_host(preds.clone())?;
            let mask_host = int_host(masks)?;
            for metric in self.metrics.iter_mut() {
                metric.update(&pred_host, &mask_host);
            }
            last = Some((batch, preds));
        }

        if items != self.val.num_items {
            return Err(DataError::MissingItems { split: "val".into(), expected: self.val.num_items, seen: items }.into());
        }

        let loss = if items > 0 { loss_sum / items as f64 } else { f64::NAN };
        let metrics: BTreeMap<String, f64> = self.metrics.iter().map(|m| (m.name().to_string(), m.value())).collect();

        self.dashboard.add_scalar("val/loss", loss, step)?;
        for (name, value) in &metrics {
            self.dashboard.add_scalar(&format!("val/{name}"), *value, step)?;
        }

        if self.visualize {
            if let Some((batch, preds)) = last {
                let sample = sample_batch(batch, preds)?;
                self.samples.write("val", &sample, &mut self.dashboard, step)?;
            }
        }

        Ok(ValReport { loss, metrics })
    }
}

fn int_host<Bk: Backend>(t: Tensor<Bk, 3, Int>) -> Result<Vec<i64>> {
    t.into_data().convert::<i64>().to_vec::<i64>().map_err(|e| anyhow!("cannot read tensor data: {e:?}"))
}

fn sample_batch<Bk: Backend>(batch: SegmentationBatch<Bk>, preds: Tensor<Bk, 3, Int>) -> Result<SampleBatch> {
    let [count, _, height, width] = batch.inputs.dims();
    let inputs = batch
        .inputs
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| anyhow!("cannot read tensor data: {e:?}"))?;
    let labels = batch.masks.map(int_host).transpose()?;
    Ok(SampleBatch { inputs, labels, preds: int_host(preds)?, count, height, width })
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{
        batcher::CollateFn,
        dataset::{DynDataset, SyntheticShapes},
        loader::{get_dataloader, LoaderDefaults, LoaderSpec},
        splitter::trainval_split,
    };
    use crate::ml::{
        loss::{Criterion, DiceLoss},
        metrics::{MetricKind, MetricSpec},
        optim::AdamArgs,
        scheduler::SchedulerSpec,
        unet::{UNet, UNetConfig},
    };
    use burn::backend::{Autodiff, NdArray};
    use std::sync::Arc;

    type TB = Autodiff<NdArray>;

    fn learner(
        dir: &Path,
        nepochs: usize,
        max_steps: Option<usize>,
    ) -> Learner<TB, UNet<TB>, impl Optimizer<UNet<TB>, TB>> {
        let device = Default::default();
        let dataset: DynDataset = Arc::new(SyntheticShapes::new(6, [8, 8], 2, 0));
        let (train, val) = trainval_split(dataset, 0.34, None).unwrap();
        let loader = LoaderSpec { batch_size: Some(2), shuffle: false, num_workers: Some(0), collate: CollateFn::Default };
        let defaults = LoaderDefaults { batch_size: 2, num_workers: 0, seed: 0, force: false };

        let model = UNetConfig::new(2).with_base_channels(2).with_depth(1).init::<TB>(&device);
        let args = AdamArgs { lr: 1e-2, betas: [0.9, 0.999], eps: 1e-8, weight_decay: 0.0, grad_clip_norm: None };
        let metric = MetricSpec { kind: MetricKind::MeanIoU, num_classes: None, ignore_index: None };
        let spec = LearnerSpec {
            kind: LearnerKind::Semantic,
            args: LearnerArgs { checkpoint_every: 1, save_best: true, primary_metric: None, max_steps },
        };
        let objective = spec.objective(&["MeanIoU".to_string()]).unwrap();

        let parts = LearnerParts {
            wrapper:   ModelWithLoss::new(model, Criterion::DiceWithStat(DiceLoss::default())),
            optim:     args.config().init::<TB, UNet<TB>>(),
            scheduler: SchedulerSpec::Constant.init(args.lr, &objective),
            metrics:   vec![metric.build(2)],
            objective,
            train:     Some(get_dataloader::<TB>(train, &loader, &defaults, device)),
            val:       get_dataloader::<NdArray>(val, &loader, &defaults, device),
            schedule:  Schedule { nepochs, val_step: 1, checkpoint_every: 1, save_best: true, max_steps },
            run:       RunOptions { log_step: 1, verbose: 1, num_iters: None, demo: true },
            visualize: spec.visualize(),
            device,
        };
        Learner::new(parts, dir).unwrap()
    }

    #[test]
    fn test_objective_selection() {
        let mut spec = LearnerSpec {
            kind: LearnerKind::Supervised,
            args: LearnerArgs { checkpoint_every: 1, save_best: true, primary_metric: None, max_steps: None },
        };
        let names = vec!["PixelAccuracy".to_string(), "MeanIoU".to_string()];
        assert_eq!(spec.objective(&names).unwrap(), Objective::new("PixelAccuracy", true));
        assert_eq!(spec.objective(&[]).unwrap(), Objective::new("loss", false));
        spec.args.primary_metric = Some("MeanIoU".into());
        assert_eq!(spec.objective(&names).unwrap().name, "MeanIoU");
        spec.args.primary_metric = Some("DiceScore".into());
        assert!(spec.objective(&names).is_err());
    }

    #[test]
    fn test_learner_factories() {
        let args: Args = serde_yaml::from_str("{checkpoint_every: 2, primary_metric: MeanIoU}").unwrap();
        let spec = semantic(args).unwrap();
        assert!(spec.visualize());
        assert_eq!(spec.args.checkpoint_every, 2);
        assert!(spec.args.save_best);
        assert!(!supervised(Args::new()).unwrap().visualize());
        let bad: Args = serde_yaml::from_str("{checkpoint_every: 0}").unwrap();
        assert!(supervised(bad).is_err());
    }

    #[test]
    fn test_fit_writes_outputs_and_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let summary = learner(dir.path(), 2, None).fit().unwrap();
        assert_eq!(summary.epochs, 2);
        // 4 training items, batch 2
        assert_eq!(summary.global_step, 4);
        assert!(summary.best_metric.is_some());

        for file in ["model_last.mpk", "optim_last.mpk", "state_last.json", "state_best.json", "metrics.csv"] {
            assert!(dir.path().join(file).exists(), "{file} missing");
        }
        assert!(dir.path().join("samples/last_batch_preds.png").exists());
        assert!(dir.path().join("samples/train_last_batch_inputs.png").exists());

        let resumed = learner(dir.path(), 3, None).resume(Slot::Last).unwrap();
        assert_eq!(resumed.state().epoch, 2);
        assert_eq!(resumed.state().global_step, 4);
        let summary = resumed.fit().unwrap();
        assert_eq!(summary.epochs, 3);
        assert_eq!(summary.global_step, 6);
    }

    #[test]
    fn test_max_steps_stops_early() {
        let dir = tempfile::tempdir().unwrap();
        let summary = learner(dir.path(), 10, Some(3)).fit().unwrap();
        assert_eq!(summary.global_step, 3);
        assert_eq!(summary.epochs, 2);
    }

    #[test]
    fn test_evaluate_reports_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let report = learner(dir.path(), 1, None).evaluate().unwrap();
        assert!(report.metrics.contains_key("MeanIoU"));
        assert!(report.loss.is_finite());
    }
}
