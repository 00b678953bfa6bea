// ============================================================
// Layer 2 — Pipeline
// ============================================================
// Orchestrates one run in order:
//
//   Step 1: Validate the pipeline file        (config)
//   Step 2: Pick the experiment directory     (new or resumed)
//
// Evaluation always writes to a fresh directory; a previous run of
// the same id only supplies its weights and is left untouched.
//   Step 3: Pick the backend                  (cpu / wgpu)
//   Step 4: Build the model                   (ml)
//   Step 5: Build the optimizer               (ml)
//   Step 6: Build data loaders and metrics    (data, ml)
//   Step 7: Assemble the learner              (ml, infra)
//   Step 8: fit() or evaluate()
//
// Backend, model and optimizer are generic parameters of the
// learner, so each spec enum is matched once and the rest of the
// run is monomorphised.
//
// Reference: Burn Book §5 (Training)

use anyhow::{Context, Result};
use burn::{
    backend::{ndarray::NdArrayDevice, wgpu::WgpuDevice, Autodiff, NdArray, Wgpu},
    module::AutodiffModule,
    optim::Optimizer,
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use std::path::PathBuf;

use crate::config::{
    device::{BackendChoice, DeviceSpec},
    opts::Opts,
    pipeline::PipelineSpec,
    registries::Registries,
};
use crate::data::loader::{get_data, get_val_data, LoaderDefaults};
use crate::infra::checkpoint::{find_resume_dir, record_file, Slot};
use crate::ml::{
    learner::{FitSummary, Learner, LearnerParts, RunOptions, ValReport},
    model::{ModelSpec, SegmentationModel},
    optim::OptimizerSpec,
    state::Schedule,
    wrapper::ModelWithLoss,
};

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Trained(FitSummary),
    Evaluated(ValReport),
}

pub struct Pipeline {
    opts:    Opts,
    spec:    PipelineSpec,
    exp_dir: PathBuf,
    /// Set when an earlier run of the same id is continued
    resumed: bool,
    /// Earlier run whose weights `--test` evaluates
    weights_from: Option<PathBuf>,
}

impl Pipeline {
    pub fn new(mut opts: Opts, regs: &Registries) -> Result<Self> {
        // ── Step 1: Validate the pipeline file ───────────────────────────────
        let spec = PipelineSpec::load(&opts.cfg_pipeline, regs)
            .with_context(|| format!("Invalid pipeline file '{}'", opts.cfg_pipeline.display()))?;

        // ── Step 2: Pick the experiment directory ────────────────────────────
        let previous = if opts.resume || (opts.test && opts.load_model.is_none()) {
            find_resume_dir(&opts.save_root, &opts.id)?
        } else {
            None
        };
        let (resumed, weights_from) = match previous {
            Some(dir) if opts.test => (false, Some(dir)),
            Some(dir) => {
                opts.save_dir = dir;
                (true, None)
            }
            None => {
                if opts.resume {
                    tracing::warn!("No run of '{}' to resume under '{}'; starting fresh", opts.id, opts.save_root.display());
                }
                (false, None)
            }
        };
        let exp_dir = opts.save_dir.clone();
        tracing::info!("Experiment directory: '{}'", exp_dir.display());

        Ok(Self { opts, spec, exp_dir, resumed, weights_from })
    }

    pub fn exp_dir(&self) -> &PathBuf {
        &self.exp_dir
    }

    pub fn run(self) -> Result<RunOutcome> {
        if self.opts.fp16 {
            tracing::warn!("--fp16 is not supported by the selected backends; training in f32");
        }
        if self.opts.debug > 0 {
            tracing::info!("Debug mode: batch_size=1, num_workers=0, gpus={:?}", self.opts.gpus);
        }

        // ── Step 3: Pick the backend ─────────────────────────────────────────
        if self.spec.device == DeviceSpec::Cpu && self.opts.uses_gpu() {
            tracing::info!("Pipeline selects the cpu device; ignoring --gpus {:?}", self.opts.gpus);
        }
        match self.spec.device.choose(&self.opts.gpus) {
            BackendChoice::Cpu => {
                tracing::info!("Using NdArray CPU backend");
                self.run_on::<Autodiff<NdArray>>(NdArrayDevice::Cpu)
            }
            BackendChoice::Gpu(index) => {
                let device = if index == 0 { WgpuDevice::default() } else { WgpuDevice::DiscreteGpu(index) };
                tracing::info!("Using WGPU device: {:?}", device);
                self.run_on::<Autodiff<Wgpu>>(device)
            }
        }
    }

    // ── Step 4: Build the model ──────────────────────────────────────────────
    fn run_on<B: AutodiffBackend>(self, device: B::Device) -> Result<RunOutcome> {
        B::seed(self.opts.seed);
        tracing::info!("Model: {} ({} classes)", self.spec.model.name(), self.spec.model.num_classes());
        match self.spec.model.clone() {
            ModelSpec::UNet(cfg) => {
                let model = cfg.init::<B>(&device);
                self.with_model(model, device)
            }
            ModelSpec::MobileUnet(cfg) => {
                let model = cfg.init::<B>(&device);
                self.with_model(model, device)
            }
            ModelSpec::DeepLabV3(cfg) => {
                let model = cfg.init::<B>(&device);
                self.with_model(model, device)
            }
        }
    }

    // ── Step 5: Build the optimizer ──────────────────────────────────────────
    fn with_model<B, M>(self, model: M, device: B::Device) -> Result<RunOutcome>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B> + SegmentationModel<B>,
        M::InnerModule: SegmentationModel<B::InnerBackend>,
    {
        tracing::info!("Optimizer: {} (lr={})", self.spec.optimizer.name(), self.spec.optimizer.lr());
        match self.spec.optimizer.clone() {
            OptimizerSpec::Sgd(a) => self.assemble(model, a.config().init::<B, M>(), device),
            OptimizerSpec::Adam(a) => self.assemble(model, a.config().init::<B, M>(), device),
            OptimizerSpec::AdamW(a) => self.assemble(model, a.config().init::<B, M>(), device),
            OptimizerSpec::RmsProp(a) => self.assemble(model, a.config().init::<B, M>(), device),
        }
    }

    fn assemble<B, M, O>(self, model: M, optim: O, device: B::Device) -> Result<RunOutcome>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B> + SegmentationModel<B>,
        M::InnerModule: SegmentationModel<B::InnerBackend>,
        O: Optimizer<M, B>,
    {
        let Self { opts, spec, exp_dir, resumed, weights_from } = self;

        // ── Step 6: Build data loaders and metrics ───────────────────────────
        let defaults = LoaderDefaults {
            batch_size:  opts.batch_size,
            num_workers: opts.num_workers,
            seed:        opts.seed,
            force:       opts.debug > 0,
        };
        let (train, val) = if opts.test {
            (None, get_val_data::<B::InnerBackend>(&spec.data, &defaults, &device)?)
        } else {
            let loaders = get_data::<B>(&spec.data, &defaults, &device)?;
            tracing::info!(
                "Data: {} training / {} validation items",
                loaders.train.num_items,
                loaders.val.num_items,
            );
            (Some(loaders.train), loaders.val)
        };

        let num_classes = spec.model.num_classes();
        let metrics = spec.metrics.iter().map(|m| m.build(num_classes)).collect();
        tracing::info!("Metrics: [{}] (objective: {})", spec.metric_names().join(", "), spec.objective.name);

        // ── Step 7: Assemble the learner ─────────────────────────────────────
        let parts = LearnerParts {
            wrapper: ModelWithLoss::new(model, spec.criterion.clone()),
            optim,
            scheduler: spec.scheduler.init(spec.optimizer.lr(), &spec.objective),
            metrics,
            objective: spec.objective.clone(),
            train,
            val,
            schedule: Schedule {
                nepochs:          opts.nepochs,
                val_step:         opts.val_step,
                checkpoint_every: spec.learner.args.checkpoint_every,
                save_best:        spec.learner.args.save_best,
                max_steps:        spec.learner.args.max_steps,
            },
            run: RunOptions {
                log_step:  opts.log_step,
                verbose:   opts.verbose,
                num_iters: opts.num_iters,
                demo:      opts.demo,
            },
            visualize: spec.learner.visualize(),
            device,
        };
        let learner = Learner::new(parts, &exp_dir)?;
        learner.checkpoints().save_opts(&opts)?;
        learner.checkpoints().save_pipeline(&spec.source)?;

        // ── Step 8: fit() or evaluate() ──────────────────────────────────────
        if opts.test {
            let learner = match (&opts.load_model, &weights_from) {
                (Some(path), _) => learner.load_weights(path)?,
                (None, Some(prev)) => {
                    let best = prev.join(format!("model_{}", Slot::Best.as_str()));
                    let path = if record_file::<B>(&best).exists() {
                        best
                    } else {
                        prev.join(format!("model_{}", Slot::Last.as_str()))
                    };
                    learner.load_weights(&path)?
                }
                (None, None) => {
                    tracing::warn!("--test without --load-model or a previous run: evaluating untrained weights");
                    learner
                }
            };
            return Ok(RunOutcome::Evaluated(learner.evaluate()?));
        }

        let learner = if resumed {
            learner.resume(Slot::Last)?
        } else if let Some(path) = &opts.load_model {
            learner.load_weights(path)?
        } else {
            learner
        };
        Ok(RunOutcome::Trained(learner.fit()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::opts::OptsOverlay;
    use chrono::{Local, TimeZone};
    use std::fs;

    const PIPELINE: &str = "
device: {name: cpu}
data:
  trainval:
    test_ratio: 0.25
    dataset:
      name: SyntheticShapes
      args: {len: 8, image_size: [8, 8], num_classes: 2}
    loader:
      train: {name: DataLoader, args: {shuffle: true}}
      val: {name: DataLoader}
model: {name: MobileUnet, args: {num_classes: 2, base_channels: 4}}
criterion: {name: Dicewithstat}
metric:
  - {name: MeanIoU}
optimizer: {name: Adam, args: {lr: 0.01}}
scheduler: {name: StepLR, args: {step_size: 1, gamma: 0.5}}
learner: {name: SemanticLearner}
";

    fn opts(root: &std::path::Path, resume: bool, test: bool, minute: u32) -> Opts {
        let cfg = root.join("pipeline.yaml");
        fs::write(&cfg, PIPELINE).unwrap();
        let overlay = OptsOverlay {
            id:           Some("smoke".into()),
            test:         Some(test),
            debug:        Some(0),
            resume:       Some(resume),
            cfg_pipeline: Some(cfg.to_string_lossy().into_owned()),
            gpus:         Some("-1".into()),
            num_workers:  Some(0),
            seed:         Some(7),
            verbose:      Some(1),
            nepochs:      Some(2),
            batch_size:   Some(2),
            val_step:     Some(1),
            log_step:     Some(1),
            save_dir:     Some(root.join("runs").to_string_lossy().into_owned()),
            ..Default::default()
        };
        let now = Local.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap();
        Opts::resolve(overlay, now).unwrap()
    }

    #[test]
    fn test_train_then_resume_then_evaluate() {
        let root = tempfile::tempdir().unwrap();
        let regs = Registries::builtin().unwrap();

        let pipeline = Pipeline::new(opts(root.path(), false, false, 0), &regs).unwrap();
        let first_dir = pipeline.exp_dir().clone();
        let RunOutcome::Trained(summary) = pipeline.run().unwrap() else { panic!("expected training") };
        assert_eq!(summary.epochs, 2);
        assert_eq!(summary.global_step, 6);
        assert!(first_dir.join("opts.json").exists());
        assert!(first_dir.join("pipeline.yaml").exists());
        assert!(first_dir.join("samples/last_batch_inputs.png").exists());

        // a resumed run continues in the same directory and is already done
        let pipeline = Pipeline::new(opts(root.path(), true, false, 1), &regs).unwrap();
        assert_eq!(pipeline.exp_dir(), &first_dir);
        let RunOutcome::Trained(summary) = pipeline.run().unwrap() else { panic!("expected training") };
        assert_eq!(summary.global_step, 6);

        let pipeline = Pipeline::new(opts(root.path(), false, true, 2), &regs).unwrap();
        let RunOutcome::Evaluated(report) = pipeline.run().unwrap() else { panic!("expected evaluation") };
        assert!(report.metrics.contains_key("MeanIoU"));
    }

    #[test]
    fn test_resume_records_the_directory_it_uses() {
        let root = tempfile::tempdir().unwrap();
        let regs = Registries::builtin().unwrap();
        let pipeline = Pipeline::new(opts(root.path(), false, false, 0), &regs).unwrap();
        let first_dir = pipeline.exp_dir().clone();
        pipeline.run().unwrap();

        let pipeline = Pipeline::new(opts(root.path(), true, false, 5), &regs).unwrap();
        assert_eq!(pipeline.exp_dir(), &first_dir);
        pipeline.run().unwrap();
        let saved: Opts = serde_json::from_str(&fs::read_to_string(first_dir.join("opts.json")).unwrap()).unwrap();
        assert_eq!(saved.save_dir, first_dir);
        assert!(!root.path().join("runs/smoke_2024_01_01-00_05_00").exists());
    }

    #[test]
    fn test_evaluation_leaves_training_run_untouched() {
        let root = tempfile::tempdir().unwrap();
        let regs = Registries::builtin().unwrap();
        let pipeline = Pipeline::new(opts(root.path(), false, false, 0), &regs).unwrap();
        let train_dir = pipeline.exp_dir().clone();
        pipeline.run().unwrap();
        let opts_before = fs::read_to_string(train_dir.join("opts.json")).unwrap();
        let metrics_before = fs::read_to_string(train_dir.join("metrics.csv")).unwrap();

        let pipeline = Pipeline::new(opts(root.path(), false, true, 3), &regs).unwrap();
        let eval_dir = pipeline.exp_dir().clone();
        assert_ne!(eval_dir, train_dir);
        let RunOutcome::Evaluated(_) = pipeline.run().unwrap() else { panic!("expected evaluation") };

        assert_eq!(fs::read_to_string(train_dir.join("opts.json")).unwrap(), opts_before);
        assert_eq!(fs::read_to_string(train_dir.join("metrics.csv")).unwrap(), metrics_before);
        assert!(eval_dir.join("opts.json").exists());
    }

    #[test]
    fn test_invalid_pipeline_fails_before_running() {
        let root = tempfile::tempdir().unwrap();
        let o = opts(root.path(), false, false, 0);
        fs::write(&o.cfg_pipeline, PIPELINE.replace("MobileUnet", "Unknown")).unwrap();
        let err = Pipeline::new(o, &Registries::builtin().unwrap()).err().unwrap();
        assert!(format!("{err:#}").contains("Unknown"));
        assert!(!root.path().join("runs").exists());
    }
}
