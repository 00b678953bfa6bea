// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores everything needed to continue a run, using
// Burn's CompactRecorder for tensors and JSON for counters.
//
// Files in the experiment directory, per slot (`last` / `best`):
//
//   model_<slot>.mpk      model weights
//   optim_<slot>.mpk      optimizer state (moments, momentum buffers)
//   state_<slot>.json     learner counters, LR scheduler, epoch history
//
// plus, once per run:
//
//   opts.json             resolved options
//   pipeline.yaml         copy of the pipeline configuration
//
// Experiment directories are named `<id>_<timestamp>`; resuming
// picks the newest one of exactly that id that holds a
// `state_last.json`.
//
// Reference: Burn Book §5 (Records and Checkpointing)

use burn::{
    module::AutodiffModule,
    optim::Optimizer,
    prelude::*,
    record::{CompactRecorder, FileRecorder, Recorder, RecorderError},
    tensor::backend::AutodiffBackend,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

use crate::config::opts::{Opts, TIMESTAMP_FORMAT};
use crate::infra::metrics::EpochRecord;
use crate::ml::{scheduler::LrScheduler, state::LearnerState};

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path:   PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot (de)serialise '{}': {source}", path.display())]
    Json {
        path:   PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot record '{}': {message}", path.display())]
    Record { path: PathBuf, message: String },

    #[error("no checkpoint at '{}'", path.display())]
    Missing { path: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Last,
    Best,
}

impl Slot {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Last => "last",
            Self::Best => "best",
        }
    }
}

/// Counters and schedule state stored next to the weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSnapshot {
    pub learner:   LearnerState,
    pub scheduler: LrScheduler,
    #[serde(default)]
    pub history:   Vec<EpochRecord>,
}

fn record_err(path: &Path, err: RecorderError) -> CheckpointError {
    CheckpointError::Record { path: path.to_path_buf(), message: format!("{err:?}") }
}

pub struct CheckpointManager {
    dir:      PathBuf,
    recorder: CompactRecorder,
}

impl CheckpointManager {
    /// Creates the directory if it doesn't already exist.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| CheckpointError::Io { path: dir.clone(), source })?;
        Ok(Self { dir, recorder: CompactRecorder::new() })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, prefix: &str, slot: Slot) -> PathBuf {
        self.dir.join(format!("{prefix}_{}", slot.as_str()))
    }

    /// `true` if a full checkpoint for `slot` has been written.
    pub fn has(&self, slot: Slot) -> bool {
        self.path("state", slot).with_extension("json").exists()
    }

    // ─── Model ───────────────────────────────────────────────────────────────
    pub fn save_model<B: Backend, M: Module<B>>(&self, model: &M, slot: Slot) -> Result<(), CheckpointError> {
        let path = self.path("model", slot);
        model.clone().save_file(path.clone(), &self.recorder).map_err(|e| record_err(&path, e))?;
        tracing::debug!("Saved model to '{}'", path.display());
        Ok(())
    }

    pub fn load_model<B: Backend, M: Module<B>>(
        &self,
        model:  M,
        slot:   Slot,
        device: &B::Device,
    ) -> Result<M, CheckpointError> {
        load_model_file(model, &self.path("model", slot), device)
    }

    // ─── Optimizer ───────────────────────────────────────────────────────────
    pub fn save_optimizer<B, M, O>(&self, optim: &O, slot: Slot) -> Result<(), CheckpointError>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        let path = self.path("optim", slot);
        Recorder::<B>::record(&self.recorder, optim.to_record(), path.clone()).map_err(|e| record_err(&path, e))?;
        Ok(())
    }

    pub fn load_optimizer<B, M, O>(&self, optim: O, slot: Slot, device: &B::Device) -> Result<O, CheckpointError>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        let path = self.path("optim", slot);
        let record: O::Record =
            Recorder::<B>::load(&self.recorder, path.clone(), device).map_err(|e| record_err(&path, e))?;
        Ok(optim.load_record(record))
    }

    // ─── JSON state ──────────────────────────────────────────────────────────
    pub fn save_snapshot(&self, snapshot: &TrainingSnapshot, slot: Slot) -> Result<(), CheckpointError> {
        let path = self.path("state", slot).with_extension("json");
        write_json(&path, snapshot)
    }

    pub fn load_snapshot(&self, slot: Slot) -> Result<TrainingSnapshot, CheckpointError> {
        let path = self.path("state", slot).with_extension("json");
        if !path.exists() {
            return Err(CheckpointError::Missing { path });
        }
        let text = fs::read_to_string(&path).map_err(|source| CheckpointError::Io { path: path.clone(), source })?;
        serde_json::from_str(&text).map_err(|source| CheckpointError::Json { path, source })
    }

    pub fn save_opts(&self, opts: &Opts) -> Result<(), CheckpointError> {
        write_json(&self.dir.join("opts.json"), opts)
    }

    pub fn save_pipeline(&self, yaml: &str) -> Result<(), CheckpointError> {
        let path = self.dir.join("pipeline.yaml");
        fs::write(&path, yaml).map_err(|source| CheckpointError::Io { path, source })
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), CheckpointError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|source| CheckpointError::Json { path: path.to_path_buf(), source })?;
    fs::write(path, json).map_err(|source| CheckpointError::Io { path: path.to_path_buf(), source })
}

/// File the recorder actually reads or writes for `path`.
///
/// The recorder replaces any extension with its own, so `model_best`
/// and `model_best.mpk` name the same file.
pub fn record_file<B: Backend>(path: &Path) -> PathBuf {
    path.with_extension(<CompactRecorder as FileRecorder<B>>::file_extension())
}

/// Load weights from an explicit file (`--load-model`), given with or
/// without the recorder's extension.
pub fn load_model_file<B: Backend, M: Module<B>>(model: M, path: &Path, device: &B::Device) -> Result<M, CheckpointError> {
    let file = record_file::<B>(path);
    if !file.exists() {
        return Err(CheckpointError::Missing { path: file });
    }
    let recorder = CompactRecorder::new();
    let model = model.load_file(file.clone(), &recorder, device).map_err(|e| record_err(path, e))?;
    tracing::info!("Loaded model weights from '{}'", file.display());
    Ok(model)
}

fn run_timestamp(dir_name: &str, id: &str) -> Option<NaiveDateTime> {
    let ts = dir_name.strip_prefix(id)?.strip_prefix('_')?;
    NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT).ok()
}

/// Newest `<save_root>/<id>_<timestamp>` directory holding `state_last.json`.
///
/// The suffix must parse as a run timestamp, so `exp_v2_<timestamp>`
/// never matches id `exp`.
pub fn find_resume_dir(save_root: &Path, id: &str) -> Result<Option<PathBuf>, CheckpointError> {
    if !save_root.exists() {
        return Ok(None);
    }
    let entries = fs::read_dir(save_root).map_err(|source| CheckpointError::Io { path: save_root.to_path_buf(), source })?;

    let newest = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir() && p.join("state_last.json").exists())
        .filter_map(|p| {
            let ts = p.file_name().and_then(|n| n.to_str()).and_then(|n| run_timestamp(n, id))?;
            Some((ts, p))
        })
        .max_by_key(|(ts, _)| *ts)
        .map(|(_, p)| p);
    Ok(newest)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::{
        optim::AdamArgs,
        unet::{UNet, UNetConfig},
    };
    use burn::backend::{Autodiff, NdArray};

    type TB = Autodiff<NdArray>;

    fn snapshot(epoch: usize) -> TrainingSnapshot {
        let mut learner = LearnerState::new();
        for _ in 0..epoch {
            learner.begin_epoch().unwrap();
            learner.record_step().unwrap();
            learner.end_epoch().unwrap();
        }
        learner.enter_checkpointing().unwrap();
        TrainingSnapshot { learner, scheduler: LrScheduler::Constant { lr: 0.1 }, history: vec![] }
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let ckpt = CheckpointManager::new(dir.path()).unwrap();
        assert!(!ckpt.has(Slot::Last));
        assert!(matches!(ckpt.load_snapshot(Slot::Last), Err(CheckpointError::Missing { .. })));

        let snap = snapshot(3);
        ckpt.save_snapshot(&snap, Slot::Last).unwrap();
        assert!(ckpt.has(Slot::Last));
        let restored = ckpt.load_snapshot(Slot::Last).unwrap();
        assert_eq!(restored.learner.epoch, 3);
        assert_eq!(restored.learner.global_step, 3);
    }

    #[test]
    fn test_model_and_optimizer_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let ckpt = CheckpointManager::new(dir.path()).unwrap();
        let device = Default::default();
        let cfg = UNetConfig::new(2).with_base_channels(2).with_depth(1);
        let model: UNet<TB> = cfg.init(&device);
        ckpt.save_model::<TB, _>(&model, Slot::Best).unwrap();
        let reloaded: UNet<TB> = ckpt.load_model::<TB, _>(cfg.init(&device), Slot::Best, &device).unwrap();
        assert_eq!(reloaded.num_params(), model.num_params());

        let args = AdamArgs { lr: 1e-3, betas: [0.9, 0.999], eps: 1e-8, weight_decay: 0.0, grad_clip_norm: None };
        let optim = args.config().init::<TB, UNet<TB>>();
        ckpt.save_optimizer::<TB, UNet<TB>, _>(&optim, Slot::Last).unwrap();
        let fresh = args.config().init::<TB, UNet<TB>>();
        assert!(ckpt.load_optimizer::<TB, UNet<TB>, _>(fresh, Slot::Last, &device).is_ok());

        let written = record_file::<TB>(&dir.path().join("model_best"));
        assert!(written.exists(), "{} missing", written.display());
        assert!(load_model_file::<TB, _>(cfg.init::<TB>(&device), &written, &device).is_ok());
        assert!(load_model_file::<TB, _>(cfg.init::<TB>(&device), &dir.path().join("model_best"), &device).is_ok());
        assert!(matches!(
            load_model_file::<TB, _>(cfg.init::<TB>(&device), &dir.path().join("nope"), &device),
            Err(CheckpointError::Missing { .. })
        ));
    }

    #[test]
    fn test_find_resume_dir_picks_newest_with_state() {
        let root = tempfile::tempdir().unwrap();
        let make = |name: &str, with_state: bool| {
            let d = root.path().join(name);
            fs::create_dir_all(&d).unwrap();
            if with_state {
                fs::write(d.join("state_last.json"), "{}").unwrap();
            }
        };
        make("exp_2024_01_01-00_00_00", true);
        make("exp_2024_03_01-00_00_00", true);
        make("exp_2024_05_01-00_00_00", false);
        make("other_2025_01_01-00_00_00", true);

        let found = find_resume_dir(root.path(), "exp").unwrap().unwrap();
        assert!(found.ends_with("exp_2024_03_01-00_00_00"));
        assert!(find_resume_dir(root.path(), "missing").unwrap().is_none());
        assert!(find_resume_dir(&root.path().join("absent"), "exp").unwrap().is_none());
    }

    #[test]
    fn test_find_resume_dir_ignores_ids_sharing_a_prefix() {
        let root = tempfile::tempdir().unwrap();
        for name in ["exp_2024_01_01-00_00_00", "exp_v2_2024_06_01-00_00_00", "exp_notes"] {
            let d = root.path().join(name);
            fs::create_dir_all(&d).unwrap();
            fs::write(d.join("state_last.json"), "{}").unwrap();
        }
        let found = find_resume_dir(root.path(), "exp").unwrap().unwrap();
        assert!(found.ends_with("exp_2024_01_01-00_00_00"));
        let v2 = find_resume_dir(root.path(), "exp_v2").unwrap().unwrap();
        assert!(v2.ends_with("exp_v2_2024_06_01-00_00_00"));
    }
}
