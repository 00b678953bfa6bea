// ============================================================
// Layer 5 — Learner State Machine
// ============================================================
// The training loop's progress as plain data with explicit,
// checked transitions:
//
//   Initialized ─begin_epoch→ TrainingEpoch ─end_epoch→ (closed)
//        │                        ▲   │
//        │                        │   ├─enter_validation→ Validating
//        └─enter_validation─┐     │   └─enter_checkpointing→ Checkpointing
//                           ▼     │
//                     Validating ─┴─ Checkpointing ─finish→ Finished
//
// `epoch` counts completed epochs and only grows. The state is
// written to `state_*.json` during checkpointing, so a resumed
// run continues from the saved counters.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::traits::Objective;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Initialized,
    TrainingEpoch,
    Validating,
    Checkpointing,
    Finished,
}

#[derive(Debug, Error, PartialEq)]
pub enum StateError {
    #[error("cannot {action} while in phase {from:?}")]
    InvalidTransition { from: Phase, action: &'static str },
}

/// Loop limits taken from options and learner args.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    pub nepochs:          usize,
    pub val_step:         usize,
    pub checkpoint_every: usize,
    pub save_best:        bool,
    pub max_steps:        Option<usize>,
}

/// Which checkpoint slots to write at the end of an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CheckpointPlan {
    pub last: bool,
    pub best: bool,
}

impl CheckpointPlan {
    pub fn is_empty(&self) -> bool {
        !self.last && !self.best
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnerState {
    pub epoch:       usize,
    pub global_step: usize,
    pub best_metric: Option<f64>,
    pub phase:       Phase,
    #[serde(default)]
    epoch_open:      bool,
}

impl Default for LearnerState {
    fn default() -> Self {
        Self::new()
    }
}

impl LearnerState {
    pub fn new() -> Self {
        Self { epoch: 0, global_step: 0, best_metric: None, phase: Phase::Initialized, epoch_open: false }
    }

    fn invalid(&self, action: &'static str) -> StateError {
        StateError::InvalidTransition { from: self.phase, action }
    }

    pub fn begin_epoch(&mut self) -> Result<(), StateError> {
        if self.epoch_open || self.phase == Phase::Finished {
            return Err(self.invalid("begin an epoch"));
        }
        self.phase = Phase::TrainingEpoch;
        self.epoch_open = true;
        Ok(())
    }

    pub fn record_step(&mut self) -> Result<usize, StateError> {
        if !self.epoch_open {
            return Err(self.invalid("record a step"));
        }
        self.global_step += 1;
        Ok(self.global_step)
    }

    pub fn end_epoch(&mut self) -> Result<usize, StateError> {
        if !self.epoch_open {
            return Err(self.invalid("end an epoch"));
        }
        self.epoch += 1;
        self.epoch_open = false;
        Ok(self.epoch)
    }

    /// Also valid straight from `Initialized` for evaluation-only runs.
    pub fn enter_validation(&mut self) -> Result<(), StateError> {
        match self.phase {
            Phase::Initialized | Phase::TrainingEpoch | Phase::Checkpointing if !self.epoch_open => {
                self.phase = Phase::Validating;
                Ok(())
            }
            _ => Err(self.invalid("validate")),
        }
    }

    /// Returns `true` when `value` improves on the best metric so far.
    pub fn record_metric(&mut self, value: f64, objective: &Objective) -> Result<bool, StateError> {
        if self.phase != Phase::Validating {
            return Err(self.invalid("record a metric"));
        }
        let improved = objective.improves(value, self.best_metric);
        if improved {
            self.best_metric = Some(value);
        }
        Ok(improved)
    }

    pub fn enter_checkpointing(&mut self) -> Result<(), StateError> {
        match self.phase {
            Phase::TrainingEpoch | Phase::Validating if !self.epoch_open => {
                self.phase = Phase::Checkpointing;
                Ok(())
            }
            _ => Err(self.invalid("checkpoint")),
        }
    }

    pub fn finish(&mut self) -> Result<(), StateError> {
        if self.epoch_open {
            return Err(self.invalid("finish"));
        }
        self.phase = Phase::Finished;
        Ok(())
    }

    // ─── Queries ─────────────────────────────────────────────────────────────
    pub fn is_finished(&self, schedule: &Schedule) -> bool {
        self.phase == Phase::Finished
            || self.epoch >= schedule.nepochs
            || schedule.max_steps.is_some_and(|max| self.global_step >= max)
    }

    /// Step budget reached inside the current epoch.
    pub fn steps_exhausted(&self, schedule: &Schedule) -> bool {
        schedule.max_steps.is_some_and(|max| self.global_step >= max)
    }

    /// Validate every `val_step` epochs and after the final one.
    pub fn should_validate(&self, schedule: &Schedule) -> bool {
        self.epoch > 0 && (self.epoch % schedule.val_step == 0 || self.is_finished(schedule))
    }

    pub fn checkpoint_plan(&self, schedule: &Schedule, improved: bool) -> CheckpointPlan {
        let every = schedule.checkpoint_every.max(1);
        CheckpointPlan {
            last: self.epoch % every == 0 || self.is_finished(schedule),
            best: schedule.save_best && improved,
        }
    }
}
