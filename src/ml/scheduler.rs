// ============================================================
// Layer 5 — Learning-Rate Schedules
// ============================================================
// Epoch-stepped schedules. The state is plain data so it can be
// written into `state_*.json` with the learner state and restored
// on resume.
//
//   ConstantLR         lr
//   StepLR             base · gamma^(epoch / step_size)
//   CosineAnnealingLR  eta_min + (base − eta_min)(1 + cos(π·epoch / t_max)) / 2
//   ReduceLROnPlateau  lr · factor after `patience` epochs without
//                      a relative improvement of `threshold`
//
// `epoch` is the number of completed epochs. Without an explicit
// `mode`, ReduceLROnPlateau follows the objective's direction.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::config::{
    error::ConfigError,
    getter::{parse_args, Args, Factory},
};
use crate::domain::{registry::Registry, traits::Objective};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlateauMode {
    Min,
    Max,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum LrScheduler {
    Constant {
        lr: f64,
    },
    Step {
        base_lr:   f64,
        step_size: usize,
        gamma:     f64,
    },
    Cosine {
        base_lr: f64,
        t_max:   usize,
        eta_min: f64,
    },
    Plateau {
        lr:         f64,
        mode:       PlateauMode,
        factor:     f64,
        patience:   usize,
        threshold:  f64,
        min_lr:     f64,
        best:       Option<f64>,
        bad_epochs: usize,
    },
}

impl LrScheduler {
    /// Learning rate to use during the epoch after `epoch` completed ones.
    pub fn lr(&self, epoch: usize) -> f64 {
        match *self {
            Self::Constant { lr } => lr,
            Self::Step { base_lr, step_size, gamma } => base_lr * gamma.powi((epoch / step_size) as i32),
            Self::Cosine { base_lr, t_max, eta_min } => {
                let t = epoch.min(t_max) as f64;
                eta_min + (base_lr - eta_min) * (1.0 + (PI * t / t_max as f64).cos()) / 2.0
            }
            Self::Plateau { lr, .. } => lr,
        }
    }

    /// Feed a validation metric. Returns `true` if the rate was reduced.
    pub fn observe(&mut self, metric: f64) -> bool {
        let Self::Plateau { lr, mode, factor, patience, threshold, min_lr, best, bad_epochs } = self else {
            return false;
        };
        if metric.is_nan() {
            return false;
        }

        let improved = match (*best, *mode) {
            (None, _) => true,
            (Some(b), PlateauMode::Min) => metric < b - b.abs() * *threshold,
            (Some(b), PlateauMode::Max) => metric > b + b.abs() * *threshold,
        };
        if improved {
            *best = Some(metric);
            *bad_epochs = 0;
            return false;
        }

        *bad_epochs += 1;
        if *bad_epochs > *patience {
            let new_lr = (*lr * *factor).max(*min_lr);
            *bad_epochs = 0;
            if new_lr < *lr {
                tracing::info!("ReduceLROnPlateau: lr {:.3e} → {:.3e}", *lr, new_lr);
                *lr = new_lr;
                return true;
            }
        }
        false
    }

    pub fn needs_metric(&self) -> bool {
        matches!(self, Self::Plateau { .. })
    }
}

// ─── Specs ────────────────────────────────────────────────────────────────────
fn default_gamma() -> f64 {
    0.1
}

fn default_factor() -> f64 {
    0.1
}

fn default_patience() -> usize {
    10
}

fn default_threshold() -> f64 {
    1e-4
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepArgs {
    pub step_size: usize,
    #[serde(default = "default_gamma")]
    pub gamma:     f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CosineArgs {
    pub t_max:   usize,
    #[serde(default)]
    pub eta_min: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlateauArgs {
    #[serde(default)]
    pub mode:      Option<PlateauMode>,
    #[serde(default = "default_factor")]
    pub factor:    f64,
    #[serde(default = "default_patience")]
    pub patience:  usize,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default)]
    pub min_lr:    f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum SchedulerSpec {
    #[default]
    Constant,
    Step(StepArgs),
    Cosine(CosineArgs),
    Plateau(PlateauArgs),
}

impl SchedulerSpec {
    /// Initial scheduler state for an optimizer starting at `base_lr`.
    /// `objective` is the value fed to `observe` after each validation.
    pub fn init(&self, base_lr: f64, objective: &Objective) -> LrScheduler {
        match self {
            Self::Constant => LrScheduler::Constant { lr: base_lr },
            Self::Step(a) => LrScheduler::Step { base_lr, step_size: a.step_size, gamma: a.gamma },
            Self::Cosine(a) => LrScheduler::Cosine { base_lr, t_max: a.t_max, eta_min: a.eta_min },
            Self::Plateau(a) => LrScheduler::Plateau {
                lr:         base_lr,
                mode:       a.mode.unwrap_or(if objective.higher_is_better { PlateauMode::Max } else { PlateauMode::Min }),
                factor:     a.factor,
                patience:   a.patience,
                threshold:  a.threshold,
                min_lr:     a.min_lr,
                best:       None,
                bad_epochs: 0,
            },
        }
    }
}

fn constant(args: Args) -> Result<SchedulerSpec, ConfigError> {
    #[derive(Deserialize)]
    #[serde(deny_unknown_fields)]
    struct NoArgs {}
    let _: NoArgs = parse_args("ConstantLR", args)?;
    Ok(SchedulerSpec::Constant)
}

fn step_lr(args: Args) -> Result<SchedulerSpec, ConfigError> {
    let a: StepArgs = parse_args("StepLR", args)?;
    if a.step_size == 0 {
        return Err(ConfigError::invalid("step_size", "must be at least 1"));
    }
    Ok(SchedulerSpec::Step(a))
}

fn cosine(args: Args) -> Result<SchedulerSpec, ConfigError> {
    let a: CosineArgs = parse_args("CosineAnnealingLR", args)?;
    if a.t_max == 0 {
        return Err(ConfigError::invalid("t_max", "must be at least 1"));
    }
    Ok(SchedulerSpec::Cosine(a))
}

fn plateau(args: Args) -> Result<SchedulerSpec, ConfigError> {
    let a: PlateauArgs = parse_args("ReduceLROnPlateau", args)?;
    if !(a.factor > 0.0 && a.factor < 1.0) {
        return Err(ConfigError::invalid("factor", "must be in (0, 1)"));
    }
    Ok(SchedulerSpec::Plateau(a))
}

pub fn register(registry: &mut Registry<Factory<SchedulerSpec>>) -> Result<(), ConfigError> {
    registry.register(Factory::new("ConstantLR", constant))?;
    registry.register(Factory::new("StepLR", step_lr))?;
    registry.register(Factory::new("CosineAnnealingLR", cosine))?;
    registry.register(Factory::new("ReduceLROnPlateau", plateau))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loss() -> Objective {
        Objective::new("loss", false)
    }

    #[test]
    fn test_step_lr_decays_every_step_size_epochs() {
        let s = SchedulerSpec::Step(StepArgs { step_size: 2, gamma: 0.5 }).init(1.0, &loss());
        assert_eq!(s.lr(0), 1.0);
        assert_eq!(s.lr(1), 1.0);
        assert_eq!(s.lr(2), 0.5);
        assert_eq!(s.lr(5), 0.25);
    }

    #[test]
    fn test_cosine_endpoints() {
        let s = SchedulerSpec::Cosine(CosineArgs { t_max: 10, eta_min: 0.1 }).init(1.0, &loss());
        assert!((s.lr(0) - 1.0).abs() < 1e-12);
        assert!((s.lr(5) - 0.55).abs() < 1e-12);
        assert!((s.lr(10) - 0.1).abs() < 1e-12);
        assert!((s.lr(50) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_plateau_reduces_after_patience() {
        let args = PlateauArgs { mode: Some(PlateauMode::Max), factor: 0.5, patience: 1, threshold: 0.0, min_lr: 0.1 };
        let mut s = SchedulerSpec::Plateau(args).init(1.0, &loss());
        assert!(!s.observe(0.5)); // first value sets best
        assert!(!s.observe(0.4)); // 1 bad epoch, within patience
        assert!(s.observe(0.4)); // 2 bad epochs → reduce
        assert_eq!(s.lr(0), 0.5);
        assert!(!s.observe(0.9)); // improvement resets
        s.observe(0.1);
        s.observe(0.1);
        s.observe(0.1);
        s.observe(0.1);
        assert_eq!(s.lr(0), 0.125_f64.max(0.1)); // floored at min_lr
    }

    #[test]
    fn test_state_round_trips_through_json() {
        let mut s = SchedulerSpec::Plateau(PlateauArgs {
            mode: Some(PlateauMode::Min), factor: 0.1, patience: 0, threshold: 0.0, min_lr: 0.0,
        })
        .init(0.01, &loss());
        s.observe(1.0);
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(serde_json::from_str::<LrScheduler>(&json).unwrap(), s);
    }

    #[test]
    fn test_plateau_mode_follows_objective_when_omitted() {
        let args: Args = serde_yaml::from_str("{factor: 0.5, patience: 0}").unwrap();
        let spec = plateau(args).unwrap();

        // rising IoU is progress, so the rate holds
        let mut s = spec.init(1.0, &Objective::new("MeanIoU", true));
        assert!(matches!(s, LrScheduler::Plateau { mode: PlateauMode::Max, .. }));
        assert!(!s.observe(0.2));
        assert!(!s.observe(0.3));
        assert!(!s.observe(0.4));
        assert_eq!(s.lr(0), 1.0);
        assert!(s.observe(0.1));
        assert_eq!(s.lr(0), 0.5);

        let s = spec.init(1.0, &loss());
        assert!(matches!(s, LrScheduler::Plateau { mode: PlateauMode::Min, .. }));

        let explicit: Args = serde_yaml::from_str("{mode: min}").unwrap();
        let s = plateau(explicit).unwrap().init(1.0, &Objective::new("MeanIoU", true));
        assert!(matches!(s, LrScheduler::Plateau { mode: PlateauMode::Min, .. }));
    }

    #[test]
    fn test_factories_reject_bad_values() {
        let bad: Args = serde_yaml::from_str("{step_size: 0}").unwrap();
        assert!(step_lr(bad).is_err());
        let bad: Args = serde_yaml::from_str("{factor: 2.0}").unwrap();
        assert!(plateau(bad).is_err());
        assert!(constant(Args::new()).is_ok());
    }
}
