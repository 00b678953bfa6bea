// ============================================================
// Layer 5 — Optimizers
// ============================================================
// YAML optimizer declarations validated into Burn optimizer
// configs. The learner is generic over the optimizer type, so the
// pipeline matches on `OptimizerSpec` once and calls `init()` on
// the chosen config:
//
//   SGD      → SgdConfig      (momentum, dampening, nesterov, weight decay)
//   Adam     → AdamConfig     (betas, eps, L2 weight decay)
//   AdamW    → AdamWConfig    (betas, eps, decoupled weight decay)
//   RMSprop  → RmsPropConfig  (alpha, eps, momentum, centered)
//
// The learning rate itself is not part of the Burn config; it is
// passed to `optim.step(lr, ..)` from the LR scheduler.
//
// Reference: Burn Book §5 (Optimizers)

use burn::{
    grad_clipping::GradientClippingConfig,
    optim::{
        decay::WeightDecayConfig, momentum::MomentumConfig, AdamConfig, AdamWConfig, RmsPropConfig,
        SgdConfig,
    },
};
use serde::Deserialize;

use crate::config::{
    error::ConfigError,
    getter::{parse_args, Args, Factory},
};
use crate::domain::registry::Registry;

fn default_adam_lr() -> f64 {
    1e-3
}

fn default_betas() -> [f32; 2] {
    [0.9, 0.999]
}

fn default_eps() -> f32 {
    1e-8
}

fn default_adamw_decay() -> f32 {
    1e-2
}

fn default_rms_lr() -> f64 {
    1e-2
}

fn default_alpha() -> f32 {
    0.99
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SgdArgs {
    pub lr:             f64,
    #[serde(default)]
    pub momentum:       f64,
    #[serde(default)]
    pub dampening:      f64,
    #[serde(default)]
    pub nesterov:       bool,
    #[serde(default)]
    pub weight_decay:   f32,
    #[serde(default)]
    pub grad_clip_norm: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdamArgs {
    #[serde(default = "default_adam_lr")]
    pub lr:             f64,
    #[serde(default = "default_betas")]
    pub betas:          [f32; 2],
    #[serde(default = "default_eps")]
    pub eps:            f32,
    #[serde(default)]
    pub weight_decay:   f32,
    #[serde(default)]
    pub grad_clip_norm: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdamWArgs {
    #[serde(default = "default_adam_lr")]
    pub lr:             f64,
    #[serde(default = "default_betas")]
    pub betas:          [f32; 2],
    #[serde(default = "default_eps")]
    pub eps:            f32,
    #[serde(default = "default_adamw_decay")]
    pub weight_decay:   f32,
    #[serde(default)]
    pub grad_clip_norm: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RmsPropArgs {
    #[serde(default = "default_rms_lr")]
    pub lr:             f64,
    #[serde(default = "default_alpha")]
    pub alpha:          f32,
    #[serde(default = "default_eps")]
    pub eps:            f32,
    #[serde(default)]
    pub momentum:       f32,
    #[serde(default)]
    pub centered:       bool,
    #[serde(default)]
    pub weight_decay:   f32,
    #[serde(default)]
    pub grad_clip_norm: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OptimizerSpec {
    Sgd(SgdArgs),
    Adam(AdamArgs),
    AdamW(AdamWArgs),
    RmsProp(RmsPropArgs),
}

impl OptimizerSpec {
    /// Initial learning rate
    pub fn lr(&self) -> f64 {
        match self {
            Self::Sgd(a) => a.lr,
            Self::Adam(a) => a.lr,
            Self::AdamW(a) => a.lr,
            Self::RmsProp(a) => a.lr,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Sgd(_) => "SGD",
            Self::Adam(_) => "Adam",
            Self::AdamW(_) => "AdamW",
            Self::RmsProp(_) => "RMSprop",
        }
    }
}

fn clipping(norm: Option<f32>) -> Option<GradientClippingConfig> {
    norm.map(GradientClippingConfig::Norm)
}

fn decay(penalty: f32) -> Option<WeightDecayConfig> {
    (penalty > 0.0).then(|| WeightDecayConfig::new(penalty))
}

impl SgdArgs {
    pub fn config(&self) -> SgdConfig {
        let momentum = (self.momentum > 0.0).then(|| {
            MomentumConfig::new()
                .with_momentum(self.momentum)
                .with_dampening(self.dampening)
                .with_nesterov(self.nesterov)
        });
        SgdConfig::new()
            .with_momentum(momentum)
            .with_weight_decay(decay(self.weight_decay))
            .with_gradient_clipping(clipping(self.grad_clip_norm))
    }
}

impl AdamArgs {
    pub fn config(&self) -> AdamConfig {
        AdamConfig::new()
            .with_beta_1(self.betas[0])
            .with_beta_2(self.betas[1])
            .with_epsilon(self.eps)
            .with_weight_decay(decay(self.weight_decay))
            .with_grad_clipping(clipping(self.grad_clip_norm))
    }
}

impl AdamWArgs {
    pub fn config(&self) -> AdamWConfig {
        AdamWConfig::new()
            .with_beta_1(self.betas[0])
            .with_beta_2(self.betas[1])
            .with_epsilon(self.eps)
            .with_weight_decay(self.weight_decay)
            .with_grad_clipping(clipping(self.grad_clip_norm))
    }
}

impl RmsPropArgs {
    pub fn config(&self) -> RmsPropConfig {
        RmsPropConfig::new()
            .with_alpha(self.alpha)
            .with_epsilon(self.eps)
            .with_momentum(self.momentum)
            .with_centered(self.centered)
            .with_weight_decay(decay(self.weight_decay))
            .with_grad_clipping(clipping(self.grad_clip_norm))
    }
}

fn check_lr(lr: f64) -> Result<(), ConfigError> {
    if !(lr > 0.0 && lr.is_finite()) {
        return Err(ConfigError::invalid("lr", format!("{lr} is not a positive learning rate")));
    }
    Ok(())
}

fn sgd(args: Args) -> Result<OptimizerSpec, ConfigError> {
    let a: SgdArgs = parse_args("SGD", args)?;
    check_lr(a.lr)?;
    if a.nesterov && (a.momentum <= 0.0 || a.dampening != 0.0) {
        return Err(ConfigError::invalid("nesterov", "requires a momentum and zero dampening"));
    }
    Ok(OptimizerSpec::Sgd(a))
}

fn adam(args: Args) -> Result<OptimizerSpec, ConfigError> {
    let a: AdamArgs = parse_args("Adam", args)?;
    check_lr(a.lr)?;
    Ok(OptimizerSpec::Adam(a))
}

fn adamw(args: Args) -> Result<OptimizerSpec, ConfigError> {
    let a: AdamWArgs = parse_args("AdamW", args)?;
    check_lr(a.lr)?;
    Ok(OptimizerSpec::AdamW(a))
}

fn rmsprop(args: Args) -> Result<OptimizerSpec, ConfigError> {
    let a: RmsPropArgs = parse_args("RMSprop", args)?;
    check_lr(a.lr)?;
    Ok(OptimizerSpec::RmsProp(a))
}

pub fn register(registry: &mut Registry<Factory<OptimizerSpec>>) -> Result<(), ConfigError> {
    registry.register(Factory::new("SGD", sgd))?;
    registry.register(Factory::new("Adam", adam))?;
    registry.register(Factory::new("AdamW", adamw))?;
    registry.register(Factory::new("RMSprop", rmsprop))?;
    Ok(())
}
