// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// Framework-free abstractions shared by the ML and infra layers.
//
//   Metric    → accumulates predictions over a validation pass
//   Objective → decides whether a new metric value is an improvement
//
// Reference: Rust Book §10 (Traits: Defining Shared Behaviour)

use serde::{Deserialize, Serialize};

// ─── Metric ───────────────────────────────────────────────────────────────────
/// An evaluation metric fed with flat per-pixel predictions and targets.
pub trait Metric: Send {
    /// Name used for logging and for `primary_metric` lookup
    fn name(&self) -> &str;

    /// Forget everything seen so far (called before each pass).
    fn reset(&mut self);

    /// Accumulate one batch. Both slices are row-major class indices.
    fn update(&mut self, preds: &[i64], targets: &[i64]);

    /// Current value over everything accumulated since `reset`.
    fn value(&self) -> f64;
}

// ─── Objective ────────────────────────────────────────────────────────────────
/// Which quantity decides "best" checkpoints and in which direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Objective {
    pub name:             String,
    pub higher_is_better: bool,
}

impl Objective {
    pub fn new(name: impl Into<String>, higher_is_better: bool) -> Self {
        Self { name: name.into(), higher_is_better }
    }

    /// `true` if `candidate` beats `best` (anything beats no value; NaN never does).
    pub fn improves(&self, candidate: f64, best: Option<f64>) -> bool {
        if candidate.is_nan() {
            return false;
        }
        match best {
            None => true,
            Some(best) if self.higher_is_better => candidate > best,
            Some(best) => candidate < best,
        }
    }
}
