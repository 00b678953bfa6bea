// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Everything the learner writes into the experiment directory:
//
//   checkpoint.rs     — model / optimizer records (CompactRecorder),
//                       learner state JSON, resume-directory lookup
//
//   metrics.rs        — per-epoch CSV log
//
//   dashboard.rs      — TensorBoard event file (scalars and images)
//
//   visualization.rs  — PNG sample grids of inputs, labels and
//                       predictions
//
// Reference: Rust Book §7 (Modules)
//            Burn Book §5 (Checkpointing)

/// Model, optimizer and state checkpoints
pub mod checkpoint;

/// TensorBoard event writer
pub mod dashboard;

/// Training metrics CSV logger
pub mod metrics;

/// Sample grids
pub mod visualization;
