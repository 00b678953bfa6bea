// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All Burn modules, losses and the training loop.
//
//   model.rs        — SegmentationModel trait, shared blocks, specs
//   unet.rs         — UNet
//   mobile_unet.rs  — depthwise-separable UNet
//   deeplab.rs      — DeepLabV3 with a bottleneck ResNet backbone
//   loss.rs         — dice losses and cross entropy
//   wrapper.rs      — model + criterion in one forward call
//   optim.rs        — optimizer specs → Burn optimizer configs
//   scheduler.rs    — epoch-stepped learning-rate schedules
//   metrics.rs      — confusion-matrix metrics
//   state.rs        — learner state machine
//   learner.rs      — fit / validate / checkpoint loop
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)

/// Model trait, blocks and registry entries
pub mod model;

/// UNet architecture
pub mod unet;

/// MobileUNet architecture
pub mod mobile_unet;

/// DeepLabV3 architecture
pub mod deeplab;

/// Segmentation criteria
pub mod loss;

/// Model + criterion wrapper
pub mod wrapper;

/// Optimizer specs
pub mod optim;

/// Learning-rate schedulers
pub mod scheduler;

/// Evaluation metrics
pub mod metrics;

/// Learner state machine
pub mod state;

/// Training loop
pub mod learner;
