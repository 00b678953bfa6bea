// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Orchestrates the other layers to carry out one run (training
// or evaluation) from resolved options.
//
// Rules for this layer:
//   - No ML math or model code here
//   - No printing here (that's Layer 1)
//   - Only workflow coordination
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

// Options + pipeline file → learner → fit / evaluate
pub mod pipeline;
