// ============================================================
// Config — Options and Pipeline Resolution
// ============================================================
// Turns the two YAML files plus CLI flags into validated values:
//
//   opt.yaml + CLI flags  → Opts          (opts.rs)
//   pipeline.yaml         → PipelineSpec  (pipeline.rs)
//
// Component nodes are resolved by name through per-kind
// registries (registries.rs) with `get_instance` (getter.rs).
//
// Reference: Rust Book §9 (Error Handling), serde documentation

/// Configuration error type
pub mod error;

/// Factories and `get_instance`
pub mod getter;

/// Option file + CLI overlay
pub mod opts;

/// Backend selection
pub mod device;

/// Built-in registries for every component kind
pub mod registries;

/// Pipeline file validation
pub mod pipeline;
