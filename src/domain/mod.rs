// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Pure Rust structs and traits that define the core concepts of
// the harness.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain Rust structs, enums, traits and pure functions
//
// Reference: Rust Book §5 (Structs), §10 (Traits)

// PASCAL-VOC palette for rendering class maps
pub mod colormap;

// Name → entry maps backing configuration lookups
pub mod registry;

// A preprocessed dataset item
pub mod sample;

// Metric / Objective abstractions
pub mod traits;
