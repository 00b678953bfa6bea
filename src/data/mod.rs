// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything from image files on disk to tensor batches on the
// training device.
//
//   image / mask files
//       │
//       ▼
//   LyftDataset       → lazily decodes pairs (Burn Dataset)
//       │
//       ▼
//   Preprocessor      → resize, normalise, read class ids
//       │
//       ▼
//   IndexedSubset     → train / val views (trainval split)
//       │
//       ▼
//   SegmentationBatcher → stacks items with a collate fn
//       │
//       ▼
//   DataLoader        → multi-threaded prefetching batches
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// Data-layer error type
pub mod error;

/// Image resizing and normalisation
pub mod preprocessor;

/// Burn Dataset implementations and their config specs
pub mod dataset;

/// Collate functions and Burn's Batcher trait
pub mod batcher;

/// Deterministic train/validation split
pub mod splitter;

/// Data config resolution and DataLoader assembly
pub mod loader;
