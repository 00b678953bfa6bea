// ============================================================
// Layer 4 — Data Errors
// ============================================================

use std::path::PathBuf;
use thiserror::Error;

use crate::config::error::ConfigError;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("{images} images but {masks} masks: image and mask lists must have the same length")]
    LengthMismatch { images: usize, masks: usize },

    #[error("cannot read '{}': {source}", path.display())]
    Io {
        path:   PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot decode '{}': {source}", path.display())]
    Image {
        path:   PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("{split} pass saw {seen} of {expected} items; see earlier errors for the items that failed to load")]
    MissingItems { split: String, expected: usize, seen: usize },

    #[error("{split} batch has no labels; labeled data is required here")]
    MissingLabels { split: String },

    #[error("{split} split is empty")]
    EmptySplit { split: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}
