// ============================================================
// Config — Errors
// ============================================================
// Everything that can go wrong while turning YAML + CLI flags
// into validated specs. All of these are raised before any model
// or dataset is built.

use std::path::PathBuf;
use thiserror::Error;

use crate::domain::registry::RegistryError;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("'{section}' must be a mapping")]
    NotAMapping { section: String },

    #[error("'{section}' has no string 'name' key")]
    MissingName { section: String },

    #[error("argument '{key}' of '{name}' is set both in the config and by the caller")]
    DuplicateArgument { name: String, key: String },

    #[error("invalid arguments for '{component}': {source}")]
    InvalidArgs {
        component: String,
        #[source]
        source:    serde_yaml::Error,
    },

    #[error("invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Dataset config is not correctly formatted.")]
    DataFormat,

    #[error("unresolved options (set them on the command line or in the option file): {}", .0.join(", "))]
    Unresolved(Vec<String>),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("cannot read '{}': {source}", path.display())]
    Io {
        path:   PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse '{}': {source}", path.display())]
    Yaml {
        path:   PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue { key: key.into(), reason: reason.into() }
    }
}
