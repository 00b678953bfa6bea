// ============================================================
// Config — Instance Getter
// ============================================================
// Resolves one component node of the pipeline YAML into a typed,
// validated spec through a registry of factories:
//
//   model:
//     name: UNet              → registry lookup
//     args:                   → optional, defaults to {}
//       num_classes: 13
//
// Steps of `get_instance`:
//   1. the node must be a mapping with a string `name`
//   2. `args` (missing or null → empty) is merged with the
//      caller's extra arguments; a key given twice is an error
//   3. the factory registered under `name` validates the merged
//      arguments into its spec type
//
// Factories deserialize into `deny_unknown_fields` structs, so a
// typo in the YAML fails at load time instead of mid-training.

use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};
use std::fmt;

use crate::config::error::ConfigError;
use crate::domain::registry::{Registrable, Registry};

/// Keyword arguments for a factory.
pub type Args = Mapping;

// ─── Factory ──────────────────────────────────────────────────────────────────
/// A named, validating constructor producing a spec of type `S`.
pub struct Factory<S> {
    name:  &'static str,
    build: fn(Args) -> Result<S, ConfigError>,
}

impl<S> Factory<S> {
    pub const fn new(name: &'static str, build: fn(Args) -> Result<S, ConfigError>) -> Self {
        Self { name, build }
    }

    pub fn build(&self, args: Args) -> Result<S, ConfigError> {
        (self.build)(args)
    }
}

impl<S> Clone for Factory<S> {
    fn clone(&self) -> Self {
        Self { name: self.name, build: self.build }
    }
}

impl<S> fmt::Debug for Factory<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Factory").field("name", &self.name).finish()
    }
}

impl<S> Registrable for Factory<S> {
    fn name(&self) -> &str {
        self.name
    }
}

// ─── get_instance ─────────────────────────────────────────────────────────────
/// Resolve `node` (found at `section` in the config) through `registry`.
pub fn get_instance<S>(
    node:     &Value,
    section:  &str,
    registry: &Registry<Factory<S>>,
    extra:    Args,
) -> Result<S, ConfigError> {
    let name = component_name(node, section)?;
    let mut args = component_args(node, section)?;

    for (key, value) in extra {
        if args.contains_key(&key) {
            return Err(ConfigError::DuplicateArgument {
                name: name.to_string(),
                key:  key.as_str().unwrap_or("<non-string key>").to_string(),
            });
        }
        args.insert(key, value);
    }

    tracing::debug!(%section, %name, kind = registry.kind(), "resolving component");
    registry.get(name)?.build(args)
}

/// The `name` of a component node.
pub fn component_name<'a>(node: &'a Value, section: &str) -> Result<&'a str, ConfigError> {
    let map = node
        .as_mapping()
        .ok_or_else(|| ConfigError::NotAMapping { section: section.to_string() })?;
    map.get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| ConfigError::MissingName { section: section.to_string() })
}

fn component_args(node: &Value, section: &str) -> Result<Args, ConfigError> {
    match node.get("args") {
        None | Some(Value::Null) => Ok(Args::new()),
        Some(Value::Mapping(m)) => Ok(m.clone()),
        Some(_) => Err(ConfigError::NotAMapping { section: format!("{section}.args") }),
    }
}

/// Deserialize factory arguments into a typed struct.
pub fn parse_args<T: DeserializeOwned>(component: &str, args: Args) -> Result<T, ConfigError> {
    serde_yaml::from_value(Value::Mapping(args)).map_err(|source| ConfigError::InvalidArgs {
        component: component.to_string(),
        source,
    })
}

/// Build an `Args` mapping from `(key, value)` pairs.
pub fn args_from<I, K, V>(pairs: I) -> Args
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (Value::String(k.into()), v.into()))
        .collect()
}
