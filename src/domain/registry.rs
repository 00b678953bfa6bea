// ============================================================
// Layer 3 — Registry
// ============================================================
// A name → entry map used to resolve string identifiers found in
// YAML configuration into constructors.
//
// Every component kind (dataset, model, criterion, ...) owns its
// own Registry, so the same name may exist in two registries
// without clashing. Entries are added once at startup and never
// removed.
//
//   registry.register(entry)           → stored under entry.name()
//   registry.register_as("alias", e)   → stored under "alias"
//   registry.get("alias")              → &entry or NotFound
//
// Reference: Rust Book §8.3 (Hash Maps), §10 (Generic Types)

use std::collections::BTreeMap;
use thiserror::Error;

// ─── Errors ───────────────────────────────────────────────────────────────────
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("an entry named '{name}' is already registered in the {kind} registry")]
    Duplicate { kind: String, name: String },

    #[error("no entry named '{name}' in the {kind} registry (available: {})", available.join(", "))]
    NotFound {
        kind:      String,
        name:      String,
        available: Vec<String>,
    },
}

// ─── Registrable ──────────────────────────────────────────────────────────────
/// Anything that knows the name it should be registered under by default.
pub trait Registrable {
    fn name(&self) -> &str;
}

// ─── Registry ─────────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct Registry<T> {
    /// Human readable kind, used in error messages ("model", "dataset", ...)
    kind:    String,
    entries: BTreeMap<String, T>,
}

impl<T> Registry<T> {
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into(), entries: BTreeMap::new() }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Store `entry` under an explicit name.
    pub fn register_as(&mut self, name: impl Into<String>, entry: T) -> Result<(), RegistryError> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(RegistryError::Duplicate { kind: self.kind.clone(), name });
        }
        tracing::trace!(kind = %self.kind, %name, "registered");
        self.entries.insert(name, entry);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&T, RegistryError> {
        self.entries.get(name).ok_or_else(|| RegistryError::NotFound {
            kind:      self.kind.clone(),
            name:      name.to_string(),
            available: self.names(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: Registrable> Registry<T> {
    /// Store `entry` under its own name.
    pub fn register(&mut self, entry: T) -> Result<(), RegistryError> {
        let name = entry.name().to_string();
        self.register_as(name, entry)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Entry(&'static str, u32);

    impl Registrable for Entry {
        fn name(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn test_register_and_get_by_own_name() {
        let mut reg = Registry::new("thing");
        reg.register(Entry("alpha", 1)).unwrap();
        assert_eq!(reg.get("alpha").unwrap(), &Entry("alpha", 1));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_register_as_uses_explicit_name() {
        let mut reg = Registry::new("thing");
        reg.register_as("beta", Entry("alpha", 2)).unwrap();
        assert!(reg.contains("beta"));
        assert!(!reg.contains("alpha"));
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let mut reg = Registry::new("thing");
        reg.register(Entry("alpha", 1)).unwrap();
        let err = reg.register(Entry("alpha", 2)).unwrap_err();
        assert_eq!(err, RegistryError::Duplicate { kind: "thing".into(), name: "alpha".into() });
        // the first entry is untouched
        assert_eq!(reg.get("alpha").unwrap().1, 1);
    }

    #[test]
    fn test_missing_name_lists_available_entries() {
        let mut reg = Registry::new("thing");
        reg.register(Entry("b", 1)).unwrap();
        reg.register(Entry("a", 1)).unwrap();
        match reg.get("zzz") {
            Err(RegistryError::NotFound { available, .. }) => {
                assert_eq!(available, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_independent_registries_share_names() {
        let mut models = Registry::new("model");
        let mut metrics = Registry::new("metric");
        models.register(Entry("same", 1)).unwrap();
        metrics.register(Entry("same", 2)).unwrap();
        assert_eq!(models.get("same").unwrap().1, 1);
        assert_eq!(metrics.get("same").unwrap().1, 2);
    }
}
