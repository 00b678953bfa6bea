// ============================================================
// Layer 4 — Dataset / DataLoader Assembly
// ============================================================
// Reads the `data:` section of the pipeline config and produces
// Burn data loaders for training and validation.
//
// Two shapes are accepted:
//
//   data:                          data:
//     train:                         trainval:
//       name: LyftDataset              test_ratio: 0.2
//       args: {...}                    dataset: {name: ..., args: ...}
//       loader: {name: DataLoader}     loader:
//     val:                               train: {name: DataLoader, ...}
//       ...                              val:   {name: DataLoader, ...}
//
// Anything else is rejected with "Dataset config is not correctly
// formatted.".
//
// The training loader lives on the autodiff backend; the
// validation loader on its inner backend, matching `model.valid()`.
//
// Reference: Burn Book §4 (DataLoaderBuilder)

use burn::{
    data::dataloader::{DataLoader, DataLoaderBuilder},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use serde::Deserialize;
use serde_yaml::Value;
use std::sync::Arc;

use crate::config::{
    error::ConfigError,
    getter::{args_from, component_name, get_instance, parse_args, Args, Factory},
    registries::Registries,
};
use crate::data::{
    batcher::{CollateFn, SegmentationBatch, SegmentationBatcher},
    dataset::DatasetSpec,
    error::DataError,
    splitter::{trainval_split, IndexedSubset},
};
use crate::domain::registry::Registry;

const DEFAULT_COLLATE: &str = "default_collate";

// ─── Loader spec ──────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoaderArgs {
    #[serde(default)]
    pub batch_size:  Option<usize>,
    #[serde(default)]
    pub shuffle:     bool,
    #[serde(default)]
    pub num_workers: Option<usize>,
    /// Filled in from the loader node's `collate_fn` key
    pub collate_fn:  String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoaderSpec {
    pub batch_size:  Option<usize>,
    pub shuffle:     bool,
    pub num_workers: Option<usize>,
    pub collate:     CollateFn,
}

fn data_loader(args: Args) -> Result<LoaderArgs, ConfigError> {
    let a: LoaderArgs = parse_args("DataLoader", args)?;
    if a.batch_size == Some(0) {
        return Err(ConfigError::invalid("batch_size", "must be at least 1"));
    }
    Ok(a)
}

pub fn register(registry: &mut Registry<Factory<LoaderArgs>>) -> Result<(), ConfigError> {
    registry.register(Factory::new("DataLoader", data_loader))?;
    Ok(())
}

/// Run-level values that fill (or, in debug mode, override) loader args.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoaderDefaults {
    pub batch_size:  usize,
    pub num_workers: usize,
    pub seed:        u64,
    /// When set the defaults win over the loader's own values
    pub force:       bool,
}

impl LoaderSpec {
    /// Effective `(batch_size, num_workers)`.
    pub fn effective(&self, defaults: &LoaderDefaults) -> (usize, usize) {
        if defaults.force {
            return (defaults.batch_size, defaults.num_workers);
        }
        (
            self.batch_size.unwrap_or(defaults.batch_size),
            self.num_workers.unwrap_or(defaults.num_workers),
        )
    }
}

// ─── Data spec ────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq)]
pub struct DataSection {
    pub dataset: DatasetSpec,
    pub loader:  LoaderSpec,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataSpec {
    Separate {
        train: DataSection,
        val:   DataSection,
    },
    TrainVal {
        test_ratio:   f64,
        shuffle_seed: Option<u64>,
        dataset:      DatasetSpec,
        train_loader: LoaderSpec,
        val_loader:   LoaderSpec,
    },
}

impl DataSpec {
    /// Validate the `data:` node.
    pub fn resolve(node: &Value, regs: &Registries) -> Result<Self, ConfigError> {
        if !node.is_mapping() {
            return Err(ConfigError::NotAMapping { section: "data".into() });
        }

        if let (Some(train), Some(val)) = (node.get("train"), node.get("val")) {
            return Ok(Self::Separate {
                train: resolve_section(train, "data.train", regs)?,
                val:   resolve_section(val, "data.val", regs)?,
            });
        }

        let Some(tv) = node.get("trainval") else {
            return Err(ConfigError::DataFormat);
        };
        let test_ratio = tv.get("test_ratio").and_then(Value::as_f64).ok_or(ConfigError::DataFormat)?;
        if !(test_ratio > 0.0 && test_ratio < 1.0) {
            return Err(ConfigError::invalid("data.trainval.test_ratio", format!("{test_ratio} is not in (0, 1)")));
        }
        let shuffle_seed = match tv.get("shuffle_seed") {
            None | Some(Value::Null) => None,
            Some(v) => Some(v.as_u64().ok_or_else(|| {
                ConfigError::invalid("data.trainval.shuffle_seed", "must be a non-negative integer")
            })?),
        };
        let dataset_node = tv.get("dataset").ok_or(ConfigError::DataFormat)?;
        let loader = tv.get("loader").ok_or(ConfigError::DataFormat)?;
        let (train_node, val_node) = match (loader.get("train"), loader.get("val")) {
            (Some(t), Some(v)) => (t, v),
            _ => return Err(ConfigError::DataFormat),
        };

        Ok(Self::TrainVal {
            test_ratio,
            shuffle_seed,
            dataset: get_instance(dataset_node, "data.trainval.dataset", &regs.datasets, Args::new())?,
            train_loader: resolve_loader(train_node, "data.trainval.loader.train", regs)?,
            val_loader:   resolve_loader(val_node, "data.trainval.loader.val", regs)?,
        })
    }

    /// The validation-side declaration (used for evaluation-only runs).
    pub fn val_loader(&self) -> &LoaderSpec {
        match self {
            Self::Separate { val, .. } => &val.loader,
            Self::TrainVal { val_loader, .. } => val_loader,
        }
    }
}

fn resolve_section(node: &Value, section: &str, regs: &Registries) -> Result<DataSection, ConfigError> {
    let loader = node.get("loader").ok_or(ConfigError::DataFormat)?;
    Ok(DataSection {
        dataset: get_instance(node, section, &regs.datasets, Args::new())?,
        loader:  resolve_loader(loader, &format!("{section}.loader"), regs)?,
    })
}

/// Resolve a loader node; its `collate_fn` key is passed on as an extra argument.
pub fn resolve_loader(node: &Value, section: &str, regs: &Registries) -> Result<LoaderSpec, ConfigError> {
    component_name(node, section)?;
    let collate_name = match node.get("collate_fn") {
        None | Some(Value::Null) => DEFAULT_COLLATE,
        Some(v) => v.as_str().ok_or_else(|| ConfigError::invalid(format!("{section}.collate_fn"), "must be a name"))?,
    };
    let args = get_instance(node, section, &regs.loaders, args_from([("collate_fn", collate_name)]))?;
    Ok(LoaderSpec {
        batch_size:  args.batch_size,
        shuffle:     args.shuffle,
        num_workers: args.num_workers,
        collate:     *regs.collate_fns.get(&args.collate_fn)?,
    })
}

// ─── Building loaders ─────────────────────────────────────────────────────────
/// A loader together with the number of items it should yield per pass.
pub struct SplitLoader<B: Backend> {
    pub loader:     Arc<dyn DataLoader<SegmentationBatch<B>>>,
    pub num_items:  usize,
    pub batch_size: usize,
}

impl<B: Backend> SplitLoader<B> {
    pub fn num_batches(&self) -> usize {
        self.num_items.div_ceil(self.batch_size.max(1))
    }
}

pub struct DataLoaders<B: AutodiffBackend> {
    pub train: SplitLoader<B>,
    pub val:   SplitLoader<B::InnerBackend>,
}

/// Wrap a subset into a Burn data loader.
pub fn get_dataloader<B: Backend>(
    subset:   IndexedSubset,
    spec:     &LoaderSpec,
    defaults: &LoaderDefaults,
    device:   B::Device,
) -> SplitLoader<B> {
    use burn::data::dataset::Dataset;

    let (batch_size, num_workers) = spec.effective(defaults);
    let num_items = subset.len();
    let batcher = SegmentationBatcher::<B>::new(device, spec.collate);

    let mut builder = DataLoaderBuilder::new(batcher).batch_size(batch_size);
    if spec.shuffle {
        builder = builder.shuffle(defaults.seed);
    }
    if num_workers > 0 {
        builder = builder.num_workers(num_workers);
    }
    tracing::debug!(num_items, batch_size, num_workers, shuffle = spec.shuffle, "data loader ready");

    SplitLoader { loader: builder.build(subset), num_items, batch_size }
}

/// Build one loader from a `{name, args, loader}` section.
pub fn get_single_data<B: Backend>(
    section:  &DataSection,
    split:    &str,
    defaults: &LoaderDefaults,
    device:   B::Device,
) -> Result<SplitLoader<B>, DataError> {
    let subset = IndexedSubset::full(section.dataset.build()?);
    non_empty(&subset, split)?;
    Ok(get_dataloader(subset, &section.loader, defaults, device))
}

/// Build the training (autodiff) and validation (inner backend) loaders.
pub fn get_data<B: AutodiffBackend>(
    spec:     &DataSpec,
    defaults: &LoaderDefaults,
    device:   &B::Device,
) -> Result<DataLoaders<B>, DataError> {
    match spec {
        DataSpec::Separate { train, val } => Ok(DataLoaders {
            train: get_single_data::<B>(train, "train", defaults, device.clone())?,
            val:   get_single_data::<B::InnerBackend>(val, "val", defaults, device.clone())?,
        }),
        DataSpec::TrainVal { test_ratio, shuffle_seed, dataset, train_loader, val_loader } => {
            let (train, val) = trainval_split(dataset.build()?, *test_ratio, *shuffle_seed)?;
            non_empty(&train, "train")?;
            Ok(DataLoaders {
                train: get_dataloader::<B>(train, train_loader, defaults, device.clone()),
                val:   get_dataloader::<B::InnerBackend>(val, val_loader, defaults, device.clone()),
            })
        }
    }
}

/// Validation loader only, for evaluation runs.
pub fn get_val_data<B: Backend>(
    spec:     &DataSpec,
    defaults: &LoaderDefaults,
    device:   &B::Device,
) -> Result<SplitLoader<B>, DataError> {
    match spec {
        DataSpec::Separate { val, .. } => get_single_data::<B>(val, "val", defaults, device.clone()),
        DataSpec::TrainVal { test_ratio, shuffle_seed, dataset, val_loader, .. } => {
            let (_, val) = trainval_split(dataset.build()?, *test_ratio, *shuffle_seed)?;
            Ok(get_dataloader::<B>(val, val_loader, defaults, device.clone()))
        }
    }
}

fn non_empty(subset: &IndexedSubset, split: &str) -> Result<(), DataError> {
    use burn::data::dataset::Dataset;
    if subset.is_empty() {
        return Err(DataError::EmptySplit { split: split.to_string() });
    }
    Ok(())
}

// ─── Tests ────────────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    fn defaults() -> LoaderDefaults {
        LoaderDefaults { batch_size: 2, num_workers: 0, seed: 0, force: false }
    }

    const TRAINVAL: &str = "
trainval:
  test_ratio: 0.25
  dataset:
    name: SyntheticShapes
    args: {len: 8, image_size: [4, 4], num_classes: 3}
  loader:
    train: {name: DataLoader, args: {batch_size: 3, shuffle: true}}
    val:   {name: DataLoader, collate_fn: default_collate}
";

    #[test]
    fn test_trainval_shape_resolves() {
        let spec = DataSpec::resolve(&yaml(TRAINVAL), &Registries::builtin().unwrap()).unwrap();
        match spec {
            DataSpec::TrainVal { test_ratio, train_loader, val_loader, .. } => {
                assert_eq!(test_ratio, 0.25);
                assert_eq!(train_loader.batch_size, Some(3));
                assert!(train_loader.shuffle);
                assert_eq!(val_loader.collate, CollateFn::Default);
            }
            other => panic!("expected TrainVal, got {other:?}"),
        }
    }

    #[test]
    fn test_unrecognised_shape_is_format_error() {
        let err = DataSpec::resolve(&yaml("test: {name: X}"), &Registries::builtin().unwrap()).unwrap_err();
        assert_eq!(err.to_string(), "Dataset config is not correctly formatted.");
    }

    #[test]
    fn test_unknown_collate_fn_fails() {
        let node = yaml("{name: DataLoader, collate_fn: pad_collate}");
        let err = resolve_loader(&node, "loader", &Registries::builtin().unwrap()).unwrap_err();
        assert!(matches!(err, ConfigError::Registry(_)));
    }

    #[test]
    fn test_collate_fn_in_args_and_node_is_duplicate() {
        let node = yaml("{name: DataLoader, args: {collate_fn: default_collate}}");
        let err = resolve_loader(&node, "loader", &Registries::builtin().unwrap()).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateArgument { .. }));
    }

    #[test]
    fn test_debug_defaults_override_loader_values() {
        let spec = LoaderSpec { batch_size: Some(16), shuffle: false, num_workers: Some(4), collate: CollateFn::Default };
        assert_eq!(spec.effective(&defaults()), (16, 4));
        let forced = LoaderDefaults { batch_size: 1, num_workers: 0, seed: 0, force: true };
        assert_eq!(spec.effective(&forced), (1, 0));
    }

    #[test]
    fn test_get_data_builds_both_loaders() {
        let spec = DataSpec::resolve(&yaml(TRAINVAL), &Registries::builtin().unwrap()).unwrap();
        let loaders = get_data::<Autodiff<NdArray>>(&spec, &defaults(), &Default::default()).unwrap();
        assert_eq!(loaders.train.num_items, 6);
        assert_eq!(loaders.val.num_items, 2);

        let seen: usize = loaders.train.loader.iter().map(|b| b.len()).sum();
        assert_eq!(seen, 6);
        assert_eq!(loaders.train.num_batches(), 2);
    }
}
