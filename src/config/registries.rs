// ============================================================
// Config — Built-in Registries
// ============================================================
// One registry per component kind, filled once at startup and
// passed by reference to everything that resolves config nodes.
// Names only need to be unique within their own kind.

use crate::config::{device::DeviceSpec, error::ConfigError, getter::Factory};
use crate::data::{
    batcher::{self, CollateFn},
    dataset::{self, DatasetSpec},
    loader::{self, LoaderArgs},
};
use crate::domain::registry::Registry;
use crate::ml::{
    learner::{self, LearnerSpec},
    loss::{self, Criterion},
    metrics::{self, MetricSpec},
    model::{self, ModelSpec},
    optim::{self, OptimizerSpec},
    scheduler::{self, SchedulerSpec},
};

#[derive(Debug, Clone)]
pub struct Registries {
    pub devices:     Registry<Factory<DeviceSpec>>,
    pub datasets:    Registry<Factory<DatasetSpec>>,
    pub loaders:     Registry<Factory<LoaderArgs>>,
    pub collate_fns: Registry<CollateFn>,
    pub models:      Registry<Factory<ModelSpec>>,
    pub criteria:    Registry<Factory<Criterion>>,
    pub metrics:     Registry<Factory<MetricSpec>>,
    pub optimizers:  Registry<Factory<OptimizerSpec>>,
    pub schedulers:  Registry<Factory<SchedulerSpec>>,
    pub learners:    Registry<Factory<LearnerSpec>>,
}

impl Registries {
    pub fn empty() -> Self {
        Self {
            devices:     Registry::new("device"),
            datasets:    Registry::new("dataset"),
            loaders:     Registry::new("loader"),
            collate_fns: Registry::new("collate_fn"),
            models:      Registry::new("model"),
            criteria:    Registry::new("criterion"),
            metrics:     Registry::new("metric"),
            optimizers:  Registry::new("optimizer"),
            schedulers:  Registry::new("scheduler"),
            learners:    Registry::new("learner"),
        }
    }

    /// Every component shipped with the crate.
    pub fn builtin() -> Result<Self, ConfigError> {
        let mut regs = Self::empty();
        crate::config::device::register(&mut regs.devices)?;
        dataset::register(&mut regs.datasets)?;
        loader::register(&mut regs.loaders)?;
        batcher::register(&mut regs.collate_fns)?;
        model::register(&mut regs.models)?;
        loss::register(&mut regs.criteria)?;
        metrics::register(&mut regs.metrics)?;
        optim::register(&mut regs.optimizers)?;
        scheduler::register(&mut regs.schedulers)?;
        learner::register(&mut regs.learners)?;
        Ok(regs)
    }

    /// `(kind, names)` for every registry, for listing at startup.
    pub fn summary(&self) -> Vec<(&str, Vec<String>)> {
        vec![
            (self.devices.kind(), self.devices.names()),
            (self.datasets.kind(), self.datasets.names()),
            (self.loaders.kind(), self.loaders.names()),
            (self.collate_fns.kind(), self.collate_fns.names()),
            (self.models.kind(), self.models.names()),
            (self.criteria.kind(), self.criteria.names()),
            (self.metrics.kind(), self.metrics.names()),
            (self.optimizers.kind(), self.optimizers.names()),
            (self.schedulers.kind(), self.schedulers.names()),
            (self.learners.kind(), self.learners.names()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::getter::{get_instance, Args};
    use serde_yaml::Value;

    #[test]
    fn test_builtin_names() {
        let regs = Registries::builtin().unwrap();
        assert!(regs.models.contains("deeplabv3_resnet50"));
        assert!(regs.datasets.contains("LyftDataset.from_folder"));
        assert!(regs.criteria.contains("Dicewithstat"));
        assert!(regs.collate_fns.contains("default_collate"));
        assert_eq!(regs.learners.names(), vec!["SemanticLearner", "SupervisedLearner"]);
        assert_eq!(regs.summary().len(), 10);
    }

    #[test]
    fn test_nameless_node_fails_for_every_kind() {
        let regs = Registries::builtin().unwrap();
        let node: Value = serde_yaml::from_str("{args: {}}").unwrap();
        let missing = |r: Result<(), ConfigError>| matches!(r, Err(ConfigError::MissingName { .. }));
        assert!(missing(get_instance(&node, "device", &regs.devices, Args::new()).map(|_| ())));
        assert!(missing(get_instance(&node, "dataset", &regs.datasets, Args::new()).map(|_| ())));
        assert!(missing(get_instance(&node, "loader", &regs.loaders, Args::new()).map(|_| ())));
        assert!(missing(get_instance(&node, "model", &regs.models, Args::new()).map(|_| ())));
        assert!(missing(get_instance(&node, "criterion", &regs.criteria, Args::new()).map(|_| ())));
        assert!(missing(get_instance(&node, "metric", &regs.metrics, Args::new()).map(|_| ())));
        assert!(missing(get_instance(&node, "optimizer", &regs.optimizers, Args::new()).map(|_| ())));
        assert!(missing(get_instance(&node, "scheduler", &regs.schedulers, Args::new()).map(|_| ())));
        assert!(missing(get_instance(&node, "learner", &regs.learners, Args::new()).map(|_| ())));
    }

    #[test]
    fn test_same_name_in_different_kinds() {
        let mut regs = Registries::builtin().unwrap();
        let factory = regs.metrics.get("MeanIoU").unwrap().clone();
        regs.metrics.register_as("UNet", factory).unwrap();
        assert!(regs.models.contains("UNet"));
        assert!(regs.metrics.contains("UNet"));
    }
}
