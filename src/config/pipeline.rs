// ============================================================
// Config — Pipeline File
// ============================================================
// The pipeline YAML declares every component of a run:
//
//   device:    {name: get_device}
//   data:      {...}                      see data::loader
//   model:     {name: UNet, args: {...}}
//   criterion: {name: Dicewithstat}
//   metric:    [{name: MeanIoU}, ...]     list or single node, optional
//   optimizer: {name: Adam, args: {...}}
//   scheduler: {name: StepLR, args: {...}} optional
//   learner:   {name: SemanticLearner, args: {...}}
//
// The whole tree is validated into a `PipelineSpec` before any
// dataset, model or file is created.

use serde_yaml::Value;
use std::{fs, path::Path};

use crate::config::{
    device::DeviceSpec,
    error::ConfigError,
    getter::{get_instance, Args},
    registries::Registries,
};
use crate::data::loader::DataSpec;
use crate::domain::traits::Objective;
use crate::ml::{
    learner::LearnerSpec,
    loss::Criterion,
    metrics::MetricSpec,
    model::ModelSpec,
    optim::OptimizerSpec,
    scheduler::SchedulerSpec,
};

#[derive(Debug, Clone)]
pub struct PipelineSpec {
    pub device:    DeviceSpec,
    pub data:      DataSpec,
    pub model:     ModelSpec,
    pub criterion: Criterion,
    pub metrics:   Vec<MetricSpec>,
    pub optimizer: OptimizerSpec,
    pub scheduler: SchedulerSpec,
    pub learner:   LearnerSpec,
    pub objective: Objective,
    /// The YAML text as read, copied into the experiment directory
    pub source:    String,
}

fn section<'a>(root: &'a Value, key: &str) -> Result<&'a Value, ConfigError> {
    root.get(key).ok_or_else(|| ConfigError::invalid(key, "section is missing from the pipeline file"))
}

impl PipelineSpec {
    pub fn load(path: &Path, regs: &Registries) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let root: Value =
            serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml { path: path.to_path_buf(), source })?;
        let mut spec = Self::resolve(&root, regs)?;
        spec.source = text;
        tracing::info!("Loaded pipeline '{}'", path.display());
        Ok(spec)
    }

    pub fn resolve(root: &Value, regs: &Registries) -> Result<Self, ConfigError> {
        if !root.is_mapping() {
            return Err(ConfigError::NotAMapping { section: "pipeline".into() });
        }

        let device = get_instance(section(root, "device")?, "device", &regs.devices, Args::new())?;
        let data = DataSpec::resolve(section(root, "data")?, regs)?;
        let model: ModelSpec = get_instance(section(root, "model")?, "model", &regs.models, Args::new())?;

        let criterion: Criterion = get_instance(section(root, "criterion")?, "criterion", &regs.criteria, Args::new())?;
        criterion
            .check_classes(model.num_classes())
            .map_err(|e| ConfigError::invalid("criterion", e.to_string()))?;

        let metrics = match root.get("metric") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Sequence(nodes)) => nodes
                .iter()
                .enumerate()
                .map(|(i, node)| get_instance(node, &format!("metric[{i}]"), &regs.metrics, Args::new()))
                .collect::<Result<Vec<_>, _>>()?,
            Some(node) => vec![get_instance(node, "metric", &regs.metrics, Args::new())?],
        };

        let optimizer = get_instance(section(root, "optimizer")?, "optimizer", &regs.optimizers, Args::new())?;
        let scheduler = match root.get("scheduler") {
            None | Some(Value::Null) => SchedulerSpec::default(),
            Some(node) => get_instance(node, "scheduler", &regs.schedulers, Args::new())?,
        };

        let learner: LearnerSpec = get_instance(section(root, "learner")?, "learner", &regs.learners, Args::new())?;
        let objective = learner.objective(&names_of(&metrics))?;

        Ok(Self { device, data, model, criterion, metrics, optimizer, scheduler, learner, objective, source: String::new() })
    }

    pub fn metric_names(&self) -> Vec<String> {
        names_of(&self.metrics)
    }
}

fn names_of(metrics: &[MetricSpec]) -> Vec<String> {
    metrics.iter().map(|m| m.kind.name().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::scheduler::StepArgs;

    const PIPELINE: &str = "
device: {name: cpu}
data:
  trainval:
    test_ratio: 0.2
    dataset:
      name: SyntheticShapes
      args: {len: 10, image_size: [8, 8], num_classes: 3}
    loader:
      train: {name: DataLoader, args: {shuffle: true}}
      val: {name: DataLoader}
model: {name: UNet, args: {num_classes: 3, base_channels: 4, depth: 2}}
criterion: {name: DiceLoss, args: {weight: [1.0, 2.0, 1.0]}}
metric:
  - {name: PixelAccuracy}
  - {name: MeanIoU}
optimizer: {name: SGD, args: {lr: 0.01, momentum: 0.9}}
scheduler: {name: StepLR, args: {step_size: 5, gamma: 0.5}}
learner: {name: SemanticLearner, args: {primary_metric: MeanIoU}}
";

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn test_full_pipeline_resolves() {
        let spec = PipelineSpec::resolve(&yaml(PIPELINE), &Registries::builtin().unwrap()).unwrap();
        assert_eq!(spec.device, DeviceSpec::Cpu);
        assert_eq!(spec.model.num_classes(), 3);
        assert_eq!(spec.metric_names(), vec!["PixelAccuracy", "MeanIoU"]);
        assert_eq!(spec.scheduler, SchedulerSpec::Step(StepArgs { step_size: 5, gamma: 0.5 }));
        assert_eq!(spec.objective, Objective::new("MeanIoU", true));
    }

    #[test]
    fn test_weight_length_checked_against_model() {
        let text = PIPELINE.replace("[1.0, 2.0, 1.0]", "[1.0, 2.0]");
        let err = PipelineSpec::resolve(&yaml(&text), &Registries::builtin().unwrap()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "criterion"));
    }

    #[test]
    fn test_optional_sections() {
        let text = PIPELINE.replace("scheduler: {name: StepLR, args: {step_size: 5, gamma: 0.5}}\n", "");
        let text = text.replace("  - {name: PixelAccuracy}\n  - {name: MeanIoU}\n", "  {name: MeanIoU}\n");
        let spec = PipelineSpec::resolve(&yaml(&text), &Registries::builtin().unwrap()).unwrap();
        assert_eq!(spec.scheduler, SchedulerSpec::Constant);
        assert_eq!(spec.metrics.len(), 1);
    }

    #[test]
    fn test_unknown_model_name_rejected() {
        let text = PIPELINE.replace("name: UNet", "name: SegFormer");
        let err = PipelineSpec::resolve(&yaml(&text), &Registries::builtin().unwrap()).unwrap_err();
        assert!(err.to_string().contains("SegFormer"));
    }

    #[test]
    fn test_shipped_pipelines_resolve() {
        let regs = Registries::builtin().unwrap();
        let lyft = PipelineSpec::resolve(&yaml(include_str!("../../configs/pipeline.yaml")), &regs).unwrap();
        assert_eq!(lyft.model.num_classes(), 13);
        assert_eq!(lyft.objective, Objective::new("MeanIoU", true));
        let synthetic = PipelineSpec::resolve(&yaml(include_str!("../../configs/pipeline_synthetic.yaml")), &regs).unwrap();
        assert_eq!(synthetic.device, DeviceSpec::Cpu);
    }

    #[test]
    fn test_load_keeps_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.yaml");
        fs::write(&path, PIPELINE).unwrap();
        let spec = PipelineSpec::load(&path, &Registries::builtin().unwrap()).unwrap();
        assert_eq!(spec.source, PIPELINE);
        assert!(PipelineSpec::load(&dir.path().join("missing.yaml"), &Registries::builtin().unwrap()).is_err());
    }
}
