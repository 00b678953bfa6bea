// ============================================================
// Config — Device Selection
// ============================================================
// `device:` picks the compute backend:
//
//   cpu         → Autodiff<NdArray>
//   wgpu        → Autodiff<Wgpu>, adapter index from --gpus
//   get_device  → wgpu unless --gpus is -1
//
// Reference: Burn Book §2 (Backends)

use serde::Deserialize;

use crate::config::{
    error::ConfigError,
    getter::{parse_args, Args, Factory},
};
use crate::domain::registry::Registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSpec {
    Cpu,
    Wgpu,
    Auto,
}

/// Concrete backend for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendChoice {
    Cpu,
    /// Adapter index
    Gpu(usize),
}

impl DeviceSpec {
    pub fn choose(&self, gpus: &[i32]) -> BackendChoice {
        let first_gpu = gpus.iter().find(|&&g| g >= 0).map(|&g| g as usize);
        match self {
            Self::Cpu => BackendChoice::Cpu,
            Self::Wgpu => BackendChoice::Gpu(first_gpu.unwrap_or(0)),
            Self::Auto => first_gpu.map_or(BackendChoice::Cpu, BackendChoice::Gpu),
        }
    }
}

fn no_args(component: &str, args: Args) -> Result<(), ConfigError> {
    #[derive(Deserialize)]
    #[serde(deny_unknown_fields)]
    struct NoArgs {}
    let _: NoArgs = parse_args(component, args)?;
    Ok(())
}

fn cpu(args: Args) -> Result<DeviceSpec, ConfigError> {
    no_args("cpu", args)?;
    Ok(DeviceSpec::Cpu)
}

fn wgpu(args: Args) -> Result<DeviceSpec, ConfigError> {
    no_args("wgpu", args)?;
    Ok(DeviceSpec::Wgpu)
}

fn get_device(args: Args) -> Result<DeviceSpec, ConfigError> {
    no_args("get_device", args)?;
    Ok(DeviceSpec::Auto)
}

pub fn register(registry: &mut Registry<Factory<DeviceSpec>>) -> Result<(), ConfigError> {
    registry.register(Factory::new("cpu", cpu))?;
    registry.register(Factory::new("wgpu", wgpu))?;
    registry.register(Factory::new("get_device", get_device))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_choose() {
        assert_eq!(DeviceSpec::Auto.choose(&[-1]), BackendChoice::Cpu);
        assert_eq!(DeviceSpec::Auto.choose(&[1, 2]), BackendChoice::Gpu(1));
        assert_eq!(DeviceSpec::Cpu.choose(&[0]), BackendChoice::Cpu);
        assert_eq!(DeviceSpec::Wgpu.choose(&[-1]), BackendChoice::Gpu(0));
    }
}
