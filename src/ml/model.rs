// ============================================================
// Layer 5 — Segmentation Models
// ============================================================
// Every model maps images [B, 3, H, W] to per-pixel class logits
// [B, num_classes, H, W] through the `SegmentationModel` trait.
//
// Available architectures (registry `model`):
//   UNet                → encoder/decoder with skip connections
//   MobileUnet          → UNet built from depthwise-separable convs
//   deeplabv3_resnet50  → bottleneck ResNet (output stride 8) + ASPP
//
// The YAML args are validated into Burn `Config` structs; the
// learner then calls `ModelSpec::init` with the concrete backend.
//
// Reference: Burn Book §3 (Building Blocks), Ronneberger et al. (2015)

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    prelude::*,
    tensor::{
        module::interpolate,
        ops::{InterpolateMode, InterpolateOptions},
    },
};
use serde::Deserialize;

use crate::config::{
    error::ConfigError,
    getter::{parse_args, Args, Factory},
};
use crate::domain::registry::Registry;
use crate::ml::{
    deeplab::DeepLabV3Config,
    mobile_unet::MobileUNetConfig,
    unet::UNetConfig,
};

// ─── Trait ────────────────────────────────────────────────────────────────────
pub trait SegmentationModel<B: Backend> {
    /// images: [B, C_in, H, W] → logits: [B, num_classes, H, W]
    fn logits(&self, images: Tensor<B, 4>) -> Tensor<B, 4>;
}

// ─── Shared building blocks ───────────────────────────────────────────────────
/// Conv2d → BatchNorm → ReLU
#[derive(Module, Debug)]
pub struct ConvBnRelu<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn:   BatchNorm<B, 2>,
    pub relu: Relu,
}

#[derive(Config, Debug)]
pub struct ConvBnReluConfig {
    pub in_channels:  usize,
    pub out_channels: usize,
    #[config(default = 3)]
    pub kernel:       usize,
    #[config(default = 1)]
    pub stride:       usize,
    #[config(default = 1)]
    pub dilation:     usize,
    #[config(default = 1)]
    pub groups:       usize,
}

impl ConvBnReluConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvBnRelu<B> {
        // "same" padding for odd kernels
        let pad = self.dilation * (self.kernel - 1) / 2;
        let conv = Conv2dConfig::new([self.in_channels, self.out_channels], [self.kernel, self.kernel])
            .with_stride([self.stride, self.stride])
            .with_dilation([self.dilation, self.dilation])
            .with_groups(self.groups)
            .with_padding(PaddingConfig2d::Explicit(pad, pad))
            .with_bias(false)
            .init(device);
        ConvBnRelu { conv, bn: BatchNormConfig::new(self.out_channels).init(device), relu: Relu::new() }
    }
}

impl<B: Backend> ConvBnRelu<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.relu.forward(self.bn.forward(self.conv.forward(x)))
    }
}

/// Resize `x` spatially to `[h, w]` if it is not already that size.
/// Nearest mode: the ndarray backend has no bilinear backward pass.
pub fn resize_to<B: Backend>(x: Tensor<B, 4>, size: [usize; 2]) -> Tensor<B, 4> {
    let [_, _, h, w] = x.dims();
    if [h, w] == size {
        return x;
    }
    interpolate(x, size, InterpolateOptions::new(InterpolateMode::Nearest))
}

// ─── Specs ────────────────────────────────────────────────────────────────────
fn default_in_channels() -> usize {
    3
}

fn default_base_channels() -> usize {
    16
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UNetArgs {
    num_classes:   usize,
    #[serde(default = "default_in_channels")]
    in_channels:   usize,
    #[serde(default = "default_base_channels")]
    base_channels: usize,
    #[serde(default = "default_depth")]
    depth:         usize,
}

fn default_depth() -> usize {
    4
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MobileUNetArgs {
    num_classes:   usize,
    #[serde(default = "default_in_channels")]
    in_channels:   usize,
    #[serde(default = "default_base_channels")]
    base_channels: usize,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeepLabArgs {
    num_classes:   usize,
    #[serde(default = "default_in_channels")]
    in_channels:   usize,
    #[serde(default = "default_layers")]
    layers:        [usize; 4],
    #[serde(default = "default_width")]
    width:         usize,
    #[serde(default = "default_aspp_channels")]
    aspp_channels: usize,
    #[serde(default = "default_atrous_rates")]
    atrous_rates:  [usize; 3],
}

fn default_layers() -> [usize; 4] {
    [3, 4, 6, 3]
}

fn default_width() -> usize {
    64
}

fn default_aspp_channels() -> usize {
    256
}

fn default_atrous_rates() -> [usize; 3] {
    [12, 24, 36]
}

/// A validated model declaration.
#[derive(Debug, Clone)]
pub enum ModelSpec {
    UNet(UNetConfig),
    MobileUnet(MobileUNetConfig),
    DeepLabV3(DeepLabV3Config),
}

impl ModelSpec {
    pub fn num_classes(&self) -> usize {
        match self {
            Self::UNet(c) => c.num_classes,
            Self::MobileUnet(c) => c.num_classes,
            Self::DeepLabV3(c) => c.num_classes,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::UNet(_) => "UNet",
            Self::MobileUnet(_) => "MobileUnet",
            Self::DeepLabV3(_) => "deeplabv3_resnet50",
        }
    }
}

fn check_common(num_classes: usize, in_channels: usize) -> Result<(), ConfigError> {
    if num_classes == 0 {
        return Err(ConfigError::invalid("num_classes", "must be at least 1"));
    }
    // datasets always yield RGB batches
    if in_channels != 3 {
        return Err(ConfigError::invalid("in_channels", format!("must be 3 (RGB), got {in_channels}")));
    }
    Ok(())
}

fn unet(args: Args) -> Result<ModelSpec, ConfigError> {
    let a: UNetArgs = parse_args("UNet", args)?;
    check_common(a.num_classes, a.in_channels)?;
    if a.depth == 0 || a.base_channels == 0 {
        return Err(ConfigError::invalid("UNet", "depth and base_channels must be positive"));
    }
    Ok(ModelSpec::UNet(
        UNetConfig::new(a.num_classes)
            .with_in_channels(a.in_channels)
            .with_base_channels(a.base_channels)
            .with_depth(a.depth),
    ))
}

fn mobile_unet(args: Args) -> Result<ModelSpec, ConfigError> {
    let a: MobileUNetArgs = parse_args("MobileUnet", args)?;
    check_common(a.num_classes, a.in_channels)?;
    if a.base_channels == 0 {
        return Err(ConfigError::invalid("base_channels", "must be positive"));
    }
    Ok(ModelSpec::MobileUnet(
        MobileUNetConfig::new(a.num_classes)
            .with_in_channels(a.in_channels)
            .with_base_channels(a.base_channels),
    ))
}

fn deeplabv3(args: Args) -> Result<ModelSpec, ConfigError> {
    let a: DeepLabArgs = parse_args("deeplabv3_resnet50", args)?;
    check_common(a.num_classes, a.in_channels)?;
    if a.layers.iter().any(|&n| n == 0) || a.width == 0 || a.aspp_channels == 0 {
        return Err(ConfigError::invalid("deeplabv3_resnet50", "layers, width and aspp_channels must be positive"));
    }
    Ok(ModelSpec::DeepLabV3(
        DeepLabV3Config::new(a.num_classes)
            .with_in_channels(a.in_channels)
            .with_layers(a.layers)
            .with_width(a.width)
            .with_aspp_channels(a.aspp_channels)
            .with_atrous_rates(a.atrous_rates),
    ))
}

pub fn register(registry: &mut Registry<Factory<ModelSpec>>) -> Result<(), ConfigError> {
    registry.register(Factory::new("UNet", unet))?;
    registry.register(Factory::new("MobileUnet", mobile_unet))?;
    registry.register(Factory::new("deeplabv3_resnet50", deeplabv3))?;
    Ok(())
}

// ─── Tests ────────────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TB = NdArray;

    #[test]
    fn test_conv_bn_relu_keeps_size_with_same_padding() {
        let device = Default::default();
        let block = ConvBnReluConfig::new(3, 5).with_dilation(2).init::<TB>(&device);
        let out = block.forward(Tensor::zeros([1, 3, 9, 7], &device));
        assert_eq!(out.dims(), [1, 5, 9, 7]);
    }

    #[test]
    fn test_resize_to_is_noop_on_same_size() {
        let device = Default::default();
        let x = Tensor::<TB, 4>::ones([1, 2, 4, 4], &device);
        assert_eq!(resize_to(x.clone(), [4, 4]).dims(), [1, 2, 4, 4]);
        assert_eq!(resize_to(x, [8, 6]).dims(), [1, 2, 8, 6]);
    }

    #[test]
    fn test_factories_validate_args() {
        let ok: Args = serde_yaml::from_str("{num_classes: 4, base_channels: 8}").unwrap();
        assert_eq!(unet(ok).unwrap().num_classes(), 4);

        let zero: Args = serde_yaml::from_str("{num_classes: 0}").unwrap();
        assert!(mobile_unet(zero).is_err());

        let missing: Args = serde_yaml::from_str("{layers: [1, 1, 1, 1]}").unwrap();
        assert!(deeplabv3(missing).is_err());
    }

    #[test]
    fn test_non_rgb_input_rejected() {
        let gray: Args = serde_yaml::from_str("{num_classes: 2, in_channels: 1}").unwrap();
        let err = unet(gray.clone()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "in_channels"));
        assert!(mobile_unet(gray).is_err());
        let rgb: Args = serde_yaml::from_str("{num_classes: 2, in_channels: 3}").unwrap();
        assert!(mobile_unet(rgb).is_ok());
    }
}
