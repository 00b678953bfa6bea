// ============================================================
// Layer 5 — MobileUnet
// ============================================================
// A light UNet whose blocks are depthwise-separable convolutions
// (MobileNet style): a 3x3 depthwise conv (groups = channels)
// followed by a 1x1 pointwise conv, each with BatchNorm + ReLU.
//
//   stem      : 3x3 conv, in → c
//   encoder   : 4 separable blocks with stride 2 (c, 2c, 4c, 8c, 16c)
//   decoder   : ConvTranspose 2x2 → concat(skip) → separable block
//   head      : 1x1 conv → num_classes

use burn::{
    nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
    prelude::*,
};

use crate::ml::model::{resize_to, ConvBnRelu, ConvBnReluConfig, SegmentationModel};

const LEVELS: usize = 4;

#[derive(Config, Debug)]
pub struct MobileUNetConfig {
    pub num_classes:   usize,
    #[config(default = 3)]
    pub in_channels:   usize,
    #[config(default = 16)]
    pub base_channels: usize,
}

#[derive(Module, Debug)]
pub struct SeparableBlock<B: Backend> {
    depthwise: ConvBnRelu<B>,
    pointwise: ConvBnRelu<B>,
}

impl<B: Backend> SeparableBlock<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        Self {
            depthwise: ConvBnReluConfig::new(in_channels, in_channels)
                .with_stride(stride)
                .with_groups(in_channels)
                .init(device),
            pointwise: ConvBnReluConfig::new(in_channels, out_channels).with_kernel(1).init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.pointwise.forward(self.depthwise.forward(x))
    }
}

#[derive(Module, Debug)]
pub struct MobileUNet<B: Backend> {
    stem:       ConvBnRelu<B>,
    encoders:   Vec<SeparableBlock<B>>,
    upsamplers: Vec<ConvTranspose2d<B>>,
    decoders:   Vec<SeparableBlock<B>>,
    head:       Conv2d<B>,
}

impl MobileUNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> MobileUNet<B> {
        let c = self.base_channels;
        let channels: Vec<usize> = (0..=LEVELS).map(|i| c << i).collect();

        let encoders = channels
            .windows(2)
            .map(|w| SeparableBlock::new(w[0], w[1], 2, device))
            .collect();

        let mut upsamplers = Vec::with_capacity(LEVELS);
        let mut decoders = Vec::with_capacity(LEVELS);
        for w in channels.windows(2).rev() {
            let (low, high) = (w[0], w[1]);
            upsamplers.push(ConvTranspose2dConfig::new([high, low], [2, 2]).with_stride([2, 2]).init(device));
            decoders.push(SeparableBlock::new(low * 2, low, 1, device));
        }

        MobileUNet {
            stem: ConvBnReluConfig::new(self.in_channels, c).init(device),
            encoders,
            upsamplers,
            decoders,
            head: Conv2dConfig::new([c, self.num_classes], [1, 1]).init(device),
        }
    }
}

impl<B: Backend> MobileUNet<B> {
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = self.stem.forward(images);
        let mut skips = Vec::with_capacity(self.encoders.len());
        for enc in &self.encoders {
            skips.push(x.clone());
            x = enc.forward(x);
        }

        for ((up, dec), skip) in self.upsamplers.iter().zip(&self.decoders).zip(skips.into_iter().rev()) {
            let [_, _, h, w] = skip.dims();
            let up = resize_to(up.forward(x), [h, w]);
            x = dec.forward(Tensor::cat(vec![up, skip], 1));
        }

        self.head.forward(x)
    }
}

impl<B: Backend> SegmentationModel<B> for MobileUNet<B> {
    fn logits(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        self.forward(images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn test_output_matches_input_size() {
        let device = Default::default();
        let model = MobileUNetConfig::new(3).with_base_channels(4).init::<NdArray>(&device);
        let out = model.forward(Tensor::zeros([1, 3, 32, 24], &device));
        assert_eq!(out.dims(), [1, 3, 32, 24]);
    }

    #[test]
    fn test_non_power_of_two_input() {
        let device = Default::default();
        let model = MobileUNetConfig::new(2).with_base_channels(2).init::<NdArray>(&device);
        let out = model.logits(Tensor::zeros([2, 3, 20, 18], &device));
        assert_eq!(out.dims(), [2, 2, 20, 18]);
    }
}
