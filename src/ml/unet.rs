// ============================================================
// Layer 5 — UNet
// ============================================================
// Encoder/decoder with skip connections.
//
//   encoder level i : DoubleConv → (skip_i) → MaxPool 2x2
//   bottleneck      : DoubleConv (channels doubled)
//   decoder level i : ConvTranspose 2x2 → concat(skip_i) → DoubleConv
//   head            : 1x1 conv → num_classes
//
// Channels at level i are base_channels * 2^i. Inputs whose side
// is not a multiple of 2^depth still work: upsampled maps are
// resized to their skip connection before concatenation.

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
    },
    prelude::*,
};

use crate::ml::model::{resize_to, ConvBnRelu, ConvBnReluConfig, SegmentationModel};

#[derive(Config, Debug)]
pub struct UNetConfig {
    pub num_classes:   usize,
    #[config(default = 3)]
    pub in_channels:   usize,
    #[config(default = 16)]
    pub base_channels: usize,
    #[config(default = 4)]
    pub depth:         usize,
}

#[derive(Module, Debug)]
pub struct DoubleConv<B: Backend> {
    first:  ConvBnRelu<B>,
    second: ConvBnRelu<B>,
}

impl<B: Backend> DoubleConv<B> {
    fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            first:  ConvBnReluConfig::new(in_channels, out_channels).init(device),
            second: ConvBnReluConfig::new(out_channels, out_channels).init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.second.forward(self.first.forward(x))
    }
}

#[derive(Module, Debug)]
pub struct UNet<B: Backend> {
    encoders:   Vec<DoubleConv<B>>,
    pool:       MaxPool2d,
    bottleneck: DoubleConv<B>,
    upsamplers: Vec<ConvTranspose2d<B>>,
    decoders:   Vec<DoubleConv<B>>,
    head:       Conv2d<B>,
}

impl UNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> UNet<B> {
        let channels: Vec<usize> = (0..self.depth).map(|i| self.base_channels << i).collect();

        let mut encoders = Vec::with_capacity(self.depth);
        let mut prev = self.in_channels;
        for &c in &channels {
            encoders.push(DoubleConv::new(prev, c, device));
            prev = c;
        }

        let bottleneck = DoubleConv::new(prev, prev * 2, device);

        // decoders run from the deepest level up
        let mut upsamplers = Vec::with_capacity(self.depth);
        let mut decoders = Vec::with_capacity(self.depth);
        for &c in channels.iter().rev() {
            upsamplers.push(
                ConvTranspose2dConfig::new([c * 2, c], [2, 2])
                    .with_stride([2, 2])
                    .init(device),
            );
            decoders.push(DoubleConv::new(c * 2, c, device));
        }

        let head = Conv2dConfig::new([self.base_channels, self.num_classes], [1, 1]).init(device);

        UNet {
            encoders,
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            bottleneck,
            upsamplers,
            decoders,
            head,
        }
    }
}

impl<B: Backend> UNet<B> {
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut skips = Vec::with_capacity(self.encoders.len());
        let mut x = images;
        for enc in &self.encoders {
            let feat = enc.forward(x);
            x = self.pool.forward(feat.clone());
            skips.push(feat);
        }

        x = self.bottleneck.forward(x);

        for ((up, dec), skip) in self.upsamplers.iter().zip(&self.decoders).zip(skips.into_iter().rev()) {
            let [_, _, h, w] = skip.dims();
            let up = resize_to(up.forward(x), [h, w]);
            x = dec.forward(Tensor::cat(vec![up, skip], 1));
        }

        self.head.forward(x)
    }
}

impl<B: Backend> SegmentationModel<B> for UNet<B> {
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
        let model = UNetConfig::new(5).with_base_channels(4).with_depth(2).init::<NdArray>(&device);
        let out = model.forward(Tensor::zeros([2, 3, 16, 16], &device));
        assert_eq!(out.dims(), [2, 5, 16, 16]);
    }

    #[test]
    fn test_odd_input_size_is_handled() {
        let device = Default::default();
        let model = UNetConfig::new(2).with_base_channels(2).with_depth(2).init::<NdArray>(&device);
        let out = model.logits(Tensor::zeros([1, 3, 10, 7], &device));
        assert_eq!(out.dims(), [1, 2, 10, 7]);
    }
}
