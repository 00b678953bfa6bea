// ============================================================
// Layer 5 — DeepLabV3 (ResNet-50 backbone)
// ============================================================
// Backbone: bottleneck ResNet, default layers [3, 4, 6, 3] with
// width 64 (= ResNet-50). Output stride 8: layer2 downsamples,
// layer3 and layer4 use dilation 2 and 4 instead of striding.
//
//   stem    : 7x7/2 conv → BN → ReLU → 3x3/2 max pool
//   layer1  : width      stride 1
//   layer2  : width * 2  stride 2
//   layer3  : width * 4  dilation 2
//   layer4  : width * 8  dilation 4      → 32 * width channels out
//
// Head: ASPP (1x1 branch, three 3x3 atrous branches, image
// pooling branch) → 1x1 projection → 3x3 conv → 1x1 classifier,
// then upsampling back to the input resolution.
//
// Reference: Chen et al. (2017) "Rethinking Atrous Convolution"

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, PaddingConfig2d, Relu,
    },
    prelude::*,
};

use crate::ml::model::{resize_to, ConvBnRelu, ConvBnReluConfig, SegmentationModel};

const EXPANSION: usize = 4;

#[derive(Config, Debug)]
pub struct DeepLabV3Config {
    pub num_classes:   usize,
    #[config(default = 3)]
    pub in_channels:   usize,
    #[config(default = "[3, 4, 6, 3]")]
    pub layers:        [usize; 4],
    #[config(default = 64)]
    pub width:         usize,
    #[config(default = 256)]
    pub aspp_channels: usize,
    #[config(default = "[12, 24, 36]")]
    pub atrous_rates:  [usize; 3],
    #[config(default = 0.5)]
    pub dropout:       f64,
}

// ─── Bottleneck ───────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    conv: Conv2d<B>,
    bn:   BatchNorm<B, 2>,
}

#[derive(Module, Debug)]
pub struct Bottleneck<B: Backend> {
    reduce:     ConvBnRelu<B>,
    spatial:    ConvBnRelu<B>,
    expand:     Conv2d<B>,
    expand_bn:  BatchNorm<B, 2>,
    downsample: Option<Downsample<B>>,
    relu:       Relu,
}

impl<B: Backend> Bottleneck<B> {
    fn new(in_ch: usize, width: usize, stride: usize, dilation: usize, device: &B::Device) -> Self {
        let out_ch = width * EXPANSION;
        let downsample = (stride != 1 || in_ch != out_ch).then(|| Downsample {
            conv: Conv2dConfig::new([in_ch, out_ch], [1, 1])
                .with_stride([stride, stride])
                .with_bias(false)
                .init(device),
            bn: BatchNormConfig::new(out_ch).init(device),
        });
        Self {
            reduce:    ConvBnReluConfig::new(in_ch, width).with_kernel(1).init(device),
            spatial:   ConvBnReluConfig::new(width, width).with_stride(stride).with_dilation(dilation).init(device),
            expand:    Conv2dConfig::new([width, out_ch], [1, 1]).with_bias(false).init(device),
            expand_bn: BatchNormConfig::new(out_ch).init(device),
            downsample,
            relu: Relu::new(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(ds) => ds.bn.forward(ds.conv.forward(x.clone())),
            None => x.clone(),
        };
        let out = self.spatial.forward(self.reduce.forward(x));
        let out = self.expand_bn.forward(self.expand.forward(out));
        self.relu.forward(out + identity)
    }
}

// ─── ASPP ─────────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct Aspp<B: Backend> {
    branches: Vec<ConvBnRelu<B>>,
    pool:     AdaptiveAvgPool2d,
    pooled:   ConvBnRelu<B>,
    project:  ConvBnRelu<B>,
    dropout:  Dropout,
}

impl<B: Backend> Aspp<B> {
    fn new(in_ch: usize, out_ch: usize, rates: [usize; 3], dropout: f64, device: &B::Device) -> Self {
        let mut branches = vec![ConvBnReluConfig::new(in_ch, out_ch).with_kernel(1).init(device)];
        branches.extend(rates.iter().map(|&r| ConvBnReluConfig::new(in_ch, out_ch).with_dilation(r).init(device)));
        Self {
            branches,
            pool:    AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            pooled:  ConvBnReluConfig::new(in_ch, out_ch).with_kernel(1).init(device),
            project: ConvBnReluConfig::new(out_ch * 5, out_ch).with_kernel(1).init(device),
            dropout: DropoutConfig::new(dropout).init(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, _, h, w] = x.dims();
        let mut outs: Vec<Tensor<B, 4>> = self.branches.iter().map(|b| b.forward(x.clone())).collect();
        let pooled = self.pooled.forward(self.pool.forward(x));
        outs.push(resize_to(pooled, [h, w]));
        self.dropout.forward(self.project.forward(Tensor::cat(outs, 1)))
    }
}

// ─── DeepLabV3 ────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct DeepLabV3<B: Backend> {
    stem:       ConvBnRelu<B>,
    stem_pool:  MaxPool2d,
    stages:     Vec<Vec<Bottleneck<B>>>,
    aspp:       Aspp<B>,
    head:       ConvBnRelu<B>,
    classifier: Conv2d<B>,
}

impl DeepLabV3Config {
    pub fn init<B: Backend>(&self, device: &B::Device) -> DeepLabV3<B> {
        // (stride, dilation) per stage for output stride 8
        let plan = [(1, 1), (2, 1), (1, 2), (1, 4)];

        let mut in_ch = self.width;
        let mut stages = Vec::with_capacity(4);
        for (stage, (&blocks, &(stride, dilation))) in self.layers.iter().zip(plan.iter()).enumerate() {
            let width = self.width << stage;
            let mut stage_blocks = Vec::with_capacity(blocks);
            for b in 0..blocks {
                let s = if b == 0 { stride } else { 1 };
                stage_blocks.push(Bottleneck::new(in_ch, width, s, dilation, device));
                in_ch = width * EXPANSION;
            }
            stages.push(stage_blocks);
        }

        let stem = ConvBnReluConfig::new(self.in_channels, self.width)
            .with_kernel(7)
            .with_stride(2)
            .init(device);
        let stem_pool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        DeepLabV3 {
            stem,
            stem_pool,
            stages,
            aspp: Aspp::new(in_ch, self.aspp_channels, self.atrous_rates, self.dropout, device),
            head: ConvBnReluConfig::new(self.aspp_channels, self.aspp_channels).init(device),
            classifier: Conv2dConfig::new([self.aspp_channels, self.num_classes], [1, 1]).init(device),
        }
    }
}

impl<B: Backend> DeepLabV3<B> {
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, _, h, w] = images.dims();
        let mut x = self.stem_pool.forward(self.stem.forward(images));
        for stage in &self.stages {
            for block in stage {
                x = block.forward(x);
            }
        }
        let x = self.head.forward(self.aspp.forward(x));
        resize_to(self.classifier.forward(x), [h, w])
    }
}

impl<B: Backend> SegmentationModel<B> for DeepLabV3<B> {
    fn logits(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        self.forward(images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn test_small_deeplab_output_shape() {
        let device = Default::default();
        let model = DeepLabV3Config::new(4)
            .with_layers([1, 1, 1, 1])
            .with_width(2)
            .with_aspp_channels(4)
            .with_atrous_rates([1, 2, 3])
            .init::<NdArray>(&device);
        let out = model.forward(Tensor::zeros([2, 3, 32, 32], &device));
        assert_eq!(out.dims(), [2, 4, 32, 32]);
    }

    #[test]
    fn test_default_backbone_is_resnet50_layout() {
        let cfg = DeepLabV3Config::new(21);
        assert_eq!(cfg.layers, [3, 4, 6, 3]);
        assert_eq!(cfg.width << 3, 512);
    }
}
