// ============================================================
// Layer 5 — Hopenet Model (Burn)
// ============================================================
// A torchvision-style ResNet backbone with three angle-bin
// classification heads and a finetuning regression head:
//
//   images [N, 3, S, S]
//     │  conv1 7×7/2 → bn1 → relu → maxpool 3×3/2
//     │  layer1 .. layer4   (residual stages)
//     │  adaptive avgpool → features [N, F]
//     ├──► fc_yaw   → yaw logits   [N, 66]
//     ├──► fc_pitch → pitch logits [N, 66]
//     ├──► fc_roll  → roll logits  [N, 66]
//     └──► fc_finetune( features ‖ soft-argmax angles in degrees )
//                  → angles [N, 3]
//
// Sub-module names follow torchvision so pretrained ImageNet
// weights map onto the backbone by name (see state_dict.rs).
//
// Reference: He et al. (2016) Deep Residual Learning
//            Ruiz et al. (2018) Fine-Grained Head Pose Estimation
//            Without Keypoints

use anyhow::{bail, Result};
use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig,
        Linear, LinearConfig,
        PaddingConfig2d,
    },
    prelude::*,
    tensor::activation::relu,
};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::domain::pose::{BIN_OFFSET, BIN_WIDTH};
use crate::ml::losses::soft_argmax;

const BN_EPSILON: f64 = 1e-5;

// ─── Architecture presets ─────────────────────────────────────────────────────
/// The torchvision ResNet depths Hopenet can be built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    Resnet18,
    Resnet34,
    Resnet50,
    Resnet101,
    Resnet152,
}

impl Arch {
    pub fn config(&self) -> HopenetConfig {
        let (bottleneck, layers) = match self {
            Arch::Resnet18  => (false, [2, 2, 2, 2]),
            Arch::Resnet34  => (false, [3, 4, 6, 3]),
            Arch::Resnet50  => (true,  [3, 4, 6, 3]),
            Arch::Resnet101 => (true,  [3, 4, 23, 3]),
            Arch::Resnet152 => (true,  [3, 8, 36, 3]),
        };
        HopenetConfig::new(bottleneck, layers)
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Arch::Resnet18  => "resnet18",
            Arch::Resnet34  => "resnet34",
            Arch::Resnet50  => "resnet50",
            Arch::Resnet101 => "resnet101",
            Arch::Resnet152 => "resnet152",
        };
        f.write_str(name)
    }
}

impl FromStr for Arch {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "resnet18"  => Arch::Resnet18,
            "resnet34"  => Arch::Resnet34,
            "resnet50"  => Arch::Resnet50,
            "resnet101" => Arch::Resnet101,
            "resnet152" => Arch::Resnet152,
            other => bail!("unknown architecture '{other}' (expected resnet18/34/50/101/152)"),
        })
    }
}

// ─── Config ───────────────────────────────────────────────────────────────────
#[derive(Config, Debug)]
pub struct HopenetConfig {
    /// Bottleneck blocks (ResNet-50+) instead of basic blocks
    pub bottleneck: bool,
    /// Residual blocks per stage
    pub layers:     [usize; 4],
    #[config(default = 66)]
    pub num_bins:   usize,
    /// Channels of the stem; stage widths are 1×, 2×, 4×, 8× this
    #[config(default = 64)]
    pub base_width: usize,
}

impl HopenetConfig {
    fn expansion(&self) -> usize {
        if self.bottleneck { 4 } else { 1 }
    }

    /// Width of the pooled feature vector fed to the heads
    pub fn feature_dim(&self) -> usize {
        self.base_width * 8 * self.expansion()
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Hopenet<B> {
        let w = self.base_width;
        let conv1 = Conv2dConfig::new([3, w], [7, 7])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(3, 3))
            .with_bias(false)
            .init(device);
        let maxpool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        let mut inplanes = w;
        let layer1 = self.make_layer(&mut inplanes, w,     self.layers[0], 1, device);
        let layer2 = self.make_layer(&mut inplanes, w * 2, self.layers[1], 2, device);
        let layer3 = self.make_layer(&mut inplanes, w * 4, self.layers[2], 2, device);
        let layer4 = self.make_layer(&mut inplanes, w * 8, self.layers[3], 2, device);

        let features = self.feature_dim();
        Hopenet {
            conv1,
            bn1: Norm::new(w, device),
            maxpool,
            layer1, layer2, layer3, layer4,
            avgpool:     AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc_yaw:      LinearConfig::new(features, self.num_bins).init(device),
            fc_pitch:    LinearConfig::new(features, self.num_bins).init(device),
            fc_roll:     LinearConfig::new(features, self.num_bins).init(device),
            fc_finetune: LinearConfig::new(features + 3, 3).init(device),
            num_bins:    self.num_bins,
        }
    }

    // Mirrors torchvision's _make_layer: only the first block of a
    // stage strides and, when the shape changes, projects the skip.
    fn make_layer<B: Backend>(
        &self,
        inplanes: &mut usize,
        planes:   usize,
        blocks:   usize,
        stride:   usize,
        device:   &B::Device,
    ) -> ResLayer<B> {
        let out = planes * self.expansion();
        let blocks = (0..blocks)
            .map(|i| {
                let s = if i == 0 { stride } else { 1 };
                let downsample = (i == 0 && (s != 1 || *inplanes != out))
                    .then(|| Downsample {
                        conv: conv1x1(*inplanes, out, s, device),
                        norm: Norm::new(out, device),
                    });
                let block = if self.bottleneck {
                    ResidualBlock::bottleneck(*inplanes, planes, s, downsample, device)
                } else {
                    ResidualBlock::basic(*inplanes, planes, s, downsample, device)
                };
                *inplanes = out;
                block
            })
            .collect();
        ResLayer { blocks }
    }
}

fn conv1x1<B: Backend>(cin: usize, cout: usize, stride: usize, device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new([cin, cout], [1, 1])
        .with_stride([stride, stride])
        .with_bias(false)
        .init(device)
}

fn conv3x3<B: Backend>(cin: usize, cout: usize, stride: usize, device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new([cin, cout], [3, 3])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .with_bias(false)
        .init(device)
}

// ─── Norm ─────────────────────────────────────────────────────────────────────
/// Batch norm that can be frozen into inference mode.
///
/// Burn's BatchNorm normalises with batch statistics and updates
/// its running averages whenever autodiff is enabled. A frozen
/// Norm instead normalises with the stored running statistics
/// and never touches them, like `module.eval()` in PyTorch.
#[derive(Module, Debug)]
pub struct Norm<B: Backend> {
    pub bn:  BatchNorm<B>,
    frozen:  bool,
    epsilon: f64,
}

impl<B: Backend> Norm<B> {
    pub fn new(channels: usize, device: &B::Device) -> Self {
        Self {
            bn:      BatchNormConfig::new(channels).with_epsilon(BN_EPSILON).init(device),
            frozen:  false,
            epsilon: BN_EPSILON,
        }
    }

    pub fn frozen(mut self) -> Self {
        self.frozen = true;
        self
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        if !self.frozen {
            return self.bn.forward(x);
        }
        let [_, c, _, _] = x.dims();
        let mean  = self.bn.running_mean.value().reshape([1, c, 1, 1]);
        let var   = self.bn.running_var.value().reshape([1, c, 1, 1]);
        let gamma = self.bn.gamma.val().reshape([1, c, 1, 1]);
        let beta  = self.bn.beta.val().reshape([1, c, 1, 1]);

        (x - mean) / var.add_scalar(self.epsilon).sqrt() * gamma + beta
    }
}

// ─── Residual blocks ──────────────────────────────────────────────────────────
/// 1×1 projection on the skip path when a block changes shape.
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    pub conv: Conv2d<B>,
    pub norm: Norm<B>,
}

impl<B: Backend> Downsample<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.norm.forward(self.conv.forward(x))
    }
}

/// Basic (two 3×3 convs) or bottleneck (1×1, 3×3, 1×1) block.
/// `convs[i]` is followed by `norms[i]`; ReLU between all but the last.
#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    pub convs:      Vec<Conv2d<B>>,
    pub norms:      Vec<Norm<B>>,
    pub downsample: Option<Downsample<B>>,
}

impl<B: Backend> ResidualBlock<B> {
    fn basic(
        inplanes:   usize,
        planes:     usize,
        stride:     usize,
        downsample: Option<Downsample<B>>,
        device:     &B::Device,
    ) -> Self {
        Self {
            convs: vec![
                conv3x3(inplanes, planes, stride, device),
                conv3x3(planes, planes, 1, device),
            ],
            norms: vec![Norm::new(planes, device), Norm::new(planes, device)],
            downsample,
        }
    }

    // torchvision v1.5: the stride sits on the 3×3 conv
    fn bottleneck(
        inplanes:   usize,
        planes:     usize,
        stride:     usize,
        downsample: Option<Downsample<B>>,
        device:     &B::Device,
    ) -> Self {
        Self {
            convs: vec![
                conv1x1(inplanes, planes, 1, device),
                conv3x3(planes, planes, stride, device),
                conv1x1(planes, planes * 4, 1, device),
            ],
            norms: vec![
                Norm::new(planes, device),
                Norm::new(planes, device),
                Norm::new(planes * 4, device),
            ],
            downsample,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(d) => d.forward(x.clone()),
            None    => x.clone(),
        };

        let last = self.convs.len() - 1;
        let mut out = x;
        for (i, (conv, norm)) in self.convs.iter().zip(&self.norms).enumerate() {
            out = norm.forward(conv.forward(out));
            if i < last {
                out = relu(out);
            }
        }
        relu(out + identity)
    }
}

/// One residual stage (torchvision's `layerN`).
#[derive(Module, Debug)]
pub struct ResLayer<B: Backend> {
    pub blocks: Vec<ResidualBlock<B>>,
}

impl<B: Backend> ResLayer<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks.iter().fold(x, |x, block| block.forward(x))
    }
}

// ─── Hopenet ──────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct Hopenet<B: Backend> {
    pub conv1:       Conv2d<B>,
    pub bn1:         Norm<B>,
    pub maxpool:     MaxPool2d,
    pub layer1:      ResLayer<B>,
    pub layer2:      ResLayer<B>,
    pub layer3:      ResLayer<B>,
    pub layer4:      ResLayer<B>,
    pub avgpool:     AdaptiveAvgPool2d,
    pub fc_yaw:      Linear<B>,
    pub fc_pitch:    Linear<B>,
    pub fc_roll:     Linear<B>,
    pub fc_finetune: Linear<B>,
    pub num_bins:    usize,
}

pub struct HopenetOutput<B: Backend> {
    /// Bin logits per axis — shape: [batch, num_bins]
    pub yaw:    Tensor<B, 2>,
    pub pitch:  Tensor<B, 2>,
    pub roll:   Tensor<B, 2>,
    /// Finetuning head estimate in degrees — shape: [batch, 3]
    pub angles: Tensor<B, 2>,
}

impl<B: Backend> Hopenet<B> {
    pub fn forward(&self, images: Tensor<B, 4>) -> HopenetOutput<B> {
        let x = relu(self.bn1.forward(self.conv1.forward(images)));
        let x = self.maxpool.forward(x);
        let x = self.layer1.forward(x);
        let x = self.layer2.forward(x);
        let x = self.layer3.forward(x);
        let x = self.layer4.forward(x);
        let features: Tensor<B, 2> = self.avgpool.forward(x).flatten(1, 3);

        let yaw   = self.fc_yaw.forward(features.clone());
        let pitch = self.fc_pitch.forward(features.clone());
        let roll  = self.fc_roll.forward(features.clone());

        // Soft-argmax bin → degrees, one column per axis
        let to_degrees = |logits: &Tensor<B, 2>| {
            soft_argmax(logits.clone())
                .mul_scalar(BIN_WIDTH)
                .add_scalar(BIN_OFFSET)
                .unsqueeze_dim::<2>(1)
        };
        let preangles = Tensor::cat(
            vec![to_degrees(&yaw), to_degrees(&pitch), to_degrees(&roll)],
            1,
        );
        let angles = self.fc_finetune.forward(Tensor::cat(vec![preangles, features], 1));

        HopenetOutput { yaw, pitch, roll, angles }
    }

    /// Put every batch norm of the stem and the residual stages
    /// into inference mode. The heads have no norms.
    pub fn freeze_backbone_norms(mut self) -> Self {
        self.bn1 = self.bn1.frozen();
        self.layer1 = self.layer1.freeze_norms();
        self.layer2 = self.layer2.freeze_norms();
        self.layer3 = self.layer3.freeze_norms();
        self.layer4 = self.layer4.freeze_norms();
        self
    }

    /// Every Norm in the network, stem first
    pub fn norms(&self) -> Vec<&Norm<B>> {
        let mut out = vec![&self.bn1];
        for layer in [&self.layer1, &self.layer2, &self.layer3, &self.layer4] {
            for block in &layer.blocks {
                out.extend(block.norms.iter());
                out.extend(block.downsample.iter().map(|d| &d.norm));
            }
        }
        out
    }
}

impl<B: Backend> ResLayer<B> {
    fn freeze_norms(self) -> Self {
        let blocks = self
            .blocks
            .into_iter()
            .map(|mut block| {
                block.norms = block.norms.into_iter().map(Norm::frozen).collect();
                block.downsample = block.downsample.map(|mut d| {
                    d.norm = d.norm.frozen();
                    d
                });
                block
            })
            .collect();
        Self { blocks }
    }
}

/// Smallest useful network: basic blocks, one per stage, 4-channel stem.
#[cfg(test)]
pub fn tiny_config() -> HopenetConfig {
    HopenetConfig::new(false, [1, 1, 1, 1]).with_base_width(4)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_forward_shapes() {
        let device = Default::default();
        let model: Hopenet<TestBackend> = tiny_config().init(&device);
        let out = model.forward(Tensor::zeros([2, 3, 32, 32], &device));

        assert_eq!(out.yaw.dims(),    [2, 66]);
        assert_eq!(out.pitch.dims(),  [2, 66]);
        assert_eq!(out.roll.dims(),   [2, 66]);
        assert_eq!(out.angles.dims(), [2, 3]);
    }

    #[test]
    fn test_bottleneck_stage_widths() {
        let device = Default::default();
        let cfg = HopenetConfig::new(true, [1, 2, 1, 1]).with_base_width(2);
        let model: Hopenet<TestBackend> = cfg.init(&device);

        assert_eq!(cfg.feature_dim(), 2 * 8 * 4);
        assert_eq!(model.layer1.blocks[0].convs.len(), 3);
        assert_eq!(model.layer2.blocks.len(), 2);
        // First bottleneck always projects (2 → 8 channels)
        assert!(model.layer1.blocks[0].downsample.is_some());
        assert!(model.layer2.blocks[1].downsample.is_none());
    }

    #[test]
    fn test_arch_parsing() {
        assert_eq!("ResNet50".parse::<Arch>().unwrap(), Arch::Resnet50);
        assert!("vgg16".parse::<Arch>().is_err());
        assert_eq!(Arch::Resnet101.config().layers, [3, 4, 23, 3]);
        assert_eq!(Arch::Resnet18.to_string(), "resnet18");
    }

    #[test]
    fn test_freeze_covers_stem_and_stages() {
        let device = Default::default();
        let model: Hopenet<TestBackend> = tiny_config().init(&device);
        assert!(model.norms().iter().all(|n| !n.is_frozen()));

        let model = model.freeze_backbone_norms();
        assert!(model.norms().iter().all(|n| n.is_frozen()));
    }
}
