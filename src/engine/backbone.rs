//! VGG-style feature extractor used by the optimization engine.

use super::EngineError;
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Conv2d, Conv2dConfig, VarBuilder};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// 3x3 convolution with the given number of output channels, then ReLU.
    Conv(usize),
    /// 2x2 max-pool.
    Pool,
}

/// torchvision `vgg19().features`.
pub const VGG19_STAGES: &[Stage] = &[
    Stage::Conv(64),
    Stage::Conv(64),
    Stage::Pool,
    Stage::Conv(128),
    Stage::Conv(128),
    Stage::Pool,
    Stage::Conv(256),
    Stage::Conv(256),
    Stage::Conv(256),
    Stage::Conv(256),
    Stage::Pool,
    Stage::Conv(512),
    Stage::Conv(512),
    Stage::Conv(512),
    Stage::Conv(512),
    Stage::Pool,
    Stage::Conv(512),
    Stage::Conv(512),
    Stage::Conv(512),
    Stage::Conv(512),
    Stage::Pool,
];

#[derive(Debug, Clone)]
pub enum Layer {
    Conv(Conv2d),
    Relu,
    MaxPool,
}

impl Layer {
    pub fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Layer::Conv(conv) => conv.forward(xs),
            Layer::Relu => xs.relu(),
            Layer::MaxPool => xs.max_pool2d(2),
        }
    }

    pub fn is_conv(&self) -> bool {
        matches!(self, Layer::Conv(_))
    }
}

/// Flat layer list; weight keys follow the flat index (`<idx>.weight`).
#[derive(Debug, Clone)]
pub struct Backbone {
    layers: Vec<Layer>,
}

impl Backbone {
    pub fn build(stages: &[Stage], in_channels: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        let config = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };

        let mut layers = Vec::new();
        let mut channels = in_channels;
        for stage in stages {
            match *stage {
                Stage::Conv(out) => {
                    let conv = candle_nn::conv2d(
                        channels,
                        out,
                        3,
                        config,
                        vb.pp(layers.len().to_string()),
                    )?;
                    layers.push(Layer::Conv(conv));
                    layers.push(Layer::Relu);
                    channels = out;
                }
                Stage::Pool => layers.push(Layer::MaxPool),
            }
        }
        Ok(Self { layers })
    }

    /// Load VGG-19 features from a safetensors file with torchvision key
    /// names (`features.<idx>.weight`).
    pub fn load_vgg19(path: impl AsRef<Path>, device: &Device) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let weights_error = |source| EngineError::Weights {
            path: path.display().to_string(),
            source,
        };

        let tensors = candle_core::safetensors::load(path, device).map_err(weights_error)?;
        let vb = VarBuilder::from_tensors(tensors, DType::F32, device);
        let backbone = Self::build(VGG19_STAGES, 3, vb.pp("features")).map_err(weights_error)?;

        tracing::info!(
            "Loaded VGG-19 backbone from {} ({} layers)",
            path.display(),
            backbone.layers.len()
        );
        Ok(backbone)
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn conv_count(&self) -> usize {
        self.layers.iter().filter(|l| l.is_conv()).count()
    }
}

#[cfg(test)]
pub(crate) fn tiny_backbone(device: &Device) -> Backbone {
    let varmap = candle_nn::VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
    Backbone::build(
        &[Stage::Conv(4), Stage::Conv(4), Stage::Pool, Stage::Conv(8), Stage::Conv(8)],
        3,
        vb,
    )
    .expect("tiny backbone")
}
