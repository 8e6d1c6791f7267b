//! Pretrained ResNet generator (CycleGAN layout).
//!
//! Weights are read-only after loading and the forward pass keeps no state,
//! so one instance can serve concurrent requests.

use super::EngineError;
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig, VarBuilder};
use std::path::Path;

const INSTANCE_NORM_EPS: f64 = 1e-5;

#[derive(Debug, Clone, Copy)]
pub struct GeneratorConfig {
    /// Filters in the first convolution.
    pub ngf: usize,
    pub n_blocks: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self { ngf: 64, n_blocks: 9 }
    }
}

/// Mirror-pad the two spatial dimensions.
pub fn reflect_pad(x: &Tensor, pad: usize) -> candle_core::Result<Tensor> {
    if pad == 0 {
        return Ok(x.clone());
    }
    let (_, _, h, w) = x.dims4()?;
    let x = x.index_select(&reflect_indices(h, pad, x.device())?, 2)?;
    x.index_select(&reflect_indices(w, pad, x.device())?, 3)
}

fn reflect_indices(len: usize, pad: usize, device: &Device) -> candle_core::Result<Tensor> {
    if pad >= len {
        return Err(candle_core::Error::Msg(format!(
            "reflection pad {} needs a dimension larger than {}",
            pad, len
        )));
    }
    let indices: Vec<u32> = (1..=pad)
        .rev()
        .chain(0..len)
        .chain((len - 1 - pad..len - 1).rev())
        .map(|i| i as u32)
        .collect();
    Tensor::new(indices.as_slice(), device)
}

/// Per-sample, per-channel normalization without affine parameters.
pub fn instance_norm(x: &Tensor) -> candle_core::Result<Tensor> {
    let (b, c, h, w) = x.dims4()?;
    let flat = x.reshape((b, c, h * w))?;
    let mean = flat.mean_keepdim(2)?;
    let centered = flat.broadcast_sub(&mean)?;
    let var = centered.sqr()?.mean_keepdim(2)?;
    centered
        .broadcast_div(&(var + INSTANCE_NORM_EPS)?.sqrt()?)?
        .reshape((b, c, h, w))
}

#[derive(Debug, Clone)]
enum Block {
    ReflectPad(usize),
    Conv(Conv2d),
    ConvTranspose(ConvTranspose2d),
    Norm,
    Relu,
    Residual(Conv2d, Conv2d),
    Tanh,
}

impl Block {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Block::ReflectPad(pad) => reflect_pad(xs, *pad),
            Block::Conv(conv) => conv.forward(xs),
            Block::ConvTranspose(conv) => conv.forward(xs),
            Block::Norm => instance_norm(xs),
            Block::Relu => xs.relu(),
            Block::Residual(first, second) => {
                let ys = first.forward(&reflect_pad(xs, 1)?)?;
                let ys = instance_norm(&ys)?.relu()?;
                let ys = instance_norm(&second.forward(&reflect_pad(&ys, 1)?)?)?;
                xs + ys
            }
            Block::Tanh => xs.tanh(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResnetGenerator {
    blocks: Vec<Block>,
}

impl ResnetGenerator {
    /// Weight keys follow the flat index of each block (`model.<idx>`), with
    /// residual blocks at `model.<idx>.conv_block.{1,5}`.
    pub fn new(config: GeneratorConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let ngf = config.ngf;
        let mut blocks = Vec::new();
        let key = |blocks: &Vec<Block>| vb.pp(blocks.len().to_string());

        let plain = Conv2dConfig::default();
        let down = Conv2dConfig {
            padding: 1,
            stride: 2,
            ..Default::default()
        };
        let up = ConvTranspose2dConfig {
            padding: 1,
            output_padding: 1,
            stride: 2,
            ..Default::default()
        };

        blocks.push(Block::ReflectPad(3));
        blocks.push(Block::Conv(candle_nn::conv2d(3, ngf, 7, plain, key(&blocks))?));
        blocks.push(Block::Norm);
        blocks.push(Block::Relu);

        for mult in [1, 2] {
            let conv = candle_nn::conv2d(ngf * mult, ngf * mult * 2, 3, down, key(&blocks))?;
            blocks.push(Block::Conv(conv));
            blocks.push(Block::Norm);
            blocks.push(Block::Relu);
        }

        let dim = ngf * 4;
        for _ in 0..config.n_blocks {
            let vb = key(&blocks).pp("conv_block");
            let first = candle_nn::conv2d(dim, dim, 3, plain, vb.pp("1"))?;
            let second = candle_nn::conv2d(dim, dim, 3, plain, vb.pp("5"))?;
            blocks.push(Block::Residual(first, second));
        }

        for mult in [4, 2] {
            let conv =
                candle_nn::conv_transpose2d(ngf * mult, ngf * mult / 2, 3, up, key(&blocks))?;
            blocks.push(Block::ConvTranspose(conv));
            blocks.push(Block::Norm);
            blocks.push(Block::Relu);
        }

        blocks.push(Block::ReflectPad(3));
        blocks.push(Block::Conv(candle_nn::conv2d(ngf, 3, 7, plain, key(&blocks))?));
        blocks.push(Block::Tanh);

        Ok(Self { blocks })
    }

    pub fn load(
        path: impl AsRef<Path>,
        config: GeneratorConfig,
        device: &Device,
    ) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let weights_error = |source| EngineError::Weights {
            path: path.display().to_string(),
            source,
        };

        let tensors = candle_core::safetensors::load(path, device).map_err(weights_error)?;
        let vb = VarBuilder::from_tensors(tensors, DType::F32, device);
        Self::new(config, vb.pp("model")).map_err(weights_error)
    }

    /// Restyle a `(1, 3, H, W)` image in `[0, 1]`; the result is in `[0, 1]`.
    pub fn stylize(&self, image: &Tensor) -> Result<Tensor, EngineError> {
        let mut xs = image.affine(2.0, -1.0)?;
        for block in &self.blocks {
            xs = block.forward(&xs)?;
        }
        Ok(xs.affine(0.5, 0.5)?)
    }
}

#[cfg(test)]
pub(crate) fn tiny_generator(device: &Device) -> ResnetGenerator {
    let varmap = candle_nn::VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
    ResnetGenerator::new(GeneratorConfig { ngf: 2, n_blocks: 1 }, vb).expect("tiny generator")
}
