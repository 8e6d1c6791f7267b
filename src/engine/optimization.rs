//! Iterative style optimization.
//!
//! A `StylePipeline` is built per request from the shared backbone and the
//! content and style targets. Fitting runs L-BFGS directly on the pixels of
//! the input image.

use super::backbone::{Backbone, Layer};
use super::lbfgs::{Lbfgs, LbfgsConfig, Objective};
use super::losses::{content_loss, gram_matrix, style_loss};
use super::EngineError;
use crate::config::settings::EngineConfig;
use candle_core::{DType, Device, Shape, Tensor, Var};

pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, Clone)]
pub struct OptimizationSettings {
    /// 1-based convolution indices followed by a content loss tap.
    pub content_layers: Vec<usize>,
    /// 1-based convolution indices followed by a style loss tap.
    pub style_layers: Vec<usize>,
    pub content_weight: f64,
    pub style_weight: f64,
    pub max_iterations: usize,
    pub report_every: Option<usize>,
    pub lbfgs: LbfgsConfig,
}

impl Default for OptimizationSettings {
    fn default() -> Self {
        Self {
            content_layers: vec![4],
            style_layers: vec![1, 2, 3, 4, 5],
            content_weight: 1.0,
            style_weight: 1e6,
            max_iterations: 300,
            report_every: None,
            lbfgs: LbfgsConfig::default(),
        }
    }
}

impl From<&EngineConfig> for OptimizationSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            content_layers: config.content_layers.clone(),
            style_layers: config.style_layers.clone(),
            content_weight: config.content_weight,
            style_weight: config.style_weight,
            max_iterations: config.max_iterations,
            report_every: config.report_every,
            lbfgs: LbfgsConfig::default(),
        }
    }
}

enum Stage {
    Layer(Layer),
    Content(Tensor),
    Style(Tensor),
}

/// Per-tap losses from one forward pass.
pub struct Losses {
    pub content: Vec<Tensor>,
    pub style: Vec<Tensor>,
}

pub struct StylePipeline {
    mean: Tensor,
    std: Tensor,
    stages: Vec<Stage>,
}

impl StylePipeline {
    /// Truncate the backbone after the deepest tapped convolution and
    /// precompute the targets for every tap.
    pub fn new(
        backbone: &Backbone,
        content: &Tensor,
        style: &Tensor,
        content_layers: &[usize],
        style_layers: &[usize],
    ) -> Result<Self, EngineError> {
        let device = content.device();
        let mean = Tensor::new(&IMAGENET_MEAN, device)?.reshape((1, 3, 1, 1))?;
        let std = Tensor::new(&IMAGENET_STD, device)?.reshape((1, 3, 1, 1))?;

        let deepest = content_layers
            .iter()
            .chain(style_layers)
            .copied()
            .max()
            .unwrap_or(0);
        if deepest > backbone.conv_count() {
            return Err(EngineError::Tensor(candle_core::Error::Msg(format!(
                "loss tap at convolution {} but the backbone has {}",
                deepest,
                backbone.conv_count()
            ))));
        }

        let mut content_act = normalize(content, &mean, &std)?;
        let mut style_act = normalize(style, &mean, &std)?;
        let mut stages = Vec::new();
        let mut convs = 0;

        for layer in backbone.layers() {
            if convs == deepest {
                break;
            }
            content_act = layer.forward(&content_act)?;
            style_act = layer.forward(&style_act)?;
            stages.push(Stage::Layer(layer.clone()));

            if layer.is_conv() {
                convs += 1;
                if content_layers.contains(&convs) {
                    stages.push(Stage::Content(content_act.clone()));
                }
                if style_layers.contains(&convs) {
                    stages.push(Stage::Style(gram_matrix(&style_act)?));
                }
            }
        }

        Ok(Self { mean, std, stages })
    }

    pub fn forward(&self, input: &Tensor) -> Result<Losses, EngineError> {
        let mut xs = normalize(input, &self.mean, &self.std)?;
        let mut losses = Losses {
            content: Vec::new(),
            style: Vec::new(),
        };

        for stage in &self.stages {
            match stage {
                Stage::Layer(layer) => xs = layer.forward(&xs)?,
                Stage::Content(target) => losses.content.push(content_loss(&xs, target)?),
                Stage::Style(target) => losses.style.push(style_loss(&xs, target)?),
            }
        }
        Ok(losses)
    }

    /// Fit a copy of `input` to the targets and return it clamped to `[0, 1]`.
    pub fn fit(&self, input: &Tensor, settings: &OptimizationSettings) -> Result<Tensor, EngineError> {
        let shape = input.shape().clone();
        let device = input.device().clone();
        let mut params = input.flatten_all()?.to_vec1::<f32>()?;

        let mut objective = FitObjective {
            pipeline: self,
            shape: shape.clone(),
            device: device.clone(),
            content_weight: settings.content_weight,
            style_weight: settings.style_weight,
            report_every: settings.report_every,
            evaluations: 0,
            last: (0.0, 0.0),
        };

        let mut optimizer = Lbfgs::new(settings.lbfgs.clone());
        while optimizer.evaluations() < settings.max_iterations {
            optimizer.step(&mut params, &mut objective)?;
        }

        if settings.report_every.is_some() {
            tracing::info!(
                "Finished after {} evaluations: content loss {:.2}, style loss {:.2}",
                objective.evaluations,
                objective.last.0,
                objective.last.1
            );
        }

        clamp_unit(&mut params);
        Ok(Tensor::from_vec(params, shape, &device)?)
    }
}

fn normalize(x: &Tensor, mean: &Tensor, std: &Tensor) -> candle_core::Result<Tensor> {
    x.broadcast_sub(mean)?.broadcast_div(std)
}

fn clamp_unit(params: &mut [f32]) {
    for p in params.iter_mut() {
        *p = p.clamp(0.0, 1.0);
    }
}

fn weighted_sum(losses: &[Tensor], weight: f64, device: &Device) -> candle_core::Result<Tensor> {
    let mut total = Tensor::zeros((), DType::F32, device)?;
    for loss in losses {
        total = total.add(loss)?;
    }
    total.affine(weight, 0.0)
}

struct FitObjective<'a> {
    pipeline: &'a StylePipeline,
    shape: Shape,
    device: Device,
    content_weight: f64,
    style_weight: f64,
    report_every: Option<usize>,
    evaluations: usize,
    last: (f32, f32),
}

impl Objective for FitObjective<'_> {
    fn evaluate(&mut self, params: &mut [f32]) -> Result<(f64, Vec<f32>), EngineError> {
        clamp_unit(params);
        let input = Var::from_tensor(&Tensor::from_slice(&*params, self.shape.clone(), &self.device)?)?;

        let losses = self.pipeline.forward(input.as_tensor())?;
        let content = weighted_sum(&losses.content, self.content_weight, &self.device)?;
        let style = weighted_sum(&losses.style, self.style_weight, &self.device)?;
        let total = content.add(&style)?;

        let grads = total.backward()?;
        let grad = match grads.get(input.as_tensor()) {
            Some(grad) => grad.flatten_all()?.to_vec1::<f32>()?,
            None => vec![0f32; params.len()],
        };

        self.last = (content.to_scalar::<f32>()?, style.to_scalar::<f32>()?);
        if let Some(every) = self.report_every.filter(|n| *n > 0) {
            if self.evaluations % every == 0 {
                tracing::info!(
                    "Evaluation {}: content loss {:.2}, style loss {:.2}",
                    self.evaluations,
                    self.last.0,
                    self.last.1
                );
            }
        }
        self.evaluations += 1;

        Ok((total.to_scalar::<f32>()? as f64, grad))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::backbone::tiny_backbone;

    fn image(seed: f64) -> Tensor {
        Tensor::arange(0u32, 3 * 8 * 8, &Device::Cpu)
            .unwrap()
            .to_dtype(DType::F32)
            .unwrap()
            .affine(1.0 / 192.0, seed)
            .unwrap()
            .clamp(0f32, 1f32)
            .unwrap()
            .reshape((1, 3, 8, 8))
            .unwrap()
    }

    #[test]
    fn test_pipeline_places_loss_taps() {
        let backbone = tiny_backbone(&Device::Cpu);
        let pipeline =
            StylePipeline::new(&backbone, &image(0.0), &image(0.1), &[2], &[1, 2, 3]).unwrap();

        let losses = pipeline.forward(&image(0.2)).unwrap();
        assert_eq!(losses.content.len(), 1);
        assert_eq!(losses.style.len(), 3);
    }

    #[test]
    fn test_losses_vanish_on_targets() {
        let backbone = tiny_backbone(&Device::Cpu);
        let content = image(0.0);
        let pipeline = StylePipeline::new(&backbone, &content, &content, &[1], &[1, 2]).unwrap();

        let losses = pipeline.forward(&content).unwrap();
        for loss in losses.content.iter().chain(&losses.style) {
            assert_eq!(loss.to_scalar::<f32>().unwrap(), 0.0);
        }
    }

    #[test]
    fn test_tap_beyond_backbone_is_rejected() {
        let backbone = tiny_backbone(&Device::Cpu);
        let result = StylePipeline::new(&backbone, &image(0.0), &image(0.0), &[9], &[1]);
        assert!(result.is_err());
    }

    #[test]
    fn test_fit_stays_in_unit_range() {
        let backbone = tiny_backbone(&Device::Cpu);
        let content = image(0.0);
        let pipeline = StylePipeline::new(&backbone, &content, &image(0.3), &[1], &[1, 2]).unwrap();

        let settings = OptimizationSettings {
            max_iterations: 5,
            style_weight: 10.0,
            ..Default::default()
        };
        let fitted = pipeline.fit(&content, &settings).unwrap();

        assert_eq!(fitted.dims(), content.dims());
        let max = fitted.max_all().unwrap().to_scalar::<f32>().unwrap();
        let min = fitted.min_all().unwrap().to_scalar::<f32>().unwrap();
        assert!(max <= 1.0 && min >= 0.0);
    }
}
