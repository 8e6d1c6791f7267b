//! Inference Dispatcher
//!
//! Routes a transfer to the engine its style id selects and returns PNG
//! images in content order.
//!
//! Information Hiding:
//! - Callers never see which engine ran
//! - Worker fan-out for the optimization path is internal
//! - Blocking: call from a blocking context (e.g. `spawn_blocking`)

use super::backbone::Backbone;
use super::generative::ResnetGenerator;
use super::images::{decode, encode_png};
use super::optimization::{OptimizationSettings, StylePipeline};
use super::registry::StyleRegistry;
use super::EngineError;
use crate::styles::CUSTOM_STYLE;
use candle_core::{Device, Tensor};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A transfer request, carrying only what its engine needs.
pub enum StyleRequest {
    Optimization {
        style_image: Vec<u8>,
        content_images: Vec<Vec<u8>>,
    },
    Generative {
        style: String,
        generator: Arc<ResnetGenerator>,
        content_images: Vec<Vec<u8>>,
    },
}

impl StyleRequest {
    pub fn resolve(
        style: &str,
        style_image: Option<Vec<u8>>,
        content_images: Vec<Vec<u8>>,
        registry: &StyleRegistry,
    ) -> Result<Self, EngineError> {
        if content_images.is_empty() {
            return Err(EngineError::NoContentImages);
        }

        if style == CUSTOM_STYLE {
            let style_image = style_image
                .filter(|image| !image.is_empty())
                .ok_or_else(|| EngineError::MissingStyleImage(style.to_string()))?;
            return Ok(StyleRequest::Optimization {
                style_image,
                content_images,
            });
        }

        let generator = registry
            .get(style)
            .ok_or_else(|| EngineError::UnknownStyle(style.to_string()))?;
        Ok(StyleRequest::Generative {
            style: style.to_string(),
            generator,
            content_images,
        })
    }

    pub fn engine_name(&self) -> &'static str {
        match self {
            StyleRequest::Optimization { .. } => "optimization",
            StyleRequest::Generative { .. } => "generative",
        }
    }
}

pub struct InferenceDispatcher {
    backbone: Arc<Backbone>,
    registry: Arc<StyleRegistry>,
    settings: OptimizationSettings,
    device: Device,
    image_size: usize,
    pool_size: usize,
}

impl InferenceDispatcher {
    pub fn new(
        backbone: Arc<Backbone>,
        registry: Arc<StyleRegistry>,
        settings: OptimizationSettings,
        device: Device,
        image_size: usize,
        pool_size: usize,
    ) -> Self {
        Self {
            backbone,
            registry,
            settings,
            device,
            image_size,
            pool_size: pool_size.max(1),
        }
    }

    /// Resolve and run a transfer on encoded images.
    pub fn transfer(
        &self,
        style: &str,
        style_image: Option<Vec<u8>>,
        content_images: Vec<Vec<u8>>,
    ) -> Result<Vec<Vec<u8>>, EngineError> {
        let request = StyleRequest::resolve(style, style_image, content_images, &self.registry)?;
        self.run(request)
    }

    pub fn run(&self, request: StyleRequest) -> Result<Vec<Vec<u8>>, EngineError> {
        tracing::info!("Running {} engine", request.engine_name());
        match request {
            StyleRequest::Optimization {
                style_image,
                content_images,
            } => {
                let style = decode(&style_image, Some(self.image_size), &self.device)?;
                if content_images.len() == 1 {
                    Ok(vec![self.optimize(&style, &content_images[0])?])
                } else {
                    self.optimize_pooled(&style, &content_images)
                }
            }
            StyleRequest::Generative {
                style,
                generator,
                content_images,
            } => {
                tracing::debug!("Generating {} image(s) in '{}'", content_images.len(), style);
                content_images
                    .iter()
                    .map(|bytes| {
                        let content = decode(bytes, None, &self.device)?;
                        encode_png(&generator.stylize(&content)?)
                    })
                    .collect()
            }
        }
    }

    fn optimize(&self, style: &Tensor, content_bytes: &[u8]) -> Result<Vec<u8>, EngineError> {
        let content = decode(content_bytes, Some(self.image_size), &self.device)?;
        let pipeline = StylePipeline::new(
            &self.backbone,
            &content,
            style,
            &self.settings.content_layers,
            &self.settings.style_layers,
        )?;
        let fitted = pipeline.fit(&content, &self.settings)?;
        encode_png(&fitted)
    }

    /// Fit every image on at most `pool_size` threads. Each worker builds its
    /// own pipeline; results land in their input slot.
    fn optimize_pooled(
        &self,
        style: &Tensor,
        content_images: &[Vec<u8>],
    ) -> Result<Vec<Vec<u8>>, EngineError> {
        let workers = content_images.len().min(self.pool_size);
        let next = AtomicUsize::new(0);
        let slots: Vec<Mutex<Option<Result<Vec<u8>, EngineError>>>> =
            content_images.iter().map(|_| Mutex::new(None)).collect();

        tracing::info!(
            "Fitting {} image(s) on {} worker(s)",
            content_images.len(),
            workers
        );

        let panicked = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    scope.spawn(|| loop {
                        let index = next.fetch_add(1, Ordering::SeqCst);
                        let Some(bytes) = content_images.get(index) else {
                            break;
                        };
                        let result = self.optimize(style, bytes);
                        if let Ok(mut slot) = slots[index].lock() {
                            *slot = Some(result);
                        }
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join())
                .filter(Result::is_err)
                .count()
        });

        if panicked > 0 {
            tracing::error!("{} inference worker(s) panicked", panicked);
        }

        slots
            .into_iter()
            .map(|slot| {
                slot.into_inner()
                    .ok()
                    .flatten()
                    .unwrap_or(Err(EngineError::WorkerPanicked))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::backbone::tiny_backbone;
    use crate::engine::generative::tiny_generator;
    use crate::engine::images::sample_png;

    fn registry() -> StyleRegistry {
        let mut registry = StyleRegistry::new();
        registry.insert("style_monet", tiny_generator(&Device::Cpu));
        registry
    }

    fn dispatcher(style_weight: f64) -> InferenceDispatcher {
        let settings = OptimizationSettings {
            content_layers: vec![1],
            style_layers: vec![1, 2],
            style_weight,
            max_iterations: 3,
            ..Default::default()
        };
        InferenceDispatcher::new(
            Arc::new(tiny_backbone(&Device::Cpu)),
            Arc::new(registry()),
            settings,
            Device::Cpu,
            8,
            3,
        )
    }

    #[test]
    fn test_custom_style_selects_optimization() {
        let request = StyleRequest::resolve(
            CUSTOM_STYLE,
            Some(b"style".to_vec()),
            vec![b"content".to_vec()],
            &registry(),
        )
        .unwrap();
        assert_eq!(request.engine_name(), "optimization");
    }

    #[test]
    fn test_registered_style_selects_generator() {
        let request =
            StyleRequest::resolve("style_monet", None, vec![b"content".to_vec()], &registry())
                .unwrap();
        assert_eq!(request.engine_name(), "generative");
    }

    #[test]
    fn test_resolution_failures() {
        let content = vec![b"content".to_vec()];
        assert!(matches!(
            StyleRequest::resolve("style_picasso", None, content.clone(), &registry()),
            Err(EngineError::UnknownStyle(s)) if s == "style_picasso"
        ));
        assert!(matches!(
            StyleRequest::resolve(CUSTOM_STYLE, Some(Vec::new()), content, &registry()),
            Err(EngineError::MissingStyleImage(_))
        ));
        assert!(matches!(
            StyleRequest::resolve("style_monet", None, Vec::new(), &registry()),
            Err(EngineError::NoContentImages)
        ));
    }

    #[test]
    fn test_pooled_output_keeps_input_order() {
        // With no style pull the content loss starts at zero, so every image
        // comes back unchanged and can be matched to its input.
        let dispatcher = dispatcher(0.0);
        let inputs: Vec<Vec<u8>> = (0..3u32)
            .map(|i| {
                let image = image::RgbImage::from_fn(8, 8, |x, y| {
                    image::Rgb([(i * 100) as u8, (x * 20) as u8, (y * 20) as u8])
                });
                let mut out = std::io::Cursor::new(Vec::new());
                image.write_to(&mut out, image::ImageFormat::Png).unwrap();
                out.into_inner()
            })
            .collect();

        let outputs = dispatcher
            .transfer(CUSTOM_STYLE, Some(sample_png(8, 8)), inputs.clone())
            .unwrap();

        assert_eq!(outputs.len(), 3);
        for (input, output) in inputs.iter().zip(&outputs) {
            let expected = encode_png(&decode(input, Some(8), &Device::Cpu).unwrap()).unwrap();
            let expected = image::load_from_memory(&expected).unwrap().to_rgb8();
            let output = image::load_from_memory(output).unwrap().to_rgb8();
            assert_eq!(expected, output);
        }
    }

    #[test]
    fn test_generative_path_returns_one_image_per_input() {
        let dispatcher = dispatcher(1e3);
        let outputs = dispatcher
            .transfer("style_monet", None, vec![sample_png(8, 8), sample_png(8, 8)])
            .unwrap();
        assert_eq!(outputs.len(), 2);
        for output in outputs {
            assert_eq!(
                image::load_from_memory(&output).unwrap().to_rgb8().dimensions(),
                (8, 8)
            );
        }
    }
}
