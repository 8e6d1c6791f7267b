use super::generative::{GeneratorConfig, ResnetGenerator};
use super::EngineError;
use candle_core::Device;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Pretrained generators by style id. Built once at startup and shared.
#[derive(Default, Clone)]
pub struct StyleRegistry {
    generators: HashMap<String, Arc<ResnetGenerator>>,
}

impl StyleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `<dir>/<style>_pretrained.safetensors` for every style.
    pub fn load<S: AsRef<str>>(
        dir: impl AsRef<Path>,
        styles: &[S],
        device: &Device,
    ) -> Result<Self, EngineError> {
        let mut registry = Self::new();
        for style in styles {
            let style = style.as_ref();
            let path = dir
                .as_ref()
                .join(format!("{}_pretrained.safetensors", style));
            let generator = ResnetGenerator::load(&path, GeneratorConfig::default(), device)?;
            tracing::info!("Registered generator '{}' from {}", style, path.display());
            registry.insert(style, generator);
        }
        Ok(registry)
    }

    pub fn insert(&mut self, style: impl Into<String>, generator: ResnetGenerator) {
        self.generators.insert(style.into(), Arc::new(generator));
    }

    pub fn get(&self, style: &str) -> Option<Arc<ResnetGenerator>> {
        self.generators.get(style).cloned()
    }

}
