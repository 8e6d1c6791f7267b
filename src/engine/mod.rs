//! Style Engines
//!
//! Information Hiding:
//! - Tensor layout and weight formats stay inside this module
//! - Callers hand in encoded image bytes and get PNG bytes back
//! - Engine selection is decided by `StyleRequest::resolve`

use candle_core::Device;
use thiserror::Error;

pub mod backbone;
pub mod dispatcher;
pub mod generative;
pub mod images;
pub mod lbfgs;
pub mod losses;
pub mod optimization;
pub mod registry;

pub use dispatcher::{InferenceDispatcher, StyleRequest};
pub use registry::StyleRegistry;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Unknown style: {0}")]
    UnknownStyle(String),

    #[error("Style '{0}' requires a style image")]
    MissingStyleImage(String),

    #[error("No content images to process")]
    NoContentImages,

    #[error("Invalid image: {0}")]
    Image(#[from] image::ImageError),

    #[error("Tensor operation failed: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("Invalid base64 image: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Failed to load weights from {path}: {source}")]
    Weights {
        path: String,
        #[source]
        source: candle_core::Error,
    },

    #[error("Inference worker panicked")]
    WorkerPanicked,
}

/// Resolve a device name: `auto`, `cpu`, `cuda` or `cuda:<ordinal>`.
pub fn select_device(name: &str) -> Result<Device, EngineError> {
    let device = match name.trim().to_lowercase().as_str() {
        "cpu" => Device::Cpu,
        "auto" => Device::cuda_if_available(0)?,
        "cuda" => Device::new_cuda(0)?,
        other => match other.strip_prefix("cuda:").map(str::parse::<usize>) {
            Some(Ok(ordinal)) => Device::new_cuda(ordinal)?,
            _ => {
                return Err(EngineError::Tensor(candle_core::Error::Msg(format!(
                    "unsupported device '{}'",
                    name
                ))))
            }
        },
    };
    Ok(device)
}

/// Square side used for the optimization path when none is configured.
pub fn default_image_size(device: &Device) -> usize {
    if device.is_cuda() {
        512
    } else {
        256
    }
}
