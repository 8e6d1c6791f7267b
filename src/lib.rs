//! Stylebot - Telegram style-transfer bot and model service
//!
//! The bot walks users through a short form (style, optional style image,
//! content images) and forwards the collected images to the model service,
//! which runs either iterative optimization or a pretrained generator.

pub mod actors;
pub mod app;
pub mod cli;
pub mod config;
pub mod core;
pub mod engine;
pub mod server;
pub mod storage;
pub mod styles;

pub use actors::{ConversationEngine, UpdateDispatcher, UpdateRouterHandle};
pub use config::Settings;
pub use core::messenger::{Inbound, Messenger};
pub use core::model_client::{ModelClient, ModelClientError};
pub use engine::{EngineError, InferenceDispatcher, StyleRegistry};
