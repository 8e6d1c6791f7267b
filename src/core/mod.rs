pub mod codec;
pub mod messenger;
pub mod model_client;
pub mod session;
pub mod telegram;
