//! Messaging Platform Abstraction
//!
//! Information Hiding:
//! - Platform wire formats stay inside the transport implementation
//! - The conversation core only sees these neutral inbound events
//! - Outbound replies go through the `Messenger` trait

use super::session::SessionKey;
use anyhow::Result;
use async_trait::async_trait;

/// Reference to a photo held by the platform, fetched on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoRef {
    pub file_id: String,
}

#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub message_id: i64,
    pub chat_id: i64,
    pub user_id: i64,
    pub first_name: String,
    pub text: Option<String>,
    pub photo: Option<PhotoRef>,
    pub media_group_id: Option<String>,
}

impl IncomingMessage {
    pub fn session_key(&self) -> SessionKey {
        SessionKey::new(self.chat_id, self.user_id)
    }

    /// Command name without the leading slash or a trailing `@botname`.
    pub fn command(&self) -> Option<&str> {
        let text = self.text.as_deref()?.trim_start();
        let word = text.strip_prefix('/')?.split_whitespace().next()?;
        let name = word.split('@').next().unwrap_or(word);
        (!name.is_empty()).then_some(name)
    }

    pub fn is_command(&self, name: &str) -> bool {
        self.command() == Some(name)
    }
}

#[derive(Debug, Clone)]
pub struct CallbackEvent {
    pub id: String,
    pub chat_id: i64,
    pub user_id: i64,
    pub message_id: i64,
    pub data: String,
}

impl CallbackEvent {
    pub fn session_key(&self) -> SessionKey {
        SessionKey::new(self.chat_id, self.user_id)
    }
}

#[derive(Debug, Clone)]
pub enum Inbound {
    Message(IncomingMessage),
    Callback(CallbackEvent),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub text: String,
    pub callback_data: String,
}

impl Button {
    pub fn new(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: callback_data.into(),
        }
    }
}

/// Inline keyboard, row-major.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keyboard {
    pub rows: Vec<Vec<Button>>,
}

impl Keyboard {
    pub fn single_row(buttons: Vec<Button>) -> Self {
        Self { rows: vec![buttons] }
    }

    pub fn single_column(buttons: Vec<Button>) -> Self {
        Self {
            rows: buttons.into_iter().map(|b| vec![b]).collect(),
        }
    }
}

/// Outbound operations the conversation core needs from the platform.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
        keyboard: Option<Keyboard>,
    ) -> Result<()>;

    async fn send_photo(&self, chat_id: i64, image: Vec<u8>) -> Result<()>;

    async fn send_media_group(&self, chat_id: i64, images: Vec<Vec<u8>>) -> Result<()>;

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<()>;

    async fn answer_callback(&self, callback_id: &str) -> Result<()>;

    async fn download_photo(&self, photo: &PhotoRef) -> Result<Vec<u8>>;

    /// Display name of the bot itself.
    async fn bot_name(&self) -> Result<String>;
}
