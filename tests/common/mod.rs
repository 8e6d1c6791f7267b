//! Shared fixtures for the bot-side integration tests.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use stylebot::actors::{ConversationEngine, UpdateDispatcher};
use stylebot::config::settings::ModelServiceConfig;
use stylebot::core::messenger::{
    CallbackEvent, IncomingMessage, Inbound, Keyboard, Messenger, PhotoRef,
};
use stylebot::storage::InMemorySessionStorage;
use stylebot::{ModelClient, Settings};
use tokio::sync::Mutex;

pub const CHAT: i64 = 10;
pub const USER: i64 = 20;

/// Everything the bot sent, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Text(String),
    Photo(Vec<u8>),
    MediaGroup(Vec<Vec<u8>>),
    Deleted(i64),
}

#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<Sent>>,
}

impl RecordingMessenger {
    pub async fn sent(&self) -> Vec<Sent> {
        self.sent.lock().await.clone()
    }

    pub async fn count_text(&self, text: &str) -> usize {
        self.texts().await.iter().filter(|t| t.as_str() == text).count()
    }

    pub async fn texts(&self) -> Vec<String> {
        self.sent()
            .await
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text(text) => Some(text),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_text(
        &self,
        _chat_id: i64,
        text: &str,
        _reply_to: Option<i64>,
        _keyboard: Option<Keyboard>,
    ) -> Result<()> {
        self.sent.lock().await.push(Sent::Text(text.to_string()));
        Ok(())
    }

    async fn send_photo(&self, _chat_id: i64, image: Vec<u8>) -> Result<()> {
        self.sent.lock().await.push(Sent::Photo(image));
        Ok(())
    }

    async fn send_media_group(&self, _chat_id: i64, images: Vec<Vec<u8>>) -> Result<()> {
        self.sent.lock().await.push(Sent::MediaGroup(images));
        Ok(())
    }

    async fn delete_message(&self, _chat_id: i64, message_id: i64) -> Result<()> {
        self.sent.lock().await.push(Sent::Deleted(message_id));
        Ok(())
    }

    async fn answer_callback(&self, _callback_id: &str) -> Result<()> {
        Ok(())
    }

    // Photo bytes are the file id, so payloads can be traced end to end.
    async fn download_photo(&self, photo: &PhotoRef) -> Result<Vec<u8>> {
        Ok(photo.file_id.clone().into_bytes())
    }

    async fn bot_name(&self) -> Result<String> {
        Ok("StyleBot".to_string())
    }
}

pub struct Harness {
    pub dispatcher: Arc<UpdateDispatcher>,
    pub messenger: Arc<RecordingMessenger>,
    pub storage: Arc<InMemorySessionStorage>,
}

pub fn harness(model_url: &str, transfer_timeout_ms: u64) -> Harness {
    let mut settings = Settings::default();
    settings.model_service = ModelServiceConfig {
        model_url: model_url.to_string(),
        username: "bot".to_string(),
        password: "secret".to_string(),
        verify_ssl: false,
        transfer_timeout_ms,
        examples_timeout_ms: transfer_timeout_ms,
    };

    let messenger = Arc::new(RecordingMessenger::default());
    let storage = Arc::new(InMemorySessionStorage::new());
    let model = ModelClient::new(settings.model_service.clone()).unwrap();
    let conversation = Arc::new(ConversationEngine::new(
        messenger.clone(),
        storage.clone(),
        model,
        settings.conversation.max_content_images,
    ));
    let dispatcher = Arc::new(UpdateDispatcher::new(
        conversation,
        messenger.clone(),
        &settings,
    ));

    Harness {
        dispatcher,
        messenger,
        storage,
    }
}

pub fn text(message_id: i64, text: &str) -> Inbound {
    Inbound::Message(IncomingMessage {
        message_id,
        chat_id: CHAT,
        user_id: USER,
        first_name: "Ann".to_string(),
        text: Some(text.to_string()),
        photo: None,
        media_group_id: None,
    })
}

pub fn photo(message_id: i64, file_id: &str, group: Option<&str>) -> Inbound {
    Inbound::Message(IncomingMessage {
        message_id,
        chat_id: CHAT,
        user_id: USER,
        first_name: "Ann".to_string(),
        text: None,
        photo: Some(PhotoRef {
            file_id: file_id.to_string(),
        }),
        media_group_id: group.map(String::from),
    })
}

pub fn button(data: &str) -> Inbound {
    Inbound::Callback(CallbackEvent {
        id: format!("cb-{}", data),
        chat_id: CHAT,
        user_id: USER,
        message_id: 1,
        data: data.to_string(),
    })
}
