//! Telegram Bot API transport
//!
//! Information Hiding:
//! - Bot API method names, envelopes and multipart uploads stay here
//! - Updates are converted to platform-neutral `Inbound` events
//! - Implements `Messenger` for the conversation core

use super::messenger::{CallbackEvent, IncomingMessage, Inbound, Keyboard, Messenger, PhotoRef};
use crate::config::settings::TelegramConfig;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("Telegram API call '{method}' failed: {description}")]
    Api { method: String, description: String },

    #[error("Telegram request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
    pub photo: Option<Vec<PhotoSize>>,
    pub media_group_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    pub first_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub message: Option<Message>,
    pub data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct File {
    file_path: Option<String>,
}

#[derive(Debug, Serialize)]
struct InlineButton<'a> {
    text: &'a str,
    callback_data: &'a str,
}

impl Update {
    /// Convert to a neutral event. Updates the bot does not handle yield `None`.
    pub fn into_inbound(self) -> Option<Inbound> {
        if let Some(message) = self.message {
            let from = message.from?;
            // Photo sizes are ordered smallest first; keep the largest.
            let photo = message
                .photo
                .and_then(|sizes| sizes.into_iter().max_by_key(|p| p.width * p.height))
                .map(|p| PhotoRef { file_id: p.file_id });

            return Some(Inbound::Message(IncomingMessage {
                message_id: message.message_id,
                chat_id: message.chat.id,
                user_id: from.id,
                first_name: from.first_name,
                text: message.text,
                photo,
                media_group_id: message.media_group_id,
            }));
        }

        let query = self.callback_query?;
        let message = query.message?;
        Some(Inbound::Callback(CallbackEvent {
            id: query.id,
            chat_id: message.chat.id,
            user_id: query.from.id,
            message_id: message.message_id,
            data: query.data.unwrap_or_default(),
        }))
    }
}

pub struct TelegramClient {
    client: Client,
    config: TelegramConfig,
}

impl TelegramClient {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.api_token,
            method
        )
    }

    fn file_url(&self, file_path: &str) -> String {
        format!(
            "{}/file/bot{}/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.api_token,
            file_path
        )
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: &Value) -> Result<T, TelegramError> {
        let response = self
            .client
            .post(self.method_url(method))
            .json(body)
            .send()
            .await?;
        Self::unwrap_envelope(method, response).await
    }

    async fn call_multipart<T: DeserializeOwned>(&self, method: &str, form: Form) -> Result<T, TelegramError> {
        let response = self
            .client
            .post(self.method_url(method))
            .multipart(form)
            .send()
            .await?;
        Self::unwrap_envelope(method, response).await
    }

    async fn unwrap_envelope<T: DeserializeOwned>(
        method: &str,
        response: reqwest::Response,
    ) -> Result<T, TelegramError> {
        let envelope: Envelope<T> = response.json().await?;
        match (envelope.ok, envelope.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(TelegramError::Api {
                method: method.to_string(),
                description: envelope
                    .description
                    .unwrap_or_else(|| "no description".to_string()),
            }),
        }
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, TelegramError> {
        let poll_timeout = self.config.poll_timeout_secs;
        let response = self
            .client
            .post(self.method_url("getUpdates"))
            .json(&json!({
                "offset": offset,
                "timeout": poll_timeout,
                "allowed_updates": ["message", "callback_query"],
            }))
            .timeout(Duration::from_secs(poll_timeout + 10))
            .send()
            .await?;
        Self::unwrap_envelope("getUpdates", response).await
    }

    /// Drop everything queued while the bot was offline; returns the next offset.
    pub async fn skip_pending_updates(&self) -> Result<i64, TelegramError> {
        let pending: Vec<Update> = self
            .call("getUpdates", &json!({ "offset": -1, "timeout": 0 }))
            .await?;
        let next = pending.last().map(|u| u.update_id + 1).unwrap_or(0);
        if next > 0 {
            // Confirm the offset so the skipped updates are not redelivered.
            let _: Vec<Update> = self
                .call("getUpdates", &json!({ "offset": next, "timeout": 0 }))
                .await?;
        }
        Ok(next)
    }
}

fn keyboard_markup(keyboard: &Keyboard) -> Value {
    let rows: Vec<Vec<InlineButton<'_>>> = keyboard
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|b| InlineButton {
                    text: &b.text,
                    callback_data: &b.callback_data,
                })
                .collect()
        })
        .collect();
    json!({ "inline_keyboard": rows })
}

fn png_part(bytes: Vec<u8>, name: &str) -> Result<Part, TelegramError> {
    Ok(Part::bytes(bytes)
        .file_name(format!("{}.png", name))
        .mime_str("image/png")?)
}

#[async_trait]
impl Messenger for TelegramClient {
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
        keyboard: Option<Keyboard>,
    ) -> Result<()> {
        let mut body = json!({ "chat_id": chat_id, "text": text });
        if let Some(message_id) = reply_to {
            body["reply_to_message_id"] = json!(message_id);
        }
        if let Some(keyboard) = keyboard {
            body["reply_markup"] = keyboard_markup(&keyboard);
        }
        let _: Value = self.call("sendMessage", &body).await?;
        Ok(())
    }

    async fn send_photo(&self, chat_id: i64, image: Vec<u8>) -> Result<()> {
        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part("photo", png_part(image, "photo")?);
        let _: Value = self.call_multipart("sendPhoto", form).await?;
        Ok(())
    }

    async fn send_media_group(&self, chat_id: i64, images: Vec<Vec<u8>>) -> Result<()> {
        let mut form = Form::new().text("chat_id", chat_id.to_string());
        let mut media = Vec::with_capacity(images.len());

        for (idx, image) in images.into_iter().enumerate() {
            let name = format!("photo{}", idx);
            media.push(json!({ "type": "photo", "media": format!("attach://{}", name) }));
            form = form.part(name.clone(), png_part(image, &name)?);
        }

        form = form.text("media", Value::Array(media).to_string());
        let _: Value = self.call_multipart("sendMediaGroup", form).await?;
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<()> {
        let _: Value = self
            .call(
                "deleteMessage",
                &json!({ "chat_id": chat_id, "message_id": message_id }),
            )
            .await?;
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str) -> Result<()> {
        let _: Value = self
            .call(
                "answerCallbackQuery",
                &json!({ "callback_query_id": callback_id }),
            )
            .await?;
        Ok(())
    }

    async fn download_photo(&self, photo: &PhotoRef) -> Result<Vec<u8>> {
        let file: File = self
            .call("getFile", &json!({ "file_id": photo.file_id }))
            .await?;
        let file_path = file.file_path.ok_or_else(|| TelegramError::Api {
            method: "getFile".to_string(),
            description: format!("no file path for '{}'", photo.file_id),
        })?;

        let response = self
            .client
            .get(self.file_url(&file_path))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn bot_name(&self) -> Result<String> {
        let me: User = self.call("getMe", &json!({})).await?;
        Ok(me.first_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::messenger::Button;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> TelegramClient {
        TelegramClient::new(TelegramConfig {
            api_token: "TOKEN".to_string(),
            api_url: server.uri(),
            poll_timeout_secs: 0,
            skip_pending_updates: false,
        })
    }

    #[test]
    fn test_photo_update_keeps_largest_size() {
        let update: Update = serde_json::from_value(json!({
            "update_id": 7,
            "message": {
                "message_id": 3,
                "from": {"id": 42, "first_name": "Ann"},
                "chat": {"id": 99},
                "media_group_id": "g1",
                "photo": [
                    {"file_id": "small", "width": 90, "height": 90},
                    {"file_id": "large", "width": 1280, "height": 1280},
                    {"file_id": "medium", "width": 320, "height": 320}
                ]
            }
        }))
        .unwrap();

        match update.into_inbound() {
            Some(Inbound::Message(m)) => {
                assert_eq!(m.photo.unwrap().file_id, "large");
                assert_eq!(m.media_group_id.as_deref(), Some("g1"));
                assert_eq!((m.chat_id, m.user_id), (99, 42));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_callback_update_conversion() {
        let update: Update = serde_json::from_value(json!({
            "update_id": 8,
            "callback_query": {
                "id": "cb1",
                "from": {"id": 42, "first_name": "Ann"},
                "message": {"message_id": 5, "chat": {"id": 99}},
                "data": "style_monet"
            }
        }))
        .unwrap();

        match update.into_inbound() {
            Some(Inbound::Callback(c)) => {
                assert_eq!(c.data, "style_monet");
                assert_eq!(c.session_key().user_id, 42);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_text_with_keyboard() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .and(body_partial_json(json!({
                "chat_id": 99,
                "text": "Pick one",
                "reply_markup": {"inline_keyboard": [[{"text": "Yes!", "callback_data": "yes"}]]}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": {}})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server);
        client
            .send_text(
                99,
                "Pick one",
                None,
                Some(Keyboard::single_row(vec![Button::new("Yes!", "yes")])),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_api_error_is_reported() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/deleteMessage"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "ok": false,
                "description": "Bad Request: message to delete not found"
            })))
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server);
        let err = client.delete_message(99, 1).await.unwrap_err();
        assert!(err.to_string().contains("message to delete not found"));
    }

    #[tokio::test]
    async fn test_download_photo() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/getFile"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": {"file_id": "large", "file_path": "photos/file_1.jpg"}
            })))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/file/botTOKEN/photos/file_1.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg-bytes".to_vec()))
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server);
        let bytes = client
            .download_photo(&PhotoRef {
                file_id: "large".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(bytes, b"jpeg-bytes");
    }

    #[tokio::test]
    async fn test_get_updates() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/getUpdates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": [{
                    "update_id": 11,
                    "message": {
                        "message_id": 1,
                        "from": {"id": 1, "first_name": "Ann"},
                        "chat": {"id": 1},
                        "text": "/start"
                    }
                }]
            })))
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server);
        let updates = client.get_updates(0).await.unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].update_id, 11);
    }
}
