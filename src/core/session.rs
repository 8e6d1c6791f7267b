//! Conversation session model
//!
//! One session exists per (chat, user) pair while the user is inside the
//! style-transfer form. Idle users have no session at all.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub chat_id: i64,
    pub user_id: i64,
}

impl SessionKey {
    pub fn new(chat_id: i64, user_id: i64) -> Self {
        Self { chat_id, user_id }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chat_id, self.user_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormState {
    Idle,
    ChooseStyle,
    SendStyleImage,
    SendContentImages,
    AwaitModelResponse,
}

impl fmt::Display for FormState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormState::Idle => write!(f, "idle"),
            FormState::ChooseStyle => write!(f, "choose_style"),
            FormState::SendStyleImage => write!(f, "send_style_image"),
            FormState::SendContentImages => write!(f, "send_content_images"),
            FormState::AwaitModelResponse => write!(f, "await_model_response"),
        }
    }
}

/// Accumulated form fields.
///
/// `generation` identifies one pass through the form, so cleanup and
/// delivery of a finished request never touch a session the user started
/// afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub generation: u64,
    pub state: FormState,
    pub style: Option<String>,
    pub style_image: Option<Vec<u8>>,
    pub content_images: Vec<Vec<u8>>,
}

impl Session {
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            state: FormState::ChooseStyle,
            style: None,
            style_image: None,
            content_images: Vec::new(),
        }
    }
}
