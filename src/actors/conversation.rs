//! Conversation Engine
//!
//! Walks a user through the style-transfer form:
//! choose style -> style image (custom only) -> content images -> result.
//!
//! Information Hiding:
//! - Session bookkeeping is hidden behind `SessionStorage`
//! - Platform calls are hidden behind `Messenger`
//! - The model service round trip is hidden behind `ModelClient`
//! - Callers only see `resolve` (pick a route) and `run` (execute it)

use crate::core::messenger::{Button, CallbackEvent, IncomingMessage, Keyboard, Messenger};
use crate::core::model_client::ModelClient;
use crate::core::session::{FormState, Session, SessionKey};
use crate::storage::SessionStorage;
use crate::styles::{StyleDef, STYLE_CATALOG};
use anyhow::{Context, Result};
use futures::future::try_join_all;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const START_STYLE_TRANSFER: &str = "start_style_transfer";
pub const POSTPONE_STYLE_TRANSFER: &str = "postpone_style_transfer";

pub mod replies {
    pub const HELP: &str = "Here are my commands:\n\
        /help - list of commands\n\
        /examples - show examples of style transfer\n\
        /start - let's get acquainted!\n\
        /transfer - transfer a style from one image to another\n\
        /cancel - cancel the current operation";
    pub const STARTING: &str = "Great! We're starting!";
    pub const POSTPONED: &str = "Ok, maybe next time... Anyway I'll be here.\n\
        In case you change your mind, just send me this \"/transfer\".";
    pub const CHOOSE_STYLE: &str = "Which style would you like to use?\n\
        You can choose one of the suggested styles or whichever you want (the \"Custom\" option)";
    pub const SEND_STYLE_IMAGE: &str = "Please send me a single image with the style you would like to transfer. \
        For better results use a square image.";
    pub const MAGIC_BEGUN: &str =
        "Ok, the magic has begun! It can take a while. I'll text you when it's done.";
    pub const HERE_YOU_ARE: &str = "Here you are!";
    pub const CANCELLED: &str = "Operation is cancelled.\nSee you next time!";
    pub const NOTHING_TO_CANCEL: &str = "Nothing to cancel";
    pub const EXAMPLES: &str = "Here are examples of style transfer:";
    pub const ONLY_COMMANDS: &str =
        "Sorry, I only understand commands. Feel free to use \"/help\".";
    pub const CANCEL_HINT: &str =
        "If you want to cancel the current operation, just send \"/cancel\" to the chat.";

    pub fn greeting(user_name: &str, bot_name: &str) -> String {
        format!(
            "Hi, {}!\nMy name is \"{}\".\nNice to meet you!\n\
             I can transfer the style from one image to another.\n\
             Here are some \"/examples\".\nWould you like to try?",
            user_name, bot_name
        )
    }

    pub fn send_content_images(max_images: usize) -> String {
        format!(
            "Please send me up to {} images that you would like to transform.\n\
             Please make sure that it will be a single image or a gallery, \
             otherwise only the first image will be processed.",
            max_images
        )
    }

    pub fn style_image_received(max_images: usize) -> String {
        format!(
            "Thanks!\nNow send me up to {} images that you would like to transform.\n\
             Please make sure that it will be a single image or a gallery, \
             otherwise only the first image will be processed.\n\
             For better results use square images.",
            max_images
        )
    }
}

/// What a message should trigger, decided from its content and the
/// sender's form state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Help,
    Start,
    Transfer,
    Examples,
    Cancel,
    StyleImage,
    ContentImage,
    ContentGallery,
    Reminder(FormState),
}

impl Route {
    /// Stable name used to build throttle keys.
    pub fn handler_name(&self) -> &'static str {
        match self {
            Route::Help => "help",
            Route::Start => "start",
            Route::Transfer => "transfer",
            Route::Examples => "examples",
            Route::Cancel => "cancel",
            Route::StyleImage => "style_image",
            Route::ContentImage => "content_image",
            Route::ContentGallery => "content_gallery",
            Route::Reminder(_) => "other",
        }
    }
}

pub struct ConversationEngine {
    messenger: Arc<dyn Messenger>,
    storage: Arc<dyn SessionStorage>,
    model: ModelClient,
    max_images: usize,
    generations: AtomicU64,
}

impl ConversationEngine {
    pub fn new(
        messenger: Arc<dyn Messenger>,
        storage: Arc<dyn SessionStorage>,
        model: ModelClient,
        max_images: usize,
    ) -> Self {
        Self {
            messenger,
            storage,
            model,
            max_images: max_images.max(1),
            generations: AtomicU64::new(1),
        }
    }

    pub async fn resolve(&self, message: &IncomingMessage) -> Result<Route> {
        if message.is_command("cancel") {
            return Ok(Route::Cancel);
        }

        let state = self.storage.state(message.session_key()).await?;
        let route = match state {
            FormState::Idle => match message.command() {
                Some("help") => Route::Help,
                Some("start") => Route::Start,
                Some("transfer") => Route::Transfer,
                Some("examples") => Route::Examples,
                _ => Route::Reminder(state),
            },
            FormState::SendStyleImage
                if message.photo.is_some() && message.media_group_id.is_none() =>
            {
                Route::StyleImage
            }
            FormState::SendContentImages if message.photo.is_some() => {
                if message.media_group_id.is_some() {
                    Route::ContentGallery
                } else {
                    Route::ContentImage
                }
            }
            _ => Route::Reminder(state),
        };
        Ok(route)
    }

    /// Execute a route. `batch` carries the sealed media group when the
    /// message represents one.
    ///
    /// A failing handler tears down the session it started with; the caller
    /// is responsible for apologising to the user.
    pub async fn run(
        &self,
        route: Route,
        message: &IncomingMessage,
        batch: Option<Vec<IncomingMessage>>,
    ) -> Result<()> {
        let key = message.session_key();
        let generation = self.storage.load(key).await?.map(|s| s.generation);

        tracing::debug!(
            "[Conversation] {} -> {} (message {})",
            key,
            route.handler_name(),
            message.message_id
        );

        let result = match route {
            Route::Help => self.reply(message, replies::HELP, None).await,
            Route::Start => self.start(message).await,
            Route::Transfer => self.begin_form(key).await,
            Route::Examples => self.examples(message.chat_id).await,
            Route::Cancel => self.cancel(message).await,
            Route::StyleImage => self.receive_style_image(message).await,
            Route::ContentImage => {
                self.receive_content_images(message, std::slice::from_ref(message))
                    .await
            }
            Route::ContentGallery => {
                let batch = batch.unwrap_or_else(|| vec![message.clone()]);
                self.receive_content_images(message, &batch).await
            }
            Route::Reminder(state) => self.remind(message, state).await,
        };

        if result.is_err() {
            if let Some(generation) = generation {
                self.storage.remove_if(key, generation).await?;
            }
        }
        result
    }

    pub async fn handle_callback(&self, callback: CallbackEvent) -> Result<()> {
        if let Err(e) = self.messenger.answer_callback(&callback.id).await {
            tracing::warn!("[Conversation] Failed to answer callback {}: {}", callback.id, e);
        }

        let key = callback.session_key();
        let state = self.storage.state(key).await?;

        match (state, callback.data.as_str()) {
            (FormState::Idle, START_STYLE_TRANSFER) => {
                self.messenger
                    .send_text(callback.chat_id, replies::STARTING, None, None)
                    .await?;
                self.begin_form(key).await
            }
            (FormState::Idle, POSTPONE_STYLE_TRANSFER) => {
                self.messenger
                    .send_text(callback.chat_id, replies::POSTPONED, None, None)
                    .await
            }
            (FormState::ChooseStyle, data) => match StyleDef::find_by_id(data) {
                Some(style) => self.choose_style(key, style).await,
                None => {
                    tracing::warn!("[Conversation] Unknown style '{}' from {}", data, key);
                    self.messenger
                        .send_text(
                            callback.chat_id,
                            &reminder_text(FormState::ChooseStyle, self.max_images),
                            None,
                            None,
                        )
                        .await
                }
            },
            (state, data) => {
                tracing::debug!(
                    "[Conversation] Ignoring callback '{}' from {} in state {}",
                    data,
                    key,
                    state
                );
                Ok(())
            }
        }
    }

    async fn reply(
        &self,
        message: &IncomingMessage,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<()> {
        self.messenger
            .send_text(message.chat_id, text, Some(message.message_id), keyboard)
            .await
    }

    async fn start(&self, message: &IncomingMessage) -> Result<()> {
        let bot_name = self.messenger.bot_name().await?;
        let keyboard = Keyboard::single_row(vec![
            Button::new("Yes!", START_STYLE_TRANSFER),
            Button::new("Maybe later...", POSTPONE_STYLE_TRANSFER),
        ]);
        self.reply(
            message,
            &replies::greeting(&message.first_name, &bot_name),
            Some(keyboard),
        )
        .await
    }

    async fn begin_form(&self, key: SessionKey) -> Result<()> {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        self.storage.store(key, Session::new(generation)).await?;

        let keyboard = Keyboard::single_column(
            STYLE_CATALOG
                .iter()
                .map(|s| Button::new(s.label, s.id))
                .collect(),
        );
        self.messenger
            .send_text(key.chat_id, replies::CHOOSE_STYLE, None, Some(keyboard))
            .await
    }

    async fn choose_style(&self, key: SessionKey, style: &StyleDef) -> Result<()> {
        let Some(mut session) = self.storage.load(key).await? else {
            return self.discard(key, "style choice");
        };
        let generation = session.generation;
        session.style = Some(style.id.to_string());

        let text = if style.is_custom() {
            session.state = FormState::SendStyleImage;
            replies::SEND_STYLE_IMAGE.to_string()
        } else {
            session.state = FormState::SendContentImages;
            session.style_image = None;
            replies::send_content_images(self.max_images)
        };

        if !self.storage.store_if(key, generation, session).await? {
            return self.discard(key, "style choice");
        }
        tracing::info!("[Conversation] {} chose {}", key, style.id);
        self.messenger.send_text(key.chat_id, &text, None, None).await
    }

    async fn receive_style_image(&self, message: &IncomingMessage) -> Result<()> {
        let key = message.session_key();
        let photo = message.photo.as_ref().context("style image message has no photo")?;
        let Some(mut session) = self.storage.load(key).await? else {
            return self.discard(key, "style image");
        };
        let generation = session.generation;

        session.style_image = Some(self.messenger.download_photo(photo).await?);
        session.state = FormState::SendContentImages;
        if !self.storage.store_if(key, generation, session).await? {
            return self.discard(key, "style image");
        }

        self.messenger
            .send_text(
                message.chat_id,
                &replies::style_image_received(self.max_images),
                None,
                None,
            )
            .await
    }

    /// Collect up to `max_images` photos in arrival order, then request the
    /// transfer and deliver the result.
    async fn receive_content_images(
        &self,
        message: &IncomingMessage,
        batch: &[IncomingMessage],
    ) -> Result<()> {
        let key = message.session_key();
        let Some(mut session) = self.storage.load(key).await? else {
            return self.discard(key, "content images");
        };
        let generation = session.generation;
        let style = session
            .style
            .clone()
            .context("content images received before a style was chosen")?;

        let photos: Vec<_> = batch
            .iter()
            .filter_map(|m| m.photo.as_ref())
            .take(self.max_images)
            .collect();
        let images = try_join_all(photos.into_iter().map(|p| self.messenger.download_photo(p))).await?;

        session.content_images = images;
        session.state = FormState::AwaitModelResponse;
        let style_image = session.style_image.clone();
        let content_images = session.content_images.clone();
        if !self.storage.store_if(key, generation, session).await? {
            return self.discard(key, "content images");
        }

        let outcome = self
            .transfer_and_deliver(key, generation, &style, style_image.as_deref(), &content_images)
            .await;

        // The form ends here whatever the outcome.
        self.storage.remove_if(key, generation).await?;
        outcome
    }

    /// The form was cancelled or replaced while this step was in flight.
    fn discard(&self, key: SessionKey, step: &str) -> Result<()> {
        tracing::info!("[Conversation] Dropping {} from {}: form is closed", step, key);
        Ok(())
    }

    async fn transfer_and_deliver(
        &self,
        key: SessionKey,
        generation: u64,
        style: &str,
        style_image: Option<&[u8]>,
        content_images: &[Vec<u8>],
    ) -> Result<()> {
        self.messenger
            .send_text(key.chat_id, replies::MAGIC_BEGUN, None, None)
            .await?;

        let fitted = self.model.transfer(style, style_image, content_images).await?;

        let still_waiting = matches!(
            self.storage.load(key).await?,
            Some(ref s) if s.generation == generation && s.state == FormState::AwaitModelResponse
        );
        if !still_waiting {
            tracing::info!(
                "[Conversation] Discarding {} image(s) for {}: request was cancelled",
                fitted.len(),
                key
            );
            return Ok(());
        }

        self.messenger
            .send_text(key.chat_id, replies::HERE_YOU_ARE, None, None)
            .await?;
        self.deliver_images(key.chat_id, fitted).await
    }

    async fn deliver_images(&self, chat_id: i64, mut images: Vec<Vec<u8>>) -> Result<()> {
        match images.len() {
            0 => {
                tracing::warn!("[Conversation] Nothing to deliver to chat {}", chat_id);
                Ok(())
            }
            1 => self.messenger.send_photo(chat_id, images.remove(0)).await,
            _ => self.messenger.send_media_group(chat_id, images).await,
        }
    }

    async fn cancel(&self, message: &IncomingMessage) -> Result<()> {
        match self.storage.remove(message.session_key()).await? {
            Some(session) => {
                tracing::info!(
                    "[Conversation] {} cancelled in state {}",
                    message.session_key(),
                    session.state
                );
                self.reply(message, replies::CANCELLED, None).await
            }
            None => self.reply(message, replies::NOTHING_TO_CANCEL, None).await,
        }
    }

    async fn examples(&self, chat_id: i64) -> Result<()> {
        self.messenger
            .send_text(chat_id, replies::EXAMPLES, None, None)
            .await?;
        let examples = self.model.examples().await?;
        self.deliver_images(chat_id, examples).await
    }

    async fn remind(&self, message: &IncomingMessage, state: FormState) -> Result<()> {
        self.reply(message, &reminder_text(state, self.max_images), None)
            .await
    }
}

pub fn reminder_text(state: FormState, max_images: usize) -> String {
    let expectation = match state {
        FormState::Idle => return replies::ONLY_COMMANDS.to_string(),
        FormState::ChooseStyle => {
            "Just a little reminder.\nFor now I expect you to choose a style from the list."
                .to_string()
        }
        FormState::SendStyleImage => {
            "Just a little reminder.\nFor now I expect you to send me a single style-image."
                .to_string()
        }
        FormState::SendContentImages => format!(
            "Just a little reminder.\nFor now I expect you to send me up to {} images to be transformed.",
            max_images
        ),
        FormState::AwaitModelResponse => {
            "I'm working on your request. Please wait a moment.".to_string()
        }
    };
    format!("{}\n{}", expectation, replies::CANCEL_HINT)
}
