//! Update Router
//!
//! Single entry point for inbound platform updates. The router loop admits
//! updates in arrival order (media-group aggregation happens here), then
//! hands each admitted update to its own task for throttling and handling.
//!
//! Information Hiding:
//! - Aggregation and throttle tables live in their own actors
//! - Handler failures are turned into user-facing apologies here
//! - Callers only push updates and eventually ask for shutdown

use crate::actors::conversation::ConversationEngine;
use crate::actors::media_group::{Admission, BatchGuard, MediaGroupHandle};
use crate::actors::messages::*;
use crate::actors::throttle::ThrottleHandle;
use crate::config::Settings;
use crate::core::messenger::{CallbackEvent, IncomingMessage, Inbound, Messenger};
use crate::core::model_client::ModelClientError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::task::JoinSet;

pub const BANNED: &str = "You've been banned for sending too many messages.\nPlease slow down a bit.";
pub const UNBANNED: &str = "You've been unbanned.";
pub const TIMEOUT_APOLOGY: &str = "Sorry!\nIt seems like the model service or the telegram server is too busy right now.\nPlease try it later.";
pub const UNAVAILABLE_APOLOGY: &str =
    "Sorry!\nIt seems like the model service is unavailable right now.\nPlease try it later.";
pub const GENERIC_APOLOGY: &str = "Sorry! Something went wrong. Please try it later.";

/// Notices are only sent for the first violations of a ban streak.
const MAX_BAN_NOTICES: u32 = 2;

/// An update that passed admission.
pub enum Admitted {
    Message(IncomingMessage),
    Batch {
        representative: IncomingMessage,
        guard: BatchGuard,
    },
    Callback(CallbackEvent),
}

pub struct UpdateDispatcher {
    conversation: Arc<ConversationEngine>,
    messenger: Arc<dyn Messenger>,
    media_groups: MediaGroupHandle,
    throttle: ThrottleHandle,
    key_prefix: String,
    rate_limit: Duration,
    media_group_latency: Duration,
}

impl UpdateDispatcher {
    pub fn new(
        conversation: Arc<ConversationEngine>,
        messenger: Arc<dyn Messenger>,
        settings: &Settings,
    ) -> Self {
        let buffer_size = settings.conversation.channel_buffer_size;
        Self {
            conversation,
            messenger,
            media_groups: MediaGroupHandle::new(buffer_size),
            throttle: ThrottleHandle::new(buffer_size),
            key_prefix: settings.throttle.key_prefix.clone(),
            rate_limit: settings.throttle.rate_limit(),
            media_group_latency: settings.conversation.media_group_latency(),
        }
    }

    pub fn media_groups(&self) -> &MediaGroupHandle {
        &self.media_groups
    }

    /// Ordered step: siblings of an open media group are absorbed here and
    /// yield `None`.
    pub async fn admit(&self, inbound: Inbound) -> Option<Admitted> {
        match inbound {
            Inbound::Callback(callback) => Some(Admitted::Callback(callback)),
            Inbound::Message(message) if message.media_group_id.is_none() => {
                Some(Admitted::Message(message))
            }
            Inbound::Message(message) => {
                let chat_id = message.chat_id;
                match self.media_groups.offer(message.clone()).await {
                    Ok(Admission::Representative(guard)) => Some(Admitted::Batch {
                        representative: message,
                        guard,
                    }),
                    Ok(Admission::Absorbed) => None,
                    Err(e) => {
                        self.report_failure(chat_id, &e).await;
                        None
                    }
                }
            }
        }
    }

    pub async fn process(&self, admitted: Admitted) {
        let (chat_id, result) = match admitted {
            Admitted::Callback(callback) => {
                let chat_id = callback.chat_id;
                (chat_id, self.conversation.handle_callback(callback).await)
            }
            Admitted::Message(message) => (message.chat_id, self.handle_message(message).await),
            Admitted::Batch {
                representative,
                guard,
            } => {
                let chat_id = representative.chat_id;
                let result = self.handle_batch(representative, &guard).await;
                // Releases the batch entry whatever the outcome.
                drop(guard);
                (chat_id, result)
            }
        };

        if let Err(e) = result {
            self.report_failure(chat_id, &e).await;
        }
    }

    pub async fn dispatch(&self, inbound: Inbound) {
        if let Some(admitted) = self.admit(inbound).await {
            self.process(admitted).await;
        }
    }

    async fn handle_message(&self, message: IncomingMessage) -> anyhow::Result<()> {
        let route = self.conversation.resolve(&message).await?;
        let key = ThrottleKey {
            chat_id: message.chat_id,
            user_id: message.user_id,
            key: format!("{}{}", self.key_prefix, route.handler_name()),
        };

        match self.throttle.throttle(key.clone(), self.rate_limit).await? {
            Verdict::Allowed => self.conversation.run(route, &message, None).await,
            Verdict::Throttled(violation) => self.on_throttled(&message, key, violation).await,
        }
    }

    // Media-group messages are not throttled.
    async fn handle_batch(
        &self,
        representative: IncomingMessage,
        guard: &BatchGuard,
    ) -> anyhow::Result<()> {
        tokio::time::sleep(self.media_group_latency).await;
        let batch = guard.seal().await?;
        tracing::debug!(
            "[UpdateRouter] Media group '{}' sealed with {} message(s)",
            guard.group_id(),
            batch.len()
        );

        let route = self.conversation.resolve(&representative).await?;
        self.conversation
            .run(route, &representative, Some(batch))
            .await
    }

    async fn on_throttled(
        &self,
        message: &IncomingMessage,
        key: ThrottleKey,
        violation: Violation,
    ) -> anyhow::Result<()> {
        tracing::info!(
            "[UpdateRouter] Throttled message {} in chat {} (violation {})",
            message.message_id,
            message.chat_id,
            violation.exceeded_count
        );

        if let Err(e) = self
            .messenger
            .delete_message(message.chat_id, message.message_id)
            .await
        {
            tracing::warn!("[UpdateRouter] Failed to delete throttled message: {}", e);
        }

        if violation.exceeded_count <= MAX_BAN_NOTICES {
            self.messenger
                .send_text(message.chat_id, BANNED, None, None)
                .await?;
        }

        tokio::time::sleep(violation.retry_after).await;

        if self.throttle.check(key).await? == Some(violation.exceeded_count) {
            self.messenger
                .send_text(message.chat_id, UNBANNED, None, None)
                .await?;
        }
        Ok(())
    }

    async fn report_failure(&self, chat_id: i64, error: &anyhow::Error) {
        tracing::error!("[UpdateRouter] Handler failed for chat {}: {:#}", chat_id, error);
        if let Err(e) = self
            .messenger
            .send_text(chat_id, failure_reply(error), None, None)
            .await
        {
            tracing::warn!("[UpdateRouter] Failed to send apology to chat {}: {}", chat_id, e);
        }
    }
}

/// Pick the apology matching the first recognizable cause.
pub fn failure_reply(error: &anyhow::Error) -> &'static str {
    for cause in error.chain() {
        if let Some(e) = cause.downcast_ref::<ModelClientError>() {
            match e {
                ModelClientError::Timeout(_) => return TIMEOUT_APOLOGY,
                ModelClientError::Unavailable(_) => return UNAVAILABLE_APOLOGY,
                _ => {}
            }
        }
        if let Some(e) = cause.downcast_ref::<reqwest::Error>() {
            if e.is_timeout() {
                return TIMEOUT_APOLOGY;
            }
        }
    }
    GENERIC_APOLOGY
}

pub struct UpdateRouterHandle {
    sender: Sender<RoutingMessage>,
}

impl UpdateRouterHandle {
    pub fn new(dispatcher: Arc<UpdateDispatcher>, buffer_size: usize) -> Self {
        let (sender, receiver) = channel(buffer_size);
        tokio::spawn(update_router_actor(receiver, dispatcher));
        Self { sender }
    }

    pub async fn send_message(&self, message: RoutingMessage) -> anyhow::Result<()> {
        self.sender
            .send(message)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send message to update router: {}", e))
    }

    pub async fn route(&self, inbound: Inbound) -> anyhow::Result<()> {
        self.send_message(RoutingMessage::Update(inbound)).await
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.send_message(RoutingMessage::Shutdown).await
    }
}

async fn update_router_actor(
    mut receiver: Receiver<RoutingMessage>,
    dispatcher: Arc<UpdateDispatcher>,
) {
    let mut in_flight = JoinSet::new();

    tracing::info!("Update router started");

    loop {
        tokio::select! {
            message = receiver.recv() => match message {
                Some(RoutingMessage::Update(inbound)) => {
                    if let Some(admitted) = dispatcher.admit(inbound).await {
                        let dispatcher = dispatcher.clone();
                        in_flight.spawn(async move { dispatcher.process(admitted).await });
                    }
                }
                Some(RoutingMessage::Shutdown) => {
                    tracing::info!("Update router received shutdown signal");
                    break;
                }
                None => {
                    tracing::info!("Update router channel closed, shutting down");
                    break;
                }
            },
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!("[UpdateRouter] Update task failed: {}", e);
                }
            }
        }
    }

    if !in_flight.is_empty() {
        tracing::info!("Aborting {} in-flight update(s)", in_flight.len());
    }
    in_flight.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_timeout_maps_to_timeout_apology() {
        let error = anyhow::Error::new(ModelClientError::Timeout(Duration::from_secs(1)));
        assert_eq!(failure_reply(&error), TIMEOUT_APOLOGY);

        let wrapped = error.context("transfer failed");
        assert_eq!(failure_reply(&wrapped), TIMEOUT_APOLOGY);
    }

    #[test]
    fn test_other_errors_map_to_generic_apology() {
        let rejected = anyhow::Error::new(ModelClientError::Rejected {
            status: 400,
            message: "Unknown style".to_string(),
        });
        assert_eq!(failure_reply(&rejected), GENERIC_APOLOGY);
        assert_eq!(failure_reply(&anyhow::anyhow!("boom")), GENERIC_APOLOGY);
    }
}
