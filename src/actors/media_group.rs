//! Media-group aggregation actor
//!
//! Owns the table of open batches. Every message tagged with a group id is
//! offered here; the first one becomes the batch representative, the rest
//! are appended and suppressed.

use crate::actors::messages::*;
use crate::core::messenger::IncomingMessage;
use std::collections::HashMap;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::sync::oneshot;

#[derive(Clone)]
pub struct MediaGroupHandle {
    sender: Sender<MediaGroupMessage>,
}

/// Result of offering a message to the aggregator.
pub enum Admission {
    Representative(BatchGuard),
    Absorbed,
}

/// Held by the representative while its batch is processed. Dropping the
/// guard releases the batch entry, on success and failure alike.
pub struct BatchGuard {
    group_id: String,
    sender: Sender<MediaGroupMessage>,
}

struct PendingBatch {
    messages: Vec<IncomingMessage>,
    closing: bool,
}

impl MediaGroupHandle {
    pub fn new(buffer_size: usize) -> Self {
        let (sender, receiver) = channel(buffer_size);
        tokio::spawn(media_group_actor(receiver));
        Self { sender }
    }

    async fn send_message(&self, message: MediaGroupMessage) -> anyhow::Result<()> {
        self.sender
            .send(message)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send message to media group actor: {}", e))
    }

    /// Offer a message that carries a media group id.
    pub async fn offer(&self, message: IncomingMessage) -> anyhow::Result<Admission> {
        let group_id = message
            .media_group_id
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Message {} has no media group", message.message_id))?;

        let (tx, rx) = oneshot::channel();
        self.send_message(MediaGroupMessage::Offer {
            group_id: group_id.clone(),
            message,
            response: tx,
        })
        .await?;

        match rx.await? {
            OfferOutcome::Representative => Ok(Admission::Representative(BatchGuard {
                group_id,
                sender: self.sender.clone(),
            })),
            OfferOutcome::Absorbed => Ok(Admission::Absorbed),
        }
    }

    /// Number of batches currently held.
    pub async fn pending_groups(&self) -> anyhow::Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.send_message(MediaGroupMessage::PendingCount(tx)).await?;
        Ok(rx.await?)
    }
}

impl BatchGuard {
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Close the batch and take every message gathered so far, in arrival order.
    pub async fn seal(&self) -> anyhow::Result<Vec<IncomingMessage>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MediaGroupMessage::Seal {
                group_id: self.group_id.clone(),
                response: tx,
            })
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send message to media group actor: {}", e))?;
        Ok(rx.await?)
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        let release = MediaGroupMessage::Release {
            group_id: self.group_id.clone(),
        };
        if let Err(e) = self.sender.try_send(release) {
            tracing::warn!(
                "Media group '{}' could not be released: {}",
                self.group_id,
                e
            );
        }
    }
}

async fn media_group_actor(mut receiver: Receiver<MediaGroupMessage>) {
    let mut batches: HashMap<String, PendingBatch> = HashMap::new();

    tracing::info!("Media group actor started");

    while let Some(message) = receiver.recv().await {
        match message {
            MediaGroupMessage::Offer {
                group_id,
                message,
                response,
            } => {
                let outcome = match batches.get_mut(&group_id) {
                    None => {
                        batches.insert(
                            group_id.clone(),
                            PendingBatch {
                                messages: vec![message],
                                closing: false,
                            },
                        );
                        tracing::debug!("Media group '{}' opened", group_id);
                        OfferOutcome::Representative
                    }
                    Some(batch) if batch.closing => {
                        tracing::warn!(
                            "Message {} arrived after media group '{}' was sealed; dropping it",
                            message.message_id,
                            group_id
                        );
                        OfferOutcome::Absorbed
                    }
                    Some(batch) => {
                        batch.messages.push(message);
                        OfferOutcome::Absorbed
                    }
                };
                let _ = response.send(outcome);
            }
            MediaGroupMessage::Seal { group_id, response } => {
                let sealed = match batches.get_mut(&group_id) {
                    Some(batch) => {
                        batch.closing = true;
                        batch.messages.clone()
                    }
                    None => Vec::new(),
                };
                tracing::debug!(
                    "Media group '{}' sealed with {} message(s)",
                    group_id,
                    sealed.len()
                );
                let _ = response.send(sealed);
            }
            MediaGroupMessage::Release { group_id } => {
                if batches.remove(&group_id).is_some() {
                    tracing::debug!("Media group '{}' released", group_id);
                }
            }
            MediaGroupMessage::PendingCount(response) => {
                let _ = response.send(batches.len());
            }
        }
    }

    tracing::info!("Media group actor channel closed, shutting down");
}
