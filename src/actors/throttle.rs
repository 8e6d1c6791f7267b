//! Throttle actor
//!
//! Owns the per-(chat, user, handler) rate table. A call is allowed when at
//! least `rate` has elapsed since the previous call with the same key;
//! consecutive rejections bump an exceeded counter that resets on the next
//! allowed call.

use crate::actors::messages::*;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::sync::oneshot;
use tokio::time::Instant;

#[derive(Clone)]
pub struct ThrottleHandle {
    sender: Sender<ThrottleMessage>,
}

struct RateRecord {
    last_call: Instant,
    exceeded_count: u32,
}

impl ThrottleHandle {
    pub fn new(buffer_size: usize) -> Self {
        let (sender, receiver) = channel(buffer_size);
        tokio::spawn(throttle_actor(receiver));
        Self { sender }
    }

    /// Record a call for `key` and decide whether it may proceed.
    pub async fn throttle(&self, key: ThrottleKey, rate: Duration) -> anyhow::Result<Verdict> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ThrottleMessage::Throttle {
                key,
                rate,
                response: tx,
            })
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send message to throttle actor: {}", e))?;
        Ok(rx.await?)
    }

    /// Current exceeded counter for `key` without recording a call.
    pub async fn check(&self, key: ThrottleKey) -> anyhow::Result<Option<u32>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ThrottleMessage::Check { key, response: tx })
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send message to throttle actor: {}", e))?;
        Ok(rx.await?)
    }
}

fn evaluate(record: &mut RateRecord, now: Instant, rate: Duration) -> Verdict {
    let delta = now.saturating_duration_since(record.last_call);
    record.last_call = now;

    // A zero delta is a brand-new record.
    if delta >= rate || delta.is_zero() {
        record.exceeded_count = 0;
        Verdict::Allowed
    } else {
        record.exceeded_count += 1;
        Verdict::Throttled(Violation {
            exceeded_count: record.exceeded_count,
            retry_after: rate - delta,
        })
    }
}

async fn throttle_actor(mut receiver: Receiver<ThrottleMessage>) {
    let mut records: HashMap<ThrottleKey, RateRecord> = HashMap::new();

    tracing::info!("Throttle actor started");

    while let Some(message) = receiver.recv().await {
        match message {
            ThrottleMessage::Throttle {
                key,
                rate,
                response,
            } => {
                let now = Instant::now();
                let record = records.entry(key.clone()).or_insert(RateRecord {
                    last_call: now,
                    exceeded_count: 0,
                });
                let verdict = evaluate(record, now, rate);
                if let Verdict::Throttled(violation) = verdict {
                    tracing::debug!(
                        "Throttled {} for chat {} user {} (count {})",
                        key.key,
                        key.chat_id,
                        key.user_id,
                        violation.exceeded_count
                    );
                }
                let _ = response.send(verdict);
            }
            ThrottleMessage::Check { key, response } => {
                let _ = response.send(records.get(&key).map(|r| r.exceeded_count));
            }
        }
    }

    tracing::info!("Throttle actor channel closed, shutting down");
}
