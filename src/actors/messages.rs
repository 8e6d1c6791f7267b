use crate::core::messenger::{IncomingMessage, Inbound};
use std::time::Duration;
use tokio::sync::oneshot;

// Media-group aggregation

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    /// First message of the group; it alone carries the batch downstream.
    Representative,
    /// Appended to an open batch; produces no response of its own.
    Absorbed,
}

#[derive(Debug)]
pub enum MediaGroupMessage {
    Offer {
        group_id: String,
        message: IncomingMessage,
        response: oneshot::Sender<OfferOutcome>,
    },
    Seal {
        group_id: String,
        response: oneshot::Sender<Vec<IncomingMessage>>,
    },
    Release {
        group_id: String,
    },
    PendingCount(oneshot::Sender<usize>),
}

// Throttling

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThrottleKey {
    pub chat_id: i64,
    pub user_id: i64,
    /// Prefix plus the name of the handler the message is routed to.
    pub key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Violation {
    /// Consecutive violations including this one.
    pub exceeded_count: u32,
    /// Remaining cooldown before the sender may write again.
    pub retry_after: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Throttled(Violation),
}

#[derive(Debug)]
pub enum ThrottleMessage {
    Throttle {
        key: ThrottleKey,
        rate: Duration,
        response: oneshot::Sender<Verdict>,
    },
    /// Current exceeded count, `None` when the key was never seen.
    Check {
        key: ThrottleKey,
        response: oneshot::Sender<Option<u32>>,
    },
}

// Update routing

#[derive(Debug)]
pub enum RoutingMessage {
    Update(Inbound),
    Shutdown,
}
