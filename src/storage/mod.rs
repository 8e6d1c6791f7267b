//! Session Storage Abstraction
//!
//! Information Hiding:
//! - Storage backend implementation details hidden behind trait
//! - The conversation engine never touches the underlying map directly
//! - Sessions are not persisted across restarts by the bundled backend

use crate::core::session::{FormState, Session, SessionKey};
use anyhow::Result;
use async_trait::async_trait;

pub mod memory;

pub use memory::InMemorySessionStorage;

/// Trait defining conversation session storage
#[async_trait]
pub trait SessionStorage: Send + Sync {
    /// Load the session for a (chat, user) pair, if the user is inside the form
    async fn load(&self, key: SessionKey) -> Result<Option<Session>>;

    /// Create or replace the session
    async fn store(&self, key: SessionKey, session: Session) -> Result<()>;

    /// Replace the session only if the stored one still belongs to
    /// `generation`; returns whether it was written
    async fn store_if(&self, key: SessionKey, generation: u64, session: Session) -> Result<bool>;

    /// Discard the session unconditionally
    async fn remove(&self, key: SessionKey) -> Result<Option<Session>>;

    /// Discard the session only if it still belongs to `generation`
    async fn remove_if(&self, key: SessionKey, generation: u64) -> Result<bool>;

    /// Current form state; users without a session are idle
    async fn state(&self, key: SessionKey) -> Result<FormState> {
        Ok(self
            .load(key)
            .await?
            .map(|s| s.state)
            .unwrap_or(FormState::Idle))
    }
}
