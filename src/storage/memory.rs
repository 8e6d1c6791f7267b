//! In-Memory Session Storage
//!
//! Information Hiding:
//! - HashMap storage structure hidden from users
//! - Thread-safe access via RwLock hidden behind async interface
//! - Sessions are lost when the process terminates

use super::SessionStorage;
use crate::core::session::{Session, SessionKey};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory storage using HashMap
pub struct InMemorySessionStorage {
    sessions: Arc<RwLock<HashMap<SessionKey, Session>>>,
}

impl InMemorySessionStorage {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for InMemorySessionStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStorage for InMemorySessionStorage {
    async fn load(&self, key: SessionKey) -> Result<Option<Session>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(&key).cloned())
    }

    async fn store(&self, key: SessionKey, session: Session) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        tracing::debug!(
            "[InMemorySessionStorage] Session {} -> {}",
            key,
            session.state
        );
        sessions.insert(key, session);
        Ok(())
    }

    async fn store_if(&self, key: SessionKey, generation: u64, session: Session) -> Result<bool> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&key) {
            Some(current) if current.generation == generation => {
                tracing::debug!(
                    "[InMemorySessionStorage] Session {} -> {}",
                    key,
                    session.state
                );
                *current = session;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn remove(&self, key: SessionKey) -> Result<Option<Session>> {
        let mut sessions = self.sessions.write().await;
        let removed = sessions.remove(&key);
        if removed.is_some() {
            tracing::debug!("[InMemorySessionStorage] Removed session {}", key);
        }
        Ok(removed)
    }

    async fn remove_if(&self, key: SessionKey, generation: u64) -> Result<bool> {
        let mut sessions = self.sessions.write().await;
        match sessions.get(&key) {
            Some(session) if session.generation == generation => {
                sessions.remove(&key);
                tracing::debug!(
                    "[InMemorySessionStorage] Removed session {} (generation {})",
                    key,
                    generation
                );
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::FormState;

    #[tokio::test]
    async fn test_store_and_load() {
        let storage = InMemorySessionStorage::new();
        let key = SessionKey::new(1, 2);
        let mut session = Session::new(1);
        session.style = Some("style_monet".to_string());

        storage.store(key, session.clone()).await.unwrap();
        let loaded = storage.load(key).await.unwrap();

        assert_eq!(loaded, Some(session));
        assert_eq!(storage.state(key).await.unwrap(), FormState::ChooseStyle);
    }

    #[tokio::test]
    async fn test_missing_session_is_idle() {
        let storage = InMemorySessionStorage::new();
        let key = SessionKey::new(1, 2);

        assert!(storage.load(key).await.unwrap().is_none());
        assert_eq!(storage.state(key).await.unwrap(), FormState::Idle);
    }

    #[tokio::test]
    async fn test_sessions_are_per_user() {
        let storage = InMemorySessionStorage::new();
        storage.store(SessionKey::new(1, 2), Session::new(1)).await.unwrap();

        assert_eq!(
            storage.state(SessionKey::new(1, 3)).await.unwrap(),
            FormState::Idle
        );
        assert_eq!(storage.len().await, 1);
    }

    #[tokio::test]
    async fn test_remove_if_checks_generation() {
        let storage = InMemorySessionStorage::new();
        let key = SessionKey::new(1, 2);
        storage.store(key, Session::new(7)).await.unwrap();

        assert!(!storage.remove_if(key, 6).await.unwrap());
        assert!(storage.load(key).await.unwrap().is_some());

        assert!(storage.remove_if(key, 7).await.unwrap());
        assert!(storage.load(key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_if_never_revives_a_removed_session() {
        let storage = InMemorySessionStorage::new();
        let key = SessionKey::new(1, 2);
        storage.store(key, Session::new(3)).await.unwrap();

        let mut advanced = storage.load(key).await.unwrap().unwrap();
        advanced.state = FormState::SendContentImages;

        // A cancel lands between load and write-back.
        storage.remove(key).await.unwrap();
        assert!(!storage.store_if(key, 3, advanced.clone()).await.unwrap());
        assert!(storage.load(key).await.unwrap().is_none());

        // A newer form is not overwritten by the stale one either.
        storage.store(key, Session::new(4)).await.unwrap();
        assert!(!storage.store_if(key, 3, advanced).await.unwrap());
        assert_eq!(
            storage.state(key).await.unwrap(),
            FormState::ChooseStyle
        );
    }

    #[tokio::test]
    async fn test_store_if_updates_current_generation() {
        let storage = InMemorySessionStorage::new();
        let key = SessionKey::new(1, 2);
        storage.store(key, Session::new(3)).await.unwrap();

        let mut advanced = Session::new(3);
        advanced.state = FormState::SendStyleImage;
        assert!(storage.store_if(key, 3, advanced).await.unwrap());
        assert_eq!(
            storage.state(key).await.unwrap(),
            FormState::SendStyleImage
        );
    }

    #[tokio::test]
    async fn test_remove() {
        let storage = InMemorySessionStorage::new();
        let key = SessionKey::new(1, 2);
        storage.store(key, Session::new(1)).await.unwrap();

        assert!(storage.remove(key).await.unwrap().is_some());
        assert!(storage.remove(key).await.unwrap().is_none());
    }
}
