//! Session state persistence
//!
//! Holds one `ConversationState` per session id. Currently in-memory; the
//! trait is the seam for a durable backend.

use crate::models::ConversationState;
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Trait for session persistence
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Option<ConversationState>>;
    /// Replace the stored state for `state.session_id`
    async fn save(&self, state: ConversationState) -> Result<()>;
    async fn delete(&self, session_id: &str) -> Result<bool>;
    async fn list_sessions(&self) -> Result<Vec<String>>;
}

/// In-memory session store for development and tests
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, ConversationState>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<ConversationState>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(session_id).cloned())
    }

    async fn save(&self, state: ConversationState) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(state.session_id.clone(), state);
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<bool> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions.remove(session_id).is_some())
    }

    async fn list_sessions(&self) -> Result<Vec<String>> {
        let sessions = self.sessions.read().await;
        let mut ids: Vec<String> = sessions.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
