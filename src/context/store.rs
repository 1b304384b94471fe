//! In-memory session store
//!
//! Owns one [`ConversationHistory`] per logical session. Created per session,
//! removable on teardown; nothing is persisted across restarts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::ConversationHistory;

/// Shared handle to one session's history
pub type SessionHandle = Arc<Mutex<ConversationHistory>>;

/// Keyed store of per-session conversation histories
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<String, SessionHandle>>>,
}

impl SessionStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new session and return its id and history handle
    #[must_use]
    pub fn create(&self) -> (String, SessionHandle) {
        let id = uuid::Uuid::new_v4().to_string();
        let handle: SessionHandle = Arc::new(Mutex::new(ConversationHistory::new()));
        self.lock().insert(id.clone(), Arc::clone(&handle));
        tracing::debug!(session_id = %id, "session created");
        (id, handle)
    }

    /// Look up an existing session
    #[must_use]
    pub fn get(&self, id: &str) -> Option<SessionHandle> {
        self.lock().get(id).cloned()
    }

    /// Tear down a session. Returns true if it existed.
    pub fn remove(&self, id: &str) -> bool {
        let existed = self.lock().remove(id).is_some();
        if existed {
            tracing::debug!(session_id = %id, "session removed");
        }
        existed
    }

    /// Number of live sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionHandle>> {
        self.sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Role;

    #[test]
    fn create_get_remove_lifecycle() {
        let store = SessionStore::new();
        let (id, handle) = store.create();
        assert_eq!(store.len(), 1);

        handle.lock().unwrap().append(Role::User, "hello");
        let same = store.get(&id).expect("session exists");
        assert_eq!(same.lock().unwrap().len(), 1);

        assert!(store.remove(&id));
        assert!(!store.remove(&id));
        assert!(store.is_empty());
    }
}
