//! Agent session cache.
//!
//! Sessions are keyed by (working directory, model) so repeated turns against
//! the same checkout reuse the same underlying agent session. The cache is an
//! explicit object owned by the harness, not a process-wide singleton, which
//! keeps cross-test state out and makes the concurrency contract visible: at
//! most one in-flight turn per key at a time. A failed turn evicts its entry
//! so the next call starts a fresh session.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Cache key: one session per (working directory, model) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    /// Agent working directory.
    pub working_dir: PathBuf,
    /// Agent model identifier.
    pub model: String,
}

impl SessionKey {
    /// Create a key.
    pub fn new(working_dir: impl Into<PathBuf>, model: impl Into<String>) -> Self {
        Self {
            working_dir: working_dir.into(),
            model: model.into(),
        }
    }
}

/// A live agent session.
#[derive(Debug, Clone)]
pub struct AgentSession {
    /// Opaque session identifier handed back to the adapter.
    pub id: String,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// Completed turns on this session.
    pub turns: u32,
}

impl AgentSession {
    /// Create a fresh session.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            turns: 0,
        }
    }
}

impl Default for AgentSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Explicit session cache with get/set/evict.
pub struct SessionCache {
    inner: Mutex<HashMap<SessionKey, AgentSession>>,
}

impl SessionCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Look up the session for a key.
    pub fn get(&self, key: &SessionKey) -> Option<AgentSession> {
        self.inner.lock().expect("session cache poisoned").get(key).cloned()
    }

    /// Store a session for a key, replacing any existing one.
    pub fn set(&self, key: SessionKey, session: AgentSession) {
        self.inner
            .lock()
            .expect("session cache poisoned")
            .insert(key, session);
    }

    /// Drop the session for a key. Called after a failed turn.
    pub fn evict(&self, key: &SessionKey) -> Option<AgentSession> {
        self.inner.lock().expect("session cache poisoned").remove(key)
    }

    /// Record a completed turn on a key's session.
    pub fn record_turn(&self, key: &SessionKey) {
        if let Some(session) = self
            .inner
            .lock()
            .expect("session cache poisoned")
            .get_mut(key)
        {
            session.turns += 1;
        }
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("session cache poisoned").len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set_evict() {
        let cache = SessionCache::new();
        let key = SessionKey::new("/tmp/work", "gpt-5.2-codex");

        assert!(cache.get(&key).is_none());

        let session = AgentSession::new();
        let id = session.id.clone();
        cache.set(key.clone(), session);

        assert_eq!(cache.get(&key).unwrap().id, id);
        assert_eq!(cache.len(), 1);

        let evicted = cache.evict(&key).unwrap();
        assert_eq!(evicted.id, id);
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_keys_distinguish_dir_and_model() {
        let cache = SessionCache::new();
        cache.set(
            SessionKey::new("/tmp/a", "model-x"),
            AgentSession::new(),
        );
        cache.set(
            SessionKey::new("/tmp/a", "model-y"),
            AgentSession::new(),
        );
        cache.set(
            SessionKey::new("/tmp/b", "model-x"),
            AgentSession::new(),
        );
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_record_turn() {
        let cache = SessionCache::new();
        let key = SessionKey::new("/tmp/work", "model");
        cache.set(key.clone(), AgentSession::new());

        cache.record_turn(&key);
        cache.record_turn(&key);
        assert_eq!(cache.get(&key).unwrap().turns, 2);

        // Recording against a missing key is a no-op.
        cache.record_turn(&SessionKey::new("/tmp/other", "model"));
        assert_eq!(cache.len(), 1);
    }
}
