//! Per-chat user sessions.
//!
//! Every `(channel, user_id, thread_id)` gets its own [`UserSession`], which
//! owns the agent built for that chat.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::agent::Agent;

/// Key identifying one chat.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct SessionKey {
    pub channel: String,
    pub user_id: String,
    pub thread_id: Option<String>,
}

impl SessionKey {
    pub fn new(channel: &str, user_id: &str, thread_id: Option<&str>) -> Self {
        Self {
            channel: channel.to_string(),
            user_id: user_id.to_string(),
            thread_id: thread_id.map(String::from),
        }
    }
}

/// State kept for one chat between messages.
pub struct UserSession {
    pub id: Uuid,
    pub key: SessionKey,
    /// Set by `on_chat_start`.
    pub agent: Option<Agent>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl UserSession {
    pub fn new(key: SessionKey) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            key,
            agent: None,
            created_at: now,
            last_active_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_active_at = Utc::now();
    }
}

/// Chat sessions for all users.
#[derive(Default)]
pub struct UserSessionStore {
    sessions: RwLock<HashMap<SessionKey, Arc<Mutex<UserSession>>>>,
}

impl UserSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the session for `key`, creating it if needed.
    ///
    /// The flag is `true` when the session was created by this call.
    pub async fn get_or_create(&self, key: SessionKey) -> (Arc<Mutex<UserSession>>, bool) {
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(&key) {
                return (Arc::clone(session), false);
            }
        }

        let mut sessions = self.sessions.write().await;
        // Double-check after acquiring write lock
        if let Some(session) = sessions.get(&key) {
            return (Arc::clone(session), false);
        }

        tracing::debug!(channel = %key.channel, user_id = %key.user_id, "New chat session");
        let session = Arc::new(Mutex::new(UserSession::new(key.clone())));
        sessions.insert(key, Arc::clone(&session));
        (session, true)
    }

    pub async fn get(&self, key: &SessionKey) -> Option<Arc<Mutex<UserSession>>> {
        self.sessions.read().await.get(key).cloned()
    }

    pub async fn remove(&self, key: &SessionKey) -> bool {
        self.sessions.write().await.remove(key).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Remove sessions idle for longer than `max_idle`.
    ///
    /// Sessions currently locked by a running message are skipped. Returns
    /// the number removed.
    pub async fn prune_stale_sessions(&self, max_idle: std::time::Duration) -> usize {
        let cutoff = Utc::now() - TimeDelta::seconds(max_idle.as_secs() as i64);

        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| match session.try_lock() {
            Ok(sess) => sess.last_active_at >= cutoff,
            Err(_) => true,
        });
        let count = before - sessions.len();

        if count > 0 {
            tracing::info!(
                "Pruned {} stale chat session(s) (idle > {}s)",
                count,
                max_idle.as_secs()
            );
        }
        count
    }
}
