//! In-process session storage.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::db::SessionStorage;
use crate::error::DatabaseError;
use crate::history::AgentSession;

/// Session storage backed by a map. Contents vanish with the process.
#[derive(Default)]
pub struct InMemoryAgentStorage {
    sessions: RwLock<HashMap<String, AgentSession>>,
}

impl InMemoryAgentStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches(session: &AgentSession, user_id: Option<&str>, agent_id: Option<&str>) -> bool {
    user_id.is_none_or(|u| session.user_id.as_deref() == Some(u))
        && agent_id.is_none_or(|a| session.agent_id.as_deref() == Some(a))
}

#[async_trait]
impl SessionStorage for InMemoryAgentStorage {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn create(&self) -> Result<(), DatabaseError> {
        Ok(())
    }

    async fn table_exists(&self) -> Result<bool, DatabaseError> {
        Ok(true)
    }

    async fn read(
        &self,
        session_id: &str,
        user_id: Option<&str>,
    ) -> Result<Option<AgentSession>, DatabaseError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(session_id)
            .filter(|s| matches(s, user_id, None))
            .cloned())
    }

    async fn upsert(&self, session: &AgentSession) -> Result<AgentSession, DatabaseError> {
        let mut sessions = self.sessions.write().await;
        let mut stored = session.clone();
        stored.updated_at = Some(Utc::now().timestamp());
        if let Some(existing) = sessions.get(&session.session_id) {
            stored.created_at = existing.created_at;
        }
        sessions.insert(stored.session_id.clone(), stored.clone());
        Ok(stored)
    }

    async fn delete_session(&self, session_id: &str) -> Result<bool, DatabaseError> {
        Ok(self.sessions.write().await.remove(session_id).is_some())
    }

    async fn get_all_session_ids(
        &self,
        user_id: Option<&str>,
        agent_id: Option<&str>,
    ) -> Result<Vec<String>, DatabaseError> {
        Ok(self
            .get_all_sessions(user_id, agent_id)
            .await?
            .into_iter()
            .map(|s| s.session_id)
            .collect())
    }

    async fn get_all_sessions(
        &self,
        user_id: Option<&str>,
        agent_id: Option<&str>,
    ) -> Result<Vec<AgentSession>, DatabaseError> {
        let sessions = self.sessions.read().await;
        let mut out: Vec<AgentSession> = sessions
            .values()
            .filter(|s| matches(s, user_id, agent_id))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        Ok(out)
    }

    async fn drop_table(&self) -> Result<(), DatabaseError> {
        self.sessions.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_keeps_one_record_per_session() {
        let storage = InMemoryAgentStorage::new();

        let mut session = AgentSession::new("s1");
        session.created_at = 100;
        let first = storage.upsert(&session).await.unwrap();
        assert_eq!(first.created_at, 100);
        assert!(first.updated_at.is_some());

        session.created_at = 999;
        session.user_id = Some("alice".to_string());
        let second = storage.upsert(&session).await.unwrap();
        assert_eq!(second.created_at, 100);

        let ids = storage.get_all_session_ids(None, None).await.unwrap();
        assert_eq!(ids, vec!["s1".to_string()]);
    }

    #[tokio::test]
    async fn read_filters_by_user() {
        let storage = InMemoryAgentStorage::new();
        let mut session = AgentSession::new("s1");
        session.user_id = Some("alice".to_string());
        storage.upsert(&session).await.unwrap();

        assert!(storage.read("s1", None).await.unwrap().is_some());
        assert!(storage.read("s1", Some("alice")).await.unwrap().is_some());
        assert!(storage.read("s1", Some("bob")).await.unwrap().is_none());
        assert!(storage.read("missing", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sessions_listed_newest_first_and_deletable() {
        let storage = InMemoryAgentStorage::new();
        for (id, ts) in [("old", 1), ("new", 3), ("mid", 2)] {
            let mut s = AgentSession::new(id);
            s.created_at = ts;
            s.agent_id = Some("agent".to_string());
            storage.upsert(&s).await.unwrap();
        }

        let ids = storage.get_all_session_ids(None, Some("agent")).await.unwrap();
        assert_eq!(ids, vec!["new", "mid", "old"]);
        assert!(storage.get_all_sessions(None, Some("other")).await.unwrap().is_empty());

        assert!(storage.delete_session("mid").await.unwrap());
        assert!(!storage.delete_session("mid").await.unwrap());
        assert_eq!(storage.get_all_sessions(None, None).await.unwrap().len(), 2);
    }
}
