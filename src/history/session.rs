//! The persisted shape of an agent session.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::context::AgentMemory;

/// Session-scoped data stored alongside the conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    #[serde(default)]
    pub session_state: serde_json::Map<String, serde_json::Value>,
}

/// One storage record: everything known about a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSession {
    pub session_id: String,
    pub agent_id: Option<String>,
    pub user_id: Option<String>,
    pub memory: AgentMemory,
    /// Agent name and model reference.
    pub agent_data: Option<serde_json::Value>,
    pub session_data: SessionData,
    pub extra_data: Option<serde_json::Value>,
    /// Unix timestamp (seconds) of the first write.
    pub created_at: i64,
    /// Unix timestamp (seconds) of the latest write.
    pub updated_at: Option<i64>,
}

impl AgentSession {
    /// A fresh, empty session.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            agent_id: None,
            user_id: None,
            memory: AgentMemory::default(),
            agent_data: None,
            session_data: SessionData::default(),
            extra_data: None,
            created_at: Utc::now().timestamp(),
            updated_at: None,
        }
    }

    /// Number of stored messages across all runs.
    pub fn message_count(&self) -> usize {
        self.memory.runs().iter().map(|r| r.messages.len()).sum()
    }
}
