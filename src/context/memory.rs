//! Conversation memory for an agent session.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::llm::{ChatMessage, Role, ToolCall};

/// A message as persisted in session memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Unix timestamp (seconds).
    pub created_at: i64,
}

impl StoredMessage {
    /// Stamp a chat message with the current time.
    pub fn now(message: ChatMessage) -> Self {
        Self {
            role: message.role,
            content: message.content,
            tool_call_id: message.tool_call_id,
            name: message.name,
            tool_calls: message.tool_calls,
            created_at: Utc::now().timestamp(),
        }
    }
}

impl From<StoredMessage> for ChatMessage {
    fn from(msg: StoredMessage) -> Self {
        ChatMessage {
            role: msg.role,
            content: msg.content,
            tool_call_id: msg.tool_call_id,
            name: msg.name,
            tool_calls: msg.tool_calls,
        }
    }
}

/// One user input and everything the agent did to answer it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRun {
    pub run_id: Uuid,
    /// The user's message.
    pub input: String,
    /// The final assistant response.
    pub content: String,
    /// Messages exchanged during the run, system prompt excluded.
    pub messages: Vec<StoredMessage>,
    /// Unix timestamp (seconds).
    pub created_at: i64,
}

impl AgentRun {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            input: input.into(),
            content: String::new(),
            messages: Vec::new(),
            created_at: Utc::now().timestamp(),
        }
    }
}

/// Ordered runs of a session. Only ever appended to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMemory {
    #[serde(default)]
    runs: Vec<AgentRun>,
}

impl AgentMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a completed run.
    pub fn add_run(&mut self, run: AgentRun) {
        self.runs.push(run);
    }

    pub fn runs(&self) -> &[AgentRun] {
        &self.runs
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// User and assistant text from the last `num_runs` runs, oldest first.
    ///
    /// Tool traffic is left out so the result is always a valid prefix for a
    /// new request.
    pub fn history_messages(&self, num_runs: usize) -> Vec<ChatMessage> {
        let start = self.runs.len().saturating_sub(num_runs);
        self.runs[start..]
            .iter()
            .flat_map(|run| run.messages.iter())
            .filter(|m| match m.role {
                Role::User => true,
                Role::Assistant => m.tool_calls.is_none() && !m.content.is_empty(),
                Role::System | Role::Tool => false,
            })
            .cloned()
            .map(ChatMessage::from)
            .collect()
    }

    /// Every stored message across all runs, oldest first.
    pub fn all_messages(&self) -> Vec<&StoredMessage> {
        self.runs.iter().flat_map(|run| run.messages.iter()).collect()
    }
}
