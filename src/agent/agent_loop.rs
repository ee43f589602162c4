//! The agent: one model, optional storage, tools and session state.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::agent::instructions::{PromptParts, build_system_prompt};
use crate::context::{AgentMemory, AgentRun, StoredMessage};
use crate::db::SessionStorage;
use crate::error::{AgentError, DatabaseError};
use crate::history::{AgentSession, SessionData};
use crate::llm::{ChatMessage, ChunkSink, LlmProvider, ToolCall, ToolCompletionRequest};
use crate::tools::{Tool, ToolContext, ToolRegistry};

/// Runs of history included by default when history is enabled.
pub const DEFAULT_NUM_HISTORY_RUNS: usize = 3;

/// Model round trips allowed per run before giving up.
pub const DEFAULT_MAX_TOOL_ITERATIONS: usize = 10;

/// Result of one run.
#[derive(Debug, Clone)]
pub struct RunResponse {
    pub run_id: Uuid,
    pub session_id: String,
    /// Final assistant text.
    pub content: String,
    /// Everything sent to and received from the model, system prompt included.
    pub messages: Vec<ChatMessage>,
    /// Tool calls made during the run, in order.
    pub tool_calls: Vec<ToolCall>,
}

/// Builder for [`Agent`].
pub struct AgentBuilder {
    llm: Arc<dyn LlmProvider>,
    storage: Option<Arc<dyn SessionStorage>>,
    tools: ToolRegistry,
    session_id: Option<String>,
    user_id: Option<String>,
    agent_id: Option<String>,
    name: Option<String>,
    description: Option<String>,
    instructions: Vec<String>,
    session_state: Map<String, Value>,
    add_history_to_messages: bool,
    num_history_runs: usize,
    add_state_in_messages: bool,
    markdown: bool,
    max_tool_iterations: usize,
}

impl AgentBuilder {
    pub fn storage(mut self, storage: Arc<dyn SessionStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.register(tool);
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instructions.push(instruction.into());
        self
    }

    /// Initial session state. Keys already stored for the session win.
    pub fn session_state(mut self, state: Map<String, Value>) -> Self {
        self.session_state = state;
        self
    }

    pub fn add_history_to_messages(mut self, enabled: bool) -> Self {
        self.add_history_to_messages = enabled;
        self
    }

    pub fn num_history_runs(mut self, runs: usize) -> Self {
        self.num_history_runs = runs;
        self
    }

    pub fn add_state_in_messages(mut self, enabled: bool) -> Self {
        self.add_state_in_messages = enabled;
        self
    }

    pub fn markdown(mut self, enabled: bool) -> Self {
        self.markdown = enabled;
        self
    }

    pub fn max_tool_iterations(mut self, iterations: usize) -> Self {
        self.max_tool_iterations = iterations.max(1);
        self
    }

    pub fn build(self) -> Agent {
        Agent {
            llm: self.llm,
            storage: self.storage,
            tools: self.tools,
            session_id: self.session_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            user_id: self.user_id,
            agent_id: self.agent_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            name: self.name,
            description: self.description,
            instructions: self.instructions,
            session_state: self.session_state,
            memory: AgentMemory::new(),
            created_at: None,
            add_history_to_messages: self.add_history_to_messages,
            num_history_runs: self.num_history_runs,
            add_state_in_messages: self.add_state_in_messages,
            markdown: self.markdown,
            max_tool_iterations: self.max_tool_iterations,
        }
    }
}

/// An LLM call with optional tool use and conversation memory.
///
/// With storage attached the agent reloads its session before every run
/// and writes it back afterwards, so several agents (or processes) sharing
/// a session id append to the same history.
pub struct Agent {
    llm: Arc<dyn LlmProvider>,
    storage: Option<Arc<dyn SessionStorage>>,
    tools: ToolRegistry,
    session_id: String,
    user_id: Option<String>,
    agent_id: String,
    name: Option<String>,
    description: Option<String>,
    instructions: Vec<String>,
    session_state: Map<String, Value>,
    memory: AgentMemory,
    created_at: Option<i64>,
    add_history_to_messages: bool,
    num_history_runs: usize,
    add_state_in_messages: bool,
    markdown: bool,
    max_tool_iterations: usize,
}

impl Agent {
    pub fn builder(llm: Arc<dyn LlmProvider>) -> AgentBuilder {
        AgentBuilder {
            llm,
            storage: None,
            tools: ToolRegistry::new(),
            session_id: None,
            user_id: None,
            agent_id: None,
            name: None,
            description: None,
            instructions: Vec::new(),
            session_state: Map::new(),
            add_history_to_messages: false,
            num_history_runs: DEFAULT_NUM_HISTORY_RUNS,
            add_state_in_messages: false,
            markdown: false,
            max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn model(&self) -> &str {
        self.llm.model_name()
    }

    pub fn storage(&self) -> Option<&Arc<dyn SessionStorage>> {
        self.storage.as_ref()
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn session_state(&self) -> &Map<String, Value> {
        &self.session_state
    }

    pub fn memory(&self) -> &AgentMemory {
        &self.memory
    }

    /// Every stored message of the session, oldest first.
    pub fn messages_for_session(&self) -> Vec<&StoredMessage> {
        self.memory.all_messages()
    }

    /// Run one turn without streaming.
    pub async fn run(&mut self, input: &str) -> Result<RunResponse, AgentError> {
        let (sink, _rx) = mpsc::unbounded_channel();
        self.run_streaming(input, &sink).await
    }

    /// Run one turn, sending text deltas to `sink` as the model produces them.
    pub async fn run_streaming(
        &mut self,
        input: &str,
        sink: &ChunkSink,
    ) -> Result<RunResponse, AgentError> {
        self.read_from_storage().await?;

        let mut messages = Vec::new();
        if let Some(system) = self.system_prompt() {
            messages.push(ChatMessage::system(system));
        }
        if self.add_history_to_messages {
            messages.extend(self.memory.history_messages(self.num_history_runs));
        }
        let run_start = messages.len();
        messages.push(ChatMessage::user(input));

        let definitions = self.tools.definitions();
        let mut made_calls = Vec::new();
        let mut content = None;

        for iteration in 1..=self.max_tool_iterations {
            let request = ToolCompletionRequest::new(messages.clone(), definitions.clone());
            let response = self.llm.stream_with_tools(request, sink).await?;
            tracing::debug!(
                session_id = %self.session_id,
                iteration,
                tool_calls = response.tool_calls.len(),
                input_tokens = response.input_tokens,
                output_tokens = response.output_tokens,
                "Model responded"
            );

            if response.tool_calls.is_empty() {
                let text = response.content.unwrap_or_default();
                messages.push(ChatMessage::assistant(text.clone()));
                content = Some(text);
                break;
            }

            messages.push(ChatMessage::assistant_with_tool_calls(
                response.content,
                response.tool_calls.clone(),
            ));
            for call in response.tool_calls {
                let result = self.execute_tool(&call).await;
                messages.push(ChatMessage::tool_result(&call.id, &call.name, result));
                made_calls.push(call);
            }
        }

        let Some(content) = content else {
            tracing::warn!(
                session_id = %self.session_id,
                "Run abandoned after {} model calls",
                self.max_tool_iterations
            );
            return Err(AgentError::ToolLoopExhausted {
                iterations: self.max_tool_iterations,
            });
        };

        let mut run = AgentRun::new(input);
        run.content = content.clone();
        run.messages = messages[run_start..]
            .iter()
            .cloned()
            .map(StoredMessage::now)
            .collect();
        let run_id = run.run_id;
        self.memory.add_run(run);
        self.write_to_storage().await?;

        Ok(RunResponse {
            run_id,
            session_id: self.session_id.clone(),
            content,
            messages,
            tool_calls: made_calls,
        })
    }

    /// Tool failures are reported back to the model instead of ending the run.
    async fn execute_tool(&mut self, call: &ToolCall) -> String {
        let mut ctx = ToolContext {
            session_id: &self.session_id,
            session_state: &mut self.session_state,
        };
        match self
            .tools
            .execute(&call.name, call.arguments.clone(), &mut ctx)
            .await
        {
            Ok(output) => {
                tracing::debug!(tool = %call.name, duration = ?output.duration, "Tool finished");
                output.to_message_content()
            }
            Err(e) => {
                tracing::warn!(tool = %call.name, "Tool failed: {}", e);
                format!("Error: {e}")
            }
        }
    }

    fn system_prompt(&self) -> Option<String> {
        build_system_prompt(PromptParts {
            description: self.description.as_deref(),
            instructions: &self.instructions,
            markdown: self.markdown,
            state: self.add_state_in_messages.then_some(&self.session_state),
        })
    }

    /// Load the stored session, if any, into this agent.
    ///
    /// Stored state keys override the current ones and stored runs replace
    /// the in-memory history.
    pub async fn read_from_storage(&mut self) -> Result<Option<AgentSession>, DatabaseError> {
        let Some(storage) = self.storage.clone() else {
            return Ok(None);
        };
        let session = storage
            .read(&self.session_id, self.user_id.as_deref())
            .await?;
        if let Some(ref stored) = session {
            for (key, value) in &stored.session_data.session_state {
                self.session_state.insert(key.clone(), value.clone());
            }
            self.memory = stored.memory.clone();
            self.created_at = Some(stored.created_at);
            if self.user_id.is_none() {
                self.user_id = stored.user_id.clone();
            }
            tracing::debug!(
                session_id = %self.session_id,
                runs = self.memory.runs().len(),
                "Loaded session from {}",
                storage.describe()
            );
        }
        Ok(session)
    }

    /// Upsert the current session. No-op without storage.
    pub async fn write_to_storage(&mut self) -> Result<Option<AgentSession>, DatabaseError> {
        let Some(storage) = self.storage.clone() else {
            return Ok(None);
        };
        let stored = storage.upsert(&self.to_session()).await?;
        self.created_at = Some(stored.created_at);
        Ok(Some(stored))
    }

    /// Snapshot of the agent as a storage record.
    pub fn to_session(&self) -> AgentSession {
        let now = Utc::now().timestamp();
        AgentSession {
            session_id: self.session_id.clone(),
            agent_id: Some(self.agent_id.clone()),
            user_id: self.user_id.clone(),
            memory: self.memory.clone(),
            agent_data: Some(serde_json::json!({
                "name": self.name,
                "model": {
                    "id": self.llm.model_name(),
                    "provider": self.llm.provider_name(),
                },
            })),
            session_data: SessionData {
                session_state: self.session_state.clone(),
            },
            extra_data: None,
            created_at: self.created_at.unwrap_or(now),
            updated_at: Some(now),
        }
    }
}
