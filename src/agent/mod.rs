//! Core agent logic.
//!
//! The agent wraps a model call with:
//! - Tool invocation against mutable session state
//! - Conversation memory loaded from and written back to storage
//! - A system prompt rendered from the current session state

mod agent_loop;
pub mod instructions;
mod session_manager;

pub use agent_loop::{
    Agent, AgentBuilder, DEFAULT_MAX_TOOL_ITERATIONS, DEFAULT_NUM_HISTORY_RUNS, RunResponse,
};
pub use session_manager::{SessionKey, UserSession, UserSessionStore};
