//! The runnable chat scripts.
//!
//! Each script is a set of [`ChatHooks`](crate::chat::ChatHooks): it builds
//! an agent when a chat starts and forwards every message to it.

mod basic;
mod pg_session_state;

pub use basic::BasicScript;
pub use pg_session_state::PgSessionStateScript;

use crate::agent::UserSession;
use crate::channels::IncomingMessage;
use crate::error::{AgentError, Error};
use crate::llm::ChunkSink;

/// Forward a message to the chat's agent, streaming into `sink`.
pub(crate) async fn run_session_agent(
    session: &mut UserSession,
    message: &IncomingMessage,
    sink: &ChunkSink,
) -> Result<String, Error> {
    let agent = session
        .agent
        .as_mut()
        .ok_or_else(|| AgentError::NotInitialized(session.id.to_string()))?;
    let response = agent.run_streaming(&message.content, sink).await?;
    tracing::info!(
        session_id = %response.session_id,
        run_id = %response.run_id,
        tool_calls = response.tool_calls.len(),
        "Run complete"
    );
    Ok(response.content)
}
