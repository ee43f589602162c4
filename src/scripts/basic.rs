//! Investment-analyst chat without storage.

use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::{Agent, UserSession};
use crate::channels::IncomingMessage;
use crate::chat::ChatHooks;
use crate::error::Error;
use crate::llm::{ChunkSink, LlmProvider};

const DESCRIPTION: &str = "You are an investment analyst that researches stock prices, \
company infos, stock fundamentals, analyst recommendations and historical prices";

const INSTRUCTION: &str =
    "Format your response using markdown and use tables to display data where possible.";

/// Every chat gets a fresh agent; nothing outlives the process.
pub struct BasicScript {
    llm: Arc<dyn LlmProvider>,
}

impl BasicScript {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    pub fn build_agent(&self) -> Agent {
        Agent::builder(Arc::clone(&self.llm))
            .name("investment-analyst")
            .description(DESCRIPTION)
            .instruction(INSTRUCTION)
            .build()
    }
}

#[async_trait]
impl ChatHooks for BasicScript {
    async fn on_chat_start(&self, session: &mut UserSession) -> Result<(), Error> {
        let agent = self.build_agent();
        tracing::debug!(session_id = %agent.session_id(), "Basic agent ready");
        session.agent = Some(agent);
        Ok(())
    }

    async fn on_message(
        &self,
        session: &mut UserSession,
        message: &IncomingMessage,
        sink: &ChunkSink,
    ) -> Result<String, Error> {
        super::run_session_agent(session, message, sink).await
    }
}
