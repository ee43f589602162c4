//! Shopping-list chat whose state lives in Postgres.
//!
//! All chats share one fixed session id, so the list and the conversation
//! carry over between chats and between process restarts.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::agent::{Agent, UserSession};
use crate::channels::IncomingMessage;
use crate::chat::ChatHooks;
use crate::db::SessionStorage;
use crate::error::Error;
use crate::llm::{ChunkSink, LlmProvider};
use crate::tools::builtin::{AddItemTool, SHOPPING_LIST_KEY};

const INSTRUCTION: &str = "Current shopping list is: {shopping_list}";

pub struct PgSessionStateScript {
    llm: Arc<dyn LlmProvider>,
    storage: Arc<dyn SessionStorage>,
    session_id: String,
}

impl PgSessionStateScript {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        storage: Arc<dyn SessionStorage>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            storage,
            session_id: session_id.into(),
        }
    }

    pub fn storage(&self) -> &Arc<dyn SessionStorage> {
        &self.storage
    }

    /// Create the sessions table if it does not exist yet.
    pub async fn prepare(&self) -> Result<(), Error> {
        self.storage.create().await?;
        tracing::info!("Session storage ready at {}", self.storage.describe());
        Ok(())
    }

    pub fn build_agent(&self) -> Agent {
        let mut state = Map::new();
        state.insert(SHOPPING_LIST_KEY.to_string(), Value::Array(Vec::new()));

        Agent::builder(Arc::clone(&self.llm))
            .name("shopping-list")
            .session_id(self.session_id.clone())
            .storage(Arc::clone(&self.storage))
            .tool(Arc::new(AddItemTool))
            .session_state(state)
            .instruction(INSTRUCTION)
            .add_state_in_messages(true)
            .add_history_to_messages(true)
            .markdown(true)
            .build()
    }
}

#[async_trait]
impl ChatHooks for PgSessionStateScript {
    async fn on_chat_start(&self, session: &mut UserSession) -> Result<(), Error> {
        let mut agent = self.build_agent();
        if let Some(stored) = agent.read_from_storage().await? {
            tracing::info!(
                session_id = %stored.session_id,
                runs = stored.memory.runs().len(),
                "Resuming stored session"
            );
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::SessionKey;
    use crate::db::InMemoryAgentStorage;
    use crate::testing::{ScriptedProvider, text, tool_call};
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    async fn send(
        script: &PgSessionStateScript,
        session: &mut UserSession,
        content: &str,
    ) -> String {
        let (tx, _rx) = mpsc::unbounded_channel();
        let msg = IncomingMessage::new("repl", "u", content);
        script.on_message(session, &msg, &tx).await.unwrap()
    }

    #[tokio::test]
    async fn list_and_history_survive_restart() {
        let storage: Arc<dyn SessionStorage> = Arc::new(InMemoryAgentStorage::new());

        {
            let llm = Arc::new(ScriptedProvider::new(vec![
                Ok(tool_call("c1", "add_item", serde_json::json!({"item": "milk"}))),
                Ok(text("Added milk.")),
            ]));
            let script = PgSessionStateScript::new(llm, storage.clone(), "shopping_list_demo");
            let mut session = UserSession::new(SessionKey::new("repl", "u", None));
            script.on_chat_start(&mut session).await.unwrap();
            assert_eq!(send(&script, &mut session, "add milk").await, "Added milk.");
        }

        let llm = Arc::new(ScriptedProvider::replying(&["You have milk."]));
        let script = PgSessionStateScript::new(llm.clone(), storage.clone(), "shopping_list_demo");
        let mut session = UserSession::new(SessionKey::new("repl", "u", None));
        script.on_chat_start(&mut session).await.unwrap();

        let agent = session.agent.as_ref().unwrap();
        assert_eq!(
            agent.session_state()[SHOPPING_LIST_KEY],
            serde_json::json!(["milk"])
        );

        send(&script, &mut session, "what's on my list?").await;
        let requests = llm.requests();
        let sent = &requests[0].messages;
        assert_eq!(
            sent[0].content,
            "- Current shopping list is: [\"milk\"]\n- Use markdown to format your answers."
        );
        assert!(sent.iter().any(|m| m.content == "add milk"));
        assert!(sent.iter().any(|m| m.content == "Added milk."));

        let stored = storage
            .read("shopping_list_demo", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.memory.runs().len(), 2);
    }

    #[tokio::test]
    async fn prepare_creates_storage() {
        let storage: Arc<dyn SessionStorage> = Arc::new(InMemoryAgentStorage::new());
        let script = PgSessionStateScript::new(
            Arc::new(ScriptedProvider::replying(&[])),
            storage.clone(),
            "s",
        );
        script.prepare().await.unwrap();
        assert!(storage.table_exists().await.unwrap());
    }
}
