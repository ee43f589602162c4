//! Session storage against a real Postgres.
//!
//! Needs Docker. Run with `cargo test --features integration`.
#![cfg(feature = "integration")]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::json;
use testcontainers_modules::postgres::Postgres;
use testcontainers_modules::testcontainers::ContainerAsync;
use testcontainers_modules::testcontainers::runners::AsyncRunner;

use pgchat::agent::Agent;
use pgchat::context::AgentRun;
use pgchat::db::SessionStorage;
use pgchat::error::LlmError;
use pgchat::history::{AgentSession, PostgresAgentStorage};
use pgchat::llm::{
    CompletionRequest, CompletionResponse, FinishReason, LlmProvider, ToolCall,
    ToolCompletionRequest, ToolCompletionResponse,
};
use pgchat::tools::builtin::{AddItemTool, SHOPPING_LIST_KEY};

async fn start_postgres() -> (ContainerAsync<Postgres>, String) {
    let node = Postgres::default().start().await.unwrap();
    let host = node.get_host().await.unwrap();
    let port = node.get_host_port_ipv4(5432).await.unwrap();
    let url = format!("postgresql+psycopg://postgres:postgres@{host}:{port}/postgres?sslmode=disable");
    (node, url)
}

fn storage(url: &str, table: &str) -> PostgresAgentStorage {
    PostgresAgentStorage::new(&SecretString::from(url.to_string()), "ai", table, 2).unwrap()
}

/// Replays canned responses in order, then answers "ok".
struct Replay(Mutex<VecDeque<ToolCompletionResponse>>);

impl Replay {
    fn new(responses: Vec<ToolCompletionResponse>) -> Self {
        Self(Mutex::new(responses.into()))
    }
}

fn reply(content: Option<&str>, tool_calls: Vec<ToolCall>) -> ToolCompletionResponse {
    let finish_reason = if tool_calls.is_empty() {
        FinishReason::Stop
    } else {
        FinishReason::ToolUse
    };
    ToolCompletionResponse {
        content: content.map(str::to_string),
        tool_calls,
        finish_reason,
        input_tokens: 1,
        output_tokens: 1,
    }
}

#[async_trait]
impl LlmProvider for Replay {
    fn model_name(&self) -> &str {
        "replay"
    }

    fn provider_name(&self) -> &str {
        "test"
    }

    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let r = self
            .complete_with_tools(ToolCompletionRequest::new(req.messages, Vec::new()))
            .await?;
        Ok(CompletionResponse {
            content: r.content.unwrap_or_default(),
            input_tokens: r.input_tokens,
            output_tokens: r.output_tokens,
            finish_reason: r.finish_reason,
        })
    }

    async fn complete_with_tools(
        &self,
        _req: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        let next = self.0.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| reply(Some("ok"), Vec::new())))
    }
}

#[tokio::test]
async fn table_lifecycle() {
    let (_node, url) = start_postgres().await;
    let store = storage(&url, "agent_sessions");

    assert!(!store.table_exists().await.unwrap());
    assert!(store.read("nope", None).await.unwrap().is_none());
    assert!(store.get_all_session_ids(None, None).await.unwrap().is_empty());

    store.create().await.unwrap();
    store.create().await.unwrap();
    assert!(store.table_exists().await.unwrap());

    store.drop_table().await.unwrap();
    assert!(!store.table_exists().await.unwrap());
    store.drop_table().await.unwrap();
}

#[tokio::test]
async fn upsert_read_list_delete() {
    let (_node, url) = start_postgres().await;
    let store = storage(&url, "agent_sessions");

    let mut session = AgentSession::new("shopping_list_demo");
    session.user_id = Some("alice".into());
    session
        .session_data
        .session_state
        .insert("shopping_list".into(), json!(["milk"]));
    session.memory.add_run(AgentRun::new("add milk"));

    // First write creates the table on demand.
    let written = store.upsert(&session).await.unwrap();
    assert_eq!(written.session_id, "shopping_list_demo");
    assert!(written.updated_at.is_some());

    let read = store.read("shopping_list_demo", None).await.unwrap().unwrap();
    assert_eq!(read.session_data, session.session_data);
    assert_eq!(read.memory, session.memory);
    assert!(store.read("shopping_list_demo", Some("bob")).await.unwrap().is_none());

    let mut changed = read.clone();
    changed.created_at += 1000;
    changed
        .session_data
        .session_state
        .insert("shopping_list".into(), json!(["milk", "eggs"]));
    let rewritten = store.upsert(&changed).await.unwrap();
    assert_eq!(rewritten.created_at, read.created_at);
    assert_eq!(
        rewritten.session_data.session_state["shopping_list"],
        json!(["milk", "eggs"])
    );

    store.upsert(&AgentSession::new("other")).await.unwrap();
    let ids = store.get_all_session_ids(None, None).await.unwrap();
    assert_eq!(ids.len(), 2);
    let alice = store.get_all_sessions(Some("alice"), None).await.unwrap();
    assert_eq!(alice.len(), 1);
    assert_eq!(alice[0].session_id, "shopping_list_demo");

    assert!(store.delete_session("other").await.unwrap());
    assert!(!store.delete_session("other").await.unwrap());

    store.drop_table().await.unwrap();
    store.upsert(&AgentSession::new("after_drop")).await.unwrap();
    assert!(store.table_exists().await.unwrap());
}

#[tokio::test]
async fn single_connection_pool_recreates_dropped_table() {
    let (_node, url) = start_postgres().await;
    let store = PostgresAgentStorage::new(&SecretString::from(url), "ai", "solo_sessions", 1).unwrap();

    store.upsert(&AgentSession::new("a")).await.unwrap();
    store.drop_table().await.unwrap();

    let written = tokio::time::timeout(
        std::time::Duration::from_secs(10),
        store.upsert(&AgentSession::new("b")),
    )
    .await
    .expect("upsert finished within the timeout")
    .unwrap();
    assert_eq!(written.session_id, "b");
    assert_eq!(store.get_all_session_ids(None, None).await.unwrap(), vec!["b".to_string()]);
}

#[tokio::test]
async fn shopping_list_survives_a_new_agent() {
    let (_node, url) = start_postgres().await;
    let store: Arc<dyn SessionStorage> = Arc::new(storage(&url, "agent_sessions"));
    store.create().await.unwrap();

    let build = |llm: Replay| {
        let mut state = serde_json::Map::new();
        state.insert(SHOPPING_LIST_KEY.into(), json!([]));
        Agent::builder(Arc::new(llm))
            .session_id("shopping_list_demo")
            .storage(Arc::clone(&store))
            .tool(Arc::new(AddItemTool))
            .session_state(state)
            .instruction("Current shopping list is: {shopping_list}")
            .add_state_in_messages(true)
            .add_history_to_messages(true)
            .build()
    };

    let mut first = build(Replay::new(vec![
        reply(
            None,
            vec![ToolCall {
                id: "c1".into(),
                name: "add_item".into(),
                arguments: json!({"item": "bread"}),
            }],
        ),
        reply(Some("Added bread."), Vec::new()),
    ]));
    first.read_from_storage().await.unwrap();
    assert_eq!(first.run("add bread").await.unwrap().content, "Added bread.");

    let mut second = build(Replay::new(Vec::new()));
    let stored = second.read_from_storage().await.unwrap().unwrap();
    assert_eq!(stored.memory.runs().len(), 1);
    assert_eq!(second.session_state()[SHOPPING_LIST_KEY], json!(["bread"]));
}
