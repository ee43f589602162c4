//! Test doubles shared across module tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::channels::{Channel, IncomingMessage, MessageStream, OutgoingResponse, StatusUpdate};
use crate::error::{ChannelError, LlmError};
use crate::llm::{
    CompletionRequest, CompletionResponse, FinishReason, LlmProvider, ToolCall,
    ToolCompletionRequest, ToolCompletionResponse,
};

/// Provider that replays a fixed list of responses and records every request.
///
/// Once the script runs out it answers `"ok"`.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<ToolCompletionResponse, LlmError>>>,
    requests: Mutex<Vec<ToolCompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<ToolCompletionResponse, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// One plain text reply per call.
    pub fn replying(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Ok(text(t))).collect())
    }

    /// Requests seen so far.
    pub fn requests(&self) -> Vec<ToolCompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

/// A text-only response.
pub fn text(content: &str) -> ToolCompletionResponse {
    ToolCompletionResponse {
        content: Some(content.to_string()),
        tool_calls: Vec::new(),
        finish_reason: FinishReason::Stop,
        input_tokens: 10,
        output_tokens: 5,
    }
}

/// A response asking for one tool call.
pub fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCompletionResponse {
    ToolCompletionResponse {
        content: None,
        tool_calls: vec![ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        }],
        finish_reason: FinishReason::ToolUse,
        input_tokens: 10,
        output_tokens: 5,
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn model_name(&self) -> &str {
        "scripted-model"
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let response = self
            .complete_with_tools(ToolCompletionRequest::new(req.messages, Vec::new()))
            .await?;
        Ok(CompletionResponse {
            content: response.content.unwrap_or_default(),
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
            finish_reason: response.finish_reason,
        })
    }

    async fn complete_with_tools(
        &self,
        req: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        self.requests.lock().unwrap().push(req);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(text("ok")))
    }
}

/// Channel that emits a fixed list of messages and records what it is sent.
pub struct TestChannel {
    name: String,
    inputs: Vec<String>,
    responses: tokio::sync::Mutex<Vec<String>>,
    statuses: tokio::sync::Mutex<Vec<StatusUpdate>>,
    /// Reject every status update, as a closed terminal would.
    reject_status: bool,
}

impl TestChannel {
    pub fn new(name: &str, inputs: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            responses: tokio::sync::Mutex::new(Vec::new()),
            statuses: tokio::sync::Mutex::new(Vec::new()),
            reject_status: false,
        }
    }

    pub fn rejecting_status(mut self) -> Self {
        self.reject_status = true;
        self
    }

    pub async fn responses(&self) -> Vec<String> {
        self.responses.lock().await.clone()
    }

    pub async fn statuses(&self) -> Vec<StatusUpdate> {
        self.statuses.lock().await.clone()
    }
}

#[async_trait]
impl Channel for TestChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let messages: Vec<IncomingMessage> = self
            .inputs
            .iter()
            .map(|content| IncomingMessage::new(&self.name, "tester", content))
            .collect();
        Ok(Box::pin(futures::stream::iter(messages)))
    }

    async fn respond(
        &self,
        _msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        self.responses.lock().await.push(response.content);
        Ok(())
    }

    async fn send_status(
        &self,
        _msg: &IncomingMessage,
        status: StatusUpdate,
    ) -> Result<(), ChannelError> {
        if self.reject_status {
            return Err(ChannelError::SendFailed {
                name: self.name.clone(),
                reason: "status rejected".to_string(),
            });
        }
        self.statuses.lock().await.push(status);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}
