//! OpenAI Chat Completions API provider.
//!
//! Uses API key (bearer) authentication against `/v1/chat/completions`.
//! Streaming responses arrive as server-sent events; text deltas are
//! forwarded immediately and tool-call fragments are stitched together by
//! their index.

use std::collections::BTreeMap;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use reqwest::{Client, Response};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, ChunkSink, CompletionRequest, CompletionResponse, FinishReason, LlmProvider,
    Role, ToolCall, ToolCompletionRequest, ToolCompletionResponse, ToolDefinition,
};

const PROVIDER_NAME: &str = "openai";

/// OpenAI Chat Completions provider.
pub struct OpenAiProvider {
    client: Client,
    config: LlmConfig,
}

impl OpenAiProvider {
    /// Create a new provider. No request is made until the first completion.
    pub fn new(config: LlmConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client, config }
    }

    fn api_url(&self, path: &str) -> String {
        format!(
            "{}/v1/{}",
            self.config.base_url,
            path.trim_start_matches('/')
        )
    }

    async fn post(&self, body: &ChatCompletionRequest) -> Result<Response, LlmError> {
        let url = self.api_url("chat/completions");
        tracing::debug!(url = %url, model = %body.model, stream = body.stream, "Sending chat completion request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.config.api_key.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("OpenAI request failed: {}", e);
                LlmError::RequestFailed {
                    provider: PROVIDER_NAME.to_string(),
                    reason: e.to_string(),
                }
            })?;

        check_status(response).await
    }

    fn build_request(
        &self,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolDefinition>,
        temperature: Option<f32>,
        max_tokens: Option<u32>,
        stream: bool,
    ) -> ChatCompletionRequest {
        let tools: Vec<ChatCompletionTool> = tools
            .into_iter()
            .map(|t| ChatCompletionTool {
                tool_type: "function".to_string(),
                function: ChatCompletionFunction {
                    name: t.name,
                    description: Some(t.description),
                    parameters: Some(t.parameters),
                },
            })
            .collect();

        ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: messages.into_iter().map(Into::into).collect(),
            temperature,
            max_tokens,
            tools: if tools.is_empty() { None } else { Some(tools) },
            stream,
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
        }
    }

    async fn send_blocking(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        let response = self.post(&request).await?;
        let text = response.text().await?;
        let parsed: ChatCompletionResponse =
            serde_json::from_str(&text).map_err(|e| LlmError::InvalidResponse {
                provider: PROVIDER_NAME.to_string(),
                reason: format!("JSON parse error: {}. Raw: {}", e, text),
            })?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: PROVIDER_NAME.to_string(),
                reason: "No choices in response".to_string(),
            })?;

        let (content, raw_calls) = match choice.message {
            Some(msg) => (msg.content, msg.tool_calls.unwrap_or_default()),
            None => (None, Vec::new()),
        };

        let tool_calls: Vec<ToolCall> = raw_calls
            .into_iter()
            .map(|tc| ToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: parse_arguments(&tc.function.arguments),
            })
            .collect();

        let usage = parsed.usage.unwrap_or_default();
        Ok(ToolCompletionResponse {
            content,
            finish_reason: FinishReason::from_openai(
                choice.finish_reason.as_deref(),
                !tool_calls.is_empty(),
            ),
            tool_calls,
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        })
    }
}

async fn check_status(response: Response) -> Result<Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::debug!("OpenAI error response {}: {}", status, body);

    match status.as_u16() {
        401 => Err(LlmError::AuthFailed {
            provider: PROVIDER_NAME.to_string(),
        }),
        429 => Err(LlmError::RateLimited {
            provider: PROVIDER_NAME.to_string(),
            retry_after: None,
        }),
        _ => Err(LlmError::RequestFailed {
            provider: PROVIDER_NAME.to_string(),
            reason: format!("HTTP {}: {}", status, body),
        }),
    }
}

fn parse_arguments(raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::Value::Object(Default::default());
    }
    serde_json::from_str(raw).unwrap_or_else(|e| {
        tracing::warn!("Tool call arguments are not valid JSON ({}): {}", e, raw);
        serde_json::Value::Object(Default::default())
    })
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn provider_name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let request =
            self.build_request(req.messages, Vec::new(), req.temperature, req.max_tokens, false);
        let response = self.send_blocking(request).await?;
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
        let request =
            self.build_request(req.messages, req.tools, req.temperature, req.max_tokens, false);
        self.send_blocking(request).await
    }

    async fn stream_with_tools(
        &self,
        req: ToolCompletionRequest,
        sink: &ChunkSink,
    ) -> Result<ToolCompletionResponse, LlmError> {
        let request =
            self.build_request(req.messages, req.tools, req.temperature, req.max_tokens, true);
        let response = self.post(&request).await?;
        read_stream(response.bytes_stream(), sink).await
    }
}

/// Consume an SSE body, forwarding text deltas to `sink`.
///
/// A body that ends before `[DONE]` or a `finish_reason` is an error, so a
/// cut-off reply is never taken for a complete one.
async fn read_stream<S, B, E>(
    body: S,
    sink: &ChunkSink,
) -> Result<ToolCompletionResponse, LlmError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut events = std::pin::pin!(body.eventsource());
    let mut acc = StreamAccumulator::default();

    while let Some(event) = events.next().await {
        let event = event.map_err(|e| LlmError::RequestFailed {
            provider: PROVIDER_NAME.to_string(),
            reason: format!("SSE stream error: {}", e),
        })?;

        if event.data == "[DONE]" {
            acc.done = true;
            break;
        }

        let chunk: StreamChunk =
            serde_json::from_str(&event.data).map_err(|e| LlmError::InvalidResponse {
                provider: PROVIDER_NAME.to_string(),
                reason: format!("SSE parse error: {}, data: {}", e, event.data),
            })?;

        if let Some(delta) = acc.apply(chunk) {
            let _ = sink.send(delta);
        }
    }

    acc.finish()
}

/// Collects streamed chunks into a complete response.
#[derive(Debug, Default)]
struct StreamAccumulator {
    content: String,
    tool_calls: BTreeMap<usize, PartialToolCall>,
    finish_reason: Option<String>,
    usage: ChatCompletionUsage,
    /// `[DONE]` was received.
    done: bool,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl StreamAccumulator {
    /// Fold one chunk in, returning the text delta it carried, if any.
    fn apply(&mut self, chunk: StreamChunk) -> Option<String> {
        if let Some(usage) = chunk.usage {
            self.usage = usage;
        }

        let mut text = String::new();
        for choice in chunk.choices {
            if let Some(content) = choice.delta.content {
                text.push_str(&content);
            }
            for tc in choice.delta.tool_calls {
                let slot = self.tool_calls.entry(tc.index).or_default();
                if let Some(id) = tc.id {
                    slot.id = id;
                }
                if let Some(function) = tc.function {
                    if let Some(name) = function.name {
                        slot.name.push_str(&name);
                    }
                    if let Some(args) = function.arguments {
                        slot.arguments.push_str(&args);
                    }
                }
            }
            if choice.finish_reason.is_some() {
                self.finish_reason = choice.finish_reason;
            }
        }

        if text.is_empty() {
            None
        } else {
            self.content.push_str(&text);
            Some(text)
        }
    }

    fn finish(self) -> Result<ToolCompletionResponse, LlmError> {
        if !self.done && self.finish_reason.is_none() {
            return Err(LlmError::InvalidResponse {
                provider: PROVIDER_NAME.to_string(),
                reason: "stream ended before completion".to_string(),
            });
        }

        let tool_calls: Vec<ToolCall> = self
            .tool_calls
            .into_values()
            .map(|p| ToolCall {
                id: p.id,
                name: p.name,
                arguments: parse_arguments(&p.arguments),
            })
            .collect();

        Ok(ToolCompletionResponse {
            content: if self.content.is_empty() {
                None
            } else {
                Some(self.content)
            },
            finish_reason: FinishReason::from_openai(
                self.finish_reason.as_deref(),
                !tool_calls.is_empty(),
            ),
            tool_calls,
            input_tokens: self.usage.prompt_tokens,
            output_tokens: self.usage.completion_tokens,
        })
    }
}

// OpenAI-compatible Chat Completions API types

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatCompletionMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ChatCompletionTool>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatCompletionMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ChatCompletionToolCall>>,
}

impl From<ChatMessage> for ChatCompletionMessage {
    fn from(msg: ChatMessage) -> Self {
        let tool_calls = msg.tool_calls.map(|calls| {
            calls
                .into_iter()
                .map(|tc| ChatCompletionToolCall {
                    id: tc.id,
                    call_type: "function".to_string(),
                    function: ChatCompletionToolCallFunction {
                        name: tc.name,
                        arguments: tc.arguments.to_string(),
                    },
                })
                .collect()
        });
        // Tool result messages carry the call id instead of a name.
        let name = if msg.role == Role::Tool { None } else { msg.name };
        Self {
            role: msg.role.as_str().to_string(),
            content: Some(msg.content),
            tool_call_id: msg.tool_call_id,
            name,
            tool_calls,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: ChatCompletionFunction,
}

#[derive(Debug, Serialize)]
struct ChatCompletionFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
    usage: Option<ChatCompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: Option<ChatCompletionResponseMessage>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ChatCompletionToolCall>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatCompletionToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: ChatCompletionToolCallFunction,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatCompletionToolCallFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Default, Deserialize)]
struct ChatCompletionUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<ChatCompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<StreamToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: usize,
    id: Option<String>,
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}
