//! Anthropic Messages API provider.
//!
//! The alternate backend, selected with `LLM_PROVIDER=anthropic`. System
//! prompts travel in the top-level `system` field and tool traffic is
//! expressed as `tool_use` / `tool_result` content blocks.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role, ToolCall,
    ToolCompletionRequest, ToolCompletionResponse, ToolDefinition,
};

const API_VERSION: &str = "2023-06-01";
const PROVIDER_NAME: &str = "anthropic";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic Messages API provider.
pub struct AnthropicProvider {
    client: Client,
    config: LlmConfig,
}

impl AnthropicProvider {
    pub fn new(config: LlmConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client, config }
    }

    fn build_request(
        &self,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolDefinition>,
        temperature: Option<f32>,
        max_tokens: Option<u32>,
    ) -> MessagesRequest {
        let mut system_parts = Vec::new();
        let mut out: Vec<AnthropicMessage> = Vec::new();

        for msg in messages {
            let (role, block) = match msg.role {
                Role::System => {
                    system_parts.push(msg.content);
                    continue;
                }
                Role::User => ("user", vec![ContentBlock::Text { text: msg.content }]),
                Role::Assistant => {
                    let mut blocks = Vec::new();
                    if !msg.content.is_empty() {
                        blocks.push(ContentBlock::Text { text: msg.content });
                    }
                    for tc in msg.tool_calls.unwrap_or_default() {
                        blocks.push(ContentBlock::ToolUse {
                            id: tc.id,
                            name: tc.name,
                            input: tc.arguments,
                        });
                    }
                    ("assistant", blocks)
                }
                Role::Tool => (
                    "user",
                    vec![ContentBlock::ToolResult {
                        tool_use_id: msg.tool_call_id.unwrap_or_default(),
                        content: msg.content,
                    }],
                ),
            };

            // Consecutive same-role messages (e.g. several tool results) must be merged.
            match out.last_mut() {
                Some(last) if last.role == role => last.content.extend(block),
                _ => out.push(AnthropicMessage {
                    role: role.to_string(),
                    content: block,
                }),
            }
        }

        MessagesRequest {
            model: self.config.model.clone(),
            max_tokens: max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system: if system_parts.is_empty() {
                None
            } else {
                Some(system_parts.join("\n\n"))
            },
            messages: out,
            temperature,
            tools: tools
                .into_iter()
                .map(|t| AnthropicTool {
                    name: t.name,
                    description: t.description,
                    input_schema: t.parameters,
                })
                .collect(),
        }
    }

    async fn send(&self, body: &MessagesRequest) -> Result<ToolCompletionResponse, LlmError> {
        let url = format!("{}/v1/messages", self.config.base_url);
        tracing::debug!(url = %url, model = %body.model, "Sending Anthropic messages request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", self.config.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER_NAME.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(match status.as_u16() {
                401 => LlmError::AuthFailed {
                    provider: PROVIDER_NAME.to_string(),
                },
                429 => LlmError::RateLimited {
                    provider: PROVIDER_NAME.to_string(),
                    retry_after: None,
                },
                _ => LlmError::RequestFailed {
                    provider: PROVIDER_NAME.to_string(),
                    reason: format!("HTTP {}: {}", status, text),
                },
            });
        }

        let parsed: MessagesResponse =
            serde_json::from_str(&text).map_err(|e| LlmError::InvalidResponse {
                provider: PROVIDER_NAME.to_string(),
                reason: format!("JSON parse error: {}. Raw: {}", e, text),
            })?;

        Ok(parsed.into_tool_response())
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn provider_name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = self.build_request(req.messages, Vec::new(), req.temperature, req.max_tokens);
        let response = self.send(&body).await?;
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
        let body = self.build_request(req.messages, req.tools, req.temperature, req.max_tokens);
        self.send(&body).await
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

impl MessagesResponse {
    fn into_tool_response(self) -> ToolCompletionResponse {
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for block in self.content {
            match block {
                ContentBlock::Text { text: t } => text.push_str(&t),
                ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments: input,
                }),
                ContentBlock::ToolResult { .. } => {}
            }
        }

        let finish_reason = match self.stop_reason.as_deref() {
            Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
            Some("max_tokens") => FinishReason::Length,
            Some("tool_use") => FinishReason::ToolUse,
            _ if !tool_calls.is_empty() => FinishReason::ToolUse,
            _ => FinishReason::Unknown,
        };

        ToolCompletionResponse {
            content: if text.is_empty() { None } else { Some(text) },
            tool_calls,
            finish_reason,
            input_tokens: self.usage.input_tokens,
            output_tokens: self.usage.output_tokens,
        }
    }
}
