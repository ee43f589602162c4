//! LLM integration for the agent.
//!
//! Supports two backends:
//! - **OpenAI** Chat Completions (default): bearer auth, SSE streaming
//! - **Anthropic** Messages: `x-api-key` auth, non-streaming

mod anthropic;
mod openai;
mod provider;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;
pub use provider::{
    ChatMessage, ChunkSink, CompletionRequest, CompletionResponse, FinishReason, LlmProvider,
    Role, ToolCall, ToolCompletionRequest, ToolCompletionResponse, ToolDefinition,
};

use std::sync::Arc;

use crate::config::{LlmConfig, LlmProviderType};

/// Create an LLM provider based on configuration.
///
/// Construction never touches the network.
pub fn create_llm_provider(config: &LlmConfig) -> Arc<dyn LlmProvider> {
    match config.provider {
        LlmProviderType::OpenAi => {
            tracing::info!(model = %config.model, "Using OpenAI Chat Completions API");
            Arc::new(OpenAiProvider::new(config.clone()))
        }
        LlmProviderType::Anthropic => {
            tracing::info!(model = %config.model, "Using Anthropic Messages API");
            Arc::new(AnthropicProvider::new(config.clone()))
        }
    }
}
