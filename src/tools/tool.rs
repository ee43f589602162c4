//! Functions the model can call during a run.
//!
//! Tools run in-process with mutable access to the session state. Whatever
//! they change is written to storage together with the run.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;
use crate::llm::ToolDefinition;

/// What a tool may see and change while it runs.
#[derive(Debug)]
pub struct ToolContext<'a> {
    /// Session the call belongs to.
    pub session_id: &'a str,
    /// Mutable session state, persisted with the session after the run.
    pub session_state: &'a mut serde_json::Map<String, serde_json::Value>,
}

/// Result handed back to the model as a tool message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub result: serde_json::Value,
    pub duration: Duration,
}

impl ToolOutput {
    pub fn success(result: serde_json::Value, duration: Duration) -> Self {
        Self { result, duration }
    }

    pub fn text(text: impl Into<String>, duration: Duration) -> Self {
        Self {
            result: serde_json::Value::String(text.into()),
            duration,
        }
    }

    /// Strings go to the model verbatim, anything else as compact JSON.
    pub fn to_message_content(&self) -> String {
        match &self.result {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// A function exposed to the model.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Function name the model calls, unique within a registry.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema of the arguments object.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Run with the model's arguments. An `Err` is reported back to the
    /// model as the tool result; it does not abort the run.
    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &mut ToolContext<'_>,
    ) -> Result<ToolOutput, ToolError>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Pull a required string parameter out of tool arguments.
pub fn require_str<'a>(
    tool: &str,
    params: &'a serde_json::Value,
    key: &str,
) -> Result<&'a str, ToolError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidParameters {
            name: tool.to_string(),
            reason: format!("missing '{key}' parameter"),
        })
}

/// Returns its `message` argument.
#[cfg(test)]
#[derive(Debug)]
pub struct EchoTool;

#[cfg(test)]
#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes back the input message. Useful for testing."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "The message to echo back"
                }
            },
            "required": ["message"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &mut ToolContext<'_>,
    ) -> Result<ToolOutput, ToolError> {
        let message = require_str(self.name(), &params, "message")?;
        Ok(ToolOutput::text(message, Duration::from_millis(1)))
    }
}
