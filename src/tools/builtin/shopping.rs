//! Shopping list tool backed by session state.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ToolError;
use crate::tools::tool::{Tool, ToolContext, ToolOutput, require_str};

/// Session state key holding the list.
pub const SHOPPING_LIST_KEY: &str = "shopping_list";

/// Adds an item to `session_state.shopping_list`, skipping duplicates.
pub struct AddItemTool;

#[async_trait]
impl Tool for AddItemTool {
    fn name(&self) -> &str {
        "add_item"
    }

    fn description(&self) -> &str {
        "Add an item to the shopping list."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "item": {
                    "type": "string",
                    "description": "The item to add"
                }
            },
            "required": ["item"]
        })
    }

    async fn execute(
        &self,
        params: Value,
        ctx: &mut ToolContext<'_>,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let item = require_str(self.name(), &params, "item")?.trim();
        if item.is_empty() {
            return Err(ToolError::InvalidParameters {
                name: self.name().to_string(),
                reason: "'item' must not be empty".to_string(),
            });
        }

        let entry = ctx
            .session_state
            .entry(SHOPPING_LIST_KEY)
            .or_insert_with(|| Value::Array(Vec::new()));
        if !entry.is_array() {
            tracing::warn!("session_state.shopping_list was not a list; resetting it");
            *entry = Value::Array(Vec::new());
        }

        let list = entry.as_array_mut().ok_or_else(|| ToolError::ExecutionFailed {
            name: "add_item".to_string(),
            reason: "shopping list is not an array".to_string(),
        })?;
        if !list.iter().any(|v| v.as_str() == Some(item)) {
            list.push(Value::String(item.to_string()));
        }

        Ok(ToolOutput::text(
            format!("The shopping list is now {}", Value::Array(list.clone())),
            start.elapsed(),
        ))
    }
}
