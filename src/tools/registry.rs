//! Tool registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::ToolError;
use crate::llm::ToolDefinition;
use crate::tools::tool::{Tool, ToolContext, ToolOutput};

/// Named set of tools an agent may call.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!("Tool {} registered twice; keeping the latest", name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Definitions for every registered tool, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    /// Run a tool by name.
    pub async fn execute(
        &self,
        name: &str,
        params: serde_json::Value,
        ctx: &mut ToolContext<'_>,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self.get(name).ok_or_else(|| ToolError::NotFound {
            name: name.to_string(),
        })?;
        tracing::debug!(tool = name, session_id = ctx.session_id, "Executing tool");
        tool.execute(params, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::tool::EchoTool;

    #[tokio::test]
    async fn dispatches_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.definitions()[0].name, "echo");

        let mut state = serde_json::Map::new();
        let mut ctx = ToolContext {
            session_id: "s",
            session_state: &mut state,
        };
        let out = registry
            .execute("echo", serde_json::json!({"message": "hi"}), &mut ctx)
            .await
            .unwrap();
        assert_eq!(out.to_message_content(), "hi");

        let err = registry
            .execute("nope", serde_json::json!({}), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound { ref name } if name == "nope"));
    }
}
