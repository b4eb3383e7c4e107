//! Tools: named capabilities the model may invoke during a round.
//!
//! Each tool validates its own arguments and reports failures as
//! [`ToolError`]. The agent loop folds both outcomes into a tool message so
//! the model can react to them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// One invocation, with its arguments already parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Id assigned by the model; echoed back in the result
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Filled in by [`ToolRegistry::execute`]
    pub call_id: String,

    pub success: bool,

    /// Text handed back to the model
    pub output: String,

    /// Structured form of the outcome, for callers other than the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            call_id: String::new(),
            success: true,
            output: output.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// A capability exposed to the model.
///
/// One instance serves every conversation concurrently, so `execute` must
/// not depend on state left behind by an earlier call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model uses to call the tool, e.g. `retrieval_tool`
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema of the arguments object
    fn parameters_schema(&self) -> serde_json::Value;

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// The tools available to the agent, keyed by name.
///
/// Built once at startup and read-only afterwards. Iteration is in name
/// order so tool definitions sent to the model are stable across requests.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `tool`, replacing a tool registered under the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|tool| tool.as_ref())
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|tool| tool.to_definition()).collect()
    }

    /// Run `call` and stamp the result with the call's id.
    pub async fn execute(&self, call: &ToolCall) -> Result<ToolResult, ToolError> {
        let tool = self
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;
        let mut result = tool.execute(call.arguments.clone()).await?;
        result.call_id.clone_from(&call.id);
        Ok(result)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Upper-cases its `text` argument.
    struct Shout(&'static str);

    #[async_trait]
    impl Tool for Shout {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "Upper-cases the input"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }

        async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
            let text = arguments["text"]
                .as_str()
                .ok_or_else(|| ToolError::InvalidArguments("missing 'text'".into()))?;
            Ok(ToolResult::ok(text.to_uppercase()))
        }
    }

    fn call(name: &str, arguments: serde_json::Value) -> ToolCall {
        ToolCall {
            id: format!("call_{name}"),
            name: name.into(),
            arguments,
        }
    }

    #[test]
    fn definitions_follow_name_order() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(Shout("send_reimbursement")));
        registry.register(Box::new(Shout("retrieval_tool")));

        let names: Vec<_> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["retrieval_tool", "send_reimbursement"]);
        assert_eq!(registry.names(), vec!["retrieval_tool", "send_reimbursement"]);
        assert!(registry.get("web_search").is_none());
    }

    #[test]
    fn registering_a_name_twice_replaces() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(Shout("shout")));
        registry.register(Box::new(Shout("shout")));
        assert_eq!(registry.len(), 1);
        assert!(!registry.is_empty());
    }

    #[tokio::test]
    async fn execute_stamps_the_call_id() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(Shout("shout")));

        let result = registry
            .execute(&call("shout", serde_json::json!({"text": "hi"})))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output, "HI");
        assert_eq!(result.call_id, "call_shout");
    }

    #[tokio::test]
    async fn execute_reports_unknown_tools_and_bad_arguments() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(Shout("shout")));

        let err = registry.execute(&call("whisper", serde_json::json!({}))).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(name) if name == "whisper"));

        let err = registry.execute(&call("shout", serde_json::json!({}))).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
