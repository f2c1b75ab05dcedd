//! Server-side tools: named callable contracts the model can invoke, and the
//! results they feed back into the conversation.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;

/// The async target behind a registered tool.
///
/// Implementations must be idempotent and free of session-scoped side
/// effects: a tool may run for any number of concurrent sessions.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Executes the tool with the model-provided arguments.
    ///
    /// Failures are reported inside the returned [`ToolResult`] as
    /// explanatory text so the model can recover; tool execution never
    /// terminates a session.
    async fn call(&self, args: Value) -> ToolResult;
}

/// Where a tool result is delivered, and its payload.
#[derive(Debug, Clone)]
pub enum ToolResult {
    /// Fed back to the model as the `function_call_output` of the call.
    Server(String),
    /// Surfaced to the browser client as a side-channel message. Suppressed
    /// on telephony sessions.
    Client(Value),
}

impl ToolResult {
    /// The string representation fed to the model or the client.
    ///
    /// Structured client-bound payloads stay JSON; plain strings are passed
    /// through without quoting.
    pub fn to_text(&self) -> String {
        match self {
            Self::Server(text) => text.clone(),
            Self::Client(Value::String(text)) => text.clone(),
            Self::Client(value) => value.to_string(),
        }
    }
}

/// An immutable pair of the upstream function declaration and its target.
#[derive(Clone)]
pub struct Tool {
    schema: Value,
    handler: Arc<dyn ToolHandler>,
}

impl Tool {
    /// Creates a tool from its upstream function-declaration schema
    /// (`type`, `name`, `description`, `parameters`) and its target.
    pub fn new(schema: Value, handler: Arc<dyn ToolHandler>) -> Self {
        Self { schema, handler }
    }

    pub(crate) async fn call(&self, args: Value) -> ToolResult {
        self.handler.call(args).await
    }
}

/// Name-keyed table of the tools a session advertises upstream.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Tool>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool under a unique name. Registering the same name twice
    /// replaces the previous entry.
    pub fn register(&mut self, name: impl Into<String>, tool: Tool) {
        let name = name.into();
        log::debug!("registering tool '{name}'");
        self.tools.insert(name, tool);
    }

    /// Looks up a tool by name.
    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    /// Whether any tools are registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// The function declarations advertised in `session.tools`.
    pub fn schemas(&self) -> Vec<Value> {
        self.tools.values().map(|tool| tool.schema.clone()).collect()
    }

    /// The `session.tool_choice` value matching the registry contents.
    pub fn tool_choice(&self) -> &'static str {
        if self.is_empty() { "none" } else { "auto" }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct StaticTool(ToolResult);

    #[async_trait]
    impl ToolHandler for StaticTool {
        async fn call(&self, _args: Value) -> ToolResult {
            self.0.clone()
        }
    }

    fn tool(name: &str, result: ToolResult) -> Tool {
        Tool::new(
            json!({"type": "function", "name": name, "parameters": {}}),
            Arc::new(StaticTool(result)),
        )
    }

    #[test]
    fn tool_choice_follows_registry_contents() {
        let mut registry = ToolRegistry::new();
        assert_eq!(registry.tool_choice(), "none");

        registry.register("test", tool("test", ToolResult::Server("ok".into())));
        assert_eq!(registry.tool_choice(), "auto");
        assert!(registry.get("test").is_some());
        assert!(registry.get("other").is_none());
    }

    #[test]
    fn schemas_are_advertised_in_name_order() {
        let mut registry = ToolRegistry::new();
        registry.register("search", tool("search", ToolResult::Server("ok".into())));
        registry.register("report_grounding", tool("report_grounding", ToolResult::Server("ok".into())));

        let schemas = registry.schemas();
        let names: Vec<_> = schemas
            .iter()
            .filter_map(|schema| schema["name"].as_str())
            .collect();

        assert_eq!(names, ["report_grounding", "search"]);
    }

    #[test]
    fn server_result_text_is_verbatim() {
        let result = ToolResult::Server("plain text".into());
        assert_eq!(result.to_text(), "plain text");
    }

    #[test]
    fn client_result_preserves_json() {
        let result = ToolResult::Client(json!({"sources": []}));
        assert_eq!(result.to_text(), r#"{"sources":[]}"#);

        let result = ToolResult::Client(json!("already text"));
        assert_eq!(result.to_text(), "already text");
    }
}
