//! Tool trait, registry, and dispatcher.
//!
//! Tools are what give the agent the ability to act: execute shell
//! commands, apply diffs, overwrite files. External tool providers only
//! need to implement [`Tool`]; the dispatcher gives every handler the same
//! uniform result contract.

use crate::block::ContentBlock;
use crate::error::ToolError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Declarative description of a tool, sent to the model so it knows what
/// it can call. Immutable after registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Side-channel for incremental progress from long-running handlers.
///
/// Independent of the final tool result: lines sent here are forwarded to
/// display layers while the handler runs, and dropping them is harmless.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink(Option<mpsc::UnboundedSender<String>>);

impl ProgressSink {
    /// A sink that discards everything.
    pub fn none() -> Self {
        Self(None)
    }

    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self(Some(tx))
    }

    /// Send one progress line. Errors (receiver gone) are ignored.
    pub fn send(&self, line: impl Into<String>) {
        if let Some(tx) = &self.0 {
            let _ = tx.send(line.into());
        }
    }
}

/// The core Tool trait.
///
/// Handlers receive the invocation input as a JSON object and return their
/// output text; any error is converted by the dispatcher into an error
/// result block, never propagated to the agent loop.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "shell", "edit_file_diff").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's input.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool. Long-running handlers may stream incremental
    /// output through `progress`; most tools ignore it.
    async fn execute(
        &self,
        input: serde_json::Value,
        progress: &ProgressSink,
    ) -> std::result::Result<String, ToolError>;

    /// The declarative spec for this tool.
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// A registry of available tools, the `name -> handler` table built at
/// startup. Invocation is a map lookup, not a branch chain.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// All tool specs (for sending to the model).
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|t| t.spec()).collect()
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Execute one tool invocation and fold the outcome into a result
    /// block. Never raises: unknown tools and handler failures become
    /// `is_error` results so the conversation can continue.
    pub async fn dispatch(
        &self,
        id: &str,
        name: &str,
        input: &serde_json::Value,
        progress: &ProgressSink,
    ) -> ContentBlock {
        let Some(tool) = self.tools.get(name) else {
            warn!(tool = name, "Dispatch of unregistered tool");
            return ContentBlock::tool_result(
                id,
                ToolError::NotFound(name.to_string()).to_string(),
                true,
            );
        };

        debug!(tool = name, invocation = id, "Dispatching tool");
        match tool.execute(input.clone(), progress).await {
            Ok(content) => ContentBlock::tool_result(id, content, false),
            Err(e) => {
                warn!(tool = name, error = %e, "Tool execution failed");
                ContentBlock::tool_result(id, e.to_string(), true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn execute(
            &self,
            input: serde_json::Value,
            _progress: &ProgressSink,
        ) -> Result<String, ToolError> {
            input["text"]
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| ToolError::InvalidArguments("Missing 'text' argument".into()))
        }
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn registry_specs() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        let specs = registry.specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "echo");
        assert_eq!(specs[0].input_schema["required"], serde_json::json!(["text"]));
    }

    #[tokio::test]
    async fn dispatch_success() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));

        let block = registry
            .dispatch(
                "call_1",
                "echo",
                &serde_json::json!({"text": "hello world"}),
                &ProgressSink::none(),
            )
            .await;
        assert_eq!(block, ContentBlock::tool_result("call_1", "hello world", false));
    }

    #[tokio::test]
    async fn dispatch_handler_failure_becomes_error_result() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));

        let block = registry
            .dispatch("call_2", "echo", &serde_json::json!({}), &ProgressSink::none())
            .await;
        match block {
            ContentBlock::ToolResult {
                tool_use_id,
                is_error,
                content,
            } => {
                assert_eq!(tool_use_id, "call_2");
                assert!(is_error);
                assert!(content.contains("text"));
            }
            other => panic!("Expected tool_result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dispatch_unknown_tool_becomes_error_result() {
        let registry = ToolRegistry::new();
        let block = registry
            .dispatch("call_3", "missing", &serde_json::json!({}), &ProgressSink::none())
            .await;
        match block {
            ContentBlock::ToolResult { is_error, content, .. } => {
                assert!(is_error);
                assert!(content.contains("missing"));
            }
            other => panic!("Expected tool_result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn progress_sink_forwards_lines() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = ProgressSink::new(tx);
        sink.send("line one");
        sink.send("line two");
        assert_eq!(rx.recv().await.unwrap(), "line one");
        assert_eq!(rx.recv().await.unwrap(), "line two");

        // Discarding sink never errors
        ProgressSink::none().send("dropped");
    }
}
