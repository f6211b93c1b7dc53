//! Content blocks: the typed units inside a turn.
//!
//! One tagged-variant type per block kind, serialized with the upstream
//! wire tags (`text`, `tool_use`, `tool_result`, `thinking`,
//! `redacted_thinking`). There is a single construction path from the
//! transport layer, so downstream code never branches on representation.

use serde::{Deserialize, Serialize};

/// A single typed unit of content within a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain model or user text.
    Text { text: String },

    /// A request from the model to run a named tool. The `id` is opaque and
    /// is the only linkage to the eventual result block.
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// The outcome of a tool invocation, referencing the invocation by id.
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },

    /// Extended-thinking text, with the signature the upstream API requires
    /// when the block is replayed in a later request.
    Thinking {
        thinking: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },

    /// Thinking content the upstream API chose to redact; carried opaquely.
    RedactedThinking { data: String },
}

impl ContentBlock {
    /// Create a text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create a tool-use block.
    pub fn tool_use(
        id: impl Into<String>,
        name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    /// Create a tool-result block answering the given invocation id.
    pub fn tool_result(
        tool_use_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error,
        }
    }

    /// Borrow the `(id, name, input)` of a tool-use block, if this is one.
    pub fn as_tool_use(&self) -> Option<(&str, &str, &serde_json::Value)> {
        match self {
            Self::ToolUse { id, name, input } => Some((id, name, input)),
            _ => None,
        }
    }

    /// Whether this block is a tool invocation.
    pub fn is_tool_use(&self) -> bool {
        matches!(self, Self::ToolUse { .. })
    }

    /// Whether this block is a tool result.
    pub fn is_tool_result(&self) -> bool {
        matches!(self, Self::ToolResult { .. })
    }
}
