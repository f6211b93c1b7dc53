//! Events emitted by the agent loop for display layers.

use serde::{Deserialize, Serialize};
use windlass_core::TokenTally;

/// One observable step of an agent turn.
///
/// Display layers (the CLI, a future server) consume these without
/// touching the loop's internals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A fragment of response text, streamed as it arrives.
    Text { text: String },

    /// A fragment of the model's thinking, streamed as it arrives.
    Thinking { text: String },

    /// The model requested a tool invocation.
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// One line of incremental output from a running tool.
    ToolProgress { id: String, line: String },

    /// A tool invocation finished (or was skipped or cancelled).
    ToolResult {
        id: String,
        content: String,
        is_error: bool,
    },

    /// The turn is complete.
    Done { rounds: u32, usage: TokenTally },
}
