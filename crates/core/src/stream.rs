//! Streaming events and token accounting.
//!
//! The transport layer decodes the upstream SSE feed into the typed
//! [`StreamEvent`] sequence below; the assembler in the providers crate
//! folds that sequence back into the same content blocks a non-streaming
//! call would produce.

use serde::{Deserialize, Serialize};

/// One event from the upstream streaming response.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Message envelope opened; carries the prompt-side token count.
    MessageStart { input_tokens: u32 },

    /// A content block opened at the given index.
    BlockStart { index: usize, open: BlockOpen },

    /// An incremental fragment for the block at the given index.
    BlockDelta { index: usize, delta: Delta },

    /// The block at the given index is complete.
    BlockStop { index: usize },

    /// Message-level metadata arriving mid-stream.
    MessageDelta { stop_reason: Option<String> },

    /// Stream complete; carries the completion-side token count.
    MessageStop { output_tokens: u32 },
}

/// The shape a just-opened block will accumulate into.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockOpen {
    Text,
    Thinking,
    /// Tool-use blocks open with their id and name; the input arrives as
    /// streamed JSON fragments.
    ToolUse { id: String, name: String },
    /// Redacted thinking arrives whole in the start event.
    RedactedThinking { data: String },
}

/// An incremental fragment within an open block.
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    Text(String),
    Thinking(String),
    Signature(String),
    /// A fragment of the tool-use input, valid JSON only once concatenated.
    InputJson(String),
}

/// Tags a forwarded fragment so display layers can render thinking and
/// ordinary text separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentKind {
    Text,
    Thinking,
}

/// Token counts for a single upstream call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Cumulative token accounting across a session's upstream calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTally {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenTally {
    /// Fold one call's usage into the running totals.
    pub fn add(&mut self, usage: TokenUsage) {
        self.input_tokens += u64::from(usage.input_tokens);
        self.output_tokens += u64::from(usage.output_tokens);
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}
