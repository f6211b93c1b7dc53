//! Model client trait: the abstraction over the upstream wire protocol.

use async_trait::async_trait;
use tokio::sync::mpsc;
use windlass_core::{ContentBlock, StreamEvent, TokenUsage, ToolSpec, TurnLog, UpstreamError};

/// Everything one upstream call needs. Borrows the turn log so the cache
/// hint set by the supervisor is visible at serialization time.
#[derive(Clone, Copy)]
pub struct ModelRequest<'a> {
    pub model: &'a str,
    pub system: Option<&'a str>,
    pub log: &'a TurnLog,
    pub tools: &'a [ToolSpec],
    pub max_tokens: u32,
    pub thinking_budget: Option<u32>,
}

/// A complete model response: the blocks of one model turn plus call
/// metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelReply {
    pub blocks: Vec<ContentBlock>,
    pub usage: TokenUsage,
    pub stop_reason: Option<String>,
}

impl ModelReply {
    /// Concatenated text block content, for display.
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// All tool invocations requested by this reply, in block order.
    pub fn tool_uses(&self) -> Vec<(&str, &str, &serde_json::Value)> {
        self.blocks
            .iter()
            .filter_map(ContentBlock::as_tool_use)
            .collect()
    }
}

/// The core model client trait.
///
/// The supervisor picks `stream()` or `complete()` based on its stream
/// mode without knowing which backend is in use.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// A human-readable name for this client (e.g., "anthropic").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ModelRequest<'_>) -> Result<ModelReply, UpstreamError>;

    /// Send a request and get the typed event stream. Transport errors
    /// surface as an `Err` item followed by channel close.
    async fn stream(
        &self,
        request: ModelRequest<'_>,
    ) -> Result<mpsc::Receiver<Result<StreamEvent, UpstreamError>>, UpstreamError>;
}
