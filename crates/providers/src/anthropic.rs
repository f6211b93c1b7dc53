//! Anthropic Messages API client.
//!
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as a top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - Streaming via SSE with `content_block_delta` events
//! - Extended thinking via the `thinking` request field
//! - Ephemeral cache marker on the latest user turn, when hinted

use crate::client::{ModelClient, ModelReply, ModelRequest};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tracing::{debug, trace, warn};
use windlass_core::{
    BlockOpen, ContentBlock, Delta, StreamEvent, TokenUsage, TurnLog, UpstreamError,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Anthropic Messages API client.
pub struct AnthropicClient {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl AnthropicClient {
    /// Create a new client.
    pub fn new(api_key: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            // Extended thinking responses can take minutes.
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .unwrap_or_default();

        Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            http,
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Serialize the turn log into wire messages. When the cache hint is
    /// set, the last block of the latest turn carries the ephemeral
    /// cache-control marker; the marker exists only in this request body.
    fn api_messages(log: &TurnLog) -> Result<Vec<serde_json::Value>, UpstreamError> {
        let mut messages: Vec<serde_json::Value> = log
            .turns()
            .iter()
            .map(|turn| {
                Ok(serde_json::json!({
                    "role": turn.role,
                    "content": turn.blocks,
                }))
            })
            .collect::<Result<_, serde_json::Error>>()
            .map_err(|e| UpstreamError::Malformed(format!("failed to serialize turns: {e}")))?;

        if log.cache_hint() {
            if let Some(block) = messages
                .last_mut()
                .and_then(|m| m["content"].as_array_mut())
                .and_then(|blocks| blocks.last_mut())
                .and_then(|b| b.as_object_mut())
            {
                block.insert(
                    "cache_control".into(),
                    serde_json::json!({"type": "ephemeral"}),
                );
            }
        }
        Ok(messages)
    }

    fn request_body(
        request: &ModelRequest<'_>,
        stream: bool,
    ) -> Result<serde_json::Value, UpstreamError> {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::api_messages(request.log)?,
            "max_tokens": request.max_tokens,
        });
        if let Some(system) = request.system {
            body["system"] = serde_json::json!(system);
        }
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(request.tools);
        }
        if let Some(budget) = request.thinking_budget {
            body["thinking"] = serde_json::json!({
                "type": "enabled",
                "budget_tokens": budget,
            });
        }
        if stream {
            body["stream"] = serde_json::json!(true);
        }
        Ok(body)
    }

    async fn post(
        &self,
        body: &serde_json::Value,
        sse: bool,
    ) -> Result<reqwest::Response, UpstreamError> {
        let url = format!("{}/v1/messages", self.base_url);
        let mut req = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json");
        if sse {
            req = req.header("Accept", "text/event-stream");
        }
        let response = req
            .json(body)
            .send()
            .await
            .map_err(|e| UpstreamError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        match status {
            200 => Ok(response),
            429 => {
                let retry_after_secs = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5);
                Err(UpstreamError::RateLimited { retry_after_secs })
            }
            401 | 403 => Err(UpstreamError::Auth("Invalid Anthropic API key".into())),
            500..=599 => {
                let message = response.text().await.unwrap_or_default();
                warn!(status, body = %message, "Anthropic server error");
                Err(UpstreamError::Server { status, message })
            }
            _ => {
                let message = response.text().await.unwrap_or_default();
                warn!(status, body = %message, "Anthropic API error");
                Err(UpstreamError::Api { status, message })
            }
        }
    }
}

#[async_trait]
impl ModelClient for AnthropicClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, request: ModelRequest<'_>) -> Result<ModelReply, UpstreamError> {
        let body = Self::request_body(&request, false)?;
        debug!(model = request.model, "Sending completion request");

        let response = self.post(&body, false).await?;
        let api_resp: ApiResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::Malformed(format!("failed to parse response: {e}")))?;

        Ok(ModelReply {
            blocks: api_resp.content,
            usage: TokenUsage {
                input_tokens: api_resp.usage.input_tokens,
                output_tokens: api_resp.usage.output_tokens,
            },
            stop_reason: api_resp.stop_reason,
        })
    }

    async fn stream(
        &self,
        request: ModelRequest<'_>,
    ) -> Result<
        tokio::sync::mpsc::Receiver<Result<StreamEvent, UpstreamError>>,
        UpstreamError,
    > {
        let body = Self::request_body(&request, true)?;
        debug!(model = request.model, "Sending streaming request");

        let response = self.post(&body, true).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(64);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut decoder = SseDecoder::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(UpstreamError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim_end_matches('\r').to_string();
                    buffer = buffer[line_end + 1..].to_string();

                    if line.is_empty() || line.starts_with(':') || line.starts_with("event: ") {
                        continue;
                    }
                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    let data = data.trim();
                    if data.is_empty() {
                        continue;
                    }

                    match decoder.decode(data) {
                        Ok(events) => {
                            for event in events {
                                let done = matches!(event, StreamEvent::MessageStop { .. });
                                if tx.send(Ok(event)).await.is_err() {
                                    return;
                                }
                                if done {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
            }
            // Channel close without message_stop; the assembler reports
            // the interruption.
        });

        Ok(rx)
    }
}

/// Decodes the JSON payload of one SSE `data:` line into typed events.
///
/// Stateful only for the output token count, which arrives in
/// `message_delta` but belongs on `MessageStop`.
#[derive(Debug, Default)]
struct SseDecoder {
    output_tokens: u32,
}

impl SseDecoder {
    fn decode(&mut self, data: &str) -> Result<Vec<StreamEvent>, UpstreamError> {
        let event: serde_json::Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                trace!(error = %e, data = %data, "Ignoring unparseable SSE payload");
                return Ok(vec![]);
            }
        };

        let events = match event["type"].as_str().unwrap_or("") {
            "message_start" => {
                let input_tokens = event["message"]["usage"]["input_tokens"]
                    .as_u64()
                    .unwrap_or(0) as u32;
                vec![StreamEvent::MessageStart { input_tokens }]
            }
            "content_block_start" => {
                let index = event["index"].as_u64().unwrap_or(0) as usize;
                let block = &event["content_block"];
                let open = match block["type"].as_str().unwrap_or("") {
                    "text" => BlockOpen::Text,
                    "thinking" => BlockOpen::Thinking,
                    "tool_use" => BlockOpen::ToolUse {
                        id: block["id"].as_str().unwrap_or("").to_string(),
                        name: block["name"].as_str().unwrap_or("").to_string(),
                    },
                    "redacted_thinking" => BlockOpen::RedactedThinking {
                        data: block["data"].as_str().unwrap_or("").to_string(),
                    },
                    other => {
                        trace!(block_type = other, "Ignoring unknown content block type");
                        return Ok(vec![]);
                    }
                };
                vec![StreamEvent::BlockStart { index, open }]
            }
            "content_block_delta" => {
                let index = event["index"].as_u64().unwrap_or(0) as usize;
                let delta = &event["delta"];
                let delta = match delta["type"].as_str().unwrap_or("") {
                    "text_delta" => Delta::Text(delta["text"].as_str().unwrap_or("").to_string()),
                    "thinking_delta" => {
                        Delta::Thinking(delta["thinking"].as_str().unwrap_or("").to_string())
                    }
                    "signature_delta" => {
                        Delta::Signature(delta["signature"].as_str().unwrap_or("").to_string())
                    }
                    "input_json_delta" => {
                        Delta::InputJson(delta["partial_json"].as_str().unwrap_or("").to_string())
                    }
                    _ => return Ok(vec![]),
                };
                vec![StreamEvent::BlockDelta { index, delta }]
            }
            "content_block_stop" => {
                let index = event["index"].as_u64().unwrap_or(0) as usize;
                vec![StreamEvent::BlockStop { index }]
            }
            "message_delta" => {
                if let Some(tokens) = event["usage"]["output_tokens"].as_u64() {
                    self.output_tokens = tokens as u32;
                }
                let stop_reason = event["delta"]["stop_reason"]
                    .as_str()
                    .map(str::to_string);
                vec![StreamEvent::MessageDelta { stop_reason }]
            }
            "message_stop" => vec![StreamEvent::MessageStop {
                output_tokens: self.output_tokens,
            }],
            "error" => {
                let message = event["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown upstream error")
                    .to_string();
                return Err(UpstreamError::StreamInterrupted(message));
            }
            "ping" => vec![],
            other => {
                trace!(event_type = other, "Ignoring unknown SSE event type");
                vec![]
            }
        };
        Ok(events)
    }
}

// --- Anthropic API response types ---

#[derive(Debug, Deserialize)]
struct ApiResponse {
    content: Vec<ContentBlock>,
    usage: ApiUsage,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    input_tokens: u32,
    output_tokens: u32,
}
