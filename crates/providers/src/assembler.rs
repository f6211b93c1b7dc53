//! Streaming assembler.
//!
//! Folds the typed event sequence from a model client back into the same
//! content blocks a non-streaming call would have produced, forwarding
//! text and thinking fragments to a display callback as they arrive.
//! Tool-use input is buffered as JSON text and parsed only when its block
//! closes, so a syntactically torn fragment mid-stream is never an error.

use std::collections::BTreeMap;
use tokio::sync::mpsc;
use windlass_core::{BlockOpen, ContentBlock, Delta, FragmentKind, StreamEvent, UpstreamError};

/// The reassembled response.
#[derive(Debug, Clone, PartialEq)]
pub struct Assembled {
    pub blocks: Vec<ContentBlock>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub stop_reason: Option<String>,
}

/// Accumulator for one open block.
#[derive(Debug)]
enum OpenBlock {
    Text(String),
    Thinking {
        thinking: String,
        signature: Option<String>,
    },
    ToolUse {
        id: String,
        name: String,
        input_json: String,
    },
    RedactedThinking(String),
}

/// Drain the event stream into whole blocks.
///
/// `sink` receives every text and thinking fragment in arrival order.
/// An `Err` item from the stream propagates immediately; a channel that
/// closes before `MessageStop` is an interrupted stream. Neither is
/// retried here.
pub async fn assemble<F>(
    mut rx: mpsc::Receiver<Result<StreamEvent, UpstreamError>>,
    mut sink: F,
) -> Result<Assembled, UpstreamError>
where
    F: FnMut(FragmentKind, &str),
{
    let mut open: BTreeMap<usize, OpenBlock> = BTreeMap::new();
    let mut closed: BTreeMap<usize, ContentBlock> = BTreeMap::new();
    let mut input_tokens = 0;
    let mut output_tokens = 0;
    let mut stop_reason: Option<String> = None;
    let mut stopped = false;

    while let Some(event) = rx.recv().await {
        match event? {
            StreamEvent::MessageStart {
                input_tokens: tokens,
            } => input_tokens = tokens,
            StreamEvent::BlockStart { index, open: kind } => {
                let acc = match kind {
                    BlockOpen::Text => OpenBlock::Text(String::new()),
                    BlockOpen::Thinking => OpenBlock::Thinking {
                        thinking: String::new(),
                        signature: None,
                    },
                    BlockOpen::ToolUse { id, name } => OpenBlock::ToolUse {
                        id,
                        name,
                        input_json: String::new(),
                    },
                    BlockOpen::RedactedThinking { data } => OpenBlock::RedactedThinking(data),
                };
                open.insert(index, acc);
            }
            StreamEvent::BlockDelta { index, delta } => {
                let Some(acc) = open.get_mut(&index) else {
                    return Err(UpstreamError::Malformed(format!(
                        "delta for block {index} which was never opened"
                    )));
                };
                match (acc, delta) {
                    (OpenBlock::Text(buf), Delta::Text(fragment)) => {
                        sink(FragmentKind::Text, &fragment);
                        buf.push_str(&fragment);
                    }
                    (OpenBlock::Thinking { thinking, .. }, Delta::Thinking(fragment)) => {
                        sink(FragmentKind::Thinking, &fragment);
                        thinking.push_str(&fragment);
                    }
                    (OpenBlock::Thinking { signature, .. }, Delta::Signature(fragment)) => {
                        signature.get_or_insert_with(String::new).push_str(&fragment);
                    }
                    (OpenBlock::ToolUse { input_json, .. }, Delta::InputJson(fragment)) => {
                        input_json.push_str(&fragment);
                    }
                    // Delta kind does not match the open block; drop it.
                    _ => {}
                }
            }
            StreamEvent::BlockStop { index } => {
                let Some(acc) = open.remove(&index) else {
                    return Err(UpstreamError::Malformed(format!(
                        "stop for block {index} which was never opened"
                    )));
                };
                closed.insert(index, finish(acc)?);
            }
            StreamEvent::MessageDelta { stop_reason: sr } => {
                if sr.is_some() {
                    stop_reason = sr;
                }
            }
            StreamEvent::MessageStop {
                output_tokens: tokens,
            } => {
                output_tokens = tokens;
                stopped = true;
                break;
            }
        }
    }

    if !stopped {
        return Err(UpstreamError::StreamInterrupted(
            "stream closed before message_stop".into(),
        ));
    }
    // Blocks the upstream never explicitly closed are finalized as-is.
    for (index, acc) in std::mem::take(&mut open) {
        closed.insert(index, finish(acc)?);
    }

    Ok(Assembled {
        blocks: closed.into_values().collect(),
        input_tokens,
        output_tokens,
        stop_reason,
    })
}

fn finish(acc: OpenBlock) -> Result<ContentBlock, UpstreamError> {
    Ok(match acc {
        OpenBlock::Text(text) => ContentBlock::Text { text },
        OpenBlock::Thinking {
            thinking,
            signature,
        } => ContentBlock::Thinking {
            thinking,
            signature,
        },
        OpenBlock::ToolUse {
            id,
            name,
            input_json,
        } => {
            // Empty input means a no-argument invocation.
            let input = if input_json.trim().is_empty() {
                serde_json::json!({})
            } else {
                serde_json::from_str(&input_json).map_err(|e| {
                    UpstreamError::Malformed(format!(
                        "tool input for {name} is not valid JSON: {e}"
                    ))
                })?
            };
            ContentBlock::ToolUse { id, name, input }
        }
        OpenBlock::RedactedThinking(data) => ContentBlock::RedactedThinking { data },
    })
}
