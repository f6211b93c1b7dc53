//! Invariant validator for the turn log.
//!
//! The upstream API rejects any request in which a tool-result block does
//! not reference a tool-use block from the immediately preceding model
//! turn. Results can become orphaned when the model retries a round, when a
//! tool worker is cancelled mid-flight, or when the model fabricates an id.
//! Orphans are repaired silently here rather than surfaced to the model.

use crate::block::ContentBlock;
use crate::transcript::{Role, TurnLog};
use std::collections::HashSet;
use tracing::debug;

/// Remove orphaned tool-result blocks from the latest user turn.
///
/// Pure: returns a possibly-shortened copy of the log. Idempotent:
/// `sanitize(&sanitize(log)) == sanitize(log)`.
///
/// Only the most recently appended user turn is examined; earlier turns
/// were validated when they were the latest and are immutable since. Text
/// and thinking blocks are never removed.
///
/// Callers that are still waiting on in-flight tool executions must defer
/// this call (see the session's round phase flag); running it while
/// invocations are unanswered would misclassify them as orphaned on the
/// *next* round.
pub fn sanitize(log: &TurnLog) -> TurnLog {
    let turns = log.turns();
    let Some(last) = turns.last() else {
        return log.clone();
    };
    if last.role != Role::User || !last.blocks.iter().any(ContentBlock::is_tool_result) {
        return log.clone();
    }

    // Ids offered by the nearest preceding model turn. A model turn with no
    // invocations yields the empty set, which drops every result.
    let valid_ids: HashSet<&str> = turns[..turns.len() - 1]
        .iter()
        .rev()
        .find(|t| t.role == Role::Model)
        .map(|t| {
            t.blocks
                .iter()
                .filter_map(|b| b.as_tool_use().map(|(id, _, _)| id))
                .collect()
        })
        .unwrap_or_default();

    let mut out = log.clone();
    let last_ix = out.turns.len() - 1;
    let before = out.turns[last_ix].blocks.len();
    out.turns[last_ix].blocks.retain(|b| match b {
        ContentBlock::ToolResult { tool_use_id, .. } => valid_ids.contains(tool_use_id.as_str()),
        _ => true,
    });
    let removed = before - out.turns[last_ix].blocks.len();
    if removed > 0 {
        debug!(removed, "Removed orphaned tool results from latest turn");
    }
    out
}
