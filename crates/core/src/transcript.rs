//! Turn log: the append-only conversation transcript.
//!
//! A [`TurnLog`] is owned by exactly one session and mutated by exactly one
//! in-flight round at a time. Turns are immutable once appended; the only
//! transient state is the cache hint on the latest user turn, which is
//! attached by the call supervisor before a send and always cleared
//! afterwards. The hint is never serialized.

use crate::block::ContentBlock;
use serde::{Deserialize, Serialize};

/// The role of a turn in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The caller: user text and tool results.
    User,
    /// The upstream model. Serialized as `assistant` on the wire.
    #[serde(rename = "assistant")]
    Model,
}

/// One role-tagged entry in the conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub blocks: Vec<ContentBlock>,
}

/// Ordered, append-only sequence of turns.
///
/// There is no API for rewriting past turns; the invariant validator in
/// [`crate::sanitize`] produces a *new* log rather than editing in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnLog {
    pub(crate) turns: Vec<Turn>,

    /// When set, the last block of the latest user turn carries an
    /// ephemeral cache-control marker in the serialized request.
    /// Transient by construction: never persisted.
    #[serde(skip)]
    cache_hint: bool,
}

impl TurnLog {
    /// Create an empty turn log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a user turn.
    pub fn push_user(&mut self, blocks: Vec<ContentBlock>) {
        self.turns.push(Turn {
            role: Role::User,
            blocks,
        });
    }

    /// Append a model turn.
    pub fn push_model(&mut self, blocks: Vec<ContentBlock>) {
        self.turns.push(Turn {
            role: Role::Model,
            blocks,
        });
    }

    /// All turns, in order.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// The most recently appended turn.
    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Mark the last block of the latest user turn with the ephemeral cache
    /// hint. No-op unless the latest turn is a non-empty user turn.
    pub fn set_cache_hint(&mut self) {
        self.cache_hint = matches!(
            self.turns.last(),
            Some(Turn {
                role: Role::User,
                blocks
            }) if !blocks.is_empty()
        );
    }

    /// Remove the cache hint. Safe to call on any log state.
    pub fn clear_cache_hint(&mut self) {
        self.cache_hint = false;
    }

    /// Whether the cache hint is currently attached.
    pub fn cache_hint(&self) -> bool {
        self.cache_hint
    }
}
