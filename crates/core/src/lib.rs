//! # Windlass Core
//!
//! Domain types, traits, and error definitions for the Windlass agent engine.
//! This crate has **zero framework dependencies**: it defines the turn log,
//! content blocks, tool contract, and stream events that all other crates
//! implement against.
//!
//! ## Design Philosophy
//!
//! The conversation protocol lives here as plain data: an append-only
//! [`TurnLog`] of [`Turn`]s, each holding ordered [`ContentBlock`]s. Anything
//! that talks to the outside world (the upstream model API, tool processes)
//! is defined as a trait here and implemented in its own crate, so the
//! invariants of the protocol can be tested without any I/O.

pub mod block;
pub mod error;
pub mod sanitize;
pub mod stream;
pub mod tool;
pub mod transcript;

// Re-export key types at crate root for ergonomics
pub use block::ContentBlock;
pub use error::{Error, Result, ToolError, UpstreamError};
pub use sanitize::sanitize;
pub use stream::{BlockOpen, Delta, FragmentKind, StreamEvent, TokenTally, TokenUsage};
pub use tool::{ProgressSink, Tool, ToolRegistry, ToolSpec};
pub use transcript::{Role, Turn, TurnLog};
