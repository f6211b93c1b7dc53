//! Upstream model transport for Windlass.
//!
//! Three layers: the [`ModelClient`] trait abstracts the wire protocol,
//! the [`assemble`] function folds a streamed response back into whole
//! content blocks, and the [`CallSupervisor`] wraps both with retry,
//! cache hinting, and token accounting.

mod anthropic;
mod assembler;
mod client;
mod supervisor;

pub use anthropic::AnthropicClient;
pub use assembler::{Assembled, assemble};
pub use client::{ModelClient, ModelReply, ModelRequest};
pub use supervisor::{CallSupervisor, FragmentSink, RetryPolicy, StreamMode};
