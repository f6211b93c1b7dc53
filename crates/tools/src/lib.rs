//! Built-in tool handlers for Windlass.
//!
//! Each tool implements [`windlass_core::Tool`] and is registered with
//! the dispatcher at startup. File tools share a [`PathPolicy`] that
//! sandboxes them to allowed roots and blocks forbidden prefixes.

mod edit_diff;
mod overwrite;
mod policy;
mod shell;

pub use edit_diff::EditFileDiffTool;
pub use overwrite::OverwriteFileTool;
pub use policy::{PathPolicy, PolicyError};
pub use shell::ShellTool;
