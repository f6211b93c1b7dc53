//! Unified-diff patch engine.
//!
//! Applies hunks in document order with cumulative offset tracking, so a
//! multi-hunk diff can be expressed entirely in the original file's line
//! numbers. Context and removed lines are verified against the document
//! before anything is written; a whitespace-insensitive comparison is the
//! single fallback when the exact match fails. Application is all or
//! nothing: any failure leaves the target file untouched.

mod apply;
mod parse;

use std::path::{Path, PathBuf};
use tracing::debug;

pub use apply::apply_to_lines;
pub use parse::parse_diff;

/// Why a diff could not be parsed or applied.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("malformed patch at line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error(
        "hunk {hunk} is out of range: {lines} line(s) at line {start} \
         in a document of {document_lines} line(s)"
    )]
    OutOfRange {
        hunk: usize,
        start: usize,
        lines: usize,
        document_lines: usize,
    },

    #[error(
        "hunk {hunk} declares -{declared_old},+{declared_new} line(s) \
         but contains -{actual_old},+{actual_new}"
    )]
    HunkSizeMismatch {
        hunk: usize,
        declared_old: usize,
        actual_old: usize,
        declared_new: usize,
        actual_new: usize,
    },

    #[error("content mismatch at line {line}: expected {expected:?}, found {actual:?}")]
    ContentMismatch {
        line: usize,
        expected: String,
        actual: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// What a successful application did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplySummary {
    pub path: PathBuf,
    pub hunks_applied: usize,
    pub lines_before: usize,
    pub lines_after: usize,
}

/// One parsed hunk: original-file coordinates plus the operation list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
    pub ops: Vec<LineOp>,
}

/// One line-level operation within a hunk. Text is stored without the
/// prefix character and without a line terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOp {
    Context(String),
    Added(String),
    Removed(String),
    /// `\ No newline at end of file`: the preceding line has no terminator.
    NoNewline,
}

/// Apply a unified diff to the file at `path`.
///
/// A missing file is treated as empty, so a diff whose first hunk is
/// `@@ -0,0 +1,N @@` creates it. The patched content is written back in a
/// single pass only after every hunk has applied cleanly.
pub async fn apply_unified_diff(
    path: impl AsRef<Path>,
    diff: &str,
) -> Result<ApplySummary, PatchError> {
    let path = path.as_ref();
    let hunks = parse_diff(diff)?;

    let original = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    let lines = split_lines(&original);
    let patched = apply_to_lines(&lines, &hunks)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(path, patched.concat()).await?;
    debug!(
        path = %path.display(),
        hunks = hunks.len(),
        lines_before = lines.len(),
        lines_after = patched.len(),
        "Applied unified diff"
    );
    Ok(ApplySummary {
        path: path.to_path_buf(),
        hunks_applied: hunks.len(),
        lines_before: lines.len(),
        lines_after: patched.len(),
    })
}

/// Split into newline-inclusive lines, so a file without a trailing
/// newline is representable and `concat` reproduces the input exactly.
pub fn split_lines(text: &str) -> Vec<String> {
    text.split_inclusive('\n').map(str::to_string).collect()
}
