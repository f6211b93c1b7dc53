//! Hunk application over an in-memory line buffer.

use crate::{Hunk, LineOp, PatchError};

/// Apply parsed hunks to a newline-inclusive line buffer.
///
/// Hunks are taken in the order they appear, each addressed by its
/// original-file line numbers plus the running offset contributed by the
/// hunks already applied. The result is a new buffer; the input is never
/// modified, so callers can discard the result on error.
pub fn apply_to_lines(doc: &[String], hunks: &[Hunk]) -> Result<Vec<String>, PatchError> {
    let mut out: Vec<String> = doc.to_vec();
    let mut offset: isize = 0;

    for (ix, hunk) in hunks.iter().enumerate() {
        let hunk_no = ix + 1;
        let (old, new) = expand(hunk);
        if old.len() != hunk.old_count || new.len() != hunk.new_count {
            return Err(PatchError::HunkSizeMismatch {
                hunk: hunk_no,
                declared_old: hunk.old_count,
                actual_old: old.len(),
                declared_new: hunk.new_count,
                actual_new: new.len(),
            });
        }

        // A zero-count hunk names the line *after* which to insert, so its
        // start needs no one-based correction.
        let base = if hunk.old_count == 0 {
            hunk.old_start as isize
        } else {
            hunk.old_start as isize - 1
        };
        let start = base + offset;
        if start < 0 || start as usize + old.len() > out.len() {
            return Err(PatchError::OutOfRange {
                hunk: hunk_no,
                start: hunk.old_start,
                lines: old.len(),
                document_lines: out.len(),
            });
        }
        let start = start as usize;

        let actual = &out[start..start + old.len()];
        if actual != old.as_slice() {
            // Exact match failed; retry ignoring leading and trailing
            // whitespace before giving up.
            if let Some((i, (a, e))) = actual
                .iter()
                .zip(&old)
                .enumerate()
                .find(|(_, (a, e))| a.trim() != e.trim())
            {
                return Err(PatchError::ContentMismatch {
                    line: start + i + 1,
                    expected: e.trim_end_matches('\n').to_string(),
                    actual: a.trim_end_matches('\n').to_string(),
                });
            }
        }

        out.splice(start..start + old.len(), new.iter().cloned());
        offset += new.len() as isize - old.len() as isize;
    }
    Ok(out)
}

/// Reconstruct the expected-old and replacement-new line sequences from a
/// hunk's operations. A no-newline marker strips the terminator from the
/// last line of whichever sequence(s) the preceding operation touched.
fn expand(hunk: &Hunk) -> (Vec<String>, Vec<String>) {
    let mut old: Vec<String> = Vec::with_capacity(hunk.old_count);
    let mut new: Vec<String> = Vec::with_capacity(hunk.new_count);
    let mut ops = hunk.ops.iter().peekable();

    while let Some(op) = ops.next() {
        let no_newline = matches!(ops.peek(), Some(LineOp::NoNewline));
        let terminator = if no_newline { "" } else { "\n" };
        match op {
            LineOp::Context(text) => {
                old.push(format!("{text}{terminator}"));
                new.push(format!("{text}{terminator}"));
            }
            LineOp::Removed(text) => old.push(format!("{text}{terminator}")),
            LineOp::Added(text) => new.push(format!("{text}{terminator}")),
            LineOp::NoNewline => {}
        }
    }
    (old, new)
}
