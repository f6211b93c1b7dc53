//! Unified-diff text parser.

use crate::{Hunk, LineOp, PatchError};

/// Parse the hunks out of a unified diff.
///
/// Lines before the first `@@` header (`---`/`+++` file headers, `diff`
/// and `index` lines) are ignored. Inside a hunk every line must begin
/// with ` `, `+`, `-`, or `\`; a bare empty line is accepted as an empty
/// context line, since tooling frequently strips the trailing space.
pub fn parse_diff(diff: &str) -> Result<Vec<Hunk>, PatchError> {
    let mut hunks: Vec<Hunk> = Vec::new();

    for (ix, raw) in diff.lines().enumerate() {
        let line_no = ix + 1;
        if raw.starts_with("@@") {
            let hunk = parse_header(raw).ok_or_else(|| PatchError::Malformed {
                line: line_no,
                reason: format!("invalid hunk header {raw:?}"),
            })?;
            hunks.push(hunk);
            continue;
        }

        let Some(hunk) = hunks.last_mut() else {
            // Preamble before the first header.
            continue;
        };
        let op = match raw.as_bytes().first() {
            Some(b' ') => LineOp::Context(raw[1..].to_string()),
            Some(b'+') => LineOp::Added(raw[1..].to_string()),
            Some(b'-') => LineOp::Removed(raw[1..].to_string()),
            Some(b'\\') => {
                if matches!(hunk.ops.last(), None | Some(LineOp::NoNewline)) {
                    return Err(PatchError::Malformed {
                        line: line_no,
                        reason: "no-newline marker without a preceding line".into(),
                    });
                }
                LineOp::NoNewline
            }
            None => LineOp::Context(String::new()),
            Some(_) => {
                return Err(PatchError::Malformed {
                    line: line_no,
                    reason: format!("unexpected line prefix in {raw:?}"),
                });
            }
        };
        hunk.ops.push(op);
    }

    if hunks.is_empty() {
        return Err(PatchError::Malformed {
            line: 1,
            reason: "no hunk headers found".into(),
        });
    }
    Ok(hunks)
}

/// `@@ -old_start[,old_count] +new_start[,new_count] @@ [section]`
fn parse_header(line: &str) -> Option<Hunk> {
    let rest = line.strip_prefix("@@ -")?;
    let end = rest.find(" @@")?;
    let (old_part, new_part) = rest[..end].split_once(" +")?;
    let (old_start, old_count) = parse_range(old_part)?;
    let (new_start, new_count) = parse_range(new_part)?;
    Some(Hunk {
        old_start,
        old_count,
        new_start,
        new_count,
        ops: Vec::new(),
    })
}

fn parse_range(s: &str) -> Option<(usize, usize)> {
    match s.split_once(',') {
        Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
        None => Some((s.parse().ok()?, 1)),
    }
}
