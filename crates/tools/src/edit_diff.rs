//! Diff edit tool: apply a unified diff to a file.

use crate::policy::PathPolicy;
use async_trait::async_trait;
use windlass_core::{ProgressSink, Tool, ToolError};

pub struct EditFileDiffTool {
    policy: PathPolicy,
}

impl EditFileDiffTool {
    pub fn new(policy: PathPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for EditFileDiffTool {
    fn name(&self) -> &str {
        "edit_file_diff"
    }

    fn description(&self) -> &str {
        "Edit a file by applying a unified diff. Hunk headers use the original file's line numbers. A hunk like '@@ -0,0 +1,N @@' against a missing file creates it."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "The file to edit"
                },
                "diff": {
                    "type": "string",
                    "description": "A unified diff. Each hunk starts with '@@ -old_start,old_count +new_start,new_count @@'; lines begin with ' ' (context), '-' (remove), or '+' (add)."
                }
            },
            "required": ["file_path", "diff"]
        })
    }

    async fn execute(
        &self,
        input: serde_json::Value,
        _progress: &ProgressSink,
    ) -> Result<String, ToolError> {
        let path = input["file_path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'file_path' argument".into()))?;
        let diff = input["diff"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'diff' argument".into()))?;

        let resolved = self
            .policy
            .resolve(path)
            .map_err(|e| ToolError::PermissionDenied {
                tool_name: "edit_file_diff".into(),
                reason: e.to_string(),
            })?;

        let summary = windlass_patch::apply_unified_diff(&resolved, diff)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "edit_file_diff".into(),
                reason: e.to_string(),
            })?;

        Ok(format!(
            "Applied {} hunk(s) to {} ({} -> {} lines)",
            summary.hunks_applied,
            summary.path.display(),
            summary.lines_before,
            summary.lines_after
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn applies_diff() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("main.rs");
        std::fs::write(&file_path, "fn main() {\n    old();\n}\n").unwrap();

        let tool = EditFileDiffTool::new(PathPolicy::unrestricted());
        let output = tool
            .execute(
                serde_json::json!({
                    "file_path": file_path.to_str().unwrap(),
                    "diff": "@@ -2,1 +2,1 @@\n-    old();\n+    new();\n"
                }),
                &ProgressSink::none(),
            )
            .await
            .unwrap();

        assert!(output.contains("1 hunk(s)"));
        assert_eq!(
            std::fs::read_to_string(&file_path).unwrap(),
            "fn main() {\n    new();\n}\n"
        );
    }

    #[tokio::test]
    async fn creates_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("fresh.txt");

        let tool = EditFileDiffTool::new(PathPolicy::unrestricted());
        tool.execute(
            serde_json::json!({
                "file_path": file_path.to_str().unwrap(),
                "diff": "@@ -0,0 +1,1 @@\n+brand new\n"
            }),
            &ProgressSink::none(),
        )
        .await
        .unwrap();

        assert_eq!(std::fs::read_to_string(&file_path).unwrap(), "brand new\n");
    }

    #[tokio::test]
    async fn mismatch_surfaces_detail() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("main.rs");
        std::fs::write(&file_path, "actual line\n").unwrap();

        let tool = EditFileDiffTool::new(PathPolicy::unrestricted());
        let err = tool
            .execute(
                serde_json::json!({
                    "file_path": file_path.to_str().unwrap(),
                    "diff": "@@ -1,1 +1,1 @@\n-expected line\n+replacement\n"
                }),
                &ProgressSink::none(),
            )
            .await
            .unwrap_err();

        match err {
            ToolError::ExecutionFailed { reason, .. } => {
                assert!(reason.contains("expected line"));
                assert!(reason.contains("actual line"));
            }
            other => panic!("Expected ExecutionFailed, got {other:?}"),
        }
        // File untouched after the failed edit.
        assert_eq!(
            std::fs::read_to_string(&file_path).unwrap(),
            "actual line\n"
        );
    }

    #[tokio::test]
    async fn policy_violation_is_permission_denied() {
        let tool = EditFileDiffTool::new(PathPolicy::new(vec!["/nowhere".into()], vec![]));
        let result = tool
            .execute(
                serde_json::json!({
                    "file_path": "/tmp/windlass-diff-test.txt",
                    "diff": "@@ -0,0 +1,1 @@\n+x\n"
                }),
                &ProgressSink::none(),
            )
            .await;
        assert!(matches!(result, Err(ToolError::PermissionDenied { .. })));
    }
}
