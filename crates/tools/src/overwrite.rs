//! Overwrite tool: replace a file's content wholesale.

use crate::policy::PathPolicy;
use async_trait::async_trait;
use windlass_core::{ProgressSink, Tool, ToolError};

pub struct OverwriteFileTool {
    policy: PathPolicy,
}

impl OverwriteFileTool {
    pub fn new(policy: PathPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for OverwriteFileTool {
    fn name(&self) -> &str {
        "overwrite_file"
    }

    fn description(&self) -> &str {
        "Replace the entire content of a file. Creates the file (and parent directories) if it doesn't exist. Prefer edit_file_diff for partial changes."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "The file path to write to"
                },
                "content": {
                    "type": "string",
                    "description": "The complete new content of the file"
                }
            },
            "required": ["file_path", "content"]
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
        let content = input["content"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'content' argument".into()))?;

        let resolved = self
            .policy
            .resolve(path)
            .map_err(|e| ToolError::PermissionDenied {
                tool_name: "overwrite_file".into(),
                reason: e.to_string(),
            })?;

        if let Some(parent) = resolved.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::ExecutionFailed {
                    tool_name: "overwrite_file".into(),
                    reason: format!("Failed to create directory: {e}"),
                })?;
        }

        tokio::fs::write(&resolved, content)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "overwrite_file".into(),
                reason: format!("Failed to write file: {e}"),
            })?;

        Ok(format!(
            "Wrote {} bytes to {}",
            content.len(),
            resolved.display()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_and_verify() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("output.txt");

        let tool = OverwriteFileTool::new(PathPolicy::unrestricted());
        let output = tool
            .execute(
                serde_json::json!({
                    "file_path": file_path.to_str().unwrap(),
                    "content": "Hello from test!"
                }),
                &ProgressSink::none(),
            )
            .await
            .unwrap();

        assert!(output.contains("16 bytes"));
        assert_eq!(
            std::fs::read_to_string(&file_path).unwrap(),
            "Hello from test!"
        );
    }

    #[tokio::test]
    async fn write_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("nested").join("dir").join("file.txt");

        let tool = OverwriteFileTool::new(PathPolicy::unrestricted());
        tool.execute(
            serde_json::json!({
                "file_path": file_path.to_str().unwrap(),
                "content": "nested content"
            }),
            &ProgressSink::none(),
        )
        .await
        .unwrap();

        assert_eq!(
            std::fs::read_to_string(&file_path).unwrap(),
            "nested content"
        );
    }

    #[tokio::test]
    async fn overwrite_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("overwrite.txt");
        std::fs::write(&file_path, "old content").unwrap();

        let tool = OverwriteFileTool::new(PathPolicy::unrestricted());
        tool.execute(
            serde_json::json!({
                "file_path": file_path.to_str().unwrap(),
                "content": "new content"
            }),
            &ProgressSink::none(),
        )
        .await
        .unwrap();

        assert_eq!(std::fs::read_to_string(&file_path).unwrap(), "new content");
    }

    #[tokio::test]
    async fn missing_arguments_rejected() {
        let tool = OverwriteFileTool::new(PathPolicy::unrestricted());
        let result = tool
            .execute(
                serde_json::json!({"content": "hello"}),
                &ProgressSink::none(),
            )
            .await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }

    #[tokio::test]
    async fn policy_violation_is_permission_denied() {
        let tool = OverwriteFileTool::new(PathPolicy::new(vec!["/nowhere".into()], vec![]));
        let result = tool
            .execute(
                serde_json::json!({
                    "file_path": "/tmp/windlass-policy-test.txt",
                    "content": "blocked"
                }),
                &ProgressSink::none(),
            )
            .await;
        assert!(matches!(result, Err(ToolError::PermissionDenied { .. })));
    }
}
