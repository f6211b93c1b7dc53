//! Path policy: filesystem sandboxing for the file tools.
//!
//! Restricts file access to allowed roots and blocks forbidden prefixes
//! (e.g., ~/.ssh, /etc). One policy instance is shared by every file
//! tool in a session.

use std::path::{Path, PathBuf};

/// Error returned when a path fails policy checks.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("Path '{path}' is outside allowed roots")]
    OutsideAllowedRoots { path: String },

    #[error("Path '{path}' matches forbidden pattern '{pattern}'")]
    ForbiddenPath { path: String, pattern: String },

    #[error("Path traversal detected in '{path}'")]
    PathTraversal { path: String },

    #[error("Failed to canonicalize path '{path}': {reason}")]
    CanonicalizeFailed { path: String, reason: String },
}

/// Which paths the file tools may touch.
#[derive(Debug, Clone, Default)]
pub struct PathPolicy {
    /// Allowed root directories. Empty = allow all.
    allowed_roots: Vec<String>,
    /// Forbidden path prefixes. Checked before allowed roots.
    forbidden_paths: Vec<String>,
}

impl PathPolicy {
    pub fn new(allowed_roots: Vec<String>, forbidden_paths: Vec<String>) -> Self {
        Self {
            allowed_roots,
            forbidden_paths,
        }
    }

    /// A policy with no restrictions.
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// Validate a path and resolve it to its canonical form.
    ///
    /// Checks, in order: raw `..` traversal, canonicalization (falling
    /// back to the parent directory for files that do not exist yet),
    /// forbidden prefixes, then allowed roots.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, PolicyError> {
        let input_path = Path::new(path);

        let path_str = path.replace('\\', "/");
        if path_str.contains("../") || path_str.contains("/..") || path_str == ".." {
            return Err(PolicyError::PathTraversal { path: path.into() });
        }

        // Resolve symlinks and relative components. A file that does not
        // exist yet (writes, new-file diffs) is resolved via its parent.
        let canonical = if input_path.exists() {
            input_path
                .canonicalize()
                .map_err(|e| PolicyError::CanonicalizeFailed {
                    path: path.into(),
                    reason: e.to_string(),
                })?
        } else if let Some(parent) = input_path.parent()
            && parent.exists()
        {
            let canonical_parent =
                parent
                    .canonicalize()
                    .map_err(|e| PolicyError::CanonicalizeFailed {
                        path: path.into(),
                        reason: format!("Parent dir: {e}"),
                    })?;
            canonical_parent.join(input_path.file_name().unwrap_or_default())
        } else {
            input_path.to_path_buf()
        };

        let canonical_str = canonical
            .to_string_lossy()
            .replace('\\', "/")
            .to_lowercase();
        // canonicalize() on Windows prepends \\?\, which normalizes to //?/
        let canonical_str = canonical_str
            .strip_prefix("//?/")
            .unwrap_or(&canonical_str)
            .to_string();

        for forbidden in &self.forbidden_paths {
            let pattern = normalize(forbidden);
            if canonical_str.starts_with(&pattern) {
                return Err(PolicyError::ForbiddenPath {
                    path: path.into(),
                    pattern: forbidden.clone(),
                });
            }
        }

        if !self.allowed_roots.is_empty() {
            let allowed = self
                .allowed_roots
                .iter()
                .any(|root| canonical_str.starts_with(&normalize(root)));
            if !allowed {
                return Err(PolicyError::OutsideAllowedRoots { path: path.into() });
            }
        }

        Ok(canonical)
    }
}

fn normalize(path: &str) -> String {
    expand_tilde(path).replace('\\', "/").to_lowercase()
}

/// Expand ~ to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if (path.starts_with("~/") || path == "~")
        && let Ok(home) = home_dir()
    {
        return path.replacen('~', &home, 1);
    }
    path.to_string()
}

fn home_dir() -> Result<String, ()> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE").map_err(|_| ())
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME").map_err(|_| ())
    }
}
