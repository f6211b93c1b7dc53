//! Configuration loading and validation for Windlass.
//!
//! Loads configuration from `~/.windlass/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.windlass/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the upstream model provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model identifier sent with every request
    #[serde(default = "default_model")]
    pub model: String,

    /// Max tokens per model response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Thinking budget in tokens; 0 disables extended thinking
    #[serde(default = "default_thinking_budget")]
    pub thinking_budget: u32,

    /// Inline system prompt (takes priority over the file)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Path to a system prompt file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_file: Option<PathBuf>,

    /// Skip interactive tool confirmation prompts
    #[serde(default)]
    pub auto_confirm: bool,

    /// Shell tool settings
    #[serde(default)]
    pub shell: ShellConfig,

    /// Upstream retry settings
    #[serde(default)]
    pub retry: RetryConfig,

    /// Session persistence settings
    #[serde(default)]
    pub session: SessionConfig,
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_max_tokens() -> u32 {
    8192
}
fn default_thinking_budget() -> u32 {
    10_000
}
fn default_true() -> bool {
    true
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("thinking_budget", &self.thinking_budget)
            .field("system_prompt", &self.system_prompt)
            .field("system_prompt_file", &self.system_prompt_file)
            .field("auto_confirm", &self.auto_confirm)
            .field("shell", &self.shell)
            .field("retry", &self.retry)
            .field("session", &self.session)
            .finish()
    }
}

/// Settings for the shell tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellConfig {
    /// Allowlist of base commands. Empty = allow all.
    #[serde(default)]
    pub allowed_commands: Vec<String>,

    /// Per-command timeout in seconds
    #[serde(default = "default_shell_timeout")]
    pub timeout_secs: u64,

    /// Restrict file tools to these roots. Empty = home directory only.
    #[serde(default)]
    pub allowed_roots: Vec<String>,

    /// Paths the file tools must never touch
    #[serde(default = "default_forbidden_paths")]
    pub forbidden_paths: Vec<String>,
}

fn default_shell_timeout() -> u64 {
    120
}
fn default_forbidden_paths() -> Vec<String> {
    vec![
        "/etc".into(),
        "/proc".into(),
        "/sys".into(),
        "~/.ssh".into(),
        "~/.gnupg".into(),
        "~/.aws".into(),
    ]
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            allowed_commands: vec![],
            timeout_secs: default_shell_timeout(),
            allowed_roots: vec![],
            forbidden_paths: default_forbidden_paths(),
        }
    }
}

/// Retry behavior for transient upstream failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Total attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    30_000
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Where conversation snapshots are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_true")]
    pub save_on_exit: bool,

    /// Snapshot directory; defaults to `<config dir>/sessions`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            save_on_exit: true,
            snapshot_dir: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.windlass/config.toml).
    ///
    /// Also checks environment variables:
    /// - `WINDLASS_API_KEY` (highest priority)
    /// - `ANTHROPIC_API_KEY`
    /// - `WINDLASS_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        // Environment variable overrides (highest priority)
        if let Ok(key) = std::env::var("WINDLASS_API_KEY") {
            config.api_key = Some(key);
        } else if config.api_key.is_none() {
            config.api_key = std::env::var("ANTHROPIC_API_KEY").ok();
        }

        if let Ok(model) = std::env::var("WINDLASS_MODEL") {
            config.model = model;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".windlass")
    }

    /// Directory where session snapshots are written.
    pub fn snapshot_dir(&self) -> PathBuf {
        self.session
            .snapshot_dir
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("sessions"))
    }

    /// Resolve the system prompt: inline value first, then the file.
    pub fn resolve_system_prompt(&self) -> Result<Option<String>, ConfigError> {
        if let Some(prompt) = &self.system_prompt {
            return Ok(Some(prompt.clone()));
        }
        match &self.system_prompt_file {
            Some(path) => std::fs::read_to_string(path)
                .map(|s| Some(s.trim_end().to_string()))
                .map_err(|e| ConfigError::ReadError {
                    path: path.clone(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "max_tokens must be greater than 0".into(),
            ));
        }
        if self.thinking_budget > 0 && self.thinking_budget >= self.max_tokens {
            return Err(ConfigError::ValidationError(
                "thinking_budget must be smaller than max_tokens".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::ValidationError(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".into(),
            ));
        }
        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            thinking_budget: default_thinking_budget(),
            system_prompt: None,
            system_prompt_file: None,
            auto_confirm: false,
            shell: ShellConfig::default(),
            retry: RetryConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

/// Get the user's home directory.
pub fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
