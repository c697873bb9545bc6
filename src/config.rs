//! Runtime configuration.
//!
//! Configuration is JSON, read from the file given with `--config` or from the
//! `CODE_RUNNER_CONFIG` environment variable. Every field has a default, so
//! running without any configuration serves the built-in languages.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::registry::{LanguageRecipe, Registry};

/// Env var holding inline JSON configuration.
pub const CONFIG_ENV: &str = "CODE_RUNNER_CONFIG";

/// Env var overriding the execution timeout, in seconds.
pub const TIMEOUT_ENV: &str = "CODE_RUNNER_TIMEOUT";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Execution limits and workspace placement.
    #[serde(default)]
    pub execution: ExecutionSettings,

    /// Extra or overriding language recipes, keyed by language identifier.
    #[serde(default)]
    pub languages: HashMap<String, LanguageRecipe>,
}

/// Settings shared by every execution.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionSettings {
    /// Wall-clock budget covering build and run combined.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Directory under which per-request workspaces are created.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,

    /// Upper bound on captured output per step.
    #[serde(default = "default_max_output")]
    pub max_output_bytes: usize,

    /// Age after which leftover workspaces are removed at startup.
    #[serde(default = "default_stale_after")]
    pub stale_after_seconds: u64,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
            workspace_root: default_workspace_root(),
            max_output_bytes: default_max_output(),
            stale_after_seconds: default_stale_after(),
        }
    }
}

impl ExecutionSettings {
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub const fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_seconds)
    }
}

impl Config {
    /// Load configuration.
    ///
    /// Priority: `path` > `CODE_RUNNER_CONFIG` > defaults. `CODE_RUNNER_TIMEOUT`
    /// is applied on top of whichever source was used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::from_env()?,
        };
        config.apply_timeout_override(std::env::var(TIMEOUT_ENV).ok().as_deref())?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make every execution fail.
    pub fn validate(&self) -> Result<()> {
        if self.execution.timeout_seconds == 0 {
            anyhow::bail!("execution.timeout_seconds must be greater than zero");
        }
        if self.execution.max_output_bytes == 0 {
            anyhow::bail!("execution.max_output_bytes must be greater than zero");
        }
        Ok(())
    }

    /// Read configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Read configuration from `CODE_RUNNER_CONFIG`, or defaults when unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(json) => Self::from_json(&json).context("Failed to parse CODE_RUNNER_CONFIG"),
            Err(_) => {
                debug!("No configuration provided, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Parse configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse JSON")?;
        Ok(config)
    }

    /// Override the timeout from a raw env value, if present.
    pub fn apply_timeout_override(&mut self, value: Option<&str>) -> Result<()> {
        if let Some(raw) = value {
            let message = || format!("{TIMEOUT_ENV} must be a number of seconds, got '{raw}'");
            self.execution.timeout_seconds = raw.trim().parse().with_context(message)?;
        }
        Ok(())
    }

    /// Build the language registry: built-in recipes merged with configured ones.
    pub fn registry(&self) -> Registry {
        let mut registry = Registry::builtin();
        registry.merge(self.languages.clone());
        registry
    }
}

fn default_workspace_root() -> PathBuf {
    std::env::temp_dir()
}

const fn default_timeout() -> u64 {
    10
}

const fn default_max_output() -> usize {
    1024 * 1024
}

const fn default_stale_after() -> u64 {
    3600
}
