use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{mlog_debug, Error, Result};

/// Default interval between drain loop ticks.
pub const DEFAULT_DRAIN_INTERVAL_MS: u64 = 50;

/// Default timeout for a single model invocation.
pub const DEFAULT_MODEL_TIMEOUT_SECS: u64 = 600;

fn default_true() -> bool {
    true
}

fn default_drain_interval_ms() -> u64 {
    DEFAULT_DRAIN_INTERVAL_MS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Master switch; sessions are rejected when false.
    #[serde(default = "default_true")]
    pub remediation_enabled: bool,
    /// Ask the human for more tasks once the router runs out of work.
    #[serde(default = "default_true")]
    pub interactive: bool,
    #[serde(default = "default_drain_interval_ms")]
    pub drain_interval_ms: u64,
    /// Command used by the headless model adapter.
    pub command: Option<String>,
    pub model_timeout_secs: Option<u64>,
    /// Background text handed to the planner with every task.
    pub migration_hint: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remediation_enabled: true,
            interactive: true,
            drain_interval_ms: DEFAULT_DRAIN_INTERVAL_MS,
            command: None,
            model_timeout_secs: None,
            migration_hint: None,
        }
    }
}

impl Config {
    pub fn mender_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".mender"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::mender_dir()?.join("mender.toml"))
    }

    pub fn effective_command(&self) -> &str {
        self.command.as_deref().unwrap_or("claude")
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms.max(1))
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(
            self.model_timeout_secs
                .unwrap_or(DEFAULT_MODEL_TIMEOUT_SECS),
        )
    }

    pub fn migration_hint(&self) -> &str {
        self.migration_hint.as_deref().unwrap_or("")
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        mlog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            mlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        mlog_debug!(
            "Config loaded: remediation_enabled={}, interactive={}, drain_interval_ms={}, command={:?}",
            config.remediation_enabled,
            config.interactive,
            config.drain_interval_ms,
            config.command
        );
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        mlog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }
}
