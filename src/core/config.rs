//! Configuration management

use anyhow::{Context, Result};
use directories::ProjectDirs;
use envswitch_protocol::DEFAULT_GATEWAY_ADDR;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Backend connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// `host:port` of the privileged backend
    #[serde(default = "default_addr")]
    pub addr: String,
    /// How long a single backend call may take, in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

fn default_addr() -> String {
    DEFAULT_GATEWAY_ADDR.to_string()
}
fn default_request_timeout() -> u64 {
    30_000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl GatewayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Front-end timing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiConfig {
    /// Delay before a loading indicator is shown, in milliseconds
    #[serde(default = "default_loading_debounce")]
    pub loading_debounce_ms: u64,
    /// Runtime status polling interval, in milliseconds
    #[serde(default = "default_runtime_poll_interval")]
    pub runtime_poll_interval_ms: u64,
}

fn default_loading_debounce() -> u64 {
    300
}
fn default_runtime_poll_interval() -> u64 {
    5000
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            loading_debounce_ms: default_loading_debounce(),
            runtime_poll_interval_ms: default_runtime_poll_interval(),
        }
    }
}

impl UiConfig {
    pub fn loading_debounce(&self) -> Duration {
        Duration::from_millis(self.loading_debounce_ms)
    }

    /// Never zero; `tokio::time::interval` rejects a zero period
    pub fn runtime_poll_interval(&self) -> Duration {
        Duration::from_millis(self.runtime_poll_interval_ms.max(1))
    }
}

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub ui: UiConfig,
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from a file, falling back to defaults if missing
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("dev", "envswitch", "EnvSwitch")
            .context("Failed to determine config directory")?;
        Ok(proj_dirs.config_dir().join("config.toml"))
    }
}
