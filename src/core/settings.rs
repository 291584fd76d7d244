//! Persisted user settings
//!
//! Only the fields the activation core depends on live here: the resume
//! history and the two activation policy flags.

use anyhow::{Context, Result};
use async_trait::async_trait;
use directories::ProjectDirs;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

/// Settings persisted across application restarts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSettings {
    /// Environment ids to resume on next launch, most recently activated last
    #[serde(default)]
    pub last_used_environment_ids: Vec<String>,

    /// Activating one environment deactivates every other active one
    #[serde(default = "default_true")]
    pub deactivate_other_environments_on_activate: bool,

    /// Re-activate the last used environments on startup
    #[serde(default)]
    pub auto_activate_last_used_environment_on_app_start: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PersistedSettings {
    fn default() -> Self {
        Self {
            last_used_environment_ids: Vec::new(),
            deactivate_other_environments_on_activate: true,
            auto_activate_last_used_environment_on_app_start: false,
        }
    }
}

/// Where settings are read from and written to
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load(&self) -> Result<PersistedSettings>;
    async fn save(&self, settings: &PersistedSettings) -> Result<()>;
}

/// TOML file backed settings store
#[derive(Debug, Clone)]
pub struct TomlSettingsStore {
    path: PathBuf,
}

impl TomlSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the platform config directory
    pub fn default_location() -> Result<Self> {
        let proj_dirs = ProjectDirs::from("dev", "envswitch", "EnvSwitch")
            .context("Failed to determine settings directory")?;
        Ok(Self::new(proj_dirs.config_dir().join("settings.toml")))
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl SettingsStore for TomlSettingsStore {
    async fn load(&self) -> Result<PersistedSettings> {
        let path = &self.path;
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(PersistedSettings::default());
        }
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read settings file: {:?}", path))?;
        let settings: PersistedSettings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse settings file: {:?}", path))?;
        Ok(settings)
    }

    async fn save(&self, settings: &PersistedSettings) -> Result<()> {
        let path = &self.path;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create settings directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(settings).context("Failed to serialize settings")?;
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write settings file: {:?}", path))?;
        Ok(())
    }
}

/// Shared, write-through view of the persisted settings.
///
/// Empty until [`SettingsHandle::initialize`] has loaded the store; writes
/// attempted before that are skipped with a warning.
pub struct SettingsHandle {
    store: Arc<dyn SettingsStore>,
    current: RwLock<Option<PersistedSettings>>,
}

impl SettingsHandle {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self {
            store,
            current: RwLock::new(None),
        }
    }

    /// Load settings from the store and keep them in memory
    pub async fn initialize(&self) -> Result<PersistedSettings> {
        let settings = self.store.load().await?;
        *self.current.write() = Some(settings.clone());
        Ok(settings)
    }

    pub fn is_initialized(&self) -> bool {
        self.current.read().is_some()
    }

    pub fn snapshot(&self) -> Option<PersistedSettings> {
        self.current.read().clone()
    }

    /// Current settings, or defaults when not loaded yet
    pub fn current_or_default(&self) -> PersistedSettings {
        self.snapshot().unwrap_or_default()
    }

    /// Apply `f` and persist the result.
    ///
    /// Returns `Ok(false)` without touching the store when settings have not
    /// been initialized. The in-memory copy only changes once the write
    /// succeeded.
    pub async fn update<F>(&self, f: F) -> Result<bool>
    where
        F: FnOnce(&mut PersistedSettings),
    {
        let mut next = match self.snapshot() {
            Some(settings) => settings,
            None => {
                warn!("Settings not initialized yet, skipping write");
                return Ok(false);
            }
        };
        f(&mut next);
        self.store.save(&next).await?;
        *self.current.write() = Some(next);
        Ok(true)
    }
}
