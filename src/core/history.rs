//! Last-used environment history
//!
//! Ordered list of environment ids used to resume activation state on the
//! next launch. Insertion order is activation order: an id is removed on
//! explicit deactivation and moved to the end when activated again, so the
//! most recently activated environment is always last.

use super::settings::{PersistedSettings, SettingsHandle};
use anyhow::Result;
use parking_lot::RwLock;
use std::sync::Arc;

/// Working copy of the resume history, persisted through [`SettingsHandle`]
pub struct LastUsedHistory {
    settings: Arc<SettingsHandle>,
    ids: RwLock<Vec<String>>,
}

impl LastUsedHistory {
    pub fn new(settings: Arc<SettingsHandle>) -> Self {
        let ids = settings
            .snapshot()
            .map(|s| Self::get(&s))
            .unwrap_or_default();
        Self {
            settings,
            ids: RwLock::new(ids),
        }
    }

    /// Persisted history with blank entries filtered out
    pub fn get(settings: &PersistedSettings) -> Vec<String> {
        settings
            .last_used_environment_ids
            .iter()
            .filter(|id| !id.trim().is_empty())
            .cloned()
            .collect()
    }

    /// Reset the working copy from the settings snapshot
    pub fn reload(&self) {
        let ids = self
            .settings
            .snapshot()
            .map(|s| Self::get(&s))
            .unwrap_or_default();
        *self.ids.write() = ids;
    }

    /// Current working copy, oldest first
    pub fn ids(&self) -> Vec<String> {
        self.ids.read().clone()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.read().iter().any(|i| i == id)
    }

    /// Add or move `id` to the end
    pub fn record_activation(&self, id: &str) {
        let mut ids = self.ids.write();
        ids.retain(|i| i != id);
        ids.push(id.to_string());
    }

    /// Forget everything but `id`
    pub fn replace_with(&self, id: &str) {
        *self.ids.write() = vec![id.to_string()];
    }

    /// Remove `id`; returns whether it was present
    pub fn record_deactivation(&self, id: &str) -> bool {
        let mut ids = self.ids.write();
        let len_before = ids.len();
        ids.retain(|i| i != id);
        ids.len() < len_before
    }

    /// Replace the history and persist it.
    ///
    /// Duplicates keep their last position. Returns `Ok(false)` (and leaves
    /// the store untouched) when settings are not initialized yet.
    pub async fn set(&self, ids: Vec<String>) -> Result<bool> {
        let ids = dedup_keep_last(ids);
        *self.ids.write() = ids.clone();
        self.settings
            .update(move |s| s.last_used_environment_ids = ids)
            .await
    }

    /// Persist the current working copy
    pub async fn persist(&self) -> Result<bool> {
        self.set(self.ids()).await
    }
}

fn dedup_keep_last(ids: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out: Vec<String> = ids
        .into_iter()
        .rev()
        .filter(|id| !id.trim().is_empty())
        .filter(|id| seen.insert(id.clone()))
        .collect();
    out.reverse();
    out
}
