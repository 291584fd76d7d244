//! Environment activation, mutual exclusion, batch deactivation, resume,
//! and environment CRUD.

use super::{ActivationCoordinator, BatchReport};
use crate::core::credentials::Privilege;
use crate::core::error::{CoordinatorError, CoordinatorResult};
use crate::core::history::LastUsedHistory;
use envswitch_protocol::{ActivationStatus, Environment, EnvironmentActivation, EnvironmentPatch};
use tracing::{debug, info, warn};

/// How a successful transition updates the last-used history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HistoryUpdate {
    /// Move the environment to the end
    Append,
    /// The environment becomes the only entry
    Replace,
    /// Drop the environment (explicit deactivation)
    Remove,
    /// Leave the history alone
    Keep,
}

impl ActivationCoordinator {
    // ── Public entry points (serialized) ─────────────────────────────

    /// Activate an environment under the current mutual-exclusion policy
    pub async fn activate_environment(&self, id: &str) -> CoordinatorResult<()> {
        let _guard = self.activation_lock.lock().await;
        let _loading = self.loading();

        let exclusive = self
            .settings
            .current_or_default()
            .deactivate_other_environments_on_activate;
        let result = self.activate_with_policy(id, exclusive).await;
        self.persist_history().await;
        self.surface(result)
    }

    /// Deactivate an environment and drop it from the history
    pub async fn deactivate_environment(&self, id: &str) -> CoordinatorResult<()> {
        let _guard = self.activation_lock.lock().await;
        let _loading = self.loading();

        let result = self.deactivate_inner(id, HistoryUpdate::Remove).await;
        self.persist_history().await;
        self.surface(result)
    }

    /// The user-facing switch: focus `id`, then flip its status.
    ///
    /// Focus (and the service list refresh) happens whatever the activation
    /// outcome. The history is persisted once the flip is done.
    pub async fn toggle_environment(&self, id: &str) -> CoordinatorResult<()> {
        let _guard = self.activation_lock.lock().await;
        let _loading = self.loading();

        let environment = match self.state.environment(id) {
            Some(environment) => environment,
            None => return self.surface(Err(CoordinatorError::environment_not_found(id))),
        };

        if let Err(e) = self.focus_environment(id).await {
            self.report_error(&e);
        }

        let result = if environment.is_active() {
            self.deactivate_inner(id, HistoryUpdate::Remove).await
        } else {
            let exclusive = self
                .settings
                .current_or_default()
                .deactivate_other_environments_on_activate;
            self.activate_with_policy(id, exclusive).await
        };

        self.persist_history().await;
        self.surface(result)
    }

    /// Deactivate every active environment except `id`, continuing past
    /// individual failures.
    pub async fn deactivate_others_except(&self, id: &str) -> BatchReport {
        let _guard = self.activation_lock.lock().await;
        let _loading = self.loading();

        let report = self.deactivate_others_inner(id).await;
        self.persist_history().await;
        report
    }

    /// Deactivate everything (shutdown/reset).
    ///
    /// Every environment ends up Inactive in memory, whatever the backend
    /// answered, so no stale Active badge survives a shutdown. The history is
    /// kept so the next start can resume it.
    pub async fn deactivate_all(&self) -> BatchReport {
        let _guard = self.activation_lock.lock().await;
        let _loading = self.loading();

        let targets = self.state.active_environment_ids();
        let mut report = BatchReport::default();
        for id in targets {
            match self.deactivate_inner(&id, HistoryUpdate::Keep).await {
                Ok(()) => report.succeeded.push(id),
                Err(e) => {
                    self.report_error(&e);
                    report.failed.push((id, e));
                }
            }
        }

        self.state.force_all_inactive();
        if let Some(current) = self.state.current_environment_id() {
            self.refresh_focused_after_change(&current).await;
        }
        self.broadcast();

        if !report.failed.is_empty() {
            warn!(
                "Deactivate all: backend failed for {:?}, forced inactive anyway",
                report.failed_ids()
            );
        }
        report
    }

    /// Re-activate the last used environments on startup.
    ///
    /// Runs in history order without the deactivate-others step, so several
    /// environments may come back active together. Ids that no longer exist
    /// are skipped with a warning.
    pub async fn auto_resume(&self) -> BatchReport {
        let mut report = BatchReport::default();

        let settings = self.settings.current_or_default();
        if !settings.auto_activate_last_used_environment_on_app_start {
            debug!("Auto-resume disabled");
            return report;
        }

        let ids = LastUsedHistory::get(&settings);
        if ids.is_empty() {
            return report;
        }

        let _guard = self.activation_lock.lock().await;
        let _loading = self.loading();

        info!("Resuming last used environments {:?}", ids);
        for id in ids {
            if self.state.environment(&id).is_none() {
                warn!("Last used environment {} no longer exists, skipping", id);
                self.events
                    .warning(format!("Last used environment {} no longer exists", id));
                report.skipped.push(id);
                continue;
            }
            match self.activate_inner(&id, HistoryUpdate::Append).await {
                Ok(()) => report.succeeded.push(id),
                Err(e) => {
                    self.report_error(&e);
                    report.failed.push((id, e));
                }
            }
        }

        self.persist_history().await;
        report
    }

    // ── Lock-free steps ──────────────────────────────────────────────

    async fn activate_with_policy(&self, id: &str, exclusive: bool) -> CoordinatorResult<()> {
        let environment = self
            .state
            .environment(id)
            .ok_or_else(|| CoordinatorError::environment_not_found(id))?;
        if environment.is_active() {
            debug!("Environment {} already active", environment.name);
            return Ok(());
        }

        if !exclusive {
            return self.activate_inner(id, HistoryUpdate::Append).await;
        }

        // Partial failure here does not block the activation below.
        let report = self.deactivate_others_inner(id).await;
        if !report.failed.is_empty() {
            let names = self.names_of(&report.failed_ids());
            warn!(
                "Activating {} while {} could not be deactivated",
                environment.name, names
            );
            self.events.warning(format!(
                "Could not deactivate {} before activating {}",
                names, environment.name
            ));
        }
        self.activate_inner(id, HistoryUpdate::Replace).await
    }

    async fn activate_inner(&self, id: &str, history: HistoryUpdate) -> CoordinatorResult<()> {
        let environment = self
            .state
            .environment(id)
            .ok_or_else(|| CoordinatorError::environment_not_found(id))?;
        if environment.is_active() {
            debug!("Environment {} already active", environment.name);
            return Ok(());
        }

        let gateway = self.gateway.clone();
        let target = environment.clone();
        let reason = format!("activate {}", environment.name);
        let detail = self
            .credentials
            .run(
                Privilege::Opportunistic,
                self.prompt.as_ref(),
                &reason,
                move |credential| {
                    let gateway = gateway.clone();
                    let target = target.clone();
                    async move { gateway.activate_environment(&target, credential).await }
                },
            )
            .await?;

        if !self.state.set_environment_status(id, ActivationStatus::Active) {
            warn!("Environment {} vanished while activating", id);
        }
        self.apply_history(id, history);
        self.report_partial(&environment, "activating", &detail);
        self.refresh_focused_after_change(id).await;
        self.broadcast();

        self.announce(format!("Environment {} activated", environment.name));
        Ok(())
    }

    async fn deactivate_inner(&self, id: &str, history: HistoryUpdate) -> CoordinatorResult<()> {
        let environment = self
            .state
            .environment(id)
            .ok_or_else(|| CoordinatorError::environment_not_found(id))?;
        if !environment.is_active() {
            debug!("Environment {} already inactive", environment.name);
            self.apply_history(id, history);
            return Ok(());
        }

        let gateway = self.gateway.clone();
        let target = environment.clone();
        let reason = format!("deactivate {}", environment.name);
        let detail = self
            .credentials
            .run(
                Privilege::Opportunistic,
                self.prompt.as_ref(),
                &reason,
                move |credential| {
                    let gateway = gateway.clone();
                    let target = target.clone();
                    async move { gateway.deactivate_environment(&target, credential).await }
                },
            )
            .await?;

        if !self.state.set_environment_status(id, ActivationStatus::Inactive) {
            warn!("Environment {} vanished while deactivating", id);
        }
        self.apply_history(id, history);
        self.report_partial(&environment, "deactivating", &detail);
        self.refresh_focused_after_change(id).await;
        self.broadcast();

        self.announce(format!("Environment {} deactivated", environment.name));
        Ok(())
    }

    async fn deactivate_others_inner(&self, except: &str) -> BatchReport {
        let targets: Vec<String> = self
            .state
            .active_environment_ids()
            .into_iter()
            .filter(|id| id != except)
            .collect();

        let mut report = BatchReport::default();
        for id in targets {
            match self.deactivate_inner(&id, HistoryUpdate::Remove).await {
                Ok(()) => report.succeeded.push(id),
                Err(e) => {
                    self.report_error(&e);
                    report.failed.push((id, e));
                }
            }
        }
        report
    }

    fn apply_history(&self, id: &str, update: HistoryUpdate) {
        match update {
            HistoryUpdate::Append => self.history.record_activation(id),
            HistoryUpdate::Replace => self.history.replace_with(id),
            HistoryUpdate::Remove => {
                self.history.record_deactivation(id);
            }
            HistoryUpdate::Keep => {}
        }
    }

    /// Surface per-service failures reported by the backend; no rollback
    fn report_partial(&self, environment: &Environment, verb: &str, detail: &EnvironmentActivation) {
        for failure in &detail.failed_services {
            warn!(
                "{} {}: service {} ({}) failed: {}",
                verb, environment.name, failure.service_id, failure.kind, failure.message
            );
            self.events.warning(format!(
                "{} failed while {} {}: {}",
                failure.kind.display_name(),
                verb,
                environment.name,
                failure.message
            ));
        }
    }

    fn names_of(&self, ids: &[&str]) -> String {
        ids.iter()
            .map(|id| {
                self.state
                    .environment(id)
                    .map(|e| e.name)
                    .unwrap_or_else(|| id.to_string())
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    // ── Environment CRUD ─────────────────────────────────────────────

    /// Create a new (inactive) environment with a unique name
    pub async fn create_environment(&self, name: &str) -> CoordinatorResult<Environment> {
        let _guard = self.activation_lock.lock().await;
        let result = self.create_environment_inner(name).await;
        self.surface(result)
    }

    async fn create_environment_inner(&self, name: &str) -> CoordinatorResult<Environment> {
        let name = self.check_name(name, None)?;

        let mut created = self.gateway.create_environment(&name).await?;
        // New environments always start inactive
        created.status = ActivationStatus::Inactive;

        let mut next = (*self.state.environments()).clone();
        if created.sort_order == 0 {
            created.sort_order = next.iter().map(|e| e.sort_order).max().unwrap_or(-1) + 1;
        }
        next.push(created.clone());
        self.state.set_environments(next);

        info!("Created environment {} ({})", created.name, created.id);
        Ok(created)
    }

    /// Rename an environment, keeping names unique
    pub async fn rename_environment(&self, id: &str, name: &str) -> CoordinatorResult<()> {
        let _guard = self.activation_lock.lock().await;
        let result = self.rename_environment_inner(id, name).await;
        self.surface(result)
    }

    async fn rename_environment_inner(&self, id: &str, name: &str) -> CoordinatorResult<()> {
        let environment = self
            .state
            .environment(id)
            .ok_or_else(|| CoordinatorError::environment_not_found(id))?;
        let name = self.check_name(name, Some(id))?;
        if name == environment.name {
            return Ok(());
        }

        self.gateway
            .update_environment(
                id,
                EnvironmentPatch {
                    name: Some(name.clone()),
                    sort_order: None,
                },
            )
            .await?;

        let next: Vec<Environment> = self
            .state
            .environments()
            .iter()
            .map(|e| {
                let mut e = e.clone();
                if e.id == id {
                    e.name = name.clone();
                }
                e
            })
            .collect();
        self.state.set_environments(next);
        Ok(())
    }

    /// Persist a user-defined order; `ids[i]` gets `sort_order = i`
    pub async fn reorder_environments(&self, ids: &[String]) -> CoordinatorResult<()> {
        let _guard = self.activation_lock.lock().await;
        let result = self.reorder_environments_inner(ids).await;
        self.surface(result)
    }

    async fn reorder_environments_inner(&self, ids: &[String]) -> CoordinatorResult<()> {
        for id in ids {
            if self.state.environment(id).is_none() {
                return Err(CoordinatorError::environment_not_found(id));
            }
        }

        for (position, id) in ids.iter().enumerate() {
            let sort_order = position as i64;
            let unchanged = self
                .state
                .environment(id)
                .map(|e| e.sort_order == sort_order)
                .unwrap_or(false);
            if unchanged {
                continue;
            }
            self.gateway
                .update_environment(
                    id,
                    EnvironmentPatch {
                        name: None,
                        sort_order: Some(sort_order),
                    },
                )
                .await?;
        }

        let next: Vec<Environment> = self
            .state
            .environments()
            .iter()
            .map(|e| {
                let mut e = e.clone();
                if let Some(position) = ids.iter().position(|id| *id == e.id) {
                    e.sort_order = position as i64;
                }
                e
            })
            .collect();
        self.state.set_environments(next);
        Ok(())
    }

    /// Delete an environment; refused while it is active
    pub async fn delete_environment(&self, id: &str) -> CoordinatorResult<()> {
        let _guard = self.activation_lock.lock().await;
        let result = self.delete_environment_inner(id).await;
        self.surface(result)
    }

    async fn delete_environment_inner(&self, id: &str) -> CoordinatorResult<()> {
        let environment = self
            .state
            .environment(id)
            .ok_or_else(|| CoordinatorError::environment_not_found(id))?;
        if environment.is_active() {
            return Err(CoordinatorError::StillActive {
                what: "environment",
                name: environment.name,
            });
        }

        self.gateway.delete_environment(id).await?;

        let next: Vec<Environment> = self
            .state
            .environments()
            .iter()
            .filter(|e| e.id != id)
            .cloned()
            .collect();
        self.state.set_environments(next);

        if self.state.is_current_environment(id) {
            self.state.set_current_environment_id(None);
            self.state.set_current_service_id(None);
            self.state.clear_services();
        }

        if self.history.record_deactivation(id) {
            self.persist_history().await;
        }
        info!("Deleted environment {}", environment.name);
        Ok(())
    }

    /// Trimmed, non-empty name not used by any environment other than
    /// `except`
    fn check_name(&self, name: &str, except: Option<&str>) -> CoordinatorResult<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CoordinatorError::EmptyName);
        }
        let taken = self
            .state
            .environments()
            .iter()
            .any(|e| e.name.trim() == name && Some(e.id.as_str()) != except);
        if taken {
            return Err(CoordinatorError::DuplicateName {
                name: name.to_string(),
            });
        }
        Ok(name.to_string())
    }
}
