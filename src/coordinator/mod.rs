//! Activation coordinator
//!
//! Decides in what order, under which policy and with which credential
//! environments and their services move between Active and Inactive, and
//! keeps the last-used history in step with those transitions.
//!
//! Every activation and CRUD entry point runs under one coordinator-wide
//! async lock, so two user actions never interleave their backend calls. Steps inside a
//! single action are plain sequential awaits.

mod environments;
mod loading;
mod monitor;
mod services;

pub use loading::LoadingIndicator;
pub use monitor::spawn_runtime_monitor;
pub use services::ensure_kind_available;

use crate::core::credentials::{CredentialCache, CredentialPrompt};
use crate::core::error::{CoordinatorError, CoordinatorResult};
use crate::core::events::{ActivationSignal, AppEvent, EventSender};
use crate::core::history::LastUsedHistory;
use crate::core::settings::SettingsHandle;
use crate::core::state::StateStore;
use crate::gateway::Gateway;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Outcome of a continue-on-error batch
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Environments that reached the requested state
    pub succeeded: Vec<String>,
    /// Environments whose call failed, with the reason
    pub failed: Vec<(String, CoordinatorError)>,
    /// Ids that no longer match any environment
    pub skipped: Vec<String>,
}

impl BatchReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    pub fn failed_ids(&self) -> Vec<&str> {
        self.failed.iter().map(|(id, _)| id.as_str()).collect()
    }
}

/// The core state machine over environments and services
pub struct ActivationCoordinator {
    state: Arc<StateStore>,
    gateway: Gateway,
    credentials: Arc<CredentialCache>,
    prompt: Arc<dyn CredentialPrompt>,
    settings: Arc<SettingsHandle>,
    history: LastUsedHistory,
    signal: ActivationSignal,
    events: EventSender,
    /// Serializes activation and CRUD entry points
    activation_lock: Mutex<()>,
    loading_debounce: Duration,
}

impl ActivationCoordinator {
    pub fn new(
        gateway: Gateway,
        settings: Arc<SettingsHandle>,
        prompt: Arc<dyn CredentialPrompt>,
        events: EventSender,
    ) -> Self {
        Self {
            state: Arc::new(StateStore::new()),
            gateway,
            credentials: Arc::new(CredentialCache::new()),
            prompt,
            history: LastUsedHistory::new(Arc::clone(&settings)),
            settings,
            signal: ActivationSignal::new(),
            events,
            activation_lock: Mutex::new(()),
            loading_debounce: Duration::from_millis(300),
        }
    }

    /// Share a credential cache with other parts of the process
    pub fn with_credential_cache(mut self, credentials: Arc<CredentialCache>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_loading_debounce(mut self, debounce: Duration) -> Self {
        self.loading_debounce = debounce;
        self
    }

    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    pub fn credentials(&self) -> &Arc<CredentialCache> {
        &self.credentials
    }

    pub fn history(&self) -> &LastUsedHistory {
        &self.history
    }

    pub fn settings(&self) -> &Arc<SettingsHandle> {
        &self.settings
    }

    pub fn signal(&self) -> &ActivationSignal {
        &self.signal
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Load settings and environments, and focus an environment.
    ///
    /// Settings that fail to load leave the handle uninitialized: the app
    /// keeps working on defaults and history writes are skipped.
    pub async fn initialize(&self) -> CoordinatorResult<()> {
        match self.settings.initialize().await {
            Ok(_) => self.history.reload(),
            Err(e) => {
                let err = CoordinatorError::Settings(e);
                self.report_error(&err);
            }
        }

        self.surface(self.refresh_environments_inner().await)?;

        let focused = self
            .state
            .current_environment_id()
            .filter(|id| self.state.environment(id).is_some());
        let target = focused.or_else(|| self.state.environments().first().map(|e| e.id.clone()));
        if let Some(id) = target {
            // A failed service refresh has already been surfaced.
            let _ = self.surface(self.focus_environment(&id).await);
        }
        Ok(())
    }

    /// Reload the environment list from the backend
    pub async fn refresh_environments(&self) -> CoordinatorResult<()> {
        let _guard = self.activation_lock.lock().await;
        let result = self.refresh_environments_inner().await;
        self.surface(result)
    }

    async fn refresh_environments_inner(&self) -> CoordinatorResult<()> {
        let environments = self.gateway.list_environments().await?;
        debug!("Loaded {} environments", environments.len());
        self.state.set_environments(environments);

        if let Some(current) = self.state.current_environment_id() {
            if self.state.environment(&current).is_none() {
                debug!("Focused environment {} disappeared", current);
                self.state.set_current_environment_id(None);
                self.state.set_current_service_id(None);
                self.state.clear_services();
            }
        }
        Ok(())
    }

    /// Focus an environment and load its services
    pub async fn select_environment(&self, id: &str) -> CoordinatorResult<()> {
        let result = match self.state.environment(id) {
            Some(_) => self.focus_environment(id).await,
            None => Err(CoordinatorError::environment_not_found(id)),
        };
        self.surface(result)
    }

    /// Focus a service of the focused environment
    pub fn select_service(&self, id: Option<&str>) -> CoordinatorResult<()> {
        if let Some(id) = id {
            if self.state.service(id).is_none() {
                return self.surface(Err(CoordinatorError::service_not_found(id)));
            }
        }
        self.state.set_current_service_id(id.map(str::to_string));
        Ok(())
    }

    async fn focus_environment(&self, id: &str) -> CoordinatorResult<()> {
        if !self.state.is_current_environment(id) {
            self.state.set_current_environment_id(Some(id.to_string()));
            self.state.set_current_service_id(None);
            self.state.clear_services();
        }
        self.refresh_services_inner(id).await
    }

    /// Reload the focused environment's services.
    ///
    /// The result is dropped if focus moved elsewhere while the call was in
    /// flight.
    async fn refresh_services_inner(&self, environment_id: &str) -> CoordinatorResult<()> {
        let services = self.gateway.list_services(environment_id).await?;
        if self.state.is_current_environment(environment_id) {
            self.state.load_services(environment_id, services);
        } else {
            debug!(
                "Focus moved away from {} during refresh, dropping result",
                environment_id
            );
        }
        Ok(())
    }

    /// Refresh services after an activation change, without failing the
    /// surrounding operation.
    async fn refresh_focused_after_change(&self, environment_id: &str) {
        if !self.state.is_current_environment(environment_id) {
            return;
        }
        if let Err(e) = self.refresh_services_inner(environment_id).await {
            warn!("Failed to refresh services of {}: {}", environment_id, e);
            self.events
                .warning(format!("Could not refresh services: {}", e));
        }
    }

    /// Publish a new activation token
    fn broadcast(&self) {
        let token = self.signal.bump();
        debug!("Activation changed (token {})", token);
        self.events.send(AppEvent::ActivationChanged(token));
    }

    fn loading(&self) -> LoadingIndicator {
        LoadingIndicator::start(self.events.clone(), self.loading_debounce)
    }

    async fn persist_history(&self) {
        match self.history.persist().await {
            Ok(true) => debug!("Saved last used environments {:?}", self.history.ids()),
            Ok(false) => {}
            Err(e) => self.report_error(&CoordinatorError::Settings(e)),
        }
    }

    /// Log and notify on failure, then hand the result back
    fn surface<T>(&self, result: CoordinatorResult<T>) -> CoordinatorResult<T> {
        if let Err(ref e) = result {
            self.report_error(e);
        }
        result
    }

    fn report_error(&self, err: &CoordinatorError) {
        match err {
            CoordinatorError::Gateway { .. } | CoordinatorError::Settings(_) => {
                error!("{}", err)
            }
            _ => warn!("{}", err),
        }
        self.events.error(err.to_string());
    }

    fn announce(&self, message: String) {
        info!("{}", message);
        self.events.info(message);
    }
}
