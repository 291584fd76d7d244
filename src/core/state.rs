//! In-memory application state
//!
//! Every value is held as an `Arc` snapshot and replaced whole on write, so a
//! reader always sees either the value before or after an operation, never
//! a half-applied one.

use envswitch_protocol::{ActivationStatus, Environment, RuntimeStatus, ServiceInstance};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Inner {
    environments: Arc<Vec<Environment>>,
    current_environment_id: Option<String>,
    /// Services of the focused environment only
    services: Arc<Vec<ServiceInstance>>,
    /// Environment whose services were last read in full from the backend
    services_loaded_for: Option<String>,
    current_service_id: Option<String>,
    /// Last polled runtime status, keyed by service id
    runtime: Arc<HashMap<String, RuntimeStatus>>,
}

/// Shared state store read and written by every component
#[derive(Debug, Default)]
pub struct StateStore {
    inner: RwLock<Inner>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    // === Environments ===

    pub fn environments(&self) -> Arc<Vec<Environment>> {
        Arc::clone(&self.inner.read().environments)
    }

    /// Replace the environment list, keeping it ordered by `sort_order`
    pub fn set_environments(&self, mut environments: Vec<Environment>) {
        environments.sort_by_key(|e| e.sort_order);
        self.inner.write().environments = Arc::new(environments);
    }

    pub fn environment(&self, id: &str) -> Option<Environment> {
        self.inner
            .read()
            .environments
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }

    pub fn environment_by_name(&self, name: &str) -> Option<Environment> {
        self.inner
            .read()
            .environments
            .iter()
            .find(|e| e.name == name)
            .cloned()
    }

    /// Ids of active environments, in display order
    pub fn active_environment_ids(&self) -> Vec<String> {
        self.inner
            .read()
            .environments
            .iter()
            .filter(|e| e.is_active())
            .map(|e| e.id.clone())
            .collect()
    }

    /// Copy-modify-replace the status of one environment.
    ///
    /// Returns false when the id is not in the snapshot.
    pub fn set_environment_status(&self, id: &str, status: ActivationStatus) -> bool {
        let mut inner = self.inner.write();
        if !inner.environments.iter().any(|e| e.id == id) {
            return false;
        }
        let next: Vec<Environment> = inner
            .environments
            .iter()
            .map(|e| {
                let mut e = e.clone();
                if e.id == id {
                    e.status = status;
                }
                e
            })
            .collect();
        inner.environments = Arc::new(next);
        true
    }

    /// Mark every environment inactive, whatever the backend said
    pub fn force_all_inactive(&self) {
        let mut inner = self.inner.write();
        let next: Vec<Environment> = inner
            .environments
            .iter()
            .map(|e| Environment {
                status: ActivationStatus::Inactive,
                ..e.clone()
            })
            .collect();
        inner.environments = Arc::new(next);
    }

    pub fn current_environment_id(&self) -> Option<String> {
        self.inner.read().current_environment_id.clone()
    }

    pub fn set_current_environment_id(&self, id: Option<String>) {
        self.inner.write().current_environment_id = id;
    }

    pub fn is_current_environment(&self, id: &str) -> bool {
        self.inner.read().current_environment_id.as_deref() == Some(id)
    }

    // === Services ===

    pub fn services(&self) -> Arc<Vec<ServiceInstance>> {
        Arc::clone(&self.inner.read().services)
    }

    /// Replace the service list after a local edit
    pub fn set_services(&self, mut services: Vec<ServiceInstance>) {
        services.sort_by_key(|s| s.sort_order);
        self.inner.write().services = Arc::new(services);
    }

    /// Replace the service list with a full backend listing of `environment_id`
    pub fn load_services(&self, environment_id: &str, mut services: Vec<ServiceInstance>) {
        services.sort_by_key(|s| s.sort_order);
        let mut inner = self.inner.write();
        inner.services = Arc::new(services);
        inner.services_loaded_for = Some(environment_id.to_string());
    }

    /// Empty the service list until the next full listing
    pub fn clear_services(&self) {
        let mut inner = self.inner.write();
        inner.services = Arc::new(Vec::new());
        inner.services_loaded_for = None;
    }

    /// Whether the service snapshot is a complete listing of the focused
    /// `environment_id`
    pub fn services_loaded(&self, environment_id: &str) -> bool {
        let inner = self.inner.read();
        inner.current_environment_id.as_deref() == Some(environment_id)
            && inner.services_loaded_for.as_deref() == Some(environment_id)
    }

    pub fn service(&self, id: &str) -> Option<ServiceInstance> {
        self.inner
            .read()
            .services
            .iter()
            .find(|s| s.id == id)
            .cloned()
    }

    pub fn current_service_id(&self) -> Option<String> {
        self.inner.read().current_service_id.clone()
    }

    pub fn set_current_service_id(&self, id: Option<String>) {
        self.inner.write().current_service_id = id;
    }

    // === Runtime status ===

    pub fn runtime_statuses(&self) -> Arc<HashMap<String, RuntimeStatus>> {
        Arc::clone(&self.inner.read().runtime)
    }

    pub fn runtime_status(&self, service_id: &str) -> RuntimeStatus {
        self.inner
            .read()
            .runtime
            .get(service_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn set_runtime_statuses(&self, statuses: HashMap<String, RuntimeStatus>) {
        self.inner.write().runtime = Arc::new(statuses);
    }
}
