//! Service instance CRUD, per-service activation and runtime control.
//!
//! Service operations act on the services of the focused environment as held
//! in the state store.

use super::ActivationCoordinator;
use crate::core::credentials::Privilege;
use crate::core::error::{CoordinatorError, CoordinatorResult};
use envswitch_protocol::{
    ActivationStatus, RuntimeStatus, ServiceInstance, ServiceKind, ServicePatch,
};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Refuse a second instance of any kind other than `custom`
pub fn ensure_kind_available(
    services: &[ServiceInstance],
    environment_id: &str,
    kind: ServiceKind,
) -> CoordinatorResult<()> {
    if kind.allows_multiple() {
        return Ok(());
    }
    let taken = services
        .iter()
        .any(|s| s.environment_id == environment_id && s.kind == kind);
    if taken {
        return Err(CoordinatorError::Conflict { kind });
    }
    Ok(())
}

impl ActivationCoordinator {
    /// Reload the focused environment's services
    pub async fn refresh_services(&self) -> CoordinatorResult<()> {
        let Some(current) = self.state.current_environment_id() else {
            return Ok(());
        };
        let result = self.refresh_services_inner(&current).await;
        self.surface(result)
    }

    /// Add a service to an environment; at most one per kind except `custom`
    pub async fn create_service(
        &self,
        environment_id: &str,
        kind: ServiceKind,
        version: &str,
    ) -> CoordinatorResult<ServiceInstance> {
        let _guard = self.activation_lock.lock().await;
        let result = self.create_service_inner(environment_id, kind, version).await;
        self.surface(result)
    }

    async fn create_service_inner(
        &self,
        environment_id: &str,
        kind: ServiceKind,
        version: &str,
    ) -> CoordinatorResult<ServiceInstance> {
        if self.state.environment(environment_id).is_none() {
            return Err(CoordinatorError::environment_not_found(environment_id));
        }

        // A focused list emptied by a failed refresh is not trusted
        let existing = if self.state.services_loaded(environment_id) {
            (*self.state.services()).clone()
        } else {
            self.gateway.list_services(environment_id).await?
        };
        ensure_kind_available(&existing, environment_id, kind)?;

        let created = self
            .gateway
            .create_service(environment_id, kind, version.trim())
            .await?;

        if self.state.is_current_environment(environment_id) {
            let mut next = (*self.state.services()).clone();
            next.push(created.clone());
            self.state.set_services(next);
        }
        info!(
            "Created {} {} in environment {}",
            kind.display_name(),
            created.version,
            environment_id
        );
        Ok(created)
    }

    /// Patch a service; an empty patch makes no backend call
    pub async fn update_service(&self, id: &str, patch: ServicePatch) -> CoordinatorResult<()> {
        let _guard = self.activation_lock.lock().await;
        let result = self.update_service_inner(id, patch).await;
        self.surface(result)
    }

    async fn update_service_inner(&self, id: &str, patch: ServicePatch) -> CoordinatorResult<()> {
        let service = self
            .state
            .service(id)
            .ok_or_else(|| CoordinatorError::service_not_found(id))?;
        if patch.is_empty() {
            return Ok(());
        }

        self.gateway
            .update_service(&service.environment_id, id, patch.clone())
            .await?;
        self.replace_service(id, |s| patch.apply_to(s));
        Ok(())
    }

    /// Remove a service; refused while it is active
    pub async fn delete_service(&self, id: &str) -> CoordinatorResult<()> {
        let _guard = self.activation_lock.lock().await;
        let result = self.delete_service_inner(id).await;
        self.surface(result)
    }

    async fn delete_service_inner(&self, id: &str) -> CoordinatorResult<()> {
        let service = self
            .state
            .service(id)
            .ok_or_else(|| CoordinatorError::service_not_found(id))?;
        if service.is_active() {
            return Err(CoordinatorError::StillActive {
                what: "service",
                name: format!("{} {}", service.kind.display_name(), service.version),
            });
        }

        self.gateway
            .delete_service(&service.environment_id, id)
            .await?;

        let next: Vec<ServiceInstance> = self
            .state
            .services()
            .iter()
            .filter(|s| s.id != id)
            .cloned()
            .collect();
        self.state.set_services(next);
        if self.state.current_service_id().as_deref() == Some(id) {
            self.state.set_current_service_id(None);
        }

        let mut statuses = (*self.state.runtime_statuses()).clone();
        statuses.remove(id);
        self.state.set_runtime_statuses(statuses);
        Ok(())
    }

    /// Apply one service's OS wiring
    pub async fn activate_service(&self, id: &str) -> CoordinatorResult<()> {
        let _guard = self.activation_lock.lock().await;
        let _loading = self.loading();
        let result = self.set_service_activation(id, true).await;
        self.surface(result)
    }

    /// Remove one service's OS wiring
    pub async fn deactivate_service(&self, id: &str) -> CoordinatorResult<()> {
        let _guard = self.activation_lock.lock().await;
        let _loading = self.loading();
        let result = self.set_service_activation(id, false).await;
        self.surface(result)
    }

    async fn set_service_activation(&self, id: &str, activate: bool) -> CoordinatorResult<()> {
        let service = self
            .state
            .service(id)
            .ok_or_else(|| CoordinatorError::service_not_found(id))?;
        if service.is_active() == activate {
            debug!("Service {} already {}", id, service.status);
            return Ok(());
        }

        if activate && service.kind.requires_installation() {
            let installed = self.gateway.installed_versions(service.kind).await?;
            if !installed.iter().any(|v| v == &service.version) {
                return Err(CoordinatorError::NotInstalled {
                    kind: service.kind,
                    version: service.version.clone(),
                });
            }
        }

        let privilege = if service.kind.requires_privilege() {
            Privilege::Required
        } else {
            Privilege::Opportunistic
        };
        let verb = if activate { "activate" } else { "deactivate" };
        let reason = format!("{} {}", verb, service.kind.display_name());

        let gateway = self.gateway.clone();
        let target = service.clone();
        self.credentials
            .run(privilege, self.prompt.as_ref(), &reason, move |credential| {
                let gateway = gateway.clone();
                let target = target.clone();
                async move {
                    if activate {
                        gateway
                            .activate_service(&target.environment_id, &target, credential)
                            .await
                    } else {
                        gateway
                            .deactivate_service(&target.environment_id, &target, credential)
                            .await
                    }
                }
            })
            .await?;

        let status = if activate {
            ActivationStatus::Active
        } else {
            ActivationStatus::Inactive
        };
        self.replace_service(id, |s| s.status = status);
        if !activate {
            // Nothing runs for an inactive service
            self.set_runtime_status(id, RuntimeStatus::Stopped);
        }
        self.broadcast();

        self.announce(format!(
            "{} {} {}d",
            service.kind.display_name(),
            service.version,
            verb
        ));
        Ok(())
    }

    pub async fn start_service(&self, id: &str) -> CoordinatorResult<()> {
        let result = self.control_service(id, RuntimeControl::Start).await;
        self.surface(result)
    }

    pub async fn stop_service(&self, id: &str) -> CoordinatorResult<()> {
        let result = self.control_service(id, RuntimeControl::Stop).await;
        self.surface(result)
    }

    pub async fn restart_service(&self, id: &str) -> CoordinatorResult<()> {
        let result = self.control_service(id, RuntimeControl::Restart).await;
        self.surface(result)
    }

    async fn control_service(&self, id: &str, control: RuntimeControl) -> CoordinatorResult<()> {
        let service = self
            .state
            .service(id)
            .ok_or_else(|| CoordinatorError::service_not_found(id))?;
        if control != RuntimeControl::Stop && !service.is_active() {
            return Err(CoordinatorError::ServiceInactive { id: id.to_string() });
        }

        let env = service.environment_id.as_str();
        match control {
            RuntimeControl::Start => self.gateway.start_service(env, id).await?,
            RuntimeControl::Stop => self.gateway.stop_service(env, id).await?,
            RuntimeControl::Restart => self.gateway.restart_service(env, id).await?,
        }

        let status = match control {
            RuntimeControl::Stop => RuntimeStatus::Stopped,
            RuntimeControl::Start | RuntimeControl::Restart => RuntimeStatus::Running,
        };
        self.set_runtime_status(id, status);
        debug!("{:?} {} -> {}", control, id, status);
        Ok(())
    }

    /// Re-read the runtime status of every focused service, one at a time.
    ///
    /// Inactive services are Stopped without asking the backend. A failed
    /// query yields Unknown for that service only.
    pub async fn poll_runtime_status(&self) -> HashMap<String, RuntimeStatus> {
        let services = self.state.services();
        let mut statuses = HashMap::with_capacity(services.len());

        for service in services.iter() {
            let status = if !service.is_active() {
                RuntimeStatus::Stopped
            } else {
                match self
                    .gateway
                    .runtime_status(&service.environment_id, &service.id)
                    .await
                {
                    Ok(status) => status,
                    Err(e) => {
                        warn!("Runtime status of {} unavailable: {}", service.id, e);
                        RuntimeStatus::Unknown
                    }
                }
            };
            statuses.insert(service.id.clone(), status);
        }

        self.state.set_runtime_statuses(statuses.clone());
        statuses
    }

    fn set_runtime_status(&self, id: &str, status: RuntimeStatus) {
        let mut statuses = (*self.state.runtime_statuses()).clone();
        statuses.insert(id.to_string(), status);
        self.state.set_runtime_statuses(statuses);
    }

    /// Whole-list replacement with one service edited
    fn replace_service(&self, id: &str, edit: impl Fn(&mut ServiceInstance)) {
        let next: Vec<ServiceInstance> = self
            .state
            .services()
            .iter()
            .map(|s| {
                let mut s = s.clone();
                if s.id == id {
                    edit(&mut s);
                }
                s
            })
            .collect();
        self.state.set_services(next);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuntimeControl {
    Start,
    Stop,
    Restart,
}
