//! Backend gateway - the only way state-changing requests leave the process
//!
//! `GatewayTransport` is the raw request/response seam (WebSocket to the
//! privileged backend in production, in-memory fakes in tests). `Gateway`
//! wraps any transport with one typed method per backend call and turns the
//! `{success, message, data}` envelope into a `Result`.

mod daemon;

pub use daemon::DaemonGateway;

use async_trait::async_trait;
use envswitch_protocol::{
    Environment, EnvironmentActivation, EnvironmentPatch, ErrorCode, GatewayRequest,
    GatewayResponse, RuntimeStatus, ServiceInstance, ServiceKind, ServicePatch,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Failure of a single backend call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// `success = false`; message forwarded verbatim
    #[error("{message}")]
    Rejected {
        message: String,
        code: Option<ErrorCode>,
    },

    /// Credential missing or wrong
    #[error("{message}")]
    AuthenticationFailed { message: String },

    /// `success = true` but the payload did not have the expected shape
    #[error("unexpected response to {method}: {reason}")]
    Decode { method: &'static str, reason: String },
}

impl GatewayError {
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, GatewayError::AuthenticationFailed { .. })
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Raw asynchronous request/response channel to the backend.
///
/// Implementations never panic on transport problems; they answer with a
/// failed envelope instead.
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    async fn call(&self, request: GatewayRequest) -> GatewayResponse<Value>;
}

/// Typed adapter over a [`GatewayTransport`]
#[derive(Clone)]
pub struct Gateway {
    transport: Arc<dyn GatewayTransport>,
}

impl Gateway {
    pub fn new(transport: Arc<dyn GatewayTransport>) -> Self {
        Self { transport }
    }

    /// Send a request and check the envelope, keeping the raw payload
    async fn send(&self, request: GatewayRequest) -> GatewayResult<Option<Value>> {
        let method = request.method();
        debug!("gateway call {:?}", request);

        let response = self.transport.call(request).await;
        if response.success {
            return Ok(response.data);
        }

        let message = response.failure_message();
        debug!("gateway call {} failed: {}", method, message);
        if response.is_auth_failure() {
            Err(GatewayError::AuthenticationFailed { message })
        } else {
            Err(GatewayError::Rejected {
                message,
                code: response.code,
            })
        }
    }

    /// Send a request whose success payload is required
    async fn fetch<T: DeserializeOwned>(&self, request: GatewayRequest) -> GatewayResult<T> {
        let method = request.method();
        let data = self.send(request).await?.ok_or_else(|| GatewayError::Decode {
            method,
            reason: "missing data".to_string(),
        })?;
        serde_json::from_value(data).map_err(|e| GatewayError::Decode {
            method,
            reason: e.to_string(),
        })
    }

    /// Send a request whose payload is optional detail
    async fn fetch_optional<T: DeserializeOwned + Default>(
        &self,
        request: GatewayRequest,
    ) -> GatewayResult<T> {
        let method = request.method();
        match self.send(request).await? {
            None | Some(Value::Null) => Ok(T::default()),
            Some(data) => serde_json::from_value(data).map_err(|e| GatewayError::Decode {
                method,
                reason: e.to_string(),
            }),
        }
    }

    // ── Environments ──────────────────────────────────────────────

    pub async fn list_environments(&self) -> GatewayResult<Vec<Environment>> {
        self.fetch(GatewayRequest::ListEnvironments).await
    }

    pub async fn create_environment(&self, name: &str) -> GatewayResult<Environment> {
        self.fetch(GatewayRequest::CreateEnvironment {
            name: name.to_string(),
        })
        .await
    }

    pub async fn update_environment(&self, id: &str, patch: EnvironmentPatch) -> GatewayResult<()> {
        self.send(GatewayRequest::UpdateEnvironment {
            id: id.to_string(),
            patch,
        })
        .await
        .map(|_| ())
    }

    pub async fn delete_environment(&self, id: &str) -> GatewayResult<()> {
        self.send(GatewayRequest::DeleteEnvironment { id: id.to_string() })
            .await
            .map(|_| ())
    }

    /// Backend also activates every service of the environment
    pub async fn activate_environment(
        &self,
        environment: &Environment,
        credential: Option<String>,
    ) -> GatewayResult<EnvironmentActivation> {
        self.fetch_optional(GatewayRequest::ActivateEnvironment {
            environment: environment.clone(),
            credential,
        })
        .await
    }

    pub async fn deactivate_environment(
        &self,
        environment: &Environment,
        credential: Option<String>,
    ) -> GatewayResult<EnvironmentActivation> {
        self.fetch_optional(GatewayRequest::DeactivateEnvironment {
            environment: environment.clone(),
            credential,
        })
        .await
    }

    // ── Services ──────────────────────────────────────────────────

    pub async fn list_services(&self, environment_id: &str) -> GatewayResult<Vec<ServiceInstance>> {
        self.fetch(GatewayRequest::ListServices {
            environment_id: environment_id.to_string(),
        })
        .await
    }

    pub async fn create_service(
        &self,
        environment_id: &str,
        kind: ServiceKind,
        version: &str,
    ) -> GatewayResult<ServiceInstance> {
        self.fetch(GatewayRequest::CreateService {
            environment_id: environment_id.to_string(),
            kind,
            version: version.to_string(),
        })
        .await
    }

    pub async fn update_service(
        &self,
        environment_id: &str,
        id: &str,
        patch: ServicePatch,
    ) -> GatewayResult<()> {
        self.send(GatewayRequest::UpdateService {
            environment_id: environment_id.to_string(),
            id: id.to_string(),
            patch,
        })
        .await
        .map(|_| ())
    }

    pub async fn delete_service(&self, environment_id: &str, id: &str) -> GatewayResult<()> {
        self.send(GatewayRequest::DeleteService {
            environment_id: environment_id.to_string(),
            id: id.to_string(),
        })
        .await
        .map(|_| ())
    }

    pub async fn activate_service(
        &self,
        environment_id: &str,
        service: &ServiceInstance,
        credential: Option<String>,
    ) -> GatewayResult<()> {
        self.send(GatewayRequest::ActivateService {
            environment_id: environment_id.to_string(),
            service: service.clone(),
            credential,
        })
        .await
        .map(|_| ())
    }

    pub async fn deactivate_service(
        &self,
        environment_id: &str,
        service: &ServiceInstance,
        credential: Option<String>,
    ) -> GatewayResult<()> {
        self.send(GatewayRequest::DeactivateService {
            environment_id: environment_id.to_string(),
            service: service.clone(),
            credential,
        })
        .await
        .map(|_| ())
    }

    // ── Runtime ───────────────────────────────────────────────────

    pub async fn start_service(&self, environment_id: &str, id: &str) -> GatewayResult<()> {
        self.send(GatewayRequest::StartService {
            environment_id: environment_id.to_string(),
            id: id.to_string(),
        })
        .await
        .map(|_| ())
    }

    pub async fn stop_service(&self, environment_id: &str, id: &str) -> GatewayResult<()> {
        self.send(GatewayRequest::StopService {
            environment_id: environment_id.to_string(),
            id: id.to_string(),
        })
        .await
        .map(|_| ())
    }

    pub async fn restart_service(&self, environment_id: &str, id: &str) -> GatewayResult<()> {
        self.send(GatewayRequest::RestartService {
            environment_id: environment_id.to_string(),
            id: id.to_string(),
        })
        .await
        .map(|_| ())
    }

    pub async fn runtime_status(&self, environment_id: &str, id: &str) -> GatewayResult<RuntimeStatus> {
        self.fetch_optional(GatewayRequest::ServiceRuntimeStatus {
            environment_id: environment_id.to_string(),
            id: id.to_string(),
        })
        .await
    }

    /// Versions of `kind` installed locally
    pub async fn installed_versions(&self, kind: ServiceKind) -> GatewayResult<Vec<String>> {
        self.fetch_optional(GatewayRequest::InstalledVersions { kind })
            .await
    }
}
