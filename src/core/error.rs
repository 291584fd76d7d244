//! Error taxonomy for coordinator operations

use crate::gateway::GatewayError;
use envswitch_protocol::ServiceKind;
use thiserror::Error;

/// Every failure a coordinator operation can surface to the user.
///
/// None of these are fatal to the process; at worst an activation badge is
/// stale until the user toggles again.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// One-per-type service invariant would be violated
    #[error("environment already has a {} service", .kind.display_name())]
    Conflict { kind: ServiceKind },

    /// Environment name already taken (or empty)
    #[error("an environment named \"{name}\" already exists")]
    DuplicateName { name: String },

    #[error("environment name must not be empty")]
    EmptyName,

    /// Deleting an active environment (or service) is refused
    #[error("{what} \"{name}\" is active; deactivate it first")]
    StillActive { what: &'static str, name: String },

    /// A process cannot run for a service whose wiring is not applied
    #[error("service {id} is not active")]
    ServiceInactive { id: String },

    /// Required local installation is missing
    #[error("{} {version} is not installed", .kind.display_name())]
    NotInstalled { kind: ServiceKind, version: String },

    /// The backend reported `success = false`
    #[error("{message}")]
    Gateway { message: String },

    /// Referenced environment/service is gone from the current snapshot
    #[error("{what} {id} not found")]
    NotFound { what: &'static str, id: String },

    /// The user dismissed the credential prompt
    #[error("administrator password is required for this action")]
    CredentialCancelled,

    /// Persisted settings could not be read or written
    #[error("settings error: {0:#}")]
    Settings(#[source] anyhow::Error),
}

impl CoordinatorError {
    pub fn environment_not_found(id: &str) -> Self {
        CoordinatorError::NotFound {
            what: "environment",
            id: id.to_string(),
        }
    }

    pub fn service_not_found(id: &str) -> Self {
        CoordinatorError::NotFound {
            what: "service",
            id: id.to_string(),
        }
    }
}

impl From<GatewayError> for CoordinatorError {
    fn from(err: GatewayError) -> Self {
        // A lingering authentication failure here means the retry budget is
        // spent; it is reported like any other backend failure.
        CoordinatorError::Gateway {
            message: err.to_string(),
        }
    }
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
