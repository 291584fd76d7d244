//! Shared types and wire format for envswitch app ↔ backend communication.
//!
//! This crate is intentionally lightweight (only `serde` + `serde_json`).
//! It defines:
//! - Environment and service types shared between the app and the backend
//! - The response envelope every backend call answers with
//! - Request variants and JSON frame encoding/decoding

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Default address the privileged backend listens on
pub const DEFAULT_GATEWAY_ADDR: &str = "127.0.0.1:47600";

/// Metadata key holding the host table of a host-file-manager service
pub const HOSTS_METADATA_KEY: &str = "hosts";

/// Opaque environment identifier (allocated by the backend)
pub type EnvironmentId = String;

/// Opaque service instance identifier (allocated by the backend)
pub type ServiceId = String;

// ── Status types ───────────────────────────────────────────────────

/// Whether the OS-level wiring of an environment or service is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivationStatus {
    Active,
    #[default]
    Inactive,
}

impl ActivationStatus {
    pub fn is_active(self) -> bool {
        matches!(self, ActivationStatus::Active)
    }
}

impl fmt::Display for ActivationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivationStatus::Active => write!(f, "active"),
            ActivationStatus::Inactive => write!(f, "inactive"),
        }
    }
}

/// Whether the daemon process behind a service is running.
///
/// Orthogonal to [`ActivationStatus`], except that a process never runs for
/// an inactive service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeStatus {
    Running,
    Stopped,
    #[default]
    Unknown,
}

impl fmt::Display for RuntimeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeStatus::Running => write!(f, "running"),
            RuntimeStatus::Stopped => write!(f, "stopped"),
            RuntimeStatus::Unknown => write!(f, "unknown"),
        }
    }
}

// ── Service kinds ──────────────────────────────────────────────────

/// Closed set of service kinds an environment can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceKind {
    // Language runtimes
    Node,
    Python,
    Php,
    Go,
    Java,
    Ruby,
    // Web servers
    Nginx,
    Apache,
    Caddy,
    // Databases
    Mysql,
    Mariadb,
    Postgresql,
    Mongodb,
    Redis,
    Memcached,
    /// Local DNS resolver
    Dns,
    /// Freeform user-defined service
    Custom,
    /// Synthetic host-file-manager
    Hosts,
    /// Synthetic local TLS certificate authority
    TlsAuthority,
}

impl ServiceKind {
    pub const ALL: &'static [ServiceKind] = &[
        ServiceKind::Node,
        ServiceKind::Python,
        ServiceKind::Php,
        ServiceKind::Go,
        ServiceKind::Java,
        ServiceKind::Ruby,
        ServiceKind::Nginx,
        ServiceKind::Apache,
        ServiceKind::Caddy,
        ServiceKind::Mysql,
        ServiceKind::Mariadb,
        ServiceKind::Postgresql,
        ServiceKind::Mongodb,
        ServiceKind::Redis,
        ServiceKind::Memcached,
        ServiceKind::Dns,
        ServiceKind::Custom,
        ServiceKind::Hosts,
        ServiceKind::TlsAuthority,
    ];

    /// Wire name of this kind
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceKind::Node => "node",
            ServiceKind::Python => "python",
            ServiceKind::Php => "php",
            ServiceKind::Go => "go",
            ServiceKind::Java => "java",
            ServiceKind::Ruby => "ruby",
            ServiceKind::Nginx => "nginx",
            ServiceKind::Apache => "apache",
            ServiceKind::Caddy => "caddy",
            ServiceKind::Mysql => "mysql",
            ServiceKind::Mariadb => "mariadb",
            ServiceKind::Postgresql => "postgresql",
            ServiceKind::Mongodb => "mongodb",
            ServiceKind::Redis => "redis",
            ServiceKind::Memcached => "memcached",
            ServiceKind::Dns => "dns",
            ServiceKind::Custom => "custom",
            ServiceKind::Hosts => "hosts",
            ServiceKind::TlsAuthority => "tls-authority",
        }
    }

    /// Human readable name
    pub fn display_name(self) -> &'static str {
        match self {
            ServiceKind::Node => "Node.js",
            ServiceKind::Python => "Python",
            ServiceKind::Php => "PHP",
            ServiceKind::Go => "Go",
            ServiceKind::Java => "Java",
            ServiceKind::Ruby => "Ruby",
            ServiceKind::Nginx => "Nginx",
            ServiceKind::Apache => "Apache",
            ServiceKind::Caddy => "Caddy",
            ServiceKind::Mysql => "MySQL",
            ServiceKind::Mariadb => "MariaDB",
            ServiceKind::Postgresql => "PostgreSQL",
            ServiceKind::Mongodb => "MongoDB",
            ServiceKind::Redis => "Redis",
            ServiceKind::Memcached => "Memcached",
            ServiceKind::Dns => "DNS",
            ServiceKind::Custom => "Custom",
            ServiceKind::Hosts => "Hosts",
            ServiceKind::TlsAuthority => "TLS Authority",
        }
    }

    /// Only custom services may appear more than once per environment
    pub fn allows_multiple(self) -> bool {
        matches!(self, ServiceKind::Custom)
    }

    /// Synthetic kinds have nothing to install; everything else needs the
    /// requested version present locally before activation.
    pub fn requires_installation(self) -> bool {
        !matches!(
            self,
            ServiceKind::Custom | ServiceKind::Hosts | ServiceKind::TlsAuthority
        )
    }

    /// Kinds whose activation edits protected OS state (hosts file, trust
    /// store, resolver configuration).
    pub fn requires_privilege(self) -> bool {
        matches!(
            self,
            ServiceKind::Hosts | ServiceKind::TlsAuthority | ServiceKind::Dns
        )
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ServiceKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| format!("unknown service kind: {}", s))
    }
}

// ── Environment & service payloads ─────────────────────────────────

/// A named bundle of service instances switched active/inactive as a unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub id: EnvironmentId,
    pub name: String,
    #[serde(default)]
    pub status: ActivationStatus,
    #[serde(default)]
    pub sort_order: i64,
}

impl Environment {
    /// A freshly created environment is always inactive
    pub fn new(id: impl Into<EnvironmentId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: ActivationStatus::Inactive,
            sort_order: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// One configured service belonging to exactly one environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstance {
    pub id: ServiceId,
    pub environment_id: EnvironmentId,
    #[serde(rename = "type")]
    pub kind: ServiceKind,
    /// Real version for installable kinds, a placeholder for synthetic ones
    pub version: String,
    #[serde(default)]
    pub status: ActivationStatus,
    /// Type-specific configuration (paths, env overrides, aliases, hosts)
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub sort_order: i64,
}

impl ServiceInstance {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// String metadata value, if present
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Host entries of a host-file-manager instance. Malformed entries are
    /// skipped; other kinds always yield an empty list.
    pub fn host_entries(&self) -> Vec<HostEntry> {
        if self.kind != ServiceKind::Hosts {
            return Vec::new();
        }
        match self.metadata.get(HOSTS_METADATA_KEY) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// A single line managed in the system hosts file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEntry {
    pub ip: String,
    pub hostname: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Partial update of a service instance.
///
/// Activation status is not patchable; it only changes through
/// activate/deactivate calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i64>,
}

impl ServicePatch {
    pub fn is_empty(&self) -> bool {
        self.version.is_none() && self.metadata.is_none() && self.sort_order.is_none()
    }

    /// Apply this patch to a local copy of a service
    pub fn apply_to(&self, service: &mut ServiceInstance) {
        if let Some(ref version) = self.version {
            service.version = version.clone();
        }
        if let Some(ref metadata) = self.metadata {
            service.metadata = metadata.clone();
        }
        if let Some(sort_order) = self.sort_order {
            service.sort_order = sort_order;
        }
    }
}

/// Partial update of an environment (rename / reorder)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i64>,
}

/// A service that failed while the backend (de)activated its environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceFailure {
    pub service_id: ServiceId,
    pub kind: ServiceKind,
    pub message: String,
}

/// Optional detail returned by environment activation/deactivation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentActivation {
    #[serde(default)]
    pub failed_services: Vec<ServiceFailure>,
}

// ── Response envelope ──────────────────────────────────────────────

/// Machine-readable failure classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    AuthenticationFailed,
    NotFound,
    Conflict,
    NotInstalled,
    Internal,
}

/// `{success, message?, code?, data?}` envelope returned by every call.
///
/// `success == false` always carries a human readable message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> GatewayResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: None,
            code: None,
            data: Some(data),
        }
    }

    pub fn ok_empty() -> Self {
        Self {
            success: true,
            message: None,
            code: None,
            data: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            code: None,
            data: None,
        }
    }

    pub fn fail_with(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            code: Some(code),
            data: None,
        }
    }

    pub fn is_auth_failure(&self) -> bool {
        !self.success && self.code == Some(ErrorCode::AuthenticationFailed)
    }

    /// Failure message, with a fallback for backends that omit it
    pub fn failure_message(&self) -> String {
        self.message
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| "backend reported failure without a message".to_string())
    }
}

// ── Requests ───────────────────────────────────────────────────────

/// Every call that can leave the app towards the backend.
///
/// Privileged variants carry the session credential; it is never rendered
/// by `Debug`.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "method",
    content = "params",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum GatewayRequest {
    ListEnvironments,
    CreateEnvironment {
        name: String,
    },
    UpdateEnvironment {
        id: EnvironmentId,
        patch: EnvironmentPatch,
    },
    DeleteEnvironment {
        id: EnvironmentId,
    },
    ListServices {
        environment_id: EnvironmentId,
    },
    CreateService {
        environment_id: EnvironmentId,
        kind: ServiceKind,
        version: String,
    },
    UpdateService {
        environment_id: EnvironmentId,
        id: ServiceId,
        patch: ServicePatch,
    },
    DeleteService {
        environment_id: EnvironmentId,
        id: ServiceId,
    },
    ActivateService {
        environment_id: EnvironmentId,
        service: ServiceInstance,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        credential: Option<String>,
    },
    DeactivateService {
        environment_id: EnvironmentId,
        service: ServiceInstance,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        credential: Option<String>,
    },
    ActivateEnvironment {
        environment: Environment,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        credential: Option<String>,
    },
    DeactivateEnvironment {
        environment: Environment,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        credential: Option<String>,
    },
    StartService {
        environment_id: EnvironmentId,
        id: ServiceId,
    },
    StopService {
        environment_id: EnvironmentId,
        id: ServiceId,
    },
    RestartService {
        environment_id: EnvironmentId,
        id: ServiceId,
    },
    ServiceRuntimeStatus {
        environment_id: EnvironmentId,
        id: ServiceId,
    },
    InstalledVersions {
        kind: ServiceKind,
    },
}

impl GatewayRequest {
    /// Wire method name
    pub fn method(&self) -> &'static str {
        match self {
            GatewayRequest::ListEnvironments => "listEnvironments",
            GatewayRequest::CreateEnvironment { .. } => "createEnvironment",
            GatewayRequest::UpdateEnvironment { .. } => "updateEnvironment",
            GatewayRequest::DeleteEnvironment { .. } => "deleteEnvironment",
            GatewayRequest::ListServices { .. } => "listServices",
            GatewayRequest::CreateService { .. } => "createService",
            GatewayRequest::UpdateService { .. } => "updateService",
            GatewayRequest::DeleteService { .. } => "deleteService",
            GatewayRequest::ActivateService { .. } => "activateService",
            GatewayRequest::DeactivateService { .. } => "deactivateService",
            GatewayRequest::ActivateEnvironment { .. } => "activateEnvironment",
            GatewayRequest::DeactivateEnvironment { .. } => "deactivateEnvironment",
            GatewayRequest::StartService { .. } => "startService",
            GatewayRequest::StopService { .. } => "stopService",
            GatewayRequest::RestartService { .. } => "restartService",
            GatewayRequest::ServiceRuntimeStatus { .. } => "serviceRuntimeStatus",
            GatewayRequest::InstalledVersions { .. } => "installedVersions",
        }
    }

    /// Credential attached to a privileged request, if any
    pub fn credential(&self) -> Option<&str> {
        match self {
            GatewayRequest::ActivateService { credential, .. }
            | GatewayRequest::DeactivateService { credential, .. }
            | GatewayRequest::ActivateEnvironment { credential, .. }
            | GatewayRequest::DeactivateEnvironment { credential, .. } => credential.as_deref(),
            _ => None,
        }
    }

    /// Target environment id, when the request names one
    pub fn environment_id(&self) -> Option<&str> {
        match self {
            GatewayRequest::UpdateEnvironment { id, .. }
            | GatewayRequest::DeleteEnvironment { id } => Some(id),
            GatewayRequest::ListServices { environment_id }
            | GatewayRequest::CreateService { environment_id, .. }
            | GatewayRequest::UpdateService { environment_id, .. }
            | GatewayRequest::DeleteService { environment_id, .. }
            | GatewayRequest::ActivateService { environment_id, .. }
            | GatewayRequest::DeactivateService { environment_id, .. }
            | GatewayRequest::StartService { environment_id, .. }
            | GatewayRequest::StopService { environment_id, .. }
            | GatewayRequest::RestartService { environment_id, .. }
            | GatewayRequest::ServiceRuntimeStatus { environment_id, .. } => Some(environment_id),
            GatewayRequest::ActivateEnvironment { environment, .. }
            | GatewayRequest::DeactivateEnvironment { environment, .. } => Some(&environment.id),
            GatewayRequest::ListEnvironments
            | GatewayRequest::CreateEnvironment { .. }
            | GatewayRequest::InstalledVersions { .. } => None,
        }
    }
}

impl fmt::Debug for GatewayRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("GatewayRequest");
        s.field("method", &self.method());
        if let Some(env) = self.environment_id() {
            s.field("environment_id", &env);
        }
        if self.credential().is_some() {
            s.field("credential", &"<redacted>");
        }
        s.finish()
    }
}

// ── Frames ─────────────────────────────────────────────────────────
//
// Every WS text frame is a JSON object. App→Backend: {seq, request}.
// Backend→App: {seq, response}, echoing the seq of the request.
// seq is never 0.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub seq: u64,
    pub request: GatewayRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub seq: u64,
    pub response: GatewayResponse<Value>,
}

/// Encode a frame as a JSON text payload
pub fn encode_frame<T: Serialize>(frame: &T) -> serde_json::Result<String> {
    serde_json::to_string(frame)
}

/// Decode a request frame. Returns None for malformed frames or seq 0.
pub fn decode_request_frame(text: &str) -> Option<RequestFrame> {
    serde_json::from_str::<RequestFrame>(text)
        .ok()
        .filter(|frame| frame.seq != 0)
}

/// Decode a response frame. Returns None for malformed frames or seq 0.
pub fn decode_response_frame(text: &str) -> Option<ResponseFrame> {
    serde_json::from_str::<ResponseFrame>(text)
        .ok()
        .filter(|frame| frame.seq != 0)
}
